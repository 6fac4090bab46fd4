use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    record::RecordingSettings,
    video::{PixelFormat, Resolution, VideoMode},
    Result,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub recording: RecordingSettings,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing sections and fields keep their
    /// defaults.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Configuration of the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Mode the source produces until told otherwise.
    pub source_mode: VideoMode,
    pub minimum_resolution: Resolution,
    pub maximum_resolution: Resolution,
    pub pixel_format: PixelFormat,
    /// Whether the synthetic source is connected at start-up.
    pub start_with_signal: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source_mode: VideoMode::default(),
            minimum_resolution: Resolution::new(160, 120),
            maximum_resolution: Resolution::new(1920, 1200),
            pixel_format: PixelFormat::Rgb888,
            start_with_signal: true,
        }
    }
}

/// Configuration of frame processing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// When false frames are forwarded without running any chain.
    pub filtering_enabled: bool,
    /// Largest frame the working buffers are sized for up front.
    pub max_working_resolution: Resolution,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            filtering_enabled: true,
            max_working_resolution: Resolution::new(1920, 1200),
        }
    }
}
