use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::{pipeline::FrameOutput, PipelineError, Result};

/// Configuration options for the recording subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub output_path: String,
    pub fps: u32,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_path: String::new(),
            fps: 60,
        }
    }
}

/// Sink that receives processed frames while a recording is active.
pub trait Recorder: Send {
    fn is_recording(&self) -> bool;

    fn record_frame(&mut self, frame: &FrameOutput<'_>) -> Result<()>;
}

/// Encoder or file backend a [`RecordingSession`] hands frames to.
pub trait FrameWriter: Send {
    fn write_frame(&mut self, frame: &FrameOutput<'_>) -> Result<()>;

    /// Flushes and closes the output. Called once per session.
    fn finish(&mut self) -> Result<()>;
}

/// Recorder that never records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRecorder;

impl Recorder for NoRecorder {
    fn is_recording(&self) -> bool {
        false
    }

    fn record_frame(&mut self, _frame: &FrameOutput<'_>) -> Result<()> {
        Ok(())
    }
}

/// Drives a [`FrameWriter`] between `start` and `stop`.
#[derive(Debug)]
pub struct RecordingSession<W> {
    settings: RecordingSettings,
    writer: W,
    is_recording: bool,
    frames_written: u64,
}

impl<W: FrameWriter> RecordingSession<W> {
    pub fn new(settings: RecordingSettings, writer: W) -> Self {
        Self {
            settings,
            writer,
            is_recording: false,
            frames_written: 0,
        }
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    pub fn start(&mut self) -> Result<()> {
        if self.is_recording {
            return Err(PipelineError::msg("recording already in progress"));
        }
        self.is_recording = true;
        self.frames_written = 0;
        tracing::info!(
            path = %self.settings.output_path,
            fps = self.settings.fps,
            "recording started"
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.is_recording {
            return Ok(());
        }
        self.is_recording = false;
        tracing::info!(frames = self.frames_written, "recording stopped");
        self.writer.finish()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }
}

impl<W: FrameWriter> Recorder for RecordingSession<W> {
    fn is_recording(&self) -> bool {
        self.is_recording
    }

    fn record_frame(&mut self, frame: &FrameOutput<'_>) -> Result<()> {
        if !self.is_recording {
            return Ok(());
        }
        self.writer.write_frame(frame)?;
        self.frames_written += 1;
        Ok(())
    }
}

/// Appends raw frame bytes to a file, one frame after another.
#[derive(Debug)]
pub struct RawFileWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
}

impl RawFileWriter {
    /// The file is created on the first written frame.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            out: None,
        }
    }
}

impl FrameWriter for RawFileWriter {
    fn write_frame(&mut self, frame: &FrameOutput<'_>) -> Result<()> {
        let out = match &mut self.out {
            Some(out) => out,
            slot => slot.insert(BufWriter::new(File::create(&self.path)?)),
        };
        out.write_all(frame.pixels)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}
