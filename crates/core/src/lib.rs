//! Core library of the capture pipeline.
//!
//! A capture device reports signal and mode changes and delivers frames. The
//! [`EventPropagator`] turns those events into calls on the downstream sinks
//! and runs every frame through the filter chains resolved from a
//! [`FilterGraph`].

pub mod capture;
pub mod config;
pub mod error;
pub mod filter;
pub mod graph;
pub mod output;
pub mod pipeline;
pub mod propagate;
pub mod record;
pub mod video;

#[cfg(test)]
mod testing;

pub use capture::{CaptureDevice, CaptureEvent, SyntheticCapture, SyntheticControl};
pub use config::{AppConfig, CaptureConfig, PipelineConfig};
pub use error::{GraphError, PipelineError, RejectReason, Result, TransformError};
pub use filter::{FilterKind, FilterParams, ParamBlock, FILTER_PARAMS_LENGTH};
pub use graph::{
    ChainDefect, ChainLink, ChainReport, FilterChain, FilterChainResolver, FilterGraph, FilterNode,
    LinkBehavior, NodeId,
};
pub use output::{Display, Scaler, SignalObserver, Sinks};
pub use pipeline::{ActiveChains, DroppedFrame, FrameOutput, FrameProcessor};
pub use propagate::{EventPropagator, PipelineStats};
pub use record::{
    FrameWriter, NoRecorder, RawFileWriter, Recorder, RecordingSession, RecordingSettings,
};
pub use video::{
    CaptureSignal, CapturedFrame, FrameView, PixelFormat, RefreshRate, Resolution, SignalState,
    SignalTracker, VideoMode,
};
