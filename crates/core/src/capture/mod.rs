//! The capture device contract and its synthetic backend.

mod synthetic;

use std::fmt;

use serde::Serialize;

use crate::{
    video::{FrameView, PixelFormat, Resolution, SignalState, VideoMode},
    Result,
};

pub use synthetic::{SyntheticCapture, SyntheticControl};

/// What a device reports when its event queue is polled. At most one event
/// is returned per poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureEvent {
    /// Nothing happened but a signal is present.
    None,
    /// Nothing happened and there is no signal; the caller may back off.
    Sleep,
    NewFrame,
    NewVideoMode,
    SignalLost,
    InvalidSignal,
    UnrecoverableError,
}

impl fmt::Display for CaptureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Sleep => "sleep",
            Self::NewFrame => "new frame",
            Self::NewVideoMode => "new video mode",
            Self::SignalLost => "signal lost",
            Self::InvalidSignal => "invalid signal",
            Self::UnrecoverableError => "unrecoverable error",
        };
        f.write_str(name)
    }
}

/// Capabilities every capture backend provides to the propagator.
///
/// The frame buffer follows an acquire/release protocol: after a
/// [`CaptureEvent::NewFrame`] the buffer is readable through
/// [`latest_frame`](Self::latest_frame) until
/// [`mark_frame_processed`](Self::mark_frame_processed) hands it back, and
/// the device does not write into it again before that.
pub trait CaptureDevice: Send {
    fn device_name(&self) -> &str;

    fn signal_state(&self) -> SignalState;

    /// Mode frames are currently captured in.
    fn current_mode(&self) -> VideoMode;

    fn pixel_format(&self) -> PixelFormat;

    fn minimum_resolution(&self) -> Resolution;

    fn maximum_resolution(&self) -> Resolution;

    /// The frame awaiting processing, or `None` once it has been released.
    fn latest_frame(&self) -> Option<FrameView<'_>>;

    fn mark_frame_processed(&mut self);

    fn pop_event(&mut self) -> CaptureEvent;

    /// Adopts the mode the source reports, or the forced resolution if one
    /// is pending, and returns it.
    fn apply_new_mode(&mut self) -> VideoMode;

    /// Asks the device to capture at `resolution` from the next mode
    /// adoption on. Returns the mode that will be adopted.
    fn force_resolution(&mut self, resolution: Resolution) -> Result<VideoMode>;

    /// Shifts the capture window by the given number of pixels.
    fn adjust_alignment(&mut self, horizontal: i32, vertical: i32) -> Result<()>;

    /// Captures the device could not deliver because the previous frame
    /// had not been released yet.
    fn missed_frame_count(&self) -> u64;
}
