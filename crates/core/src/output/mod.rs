//! Consumers of the propagator's output.

use crate::{
    pipeline::FrameOutput,
    record::{NoRecorder, Recorder},
    video::{CaptureSignal, VideoMode},
};

/// Converts processed frames to the output surface.
pub trait Scaler: Send {
    /// Called whenever the capture mode changes.
    fn set_output_base_resolution(&mut self, mode: VideoMode);

    fn scale_frame(&mut self, frame: &FrameOutput<'_>);

    fn indicate_invalid_signal(&mut self);

    fn indicate_no_signal(&mut self);
}

/// The presentation surface.
pub trait Display: Send {
    fn request_refresh(&mut self);
}

/// Mirrors of the signal state kept by the user interface.
pub trait SignalObserver: Send {
    /// `severe` is set when the signal was lost or became unusable.
    fn notify_signal_state_changed(&mut self, severe: bool);

    fn update_signal_info(&mut self, signal: &CaptureSignal);
}

/// Every downstream collaborator of an
/// [`EventPropagator`](crate::propagate::EventPropagator).
pub struct Sinks {
    pub scaler: Box<dyn Scaler>,
    pub recorder: Box<dyn Recorder>,
    pub display: Box<dyn Display>,
    pub observer: Box<dyn SignalObserver>,
}

impl Sinks {
    pub fn new(
        scaler: impl Scaler + 'static,
        display: impl Display + 'static,
        observer: impl SignalObserver + 'static,
    ) -> Self {
        Self {
            scaler: Box::new(scaler),
            recorder: Box::new(NoRecorder),
            display: Box::new(display),
            observer: Box::new(observer),
        }
    }

    pub fn with_recorder(mut self, recorder: impl Recorder + 'static) -> Self {
        self.recorder = Box::new(recorder);
        self
    }
}

impl std::fmt::Debug for Sinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sinks")
            .field("recording", &self.recorder.is_recording())
            .finish_non_exhaustive()
    }
}
