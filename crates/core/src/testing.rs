//! Sinks that log every call so tests can assert on side-effect order.

use std::sync::{Arc, Mutex};

use crate::{
    graph::NodeId,
    output::{Display, Scaler, SignalObserver, Sinks},
    pipeline::FrameOutput,
    record::Recorder,
    video::{CaptureSignal, SignalState, VideoMode},
    Result,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SinkCall {
    SetOutputBaseResolution(VideoMode),
    ScaleFrame {
        mode: VideoMode,
        chain: Option<NodeId>,
        pixels: Vec<u8>,
    },
    IndicateInvalidSignal,
    IndicateNoSignal,
    RecordFrame,
    RequestRefresh,
    NotifySignalStateChanged { severe: bool },
    UpdateSignalInfo { state: SignalState, woke_up: bool },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<SinkCall>>>);

impl CallLog {
    pub(crate) fn calls(&self) -> Vec<SinkCall> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, call: SinkCall) {
        self.0.lock().unwrap().push(call);
    }
}

struct LoggingSink {
    log: CallLog,
    recording: bool,
}

impl Scaler for LoggingSink {
    fn set_output_base_resolution(&mut self, mode: VideoMode) {
        self.log.push(SinkCall::SetOutputBaseResolution(mode));
    }

    fn scale_frame(&mut self, frame: &FrameOutput<'_>) {
        self.log.push(SinkCall::ScaleFrame {
            mode: frame.mode,
            chain: frame.chain,
            pixels: frame.pixels.to_vec(),
        });
    }

    fn indicate_invalid_signal(&mut self) {
        self.log.push(SinkCall::IndicateInvalidSignal);
    }

    fn indicate_no_signal(&mut self) {
        self.log.push(SinkCall::IndicateNoSignal);
    }
}

impl Display for LoggingSink {
    fn request_refresh(&mut self) {
        self.log.push(SinkCall::RequestRefresh);
    }
}

impl SignalObserver for LoggingSink {
    fn notify_signal_state_changed(&mut self, severe: bool) {
        self.log.push(SinkCall::NotifySignalStateChanged { severe });
    }

    fn update_signal_info(&mut self, signal: &CaptureSignal) {
        self.log.push(SinkCall::UpdateSignalInfo {
            state: signal.state,
            woke_up: signal.woke_up,
        });
    }
}

impl Recorder for LoggingSink {
    fn is_recording(&self) -> bool {
        self.recording
    }

    fn record_frame(&mut self, _frame: &FrameOutput<'_>) -> Result<()> {
        self.log.push(SinkCall::RecordFrame);
        Ok(())
    }
}

/// Sinks sharing one call log. `recording` sets what the recorder reports.
pub(crate) fn recording_sinks(recording: bool) -> (Sinks, CallLog) {
    let log = CallLog::default();
    let sink = |recording| LoggingSink {
        log: log.clone(),
        recording,
    };

    let sinks = Sinks::new(sink(false), sink(false), sink(false)).with_recorder(sink(recording));
    (sinks, log)
}
