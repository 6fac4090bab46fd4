//! Reacts to capture device events and keeps every downstream consumer
//! consistent with the current video mode and filter chains.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use serde::Serialize;

use crate::{
    capture::{CaptureDevice, CaptureEvent},
    config::PipelineConfig,
    error::RejectReason,
    graph::{ChainDefect, ChainReport, FilterChainResolver, FilterGraph},
    output::Sinks,
    pipeline::{ActiveChains, FrameProcessor},
    video::{Resolution, SignalState, SignalTracker, VideoMode},
    PipelineError, Result,
};

/// Counters for everything the pipeline contains instead of failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub frames_recorded: u64,
    pub record_failures: u64,
    /// Captures the device skipped because a frame was still in use.
    pub frames_missed: u64,
    pub rejected_requests: u64,
    /// Defective chains in the most recently activated graph.
    pub defective_chains: u64,
}

/// Which no-signal marker the scaler is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalIndicator {
    None,
    InvalidSignal,
    NoSignal,
}

struct PropagatorState {
    device: Box<dyn CaptureDevice>,
    sinks: Sinks,
    processor: FrameProcessor,
    chains: Arc<ActiveChains>,
    signal: SignalTracker,
    indicator: SignalIndicator,
    stats: PipelineStats,
}

/// Drives a capture device and its sinks.
///
/// The device, the sinks, the active chains and the frame processor sit
/// behind one lock, so a mode change, a forced resolution or a chain swap
/// can never interleave with a frame being processed. Clones share the same
/// state.
#[derive(Clone)]
pub struct EventPropagator {
    shared: Arc<Mutex<PropagatorState>>,
    halted: Arc<AtomicBool>,
}

impl EventPropagator {
    pub fn new(
        device: impl CaptureDevice + 'static,
        sinks: Sinks,
        config: &PipelineConfig,
    ) -> Self {
        tracing::info!(
            device = device.device_name(),
            format = %device.pixel_format(),
            minimum = %device.minimum_resolution(),
            maximum = %device.maximum_resolution(),
            "attached capture device"
        );

        let state = PropagatorState {
            device: Box::new(device),
            sinks,
            processor: FrameProcessor::new(config),
            chains: Arc::new(ActiveChains::empty()),
            signal: SignalTracker::new(),
            indicator: SignalIndicator::None,
            stats: PipelineStats::default(),
        };

        Self {
            shared: Arc::new(Mutex::new(state)),
            halted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pops one event off the device queue and runs its handler.
    pub fn service_next_event(&self) -> Result<CaptureEvent> {
        let mut state = self.enter()?;
        let event = state.device.pop_event();

        match event {
            CaptureEvent::NewVideoMode => state.new_video_mode(),
            CaptureEvent::SignalLost => state.no_signal(),
            CaptureEvent::InvalidSignal => state.invalid_signal(),
            CaptureEvent::NewFrame => state.new_frame(),
            CaptureEvent::UnrecoverableError => {
                drop(state);
                self.on_unrecoverable_error()?;
            }
            CaptureEvent::None | CaptureEvent::Sleep => {}
        }

        Ok(event)
    }

    pub fn on_new_video_mode(&self) -> Result<()> {
        self.enter()?.new_video_mode();
        Ok(())
    }

    pub fn on_invalid_signal(&self) -> Result<()> {
        self.enter()?.invalid_signal();
        Ok(())
    }

    pub fn on_no_signal(&self) -> Result<()> {
        self.enter()?.no_signal();
        Ok(())
    }

    pub fn on_gained_signal(&self) -> Result<()> {
        self.enter()?.gained_signal();
        Ok(())
    }

    pub fn on_new_frame(&self) -> Result<()> {
        self.enter()?.new_frame();
        Ok(())
    }

    /// Halts the propagator. Every later call fails with
    /// [`PipelineError::Halted`].
    pub fn on_unrecoverable_error(&self) -> Result<()> {
        if self.halted.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Halted);
        }
        tracing::error!("capture device met with an unrecoverable error, shutting down");
        Ok(())
    }

    /// Asks the device to capture at `resolution` and, if it agrees,
    /// propagates the resulting mode change. Returns the adopted mode.
    pub fn request_forced_resolution(&self, resolution: Resolution) -> Result<VideoMode> {
        self.enter()?.force_resolution(resolution)
    }

    pub fn adjust_capture_alignment(&self, horizontal: i32, vertical: i32) -> Result<()> {
        self.enter()?.device.adjust_alignment(horizontal, vertical)
    }

    /// Resolves `graph` and swaps the result in as the active chain set.
    pub fn activate_graph(&self, graph: &FilterGraph) -> Result<ChainReport> {
        let report = FilterChainResolver::resolve(graph);
        self.install(&report)?;
        Ok(report)
    }

    /// Like [`activate_graph`](Self::activate_graph) but skips graphs the
    /// resolver has already seen. Returns `None` when nothing changed.
    pub fn refresh_graph(
        &self,
        resolver: &mut FilterChainResolver,
        graph: &FilterGraph,
    ) -> Result<Option<ChainReport>> {
        match resolver.refresh(graph) {
            Some(report) => {
                self.install(&report)?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// Swaps in the chains of `report` unless a later revision of the same
    /// graph is already active.
    fn install(&self, report: &ChainReport) -> Result<()> {
        let chains = Arc::new(ActiveChains::from_report(report));
        let mut state = self.enter()?;

        if state.chains.is_newer_than(report) {
            tracing::debug!(
                revision = report.revision,
                active = ?state.chains.revision(),
                "ignoring filter chains resolved from an older graph revision"
            );
            return Ok(());
        }

        for defect in &report.defects {
            match defect {
                ChainDefect::Cycle { input_gate, at } => {
                    tracing::warn!(
                        %input_gate,
                        %at,
                        "filter chain loops back on itself, not activating it"
                    )
                }
                ChainDefect::Unterminated { input_gate, last } => {
                    tracing::warn!(
                        %input_gate,
                        %last,
                        "filter chain never reaches an output gate, not activating it"
                    )
                }
            }
        }

        state.processor.retain(&chains);
        state.chains = chains;
        state.stats.defective_chains = report.defects.len() as u64;

        tracing::debug!(
            revision = report.revision,
            chains = report.chains.len(),
            "activated filter chains"
        );
        Ok(())
    }

    /// Snapshot of the chains frames are currently routed through.
    pub fn active_chains(&self) -> Result<Arc<ActiveChains>> {
        Ok(Arc::clone(&self.lock()?.chains))
    }

    pub fn set_filtering_enabled(&self, enabled: bool) -> Result<()> {
        self.enter()?.processor.set_filtering_enabled(enabled);
        Ok(())
    }

    /// Runs `f` with exclusive access to the sinks, e.g. to start a
    /// recording.
    pub fn with_sinks<R>(&self, f: impl FnOnce(&mut Sinks) -> R) -> Result<R> {
        Ok(f(&mut self.lock()?.sinks))
    }

    pub fn current_mode(&self) -> Result<VideoMode> {
        Ok(self.lock()?.device.current_mode())
    }

    pub fn stats(&self) -> Result<PipelineStats> {
        let state = self.lock()?;
        Ok(PipelineStats {
            frames_missed: state.device.missed_frame_count(),
            ..state.stats
        })
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Flag set once the propagator halts, for event loops to poll.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.halted)
    }

    fn enter(&self) -> Result<MutexGuard<'_, PropagatorState>> {
        if self.is_halted() {
            return Err(PipelineError::Halted);
        }
        self.lock()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PropagatorState>> {
        self.shared
            .lock()
            .map_err(|_| PipelineError::Poisoned("capture pipeline state"))
    }
}

impl std::fmt::Debug for EventPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPropagator")
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}

impl PropagatorState {
    fn new_video_mode(&mut self) {
        let signal = self.signal.observe(self.device.signal_state());
        if signal.state == SignalState::NoSignal {
            tracing::debug!("new video mode reported without a signal, ignoring it");
            return;
        }

        if signal.woke_up {
            self.gained_signal();
        }

        let mode = self.device.apply_new_mode();
        if signal.state.is_present() {
            self.indicator = SignalIndicator::None;
        }
        self.sinks.observer.update_signal_info(&signal);
        self.sinks.scaler.set_output_base_resolution(mode);
        self.sinks.display.request_refresh();

        tracing::info!(%mode, "capture video mode changed");
    }

    fn invalid_signal(&mut self) {
        self.signal.observe(SignalState::InvalidSignal);

        if self.indicator != SignalIndicator::InvalidSignal {
            self.indicator = SignalIndicator::InvalidSignal;
            self.sinks.observer.notify_signal_state_changed(true);
            self.sinks.scaler.indicate_invalid_signal();
            tracing::info!("capture signal is invalid");
        }
        self.sinks.display.request_refresh();
    }

    fn no_signal(&mut self) {
        self.signal.observe(SignalState::NoSignal);

        if self.indicator != SignalIndicator::NoSignal {
            self.indicator = SignalIndicator::NoSignal;
            self.sinks.observer.notify_signal_state_changed(true);
            self.sinks.scaler.indicate_no_signal();
            tracing::info!("capture signal lost");
        }
        self.sinks.display.request_refresh();
    }

    fn gained_signal(&mut self) {
        self.sinks.observer.notify_signal_state_changed(false);
        tracing::info!("capture signal gained");
    }

    fn new_frame(&mut self) {
        let chains = Arc::clone(&self.chains);
        let Some(frame) = self.device.latest_frame() else {
            tracing::debug!("new frame reported but the device holds no unprocessed frame");
            return;
        };

        match self.processor.process(frame, chains.select(&frame.mode)) {
            Ok(output) => {
                self.stats.frames_processed += 1;
                self.sinks.scaler.scale_frame(&output);

                if self.sinks.recorder.is_recording() {
                    match self.sinks.recorder.record_frame(&output) {
                        Ok(()) => self.stats.frames_recorded += 1,
                        Err(error) => {
                            self.stats.record_failures += 1;
                            tracing::warn!(%error, "failed to record frame");
                        }
                    }
                }
            }
            Err(dropped) => {
                self.stats.frames_dropped += 1;
                tracing::warn!(
                    node = %dropped.node,
                    kind = %dropped.kind,
                    error = %dropped.error,
                    "dropping frame"
                );
            }
        }

        self.device.mark_frame_processed();
        self.sinks.display.request_refresh();
    }

    fn force_resolution(&mut self, resolution: Resolution) -> Result<VideoMode> {
        if self.device.signal_state() == SignalState::NoSignal {
            tracing::debug!(
                width = resolution.width,
                height = resolution.height,
                "ignoring forced resolution while the capture device has no signal"
            );
            return Err(self.reject(RejectReason::NoSignal));
        }

        let minimum = self.device.minimum_resolution();
        let maximum = self.device.maximum_resolution();
        if !resolution.within(minimum, maximum) {
            tracing::warn!(
                width = resolution.width,
                height = resolution.height,
                %minimum,
                %maximum,
                "ignoring forced resolution the capture device does not support"
            );
            return Err(self.reject(RejectReason::OutOfBounds {
                requested: resolution,
                minimum,
                maximum,
            }));
        }

        if let Err(error) = self.device.force_resolution(resolution) {
            tracing::warn!(
                width = resolution.width,
                height = resolution.height,
                %error,
                "capture device failed to apply the forced resolution"
            );
            return Err(self.reject(RejectReason::DeviceRefused(resolution)));
        }

        self.new_video_mode();
        Ok(self.device.current_mode())
    }

    fn reject(&mut self, reason: RejectReason) -> PipelineError {
        self.stats.rejected_requests += 1;
        PipelineError::Rejected(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        capture::{SyntheticCapture, SyntheticControl},
        config::CaptureConfig,
        filter::{FilterKind, FilterParams, FlipAxis, FlipParams, GateParams},
        testing::{recording_sinks, CallLog, SinkCall},
        video::RefreshRate,
    };

    fn propagator(config: &CaptureConfig) -> (EventPropagator, SyntheticControl, CallLog) {
        let (device, control) = SyntheticCapture::new(config);
        let (sinks, log) = recording_sinks(false);
        let propagator = EventPropagator::new(device, sinks, &PipelineConfig::default());
        (propagator, control, log)
    }

    fn open_gate() -> FilterParams {
        FilterParams::InputGate(GateParams { width: 0, height: 0 })
    }

    fn running() -> (EventPropagator, SyntheticControl, CallLog) {
        let (propagator, control, log) = propagator(&CaptureConfig::default());
        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::NewVideoMode);
        log.clear();
        (propagator, control, log)
    }

    #[test]
    fn first_mode_after_start_up_wakes_the_signal() {
        let (propagator, _control, log) = propagator(&CaptureConfig::default());

        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::NewVideoMode);

        let mode = VideoMode::default();
        assert_eq!(
            log.calls(),
            vec![
                SinkCall::NotifySignalStateChanged { severe: false },
                SinkCall::UpdateSignalInfo {
                    state: SignalState::Present(mode),
                    woke_up: true
                },
                SinkCall::SetOutputBaseResolution(mode),
                SinkCall::RequestRefresh,
            ]
        );
    }

    #[test]
    fn frames_are_scaled_then_released_then_refreshed() {
        let (propagator, _control, log) = running();

        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::NewFrame);
        let calls = log.calls();
        assert!(matches!(calls[0], SinkCall::ScaleFrame { .. }));
        assert_eq!(calls[1], SinkCall::RequestRefresh);
        assert_eq!(calls.len(), 2);

        // The buffer was released, so the next capture is not missed.
        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::NewFrame);
        let stats = propagator.stats().unwrap();
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.frames_missed, 0);
    }

    #[test]
    fn recording_happens_between_scaling_and_refresh() {
        let (device, _control) = SyntheticCapture::new(&CaptureConfig::default());
        let (sinks, log) = recording_sinks(true);
        let propagator = EventPropagator::new(device, sinks, &PipelineConfig::default());
        propagator.service_next_event().unwrap();
        log.clear();

        propagator.service_next_event().unwrap();
        let calls = log.calls();
        assert!(matches!(calls[0], SinkCall::ScaleFrame { .. }));
        assert_eq!(calls[1], SinkCall::RecordFrame);
        assert_eq!(calls[2], SinkCall::RequestRefresh);
        assert_eq!(propagator.stats().unwrap().frames_recorded, 1);
    }

    #[test]
    fn losing_the_signal_is_only_announced_once() {
        let (propagator, control, log) = running();
        control.lose_signal().unwrap();

        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::SignalLost);
        propagator.on_no_signal().unwrap();

        assert_eq!(
            log.calls(),
            vec![
                SinkCall::NotifySignalStateChanged { severe: true },
                SinkCall::IndicateNoSignal,
                SinkCall::RequestRefresh,
                SinkCall::RequestRefresh,
            ]
        );
        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::Sleep);
    }

    #[test]
    fn invalid_signal_is_indicated_then_recovers_with_a_wake_up() {
        let (propagator, control, log) = running();
        control.invalidate_signal().unwrap();
        propagator.service_next_event().unwrap();
        propagator.on_invalid_signal().unwrap();

        assert_eq!(
            log.calls(),
            vec![
                SinkCall::NotifySignalStateChanged { severe: true },
                SinkCall::IndicateInvalidSignal,
                SinkCall::RequestRefresh,
                SinkCall::RequestRefresh,
            ]
        );

        log.clear();
        control.restore_signal(VideoMode::default()).unwrap();
        propagator.service_next_event().unwrap();
        assert_eq!(log.calls()[0], SinkCall::NotifySignalStateChanged { severe: false });
    }

    #[test]
    fn forced_resolution_propagates_a_mode_change() {
        let (propagator, control, log) = running();

        let mode = propagator
            .request_forced_resolution(Resolution::new(800, 600))
            .unwrap();
        assert_eq!(mode.resolution, Resolution::new(800, 600));
        assert_eq!(propagator.current_mode().unwrap(), mode);
        assert_eq!(control.force_requests().unwrap(), 1);

        let calls = log.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[0], SinkCall::UpdateSignalInfo { woke_up: false, .. }));
        assert_eq!(calls[1], SinkCall::SetOutputBaseResolution(mode));
        assert_eq!(calls[2], SinkCall::RequestRefresh);
    }

    #[test]
    fn forced_resolution_is_rejected_without_a_signal() {
        let config = CaptureConfig {
            start_with_signal: false,
            ..Default::default()
        };
        let (propagator, control, log) = propagator(&config);

        let err = propagator
            .request_forced_resolution(Resolution::new(800, 600))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Rejected(RejectReason::NoSignal)));
        assert_eq!(control.force_requests().unwrap(), 0);
        assert!(log.calls().is_empty());
        assert_eq!(propagator.stats().unwrap().rejected_requests, 1);
    }

    #[test]
    fn forced_resolution_is_rejected_out_of_bounds() {
        let (propagator, control, log) = running();
        let before = propagator.current_mode().unwrap();

        for resolution in [Resolution::new(100, 480), Resolution::new(640, 1300)] {
            let err = propagator.request_forced_resolution(resolution).unwrap_err();
            assert!(matches!(
                err,
                PipelineError::Rejected(RejectReason::OutOfBounds { .. })
            ));
        }

        assert_eq!(propagator.current_mode().unwrap(), before);
        assert_eq!(control.force_requests().unwrap(), 0);
        assert!(log.calls().is_empty());
    }

    #[test]
    fn device_refusals_leave_the_mode_alone() {
        let (propagator, control, log) = running();
        control.refuse_forced_resolutions(true).unwrap();

        let err = propagator
            .request_forced_resolution(Resolution::new(800, 600))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Rejected(RejectReason::DeviceRefused(_))));
        assert_eq!(propagator.current_mode().unwrap(), VideoMode::default());
        assert!(log.calls().is_empty());
    }

    #[test]
    fn unrecoverable_errors_halt_everything() {
        let (propagator, control, log) = running();
        control.raise_unrecoverable_error().unwrap();

        assert_eq!(
            propagator.service_next_event().unwrap(),
            CaptureEvent::UnrecoverableError
        );
        assert!(propagator.is_halted());
        assert!(propagator.shutdown_flag().load(Ordering::SeqCst));

        assert!(matches!(propagator.service_next_event(), Err(PipelineError::Halted)));
        assert!(matches!(propagator.on_new_frame(), Err(PipelineError::Halted)));
        assert!(matches!(
            propagator.request_forced_resolution(Resolution::new(800, 600)),
            Err(PipelineError::Halted)
        ));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn activated_chains_filter_frames() {
        let (propagator, _control, log) = running();

        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);
        let flip = graph
            .add_node_with_params(FilterParams::Flip(FlipParams { axis: FlipAxis::Both }))
            .unwrap();
        let output = graph.add_node(FilterKind::OutputGate);
        graph.connect(input, flip).unwrap();
        graph.connect(flip, output).unwrap();

        let report = propagator.activate_graph(&graph).unwrap();
        assert_eq!(report.chains.len(), 1);
        assert_eq!(propagator.active_chains().unwrap().len(), 1);

        propagator.service_next_event().unwrap();
        match &log.calls()[0] {
            SinkCall::ScaleFrame { chain, .. } => assert_eq!(*chain, Some(input)),
            other => panic!("expected a scaled frame, got {other:?}"),
        }
    }

    #[test]
    fn dropped_frames_still_release_the_buffer() {
        let (propagator, _control, log) = running();

        let mut graph = FilterGraph::new();
        let input = graph.add_node_with_params(open_gate()).unwrap();
        let nlm = graph.add_node(FilterKind::DenoiseNlm);
        let output = graph.add_node(FilterKind::OutputGate);
        graph.connect(input, nlm).unwrap();
        graph.connect(nlm, output).unwrap();
        propagator.activate_graph(&graph).unwrap();

        propagator.service_next_event().unwrap();
        assert_eq!(log.calls(), vec![SinkCall::RequestRefresh]);

        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::NewFrame);
        let stats = propagator.stats().unwrap();
        assert_eq!(stats.frames_dropped, 2);
        assert_eq!(stats.frames_processed, 0);
        assert_eq!(stats.frames_missed, 0);
    }

    #[test]
    fn defective_chains_are_counted() {
        let (propagator, _control, _log) = running();

        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);
        let blur = graph.add_node(FilterKind::Blur);
        graph.connect(input, blur).unwrap();

        let report = propagator.activate_graph(&graph).unwrap();
        assert!(report.chains.is_empty());
        assert_eq!(propagator.stats().unwrap().defective_chains, 1);
        assert!(propagator.active_chains().unwrap().is_empty());
    }

    #[test]
    fn refresh_skips_unchanged_graphs() {
        let (propagator, _control, _log) = running();
        let mut resolver = FilterChainResolver::new();
        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);
        let output = graph.add_node(FilterKind::OutputGate);
        graph.connect(input, output).unwrap();

        assert!(propagator.refresh_graph(&mut resolver, &graph).unwrap().is_some());
        assert!(propagator.refresh_graph(&mut resolver, &graph).unwrap().is_none());
        assert_eq!(
            propagator.active_chains().unwrap().revision(),
            Some(graph.revision())
        );
    }

    #[test]
    fn source_mode_changes_reach_the_scaler() {
        let (propagator, control, log) = running();
        let mode = VideoMode::new(1024, 768, 32, RefreshRate::from_hz(70.0));
        control.change_source_mode(mode).unwrap();

        propagator.service_next_event().unwrap();
        assert!(log.calls().contains(&SinkCall::SetOutputBaseResolution(mode)));
        assert_eq!(propagator.current_mode().unwrap(), mode);
    }

    #[test]
    fn alignment_reaches_the_device() {
        let (propagator, control, _log) = running();

        propagator.adjust_capture_alignment(2, -1).unwrap();
        assert_eq!(control.alignment().unwrap(), (2, -1));

        propagator.adjust_capture_alignment(-5, 3).unwrap();
        assert_eq!(control.alignment().unwrap(), (-3, 2));
    }

    #[test]
    fn zero_width_frames_are_dropped_without_halting() {
        let config = CaptureConfig {
            source_mode: VideoMode::new(0, 480, 32, RefreshRate::from_hz(60.0)),
            minimum_resolution: Resolution::new(0, 0),
            ..Default::default()
        };
        let (propagator, _control, _log) = propagator(&config);

        let mut graph = FilterGraph::new();
        let input = graph.add_node_with_params(open_gate()).unwrap();
        let flip = graph
            .add_node_with_params(FilterParams::Flip(FlipParams {
                axis: FlipAxis::Horizontal,
            }))
            .unwrap();
        let output = graph.add_node(FilterKind::OutputGate);
        graph.connect(input, flip).unwrap();
        graph.connect(flip, output).unwrap();
        propagator.activate_graph(&graph).unwrap();

        let events: Vec<CaptureEvent> = (0..3)
            .map(|_| propagator.service_next_event().unwrap())
            .collect();
        assert_eq!(
            events,
            vec![CaptureEvent::NewVideoMode, CaptureEvent::NewFrame, CaptureEvent::NewFrame]
        );

        let stats = propagator.stats().unwrap();
        assert_eq!(stats.frames_dropped, 2);
        assert!(!propagator.is_halted());
        assert!(propagator.current_mode().is_ok());
    }

    #[test]
    fn stale_reports_do_not_replace_newer_chains() {
        let (propagator, _control, _log) = running();

        let mut graph = FilterGraph::new();
        let input = graph.add_node(FilterKind::InputGate);
        let output = graph.add_node(FilterKind::OutputGate);
        graph.connect(input, output).unwrap();
        let stale = FilterChainResolver::resolve(&graph);

        let blur = graph.add_node(FilterKind::Blur);
        graph.disconnect(input, output).unwrap();
        graph.connect(input, blur).unwrap();
        graph.connect(blur, output).unwrap();
        propagator.activate_graph(&graph).unwrap();

        propagator.install(&stale).unwrap();
        let active = propagator.active_chains().unwrap();
        assert_eq!(active.revision(), Some(graph.revision()));
        assert_eq!(active.chains()[0].links().len(), 3);

        // Revisions of another graph are not compared.
        let mut other = FilterGraph::new();
        let input = other.add_node(FilterKind::InputGate);
        let output = other.add_node(FilterKind::OutputGate);
        other.connect(input, output).unwrap();
        assert!(other.revision() < graph.revision());

        propagator.activate_graph(&other).unwrap();
        assert_eq!(propagator.active_chains().unwrap().revision(), Some(other.revision()));
    }

    #[test]
    fn requests_from_another_thread_never_split_a_frame() {
        let config = CaptureConfig {
            source_mode: VideoMode::new(320, 240, 32, RefreshRate::from_hz(60.0)),
            ..Default::default()
        };
        let (propagator, _control, log) = propagator(&config);
        assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::NewVideoMode);

        let controller = propagator.clone();
        let worker = std::thread::spawn(move || -> Result<()> {
            let mut graph = FilterGraph::new();
            let input = graph.add_node_with_params(open_gate())?;
            let flip = graph.add_node_with_params(FilterParams::Flip(FlipParams {
                axis: FlipAxis::Vertical,
            }))?;
            let output = graph.add_node(FilterKind::OutputGate);
            graph.connect(input, flip)?;
            graph.connect(flip, output)?;

            for round in 0..50 {
                let resolution = if round % 2 == 0 {
                    Resolution::new(160, 120)
                } else {
                    Resolution::new(240, 180)
                };
                controller.request_forced_resolution(resolution)?;
                graph.set_enabled(flip, round % 3 != 0)?;
                controller.activate_graph(&graph)?;
            }
            Ok(())
        });

        for _ in 0..100 {
            assert_eq!(propagator.service_next_event().unwrap(), CaptureEvent::NewFrame);
        }
        worker.join().unwrap().unwrap();

        let mut base = None;
        let mut scaled = 0;
        for call in log.calls() {
            match call {
                SinkCall::SetOutputBaseResolution(mode) => base = Some(mode),
                SinkCall::ScaleFrame { mode, pixels, .. } => {
                    let base = base.expect("a mode is announced before any frame");
                    assert_eq!(mode.resolution, base.resolution);
                    assert_eq!(pixels.len(), mode.resolution.pixel_count() * 4);
                    scaled += 1;
                }
                _ => {}
            }
        }
        assert_eq!(scaled, 100);

        let stats = propagator.stats().unwrap();
        assert_eq!(stats.frames_processed, 100);
        assert_eq!(stats.frames_dropped, 0);
        assert_eq!(stats.rejected_requests, 0);
    }
}
