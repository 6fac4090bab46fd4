use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use capture_pipeline_core::{
    filter::GateParams, AppConfig, CaptureEvent, CaptureSignal, EventPropagator,
    FilterChainResolver, FilterGraph, FilterKind, FilterParams, FrameOutput, PipelineError,
    RawFileWriter, Recorder, RecordingSession, Resolution, Scaler, Sinks, SyntheticCapture,
    VideoMode,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Consecutive idle polls without a signal before `run` gives up.
const MAX_IDLE_POLLS: u32 = 200;

fn main() -> capture_pipeline_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            frames,
            force,
            bypass_blur,
        } => run(config.as_ref(), frames, force, bypass_blur),
        Commands::Filters => print_filters(),
    }
}

fn run(
    config: Option<&PathBuf>,
    frames: u64,
    force: Option<Resolution>,
    bypass_blur: bool,
) -> capture_pipeline_core::Result<()> {
    let config = match config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::live_defaults(),
    };
    tracing::info!(mode = %config.capture.source_mode, "starting synthetic capture");

    let (device, _control) = SyntheticCapture::new(&config.capture);

    let mut sinks = Sinks::new(LogScaler::default(), LogDisplay, LogObserver);
    let session = if config.recording.output_path.is_empty() {
        None
    } else {
        let writer = RawFileWriter::new(&config.recording.output_path);
        let mut session = RecordingSession::new(config.recording.clone(), writer);
        session.start()?;
        let session = Arc::new(Mutex::new(session));
        sinks = sinks.with_recorder(SharedRecorder(Arc::clone(&session)));
        Some(session)
    };

    let propagator = EventPropagator::new(device, sinks, &config.pipeline);

    let mut graph = FilterGraph::new();
    let input = graph.add_node_with_params(FilterParams::InputGate(GateParams {
        width: 0,
        height: 0,
    }))?;
    let blur = graph.add_node(FilterKind::Blur);
    let output = graph.add_node(FilterKind::OutputGate);
    graph.connect(input, blur)?;
    graph.connect(blur, output)?;
    if bypass_blur {
        graph.set_enabled(blur, false)?;
    }

    let mut resolver = FilterChainResolver::new();
    propagator.refresh_graph(&mut resolver, &graph)?;

    let mut processed = 0;
    let mut idle = 0;
    let mut pending_force = force;

    while processed < frames && !propagator.is_halted() {
        match propagator.service_next_event()? {
            CaptureEvent::NewFrame => {
                processed += 1;
                idle = 0;
            }
            CaptureEvent::Sleep => {
                idle += 1;
                if idle >= MAX_IDLE_POLLS {
                    tracing::warn!("no capture signal, giving up");
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
            CaptureEvent::UnrecoverableError => break,
            _ => {}
        }

        if processed > 0 {
            if let Some(resolution) = pending_force.take() {
                match propagator.request_forced_resolution(resolution) {
                    Ok(mode) => tracing::info!(%mode, "forced capture resolution"),
                    Err(PipelineError::Rejected(reason)) => {
                        tracing::warn!(%reason, "forced resolution rejected")
                    }
                    Err(error) => return Err(error),
                }
            }
        }
    }

    if let Some(session) = session {
        session
            .lock()
            .map_err(|_| PipelineError::Poisoned("recording session"))?
            .stop()?;
    }

    let stats = propagator.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn print_filters() -> capture_pipeline_core::Result<()> {
    let catalogue: Vec<_> = FilterKind::ALL
        .iter()
        .map(|kind| {
            serde_json::json!({
                "kind": kind,
                "name": kind.display_name(),
                "schema": kind.schema(),
                "defaults": kind.default_params(),
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&catalogue)?);
    Ok(())
}

fn parse_resolution(text: &str) -> Result<Resolution, String> {
    let (width, height) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{text}`"))?;
    let width = width.trim().parse().map_err(|_| format!("invalid width `{width}`"))?;
    let height = height.trim().parse().map_err(|_| format!("invalid height `{height}`"))?;
    Ok(Resolution::new(width, height))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Default)]
struct LogScaler {
    base: Option<VideoMode>,
    frames: u64,
}

impl Scaler for LogScaler {
    fn set_output_base_resolution(&mut self, mode: VideoMode) {
        tracing::info!(%mode, "output base resolution");
        self.base = Some(mode);
    }

    fn scale_frame(&mut self, frame: &FrameOutput<'_>) {
        self.frames += 1;
        tracing::trace!(
            frame = self.frames,
            resolution = %frame.mode.resolution,
            chain = ?frame.chain.map(|gate| gate.0),
            base = ?self.base.map(|mode| mode.resolution.to_string()),
            "scaled frame"
        );
    }

    fn indicate_invalid_signal(&mut self) {
        tracing::info!("output shows: invalid signal");
    }

    fn indicate_no_signal(&mut self) {
        tracing::info!("output shows: no signal");
    }
}

struct LogDisplay;

impl capture_pipeline_core::Display for LogDisplay {
    fn request_refresh(&mut self) {
        tracing::trace!("display refresh");
    }
}

struct LogObserver;

impl capture_pipeline_core::SignalObserver for LogObserver {
    fn notify_signal_state_changed(&mut self, severe: bool) {
        tracing::debug!(severe, "signal state changed");
    }

    fn update_signal_info(&mut self, signal: &CaptureSignal) {
        tracing::debug!(state = ?signal.state, woke_up = signal.woke_up, "signal info");
    }
}

/// Lets the event loop and the propagator share one recording session.
struct SharedRecorder<R>(Arc<Mutex<R>>);

impl<R: Recorder> Recorder for SharedRecorder<R> {
    fn is_recording(&self) -> bool {
        match self.0.lock() {
            Ok(recorder) => recorder.is_recording(),
            Err(_) => {
                tracing::warn!("recording session lock is poisoned, frames are no longer recorded");
                false
            }
        }
    }

    fn record_frame(&mut self, frame: &FrameOutput<'_>) -> capture_pipeline_core::Result<()> {
        self.0
            .lock()
            .map_err(|_| PipelineError::Poisoned("recording session"))?
            .record_frame(frame)
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Live capture pipeline with filter graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the synthetic capture device through a blur filter chain.
    Run {
        /// JSON configuration file; built-in defaults are used otherwise.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of frames to process before exiting.
        #[arg(short, long, default_value_t = 120)]
        frames: u64,
        /// Force a capture resolution after the first frame, e.g. 800x600.
        #[arg(long, value_parser = parse_resolution)]
        force: Option<Resolution>,
        /// Keep the blur node in the chain but disable it.
        #[arg(long)]
        bypass_blur: bool,
    },
    /// Print every filter type with its parameter layout and defaults.
    Filters,
}
