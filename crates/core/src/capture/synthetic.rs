use std::{
    mem,
    sync::{Arc, Mutex, MutexGuard},
};

use super::{CaptureDevice, CaptureEvent};
use crate::{
    config::CaptureConfig,
    error::RejectReason,
    video::{CapturedFrame, FrameView, PixelFormat, Resolution, SignalState, VideoMode},
    PipelineError, Result,
};

#[derive(Debug, Default)]
struct PendingEvents {
    unrecoverable_error: bool,
    new_video_mode: bool,
    signal_lost: bool,
    invalid_signal: bool,
}

/// What the simulated source is doing, shared with [`SyntheticControl`].
#[derive(Debug)]
struct SourceState {
    mode: VideoMode,
    signal: SignalState,
    pending: PendingEvents,
    refuse_forced: bool,
    force_requests: u64,
    alignment: (i32, i32),
}

/// Handle for steering a [`SyntheticCapture`] from another thread or a test.
#[derive(Debug, Clone)]
pub struct SyntheticControl {
    shared: Arc<Mutex<SourceState>>,
}

impl SyntheticControl {
    /// Disconnects the source.
    pub fn lose_signal(&self) -> Result<()> {
        let mut source = self.lock()?;
        source.signal = SignalState::NoSignal;
        source.pending.signal_lost = true;
        Ok(())
    }

    /// Keeps the source connected but makes its signal undecodable.
    pub fn invalidate_signal(&self) -> Result<()> {
        let mut source = self.lock()?;
        source.signal = SignalState::InvalidSignal;
        source.pending.invalid_signal = true;
        Ok(())
    }

    /// Reconnects the source in `mode`.
    pub fn restore_signal(&self, mode: VideoMode) -> Result<()> {
        let mut source = self.lock()?;
        source.mode = mode;
        source.signal = SignalState::Present(mode);
        source.pending.new_video_mode = true;
        Ok(())
    }

    /// Switches the source to `mode`. Only announced while connected.
    pub fn change_source_mode(&self, mode: VideoMode) -> Result<()> {
        let mut source = self.lock()?;
        source.mode = mode;
        if source.signal.is_present() {
            source.signal = SignalState::Present(mode);
            source.pending.new_video_mode = true;
        }
        Ok(())
    }

    /// Makes the device refuse every forced resolution while set.
    pub fn refuse_forced_resolutions(&self, refuse: bool) -> Result<()> {
        self.lock()?.refuse_forced = refuse;
        Ok(())
    }

    pub fn raise_unrecoverable_error(&self) -> Result<()> {
        self.lock()?.pending.unrecoverable_error = true;
        Ok(())
    }

    /// How many times the device was asked to force a resolution.
    pub fn force_requests(&self) -> Result<u64> {
        Ok(self.lock()?.force_requests)
    }

    /// Accumulated horizontal and vertical capture window offset.
    pub fn alignment(&self) -> Result<(i32, i32)> {
        Ok(self.lock()?.alignment)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SourceState>> {
        self.shared
            .lock()
            .map_err(|_| PipelineError::Poisoned("synthetic capture source"))
    }
}

/// Capture backend that needs no hardware and draws an animated test
/// pattern instead.
#[derive(Debug)]
pub struct SyntheticCapture {
    source: Arc<Mutex<SourceState>>,
    signal: SignalState,
    mode: VideoMode,
    forced: Option<Resolution>,
    format: PixelFormat,
    minimum: Resolution,
    maximum: Resolution,
    frame: CapturedFrame,
    tick: u32,
    missed: u64,
}

impl SyntheticCapture {
    pub fn new(config: &CaptureConfig) -> (Self, SyntheticControl) {
        let mut pending = PendingEvents::default();
        let signal = if config.start_with_signal {
            pending.new_video_mode = true;
            SignalState::Present(config.source_mode)
        } else {
            SignalState::NoSignal
        };

        let source = Arc::new(Mutex::new(SourceState {
            mode: config.source_mode,
            signal,
            pending,
            refuse_forced: false,
            force_requests: 0,
            alignment: (0, 0),
        }));

        let device = Self {
            source: Arc::clone(&source),
            signal: SignalState::NoSignal,
            mode: config.source_mode,
            forced: None,
            format: config.pixel_format,
            minimum: config.minimum_resolution,
            maximum: config.maximum_resolution,
            frame: CapturedFrame {
                processed: true,
                ..Default::default()
            },
            tick: 0,
            missed: 0,
        };

        (device, SyntheticControl { shared: source })
    }

    fn lock_source(&self) -> Result<MutexGuard<'_, SourceState>> {
        self.source
            .lock()
            .map_err(|_| PipelineError::Poisoned("synthetic capture source"))
    }

    fn capture_frame(&mut self, alignment: (i32, i32)) {
        let resolution = self.mode.resolution;
        let bytes_per_pixel = self.format.bytes_per_pixel();
        let (dx, dy) = alignment;

        let mut pixels = mem::take(&mut self.frame.pixels);
        pixels.clear();
        pixels.reserve(resolution.pixel_count() * bytes_per_pixel);

        for y in 0..resolution.height {
            for x in 0..resolution.width {
                let u = (x as i32 + dx) as u32;
                let v = (y as i32 + dy) as u32;
                let level = ((u ^ v).wrapping_add(self.tick) & 0xff) as u8;
                match self.format {
                    PixelFormat::Rgb888 => {
                        pixels.extend_from_slice(&[level, level / 2, 255 - level, 255])
                    }
                    PixelFormat::Rgb565 | PixelFormat::Rgb555 => {
                        pixels.extend_from_slice(&u16::from(level).to_le_bytes())
                    }
                }
            }
        }

        self.frame = CapturedFrame {
            pixels,
            mode: self.mode,
            format: self.format,
            processed: false,
        };
        self.tick = self.tick.wrapping_add(1);
    }
}

impl CaptureDevice for SyntheticCapture {
    fn device_name(&self) -> &str {
        "Synthetic capture device"
    }

    fn signal_state(&self) -> SignalState {
        self.signal
    }

    fn current_mode(&self) -> VideoMode {
        self.mode
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn minimum_resolution(&self) -> Resolution {
        self.minimum
    }

    fn maximum_resolution(&self) -> Resolution {
        self.maximum
    }

    fn latest_frame(&self) -> Option<FrameView<'_>> {
        (!self.frame.processed).then(|| self.frame.view())
    }

    fn mark_frame_processed(&mut self) {
        self.frame.processed = true;
    }

    fn pop_event(&mut self) -> CaptureEvent {
        let Ok(mut source) = self.source.lock() else {
            return CaptureEvent::UnrecoverableError;
        };
        self.signal = source.signal;

        let pending = &mut source.pending;
        if mem::take(&mut pending.unrecoverable_error) {
            return CaptureEvent::UnrecoverableError;
        }
        if mem::take(&mut pending.new_video_mode) {
            self.forced = None;
            return CaptureEvent::NewVideoMode;
        }
        if mem::take(&mut pending.signal_lost) {
            return CaptureEvent::SignalLost;
        }
        if mem::take(&mut pending.invalid_signal) {
            return CaptureEvent::InvalidSignal;
        }
        let alignment = source.alignment;
        drop(source);

        match self.signal {
            SignalState::NoSignal => CaptureEvent::Sleep,
            SignalState::InvalidSignal => CaptureEvent::None,
            SignalState::Present(_) if !self.frame.processed => {
                self.missed += 1;
                CaptureEvent::None
            }
            SignalState::Present(_) => {
                self.capture_frame(alignment);
                CaptureEvent::NewFrame
            }
        }
    }

    fn apply_new_mode(&mut self) -> VideoMode {
        let source_mode = match self.lock_source() {
            Ok(source) => source.mode,
            Err(_) => self.mode,
        };

        self.mode = match self.forced {
            Some(resolution) => source_mode.with_resolution(resolution),
            None => source_mode,
        };
        self.mode
    }

    fn force_resolution(&mut self, resolution: Resolution) -> Result<VideoMode> {
        let mut source = self.lock_source()?;
        source.force_requests += 1;
        if source.refuse_forced {
            return Err(PipelineError::Rejected(RejectReason::DeviceRefused(resolution)));
        }
        drop(source);

        self.forced = Some(resolution);
        Ok(self.mode.with_resolution(resolution))
    }

    fn adjust_alignment(&mut self, horizontal: i32, vertical: i32) -> Result<()> {
        let mut source = self.lock_source()?;
        source.alignment.0 += horizontal;
        source.alignment.1 += vertical;
        Ok(())
    }

    fn missed_frame_count(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::RefreshRate;

    fn connected() -> (SyntheticCapture, SyntheticControl) {
        SyntheticCapture::new(&CaptureConfig::default())
    }

    #[test]
    fn starts_by_announcing_its_mode() {
        let (mut device, _control) = connected();

        assert_eq!(device.signal_state(), SignalState::NoSignal);
        assert_eq!(device.pop_event(), CaptureEvent::NewVideoMode);
        assert!(device.signal_state().is_present());
        assert_eq!(device.apply_new_mode(), VideoMode::default());
        assert_eq!(device.pop_event(), CaptureEvent::NewFrame);
    }

    #[test]
    fn events_follow_priority_order() {
        let (mut device, control) = connected();
        device.pop_event();

        control.invalidate_signal().unwrap();
        control.lose_signal().unwrap();
        control.raise_unrecoverable_error().unwrap();

        assert_eq!(device.pop_event(), CaptureEvent::UnrecoverableError);
        assert_eq!(device.pop_event(), CaptureEvent::SignalLost);
        assert_eq!(device.pop_event(), CaptureEvent::InvalidSignal);
        assert_eq!(device.pop_event(), CaptureEvent::Sleep);
    }

    #[test]
    fn unreleased_frames_count_as_missed() {
        let (mut device, _control) = connected();
        device.pop_event();
        device.apply_new_mode();

        assert_eq!(device.pop_event(), CaptureEvent::NewFrame);
        let frame = device.latest_frame().expect("frame should be pending");
        assert_eq!(frame.pixels.len(), 640 * 480 * 4);

        assert_eq!(device.pop_event(), CaptureEvent::None);
        assert_eq!(device.missed_frame_count(), 1);

        device.mark_frame_processed();
        assert!(device.latest_frame().is_none());
        assert_eq!(device.pop_event(), CaptureEvent::NewFrame);
    }

    #[test]
    fn forced_resolution_applies_until_the_source_changes() {
        let (mut device, control) = connected();
        device.pop_event();
        device.apply_new_mode();

        let pending = device.force_resolution(Resolution::new(800, 600)).unwrap();
        assert_eq!(pending.resolution, Resolution::new(800, 600));
        assert_eq!(device.apply_new_mode().resolution, Resolution::new(800, 600));

        let source = VideoMode::new(1024, 768, 32, RefreshRate::from_hz(70.0));
        control.change_source_mode(source).unwrap();
        assert_eq!(device.pop_event(), CaptureEvent::NewVideoMode);
        assert_eq!(device.apply_new_mode(), source);
    }

    #[test]
    fn alignment_shifts_the_pattern() {
        let (mut device, control) = connected();
        device.pop_event();
        device.apply_new_mode();

        device.pop_event();
        let first_row = device.latest_frame().unwrap().pixels[4..8].to_vec();
        device.mark_frame_processed();

        device.adjust_alignment(1, 0).unwrap();
        assert_eq!(control.alignment().unwrap(), (1, 0));

        device.pop_event();
        let shifted = device.latest_frame().unwrap().pixels[..4].to_vec();
        // One tick later the pattern at x has moved to x - 1 and advanced by one level.
        assert_eq!(shifted[0], first_row[0].wrapping_add(1));
    }

    #[test]
    fn refusals_are_reported() {
        let (mut device, control) = connected();
        control.refuse_forced_resolutions(true).unwrap();

        let err = device.force_resolution(Resolution::new(800, 600)).unwrap_err();
        assert!(matches!(err, PipelineError::Rejected(RejectReason::DeviceRefused(_))));
        assert_eq!(control.force_requests().unwrap(), 1);
    }

    #[test]
    fn source_mode_changes_wait_for_a_signal() {
        let config = CaptureConfig {
            start_with_signal: false,
            ..Default::default()
        };
        let (mut device, control) = SyntheticCapture::new(&config);
        assert_eq!(device.pop_event(), CaptureEvent::Sleep);

        control
            .change_source_mode(VideoMode::new(800, 600, 32, RefreshRate::from_hz(60.0)))
            .unwrap();
        assert_eq!(device.pop_event(), CaptureEvent::Sleep);
    }
}
