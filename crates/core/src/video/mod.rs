use std::fmt;

use serde::{Deserialize, Serialize};

/// Width and height of a capture or output surface in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true when both axes lie inside `minimum ..= maximum`.
    pub fn within(&self, minimum: Resolution, maximum: Resolution) -> bool {
        (minimum.width..=maximum.width).contains(&self.width)
            && (minimum.height..=maximum.height).contains(&self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Refresh rate in millihertz, so 59.94 Hz is stored as 59_940.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefreshRate(pub u32);

impl RefreshRate {
    pub fn from_hz(hz: f64) -> Self {
        Self((hz * 1000.0).round().max(0.0) as u32)
    }

    pub fn hz(&self) -> f64 {
        f64::from(self.0) / 1000.0
    }
}

/// A capture video mode. Two modes are the same mode only if every field
/// matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoMode {
    pub resolution: Resolution,
    pub bits_per_pixel: u32,
    pub refresh_rate: RefreshRate,
}

impl VideoMode {
    pub const fn new(
        width: u32,
        height: u32,
        bits_per_pixel: u32,
        refresh_rate: RefreshRate,
    ) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            bits_per_pixel,
            refresh_rate,
        }
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Same mode at a different resolution.
    pub fn with_resolution(self, resolution: Resolution) -> Self {
        Self { resolution, ..self }
    }

    /// Number of bytes a tightly packed frame of this mode occupies.
    pub fn frame_size(&self) -> usize {
        self.resolution.pixel_count() * (self.bits_per_pixel as usize / 8)
    }
}

impl Default for VideoMode {
    fn default() -> Self {
        Self::new(640, 480, 32, RefreshRate(60_000))
    }
}

impl fmt::Display for VideoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} bpp @ {:.3} Hz",
            self.resolution,
            self.bits_per_pixel,
            self.refresh_rate.hz()
        )
    }
}

/// Pixel layout of a captured frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PixelFormat {
    /// 8 bits per channel stored as 32-bit BGRA.
    #[default]
    Rgb888,
    Rgb565,
    Rgb555,
}

impl PixelFormat {
    pub fn bits_per_pixel(&self) -> u32 {
        match self {
            Self::Rgb888 => 32,
            Self::Rgb565 | Self::Rgb555 => 16,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel() as usize / 8
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgb888 => "RGB 888",
            Self::Rgb565 => "RGB 565",
            Self::Rgb555 => "RGB 555",
        };
        f.write_str(name)
    }
}

/// The device's view of its input signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    NoSignal,
    InvalidSignal,
    Present(VideoMode),
}

impl SignalState {
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn mode(&self) -> Option<VideoMode> {
        match self {
            Self::Present(mode) => Some(*mode),
            _ => None,
        }
    }
}

/// A signal observation together with the transition that led to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSignal {
    pub state: SignalState,
    /// Set exactly when the previous observation had no usable signal and
    /// this one does.
    pub woke_up: bool,
}

impl CaptureSignal {
    pub fn mode(&self) -> Option<VideoMode> {
        self.state.mode()
    }
}

/// Remembers the last observed signal state so that transitions can be
/// classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTracker {
    last: SignalState,
}

impl Default for SignalTracker {
    fn default() -> Self {
        Self {
            last: SignalState::NoSignal,
        }
    }
}

impl SignalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> SignalState {
        self.last
    }

    /// Records `state` as the newest observation.
    pub fn observe(&mut self, state: SignalState) -> CaptureSignal {
        let woke_up = !self.last.is_present() && state.is_present();
        self.last = state;
        CaptureSignal { state, woke_up }
    }
}

/// Frame storage owned by a capture device.
#[derive(Debug, Clone, Default)]
pub struct CapturedFrame {
    pub pixels: Vec<u8>,
    pub mode: VideoMode,
    pub format: PixelFormat,
    /// Cleared when the device writes a new capture, set when the pipeline
    /// releases it.
    pub processed: bool,
}

impl CapturedFrame {
    pub fn view(&self) -> FrameView<'_> {
        FrameView {
            pixels: &self.pixels,
            mode: self.mode,
            format: self.format,
        }
    }
}

/// Borrowed view of the device's latest frame. Lives for one processing pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub pixels: &'a [u8],
    pub mode: VideoMode,
    pub format: PixelFormat,
}
