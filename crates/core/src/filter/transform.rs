//! Reference pixel transforms for 32-bit frames.

use std::mem;

use super::{
    params::{
        BlurKind, CropParams, CropScaler, DecimateParams, DecimateSampling, FilterParams, FlipAxis,
        RotateParams,
    },
    FilterKind,
};
use crate::{
    error::TransformError,
    video::{PixelFormat, Resolution, VideoMode},
};

const CHANNELS: usize = 4;

/// The frame a chain is currently working on. Stages may replace the pixel
/// buffer and change the mode's resolution; later stages see the result.
#[derive(Debug, Clone, Default)]
pub struct WorkingFrame {
    pub pixels: Vec<u8>,
    pub mode: VideoMode,
    pub format: PixelFormat,
}

impl WorkingFrame {
    fn width(&self) -> usize {
        self.mode.width() as usize
    }

    fn height(&self) -> usize {
        self.mode.height() as usize
    }

    fn resize(&mut self, resolution: Resolution, pixels: Vec<u8>) {
        self.mode = self.mode.with_resolution(resolution);
        self.pixels = pixels;
    }
}

/// One executable filter: its decoded parameters plus whatever it keeps
/// between frames.
#[derive(Debug, Clone)]
pub struct FilterStage {
    params: FilterParams,
    temp: Vec<u8>,
    history: Vec<u8>,
}

impl FilterStage {
    pub fn new(params: FilterParams) -> Self {
        Self {
            params,
            temp: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Runs the stage over `frame`. `scratch` is a caller-owned buffer that
    /// may be swapped with the frame's pixels.
    pub fn apply(
        &mut self,
        frame: &mut WorkingFrame,
        scratch: &mut Vec<u8>,
    ) -> Result<(), TransformError> {
        let kind = self.params.kind();
        if kind.is_gate() {
            return Ok(());
        }

        if frame.format != PixelFormat::Rgb888 || frame.mode.bits_per_pixel != 32 {
            return Err(TransformError::UnsupportedFormat {
                kind,
                format: frame.format,
            });
        }

        if frame.width() == 0 || frame.height() == 0 {
            return Err(TransformError::EmptyFrame(kind));
        }

        let expected = frame.width() * frame.height() * CHANNELS;
        if frame.pixels.len() < expected {
            return Err(TransformError::BufferTooSmall {
                expected,
                actual: frame.pixels.len(),
            });
        }
        frame.pixels.truncate(expected);

        let (width, height) = (frame.width(), frame.height());
        match self.params {
            FilterParams::Crop(p) => crop(frame, &p, scratch)?,
            FilterParams::Flip(p) => flip(&mut frame.pixels, width, height, p.axis),
            FilterParams::Rotate(p) => {
                rotate(&frame.pixels, scratch, width, height, &p);
                mem::swap(&mut frame.pixels, scratch);
            }
            FilterParams::Median(p) => {
                scratch.clear();
                scratch.extend_from_slice(&frame.pixels);
                median(scratch, &mut frame.pixels, width, height, usize::from(p.kernel_size / 2));
            }
            FilterParams::Blur(p) => {
                let radius = p.radius.round().max(0.0) as usize;
                let passes = match p.kind {
                    BlurKind::Box => 1,
                    BlurKind::Gaussian => 3,
                };
                for _ in 0..passes {
                    box_blur(&mut frame.pixels, &mut self.temp, width, height, radius);
                }
            }
            FilterParams::Sharpen => {
                scratch.clear();
                scratch.extend_from_slice(&frame.pixels);
                sharpen(scratch, &mut frame.pixels, width, height);
            }
            FilterParams::UnsharpMask(p) => {
                scratch.clear();
                scratch.extend_from_slice(&frame.pixels);
                let radius = p.radius.round().max(0.0) as usize;
                for _ in 0..3 {
                    box_blur(scratch, &mut self.temp, width, height, radius);
                }
                unsharp(&mut frame.pixels, scratch, f32::from(p.strength) / 100.0);
            }
            FilterParams::Decimate(p) => decimate(frame, &p, scratch)?,
            FilterParams::DenoiseTemporal(p) => {
                if self.history.len() == frame.pixels.len() {
                    temporal_denoise(&mut frame.pixels, &self.history, p.threshold);
                }
                self.history.clear();
                self.history.extend_from_slice(&frame.pixels);
            }
            FilterParams::DenoiseNlm(_)
            | FilterParams::DeltaHistogram
            | FilterParams::UniqueCount(_) => {
                return Err(TransformError::Unsupported(kind));
            }
            FilterParams::InputGate(_) | FilterParams::OutputGate(_) => {}
        }

        Ok(())
    }
}

fn crop(
    frame: &mut WorkingFrame,
    p: &CropParams,
    scratch: &mut Vec<u8>,
) -> Result<(), TransformError> {
    let (width, height) = (frame.width(), frame.height());
    let (x, y) = (usize::from(p.x), usize::from(p.y));
    let (w, h) = (usize::from(p.width), usize::from(p.height));

    if w == 0 || h == 0 || x + w > width || y + h > height {
        return Err(TransformError::OutOfBounds {
            kind: FilterKind::Crop,
            width: frame.mode.width(),
            height: frame.mode.height(),
        });
    }

    scratch.clear();
    for row in y..y + h {
        let start = (row * width + x) * CHANNELS;
        scratch.extend_from_slice(&frame.pixels[start..start + w * CHANNELS]);
    }

    match p.scaler {
        CropScaler::None => {
            let region = mem::take(scratch);
            frame.resize(Resolution::new(w as u32, h as u32), region);
        }
        CropScaler::Nearest => resample_nearest(scratch, w, h, &mut frame.pixels, width, height),
        CropScaler::Linear => resample_linear(scratch, w, h, &mut frame.pixels, width, height),
    }

    Ok(())
}

fn flip(pixels: &mut [u8], width: usize, height: usize, axis: FlipAxis) {
    let stride = width * CHANNELS;

    if matches!(axis, FlipAxis::Vertical | FlipAxis::Both) {
        for row in 0..height / 2 {
            let (top, bottom) = pixels.split_at_mut((height - 1 - row) * stride);
            top[row * stride..(row + 1) * stride].swap_with_slice(&mut bottom[..stride]);
        }
    }

    if matches!(axis, FlipAxis::Horizontal | FlipAxis::Both) {
        for line in pixels.chunks_exact_mut(stride) {
            for col in 0..width / 2 {
                let mirror = width - 1 - col;
                for c in 0..CHANNELS {
                    line.swap(col * CHANNELS + c, mirror * CHANNELS + c);
                }
            }
        }
    }
}

fn rotate(src: &[u8], dst: &mut Vec<u8>, width: usize, height: usize, p: &RotateParams) {
    dst.clear();
    dst.resize(src.len(), 0);

    if p.scale <= 0.0 {
        return;
    }

    let (sin, cos) = (-p.angle.to_radians()).sin_cos();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;

    for y in 0..height {
        for x in 0..width {
            let dx = (x as f32 + 0.5 - cx) / p.scale;
            let dy = (y as f32 + 0.5 - cy) / p.scale;
            let sx = (dx * cos - dy * sin + cx).floor();
            let sy = (dx * sin + dy * cos + cy).floor();

            if sx >= 0.0 && sy >= 0.0 && (sx as usize) < width && (sy as usize) < height {
                let from = (sy as usize * width + sx as usize) * CHANNELS;
                let to = (y * width + x) * CHANNELS;
                dst[to..to + CHANNELS].copy_from_slice(&src[from..from + CHANNELS]);
            }
        }
    }
}

fn median(src: &[u8], dst: &mut [u8], width: usize, height: usize, radius: usize) {
    if radius == 0 {
        return;
    }

    let mut window = Vec::with_capacity((radius * 2 + 1).pow(2));
    for y in 0..height {
        for x in 0..width {
            for c in 0..CHANNELS {
                window.clear();
                for wy in y.saturating_sub(radius)..(y + radius + 1).min(height) {
                    for wx in x.saturating_sub(radius)..(x + radius + 1).min(width) {
                        window.push(src[(wy * width + wx) * CHANNELS + c]);
                    }
                }
                window.sort_unstable();
                dst[(y * width + x) * CHANNELS + c] = window[window.len() / 2];
            }
        }
    }
}

/// Separable box blur with clamped edges.
fn box_blur(pixels: &mut [u8], temp: &mut Vec<u8>, width: usize, height: usize, radius: usize) {
    if radius == 0 || width == 0 || height == 0 {
        return;
    }

    temp.clear();
    temp.resize(pixels.len(), 0);

    blur_axis(pixels, temp, width, height, radius, (CHANNELS, width * CHANNELS));
    blur_axis(temp, pixels, height, width, radius, (width * CHANNELS, CHANNELS));
}

/// Blurs along lines of `len` samples spaced `step.0` apart; lines start
/// `step.1` apart.
fn blur_axis(
    src: &[u8],
    dst: &mut [u8],
    len: usize,
    lines: usize,
    radius: usize,
    step: (usize, usize),
) {
    let (along, across) = step;
    let taps = (radius * 2 + 1) as u32;
    let last = len - 1;

    for line in 0..lines {
        let base = line * across;
        for c in 0..CHANNELS {
            let at = |i: usize| u32::from(src[base + i * along + c]);

            let mut sum: u32 = (0..=radius * 2)
                .map(|k| at(k.saturating_sub(radius).min(last)))
                .sum();
            for i in 0..len {
                dst[base + i * along + c] = ((sum + taps / 2) / taps) as u8;
                let leaving = at(i.saturating_sub(radius));
                let entering = at((i + radius + 1).min(last));
                sum = sum + entering - leaving;
            }
        }
    }
}

fn sharpen(src: &[u8], dst: &mut [u8], width: usize, height: usize) {
    if width < 3 || height < 3 {
        return;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            for c in 0..CHANNELS {
                let at = |px: usize, py: usize| i32::from(src[(py * width + px) * CHANNELS + c]);
                let neighbours = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1);
                let value = 5 * at(x, y) - neighbours;
                dst[(y * width + x) * CHANNELS + c] = value.clamp(0, 255) as u8;
            }
        }
    }
}

fn unsharp(pixels: &mut [u8], blurred: &[u8], amount: f32) {
    for (value, soft) in pixels.iter_mut().zip(blurred) {
        let original = f32::from(*value);
        let sharpened = original + (original - f32::from(*soft)) * amount;
        *value = sharpened.round().clamp(0.0, 255.0) as u8;
    }
}

fn decimate(
    frame: &mut WorkingFrame,
    p: &DecimateParams,
    scratch: &mut Vec<u8>,
) -> Result<(), TransformError> {
    let (width, height) = (frame.width(), frame.height());
    if !matches!(p.factor, 2 | 4 | 8 | 16) {
        return Err(TransformError::InvalidParameters(FilterKind::Decimate));
    }

    let factor = usize::from(p.factor);
    let (w, h) = (width / factor, height / factor);

    if w == 0 || h == 0 {
        return Err(TransformError::OutOfBounds {
            kind: FilterKind::Decimate,
            width: frame.mode.width(),
            height: frame.mode.height(),
        });
    }

    scratch.clear();
    scratch.resize(w * h * CHANNELS, 0);

    for y in 0..h {
        for x in 0..w {
            let to = (y * w + x) * CHANNELS;
            match p.sampling {
                DecimateSampling::Nearest => {
                    let from = (y * factor * width + x * factor) * CHANNELS;
                    scratch[to..to + CHANNELS]
                        .copy_from_slice(&frame.pixels[from..from + CHANNELS]);
                }
                DecimateSampling::Average => {
                    for c in 0..CHANNELS {
                        let mut sum = 0u32;
                        for by in 0..factor {
                            for bx in 0..factor {
                                let from = ((y * factor + by) * width + x * factor + bx) * CHANNELS;
                                sum += u32::from(frame.pixels[from + c]);
                            }
                        }
                        scratch[to + c] = (sum / (factor * factor) as u32) as u8;
                    }
                }
            }
        }
    }

    let reduced = mem::take(scratch);
    frame.resize(Resolution::new(w as u32, h as u32), reduced);
    Ok(())
}

fn temporal_denoise(pixels: &mut [u8], previous: &[u8], threshold: u8) {
    for (value, old) in pixels.iter_mut().zip(previous) {
        if value.abs_diff(*old) <= threshold {
            *value = *old;
        }
    }
}

fn resample_nearest(src: &[u8], sw: usize, sh: usize, dst: &mut Vec<u8>, dw: usize, dh: usize) {
    dst.clear();
    dst.resize(dw * dh * CHANNELS, 0);

    for y in 0..dh {
        let sy = y * sh / dh;
        for x in 0..dw {
            let sx = x * sw / dw;
            let from = (sy * sw + sx) * CHANNELS;
            let to = (y * dw + x) * CHANNELS;
            dst[to..to + CHANNELS].copy_from_slice(&src[from..from + CHANNELS]);
        }
    }
}

fn resample_linear(src: &[u8], sw: usize, sh: usize, dst: &mut Vec<u8>, dw: usize, dh: usize) {
    dst.clear();
    dst.resize(dw * dh * CHANNELS, 0);

    let position = |i: usize, from: usize, to: usize| -> (usize, usize, f32) {
        let exact = ((i as f32 + 0.5) * from as f32 / to as f32 - 0.5).max(0.0);
        let lower = (exact.floor() as usize).min(from - 1);
        let upper = (lower + 1).min(from - 1);
        (lower, upper, exact - lower as f32)
    };

    for y in 0..dh {
        let (y0, y1, fy) = position(y, sh, dh);
        for x in 0..dw {
            let (x0, x1, fx) = position(x, sw, dw);
            for c in 0..CHANNELS {
                let at = |px: usize, py: usize| f32::from(src[(py * sw + px) * CHANNELS + c]);
                let top = at(x0, y0) + (at(x1, y0) - at(x0, y0)) * fx;
                let bottom = at(x0, y1) + (at(x1, y1) - at(x0, y1)) * fx;
                let value = top + (bottom - top) * fy;
                dst[(y * dw + x) * CHANNELS + c] = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}
