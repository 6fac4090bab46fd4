//! Per-type parameter layouts.
//!
//! Offsets, widths and scale factors here must not change: graphs persisted
//! by editing tools store parameters in exactly this form.

use serde::Serialize;

use super::{FilterKind, ParamBlock};
use crate::{PipelineError, Result};

/// Storage width and signedness of one parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldEncoding {
    U8,
    U16Le,
    I16Le,
}

impl FieldEncoding {
    pub fn width(&self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16Le | Self::I16Le => 2,
        }
    }
}

/// One named field inside a [`ParamBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamField {
    pub name: &'static str,
    pub offset: usize,
    pub encoding: FieldEncoding,
    /// The stored integer is the user-facing value multiplied by this.
    pub scale: u16,
}

impl ParamField {
    const fn u8(name: &'static str, offset: usize) -> Self {
        Self::scaled(name, offset, FieldEncoding::U8, 1)
    }

    const fn u16(name: &'static str, offset: usize) -> Self {
        Self::scaled(name, offset, FieldEncoding::U16Le, 1)
    }

    const fn scaled(
        name: &'static str,
        offset: usize,
        encoding: FieldEncoding,
        scale: u16,
    ) -> Self {
        Self {
            name,
            offset,
            encoding,
            scale,
        }
    }
}

const GATE: &[ParamField] = &[ParamField::u16("width", 0), ParamField::u16("height", 2)];

const CROP: &[ParamField] = &[
    ParamField::u16("x", 0),
    ParamField::u16("y", 2),
    ParamField::u16("width", 4),
    ParamField::u16("height", 6),
    ParamField::u8("scaler", 8),
];

const FLIP: &[ParamField] = &[ParamField::u8("axis", 0)];

const ROTATE: &[ParamField] = &[
    ParamField::scaled("angle", 0, FieldEncoding::I16Le, 10),
    ParamField::scaled("scale", 2, FieldEncoding::I16Le, 100),
];

const MEDIAN: &[ParamField] = &[ParamField::u8("kernel_size", 0)];

const BLUR: &[ParamField] = &[
    ParamField::u8("type", 0),
    ParamField::scaled("radius", 1, FieldEncoding::U8, 10),
];

const DENOISE_TEMPORAL: &[ParamField] = &[ParamField::u8("threshold", 0)];

const DENOISE_NLM: &[ParamField] = &[
    ParamField::u8("h", 0),
    ParamField::u8("h_color", 1),
    ParamField::u8("template_window_size", 2),
    ParamField::u8("search_window_size", 3),
];

const UNSHARP_MASK: &[ParamField] = &[
    ParamField::u8("strength", 0),
    ParamField::scaled("radius", 1, FieldEncoding::U8, 10),
];

const DECIMATE: &[ParamField] = &[ParamField::u8("type", 0), ParamField::u8("factor", 1)];

const UNIQUE_COUNT: &[ParamField] = &[ParamField::u8("threshold", 0), ParamField::u8("corner", 1)];

pub(super) fn schema(kind: FilterKind) -> &'static [ParamField] {
    match kind {
        FilterKind::InputGate | FilterKind::OutputGate => GATE,
        FilterKind::Crop => CROP,
        FilterKind::Flip => FLIP,
        FilterKind::Rotate => ROTATE,
        FilterKind::Median => MEDIAN,
        FilterKind::Blur => BLUR,
        FilterKind::DenoiseTemporal => DENOISE_TEMPORAL,
        FilterKind::DenoiseNlm => DENOISE_NLM,
        FilterKind::UnsharpMask => UNSHARP_MASK,
        FilterKind::Decimate => DECIMATE,
        FilterKind::UniqueCount => UNIQUE_COUNT,
        FilterKind::Sharpen | FilterKind::DeltaHistogram => &[],
    }
}

/// Single-byte enum selectors stored in a parameter block.
macro_rules! selector {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $raw:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            fn from_raw(raw: i32) -> Option<Self> {
                match raw {
                    $($raw => Some(Self::$variant),)+
                    _ => None,
                }
            }

            fn raw(self) -> i32 {
                match self {
                    $(Self::$variant => $raw),+
                }
            }
        }
    };
}

selector!(CropScaler { Linear = 0, Nearest = 1, None = 2 });
selector!(FlipAxis { Vertical = 0, Horizontal = 1, Both = 2 });
selector!(BlurKind { Box = 0, Gaussian = 1 });
selector!(DecimateSampling { Nearest = 0, Average = 1 });
selector!(UniqueCountCorner { TopLeft = 0, TopRight = 1, BottomRight = 2, BottomLeft = 3 });

/// Frame size a gate accepts; zero on an axis matches any size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateParams {
    pub width: u16,
    pub height: u16,
}

impl GateParams {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        (self.width == 0 || u32::from(self.width) == width)
            && (self.height == 0 || u32::from(self.height) == height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropParams {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub scaler: CropScaler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FlipParams {
    pub axis: FlipAxis,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RotateParams {
    /// Degrees, one decimal of precision.
    pub angle: f32,
    /// Two decimals of precision.
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MedianParams {
    pub kernel_size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BlurParams {
    pub kind: BlurKind,
    /// Pixels, one decimal of precision.
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemporalDenoiseParams {
    pub threshold: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NlmDenoiseParams {
    pub h: u8,
    pub h_color: u8,
    pub template_window_size: u8,
    pub search_window_size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UnsharpMaskParams {
    pub strength: u8,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecimateParams {
    pub sampling: DecimateSampling,
    pub factor: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UniqueCountParams {
    pub threshold: u8,
    pub corner: UniqueCountCorner,
}

/// Typed view of a node's parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum FilterParams {
    InputGate(GateParams),
    OutputGate(GateParams),
    Blur(BlurParams),
    Crop(CropParams),
    Flip(FlipParams),
    Rotate(RotateParams),
    Median(MedianParams),
    DenoiseTemporal(TemporalDenoiseParams),
    DenoiseNlm(NlmDenoiseParams),
    Sharpen,
    UnsharpMask(UnsharpMaskParams),
    Decimate(DecimateParams),
    DeltaHistogram,
    UniqueCount(UniqueCountParams),
}

impl FilterParams {
    pub fn defaults(kind: FilterKind) -> Self {
        let gate = GateParams {
            width: 640,
            height: 480,
        };

        match kind {
            FilterKind::InputGate => Self::InputGate(gate),
            FilterKind::OutputGate => Self::OutputGate(gate),
            FilterKind::Blur => Self::Blur(BlurParams {
                kind: BlurKind::Gaussian,
                radius: 1.0,
            }),
            FilterKind::Crop => Self::Crop(CropParams {
                x: 0,
                y: 0,
                width: 640,
                height: 480,
                scaler: CropScaler::Linear,
            }),
            FilterKind::Flip => Self::Flip(FlipParams {
                axis: FlipAxis::Vertical,
            }),
            FilterKind::Rotate => Self::Rotate(RotateParams {
                angle: 0.0,
                scale: 1.0,
            }),
            FilterKind::Median => Self::Median(MedianParams { kernel_size: 3 }),
            FilterKind::DenoiseTemporal => {
                Self::DenoiseTemporal(TemporalDenoiseParams { threshold: 5 })
            }
            FilterKind::DenoiseNlm => Self::DenoiseNlm(NlmDenoiseParams {
                h: 10,
                h_color: 10,
                template_window_size: 7,
                search_window_size: 21,
            }),
            FilterKind::Sharpen => Self::Sharpen,
            FilterKind::UnsharpMask => Self::UnsharpMask(UnsharpMaskParams {
                strength: 50,
                radius: 1.0,
            }),
            FilterKind::Decimate => Self::Decimate(DecimateParams {
                sampling: DecimateSampling::Average,
                factor: 2,
            }),
            FilterKind::DeltaHistogram => Self::DeltaHistogram,
            FilterKind::UniqueCount => Self::UniqueCount(UniqueCountParams {
                threshold: 20,
                corner: UniqueCountCorner::TopLeft,
            }),
        }
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            Self::InputGate(_) => FilterKind::InputGate,
            Self::OutputGate(_) => FilterKind::OutputGate,
            Self::Blur(_) => FilterKind::Blur,
            Self::Crop(_) => FilterKind::Crop,
            Self::Flip(_) => FilterKind::Flip,
            Self::Rotate(_) => FilterKind::Rotate,
            Self::Median(_) => FilterKind::Median,
            Self::DenoiseTemporal(_) => FilterKind::DenoiseTemporal,
            Self::DenoiseNlm(_) => FilterKind::DenoiseNlm,
            Self::Sharpen => FilterKind::Sharpen,
            Self::UnsharpMask(_) => FilterKind::UnsharpMask,
            Self::Decimate(_) => FilterKind::Decimate,
            Self::DeltaHistogram => FilterKind::DeltaHistogram,
            Self::UniqueCount(_) => FilterKind::UniqueCount,
        }
    }

    /// Interprets `block` according to `kind`'s schema.
    pub fn decode(kind: FilterKind, block: &ParamBlock) -> Result<Self> {
        let fields = kind.schema();
        let raw = |index: usize| block.read(&fields[index]);
        let scaled = |index: usize| block.read_scaled(&fields[index]);
        let byte = |index: usize| raw(index) as u8;
        let word = |index: usize| raw(index) as u16;

        let params = match kind {
            FilterKind::InputGate => Self::InputGate(GateParams {
                width: word(0),
                height: word(1),
            }),
            FilterKind::OutputGate => Self::OutputGate(GateParams {
                width: word(0),
                height: word(1),
            }),
            FilterKind::Blur => Self::Blur(BlurParams {
                kind: select(kind, &fields[0], raw(0), BlurKind::from_raw)?,
                radius: scaled(1),
            }),
            FilterKind::Crop => Self::Crop(CropParams {
                x: word(0),
                y: word(1),
                width: word(2),
                height: word(3),
                scaler: select(kind, &fields[4], raw(4), CropScaler::from_raw)?,
            }),
            FilterKind::Flip => Self::Flip(FlipParams {
                axis: select(kind, &fields[0], raw(0), FlipAxis::from_raw)?,
            }),
            FilterKind::Rotate => Self::Rotate(RotateParams {
                angle: scaled(0),
                scale: scaled(1),
            }),
            FilterKind::Median => Self::Median(MedianParams { kernel_size: byte(0) }),
            FilterKind::DenoiseTemporal => {
                Self::DenoiseTemporal(TemporalDenoiseParams { threshold: byte(0) })
            }
            FilterKind::DenoiseNlm => Self::DenoiseNlm(NlmDenoiseParams {
                h: byte(0),
                h_color: byte(1),
                template_window_size: byte(2),
                search_window_size: byte(3),
            }),
            FilterKind::Sharpen => Self::Sharpen,
            FilterKind::UnsharpMask => Self::UnsharpMask(UnsharpMaskParams {
                strength: byte(0),
                radius: scaled(1),
            }),
            FilterKind::Decimate => {
                let factor = byte(1);
                if !matches!(factor, 2 | 4 | 8 | 16) {
                    return Err(invalid(kind, &fields[1], raw(1)));
                }
                Self::Decimate(DecimateParams {
                    sampling: select(kind, &fields[0], raw(0), DecimateSampling::from_raw)?,
                    factor,
                })
            }
            FilterKind::DeltaHistogram => Self::DeltaHistogram,
            FilterKind::UniqueCount => Self::UniqueCount(UniqueCountParams {
                threshold: byte(0),
                corner: select(kind, &fields[1], raw(1), UniqueCountCorner::from_raw)?,
            }),
        };

        Ok(params)
    }

    /// Writes these parameters into a fresh zeroed block.
    pub fn encode(&self) -> ParamBlock {
        let fields = self.kind().schema();
        let mut block = ParamBlock::zeroed();
        let put =
            |block: &mut ParamBlock, index: usize, value: i32| block.write(&fields[index], value);

        match *self {
            Self::InputGate(gate) | Self::OutputGate(gate) => {
                put(&mut block, 0, i32::from(gate.width));
                put(&mut block, 1, i32::from(gate.height));
            }
            Self::Blur(p) => {
                put(&mut block, 0, p.kind.raw());
                block.write_scaled(&fields[1], p.radius);
            }
            Self::Crop(p) => {
                put(&mut block, 0, i32::from(p.x));
                put(&mut block, 1, i32::from(p.y));
                put(&mut block, 2, i32::from(p.width));
                put(&mut block, 3, i32::from(p.height));
                put(&mut block, 4, p.scaler.raw());
            }
            Self::Flip(p) => put(&mut block, 0, p.axis.raw()),
            Self::Rotate(p) => {
                block.write_scaled(&fields[0], p.angle);
                block.write_scaled(&fields[1], p.scale);
            }
            Self::Median(p) => put(&mut block, 0, i32::from(p.kernel_size)),
            Self::DenoiseTemporal(p) => put(&mut block, 0, i32::from(p.threshold)),
            Self::DenoiseNlm(p) => {
                put(&mut block, 0, i32::from(p.h));
                put(&mut block, 1, i32::from(p.h_color));
                put(&mut block, 2, i32::from(p.template_window_size));
                put(&mut block, 3, i32::from(p.search_window_size));
            }
            Self::UnsharpMask(p) => {
                put(&mut block, 0, i32::from(p.strength));
                block.write_scaled(&fields[1], p.radius);
            }
            Self::Decimate(p) => {
                put(&mut block, 0, p.sampling.raw());
                put(&mut block, 1, i32::from(p.factor));
            }
            Self::UniqueCount(p) => {
                put(&mut block, 0, i32::from(p.threshold));
                put(&mut block, 1, p.corner.raw());
            }
            Self::Sharpen | Self::DeltaHistogram => {}
        }

        block
    }

    /// Applies the range checks [`decode`](Self::decode) makes to values
    /// built in code, e.g. a decimation factor of zero.
    pub fn validate(&self) -> Result<()> {
        Self::decode(self.kind(), &self.encode()).map(|_| ())
    }
}

fn select<T>(
    kind: FilterKind,
    field: &ParamField,
    raw: i32,
    from_raw: fn(i32) -> Option<T>,
) -> Result<T> {
    from_raw(raw).ok_or_else(|| invalid(kind, field, raw))
}

fn invalid(kind: FilterKind, field: &ParamField, value: i32) -> PipelineError {
    PipelineError::InvalidParameter {
        kind,
        field: field.name,
        value,
    }
}
