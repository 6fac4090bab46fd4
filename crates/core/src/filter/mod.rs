//! Filter types, their parameter payloads and their pixel transforms.
//!
//! Every filter node carries a fixed-size [`ParamBlock`]. The layout of that
//! block is part of the persisted graph format shared with editing tools, so
//! each [`FilterKind`] declares its fields (offset, width, scale factor) in
//! [`params`] and the typed [`FilterParams`] are always derived from it.

pub mod params;
pub mod transform;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use params::{
    BlurKind, BlurParams, CropParams, CropScaler, DecimateParams, DecimateSampling, FieldEncoding,
    FilterParams, FlipAxis, FlipParams, GateParams, MedianParams, NlmDenoiseParams, ParamField,
    RotateParams, TemporalDenoiseParams, UniqueCountCorner, UniqueCountParams, UnsharpMaskParams,
};
pub use transform::{FilterStage, WorkingFrame};

/// Capacity of every node's parameter payload in bytes.
pub const FILTER_PARAMS_LENGTH: usize = 16;

/// The closed set of node types a filter graph may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    InputGate,
    OutputGate,
    Blur,
    Crop,
    Flip,
    Rotate,
    Median,
    DenoiseTemporal,
    DenoiseNlm,
    Sharpen,
    UnsharpMask,
    Decimate,
    DeltaHistogram,
    UniqueCount,
}

impl FilterKind {
    pub const ALL: [FilterKind; 14] = [
        Self::InputGate,
        Self::OutputGate,
        Self::Blur,
        Self::Crop,
        Self::Flip,
        Self::Rotate,
        Self::Median,
        Self::DenoiseTemporal,
        Self::DenoiseNlm,
        Self::Sharpen,
        Self::UnsharpMask,
        Self::Decimate,
        Self::DeltaHistogram,
        Self::UniqueCount,
    ];

    pub fn is_gate(&self) -> bool {
        matches!(self, Self::InputGate | Self::OutputGate)
    }

    /// Gates expose a single connection point; an input gate only feeds
    /// forward and an output gate only receives.
    pub fn has_input_point(&self) -> bool {
        *self != Self::InputGate
    }

    pub fn has_output_point(&self) -> bool {
        *self != Self::OutputGate
    }

    /// The field layout of this type's parameter block.
    pub fn schema(&self) -> &'static [ParamField] {
        params::schema(*self)
    }

    /// The parameter block a freshly created node of this type starts with.
    pub fn default_params(&self) -> ParamBlock {
        FilterParams::defaults(*self).encode()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::InputGate => "Input gate",
            Self::OutputGate => "Output gate",
            Self::Blur => "Blur",
            Self::Crop => "Crop",
            Self::Flip => "Flip",
            Self::Rotate => "Rotate",
            Self::Median => "Median",
            Self::DenoiseTemporal => "Denoise (Temporal)",
            Self::DenoiseNlm => "Denoise (NLM)",
            Self::Sharpen => "Sharpen",
            Self::UnsharpMask => "Unsharp Mask",
            Self::Decimate => "Decimate",
            Self::DeltaHistogram => "Delta Histogram",
            Self::UniqueCount => "Unique Count",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Raw parameter payload of one filter node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ParamBlock([u8; FILTER_PARAMS_LENGTH]);

impl ParamBlock {
    pub fn zeroed() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: [u8; FILTER_PARAMS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Copies a persisted payload. Shorter input is zero padded; longer input
    /// is rejected.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() > FILTER_PARAMS_LENGTH {
            return Err(crate::PipelineError::InvalidInput(
                "parameter payload exceeds the fixed block size",
            ));
        }

        let mut block = Self::zeroed();
        block.0[..bytes.len()].copy_from_slice(bytes);
        Ok(block)
    }

    pub fn as_bytes(&self) -> &[u8; FILTER_PARAMS_LENGTH] {
        &self.0
    }

    /// Reads the raw integer stored for `field`.
    pub fn read(&self, field: &ParamField) -> i32 {
        let at = field.offset;
        match field.encoding {
            FieldEncoding::U8 => i32::from(self.0[at]),
            FieldEncoding::U16Le => i32::from(u16::from_le_bytes([self.0[at], self.0[at + 1]])),
            FieldEncoding::I16Le => i32::from(i16::from_le_bytes([self.0[at], self.0[at + 1]])),
        }
    }

    /// Stores `value` for `field`, truncated to the field's width.
    pub fn write(&mut self, field: &ParamField, value: i32) {
        let at = field.offset;
        match field.encoding {
            FieldEncoding::U8 => self.0[at] = value as u8,
            FieldEncoding::U16Le => {
                self.0[at..at + 2].copy_from_slice(&(value as u16).to_le_bytes())
            }
            FieldEncoding::I16Le => {
                self.0[at..at + 2].copy_from_slice(&(value as i16).to_le_bytes())
            }
        }
    }

    /// Reads `field` divided by its scale factor.
    pub fn read_scaled(&self, field: &ParamField) -> f32 {
        self.read(field) as f32 / f32::from(field.scale)
    }

    /// Stores `value` multiplied by the field's scale factor, rounded to the
    /// nearest representable integer.
    pub fn write_scaled(&mut self, field: &ParamField, value: f32) {
        self.write(field, (value * f32::from(field.scale)).round() as i32);
    }
}

impl fmt::Debug for ParamBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamBlock(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}
