use crate::{filter::FilterKind, graph::NodeId, video::PixelFormat, video::Resolution};

/// Result alias that carries the custom [`PipelineError`] type.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Free-form message for failures that have no dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Configuration that could not be parsed.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A parameter block holds a value its filter type does not define.
    #[error("{kind} parameter `{field}` has unsupported value {value}")]
    InvalidParameter {
        kind: FilterKind,
        field: &'static str,
        value: i32,
    },
    /// A request was refused without changing any state.
    #[error("request rejected: {0}")]
    Rejected(RejectReason),
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// A frame could not be pushed through its filter chain.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// The propagator absorbed an unrecoverable capture error and services
    /// nothing further.
    #[error("capture pipeline has halted after an unrecoverable error")]
    Halted,
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
}

impl PipelineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<String> for PipelineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Why a forced-resolution request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("the capture device is not receiving a signal")]
    NoSignal,
    #[error("{requested} is outside the supported range {minimum} ..= {maximum}")]
    OutOfBounds {
        requested: Resolution,
        minimum: Resolution,
        maximum: Resolution,
    },
    #[error("the capture device refused to apply {0}")]
    DeviceRefused(Resolution),
}

/// Misuse of the graph editing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),
    #[error("node {0} has no output connection point")]
    NoOutputPoint(NodeId),
    #[error("node {0} has no input connection point")]
    NoInputPoint(NodeId),
    #[error("the output connection point of node {0} is already connected")]
    OutputOccupied(NodeId),
    #[error("the input connection point of node {0} is already connected")]
    InputOccupied(NodeId),
    #[error("gate node {0} cannot be disabled")]
    GateAlwaysEnabled(NodeId),
    #[error("parameters of a {given} node cannot be applied to {expected} node {node}")]
    ParameterKindMismatch {
        node: NodeId,
        expected: FilterKind,
        given: FilterKind,
    },
}

/// Per-frame failure of a single filter stage. The frame is dropped; the
/// pipeline carries on with the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("{kind} cannot operate on {format} frames")]
    UnsupportedFormat { kind: FilterKind, format: PixelFormat },
    #[error("{0} has no pixel transform")]
    Unsupported(FilterKind),
    #[error("{kind} addresses pixels outside the {width}x{height} frame")]
    OutOfBounds {
        kind: FilterKind,
        width: u32,
        height: u32,
    },
    #[error("frame buffer holds {actual} bytes but its mode needs {expected}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("{0} cannot operate on a frame without pixels")]
    EmptyFrame(FilterKind),
    #[error("{0} parameters are outside the supported range")]
    InvalidParameters(FilterKind),
}
