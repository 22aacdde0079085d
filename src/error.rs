//! Error type shared by tracing, graph construction and compilation.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong between binding a call and evaluating a compiled graph.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Usage ──
    #[error("Function arguments can not be containers (received {value} for argument '{name}')")]
    ContainerArgument { name: String, value: String },

    #[error("'{0}' is a reserved keyword and can not be passed as a function argument")]
    ReservedKeyword(String),

    #[error("Vectors must be passed the keyword '_vectors'.")]
    MissingVectors,

    #[error("expected {expected} items in _vectors; received {received}")]
    VectorCountMismatch { expected: usize, received: usize },

    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("got an unexpected keyword argument '{0}'")]
    UnexpectedArgument(String),

    #[error("got multiple values for argument '{0}'")]
    DuplicateArgument(String),

    #[error("takes {expected} positional arguments but {received} were given")]
    TooManyPositional { expected: usize, received: usize },

    #[error("compiled function expects {expected} inputs, received {received}")]
    InputCount { expected: usize, received: usize },

    #[error("input '{name}' expects shape {expected:?} ({dtype}), received {received:?}")]
    InputShape {
        name: String,
        expected: Vec<usize>,
        received: Vec<usize>,
        dtype: &'static str,
    },

    #[error("parameter vector has length {received}, layout expects {expected}")]
    VectorLength { expected: usize, received: usize },

    #[error("at least one of value, gradient or hessian_vector must be requested")]
    NoOutputsRequested,

    #[error("a direction vector was supplied but hessian-vector products were not compiled")]
    UnexpectedDirection,

    // ── Trace resolution ──
    #[error("Unable to trace argument '{0}'")]
    UntracedArgument(String),

    #[error("Unable to trace item {index} of variable argument '{name}'")]
    UntracedVarargItem { name: String, index: usize },

    #[error("Unable to trace result #{0} (indexed from 1)")]
    UntracedResult(usize),

    #[error("Requested the symbolic variable shadowing object {0}, but it was not traced.")]
    NotTraced(String),

    #[error("no trace is active on this thread")]
    NoActiveTrace,

    #[error("handle {0} belongs to a different trace")]
    StaleHandle(String),

    // ── Aliasing / selectivity ──
    #[error(
        "Small integer arguments can not be traced selectively. \
         Either recast or redesign your function."
    )]
    AmbiguousSmallInt(i64),

    #[error("integer {0} matches more than one argument and can not be traced selectively")]
    AmbiguousInt(i64),

    // ── Delegated ──
    #[error("target function failed: {0}")]
    Target(String),

    #[error("operands with shapes {lhs:?} and {rhs:?} can not be broadcast together")]
    Broadcast { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("index {index} is out of bounds for axis {axis} with length {len}")]
    IndexOutOfBounds { axis: usize, index: usize, len: usize },

    #[error("{0}")]
    Lowering(String),

    #[error("gradient requires a scalar output, output #{index} has shape {shape:?}")]
    GradRequiresScalar { index: usize, shape: Vec<usize> },

    #[error("wrt variable '{0}' is not part of the computational graph")]
    DisconnectedInput(String),

    #[error("borrowed storage changed shape: node reads offset {offset}, storage holds {len}")]
    BorrowedShapeChanged { offset: usize, len: usize },

    #[error("graph references an unsubstituted trace leaf (node {0})")]
    FreeLeaf(u32),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    /// Wrap a failure raised from inside a target closure.
    pub fn target(msg: impl Into<String>) -> Self {
        Error::Target(msg.into())
    }

    /// True for the categories that indicate a malformed call rather than a failed trace.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::ContainerArgument { .. }
                | Error::ReservedKeyword(_)
                | Error::MissingVectors
                | Error::VectorCountMismatch { .. }
                | Error::MissingArgument(_)
                | Error::UnexpectedArgument(_)
                | Error::DuplicateArgument(_)
                | Error::TooManyPositional { .. }
                | Error::InputCount { .. }
                | Error::InputShape { .. }
                | Error::VectorLength { .. }
                | Error::NoOutputsRequested
                | Error::UnexpectedDirection
        )
    }
}
