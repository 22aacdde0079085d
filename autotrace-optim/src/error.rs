use thiserror::Error;

/// Errors raised by the optimizer adapters.
#[derive(Debug, Error)]
pub enum OptimError {
    #[error(transparent)]
    Core(#[from] autotrace::Error),

    #[error("duplicate argument: {0}")]
    DuplicateOption(&'static str),

    #[error("expected {expected} bound pairs, received {received}")]
    BoundsLength { expected: usize, received: usize },
}

pub type Result<T, E = OptimError> = std::result::Result<T, E>;
