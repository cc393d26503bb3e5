use thiserror::Error;

/// Failure reported by a backend operation.
///
/// The threaded engine never interprets these; they are passed through
/// unchanged to whoever asked for the result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("invalid resource")]
    InvalidResource,

    #[error("out of bounds: offset={offset} len={len} size={size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("internal error: {0}")]
    Internal(String),
}
