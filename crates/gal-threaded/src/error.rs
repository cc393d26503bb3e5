use thiserror::Error;

pub type Result<T> = std::result::Result<T, GalError>;

/// Recoverable failures of the threaded engine.
///
/// Protocol violations (out-of-order reference pops, lookups of handles that
/// were never minted, invokes from the backend thread) are caller bugs and
/// panic instead. A full queue or span pool is backpressure, not an error.
#[derive(Debug, Error)]
pub enum GalError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn backend worker thread")]
    Spawn(#[source] std::io::Error),

    #[error("threaded engine has stopped")]
    Stopped,

    #[error("backend worker thread panicked")]
    WorkerPanicked,
}
