use thiserror::Error;

/// Error kinds shared across the watcher crates.
///
/// Mirrors the error-kind table of the watch subsystem design: build-time
/// failures are returned to the caller, steady-state inconsistencies are
/// handled internally (see `fim_watch::event_loop`) and never reach here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
