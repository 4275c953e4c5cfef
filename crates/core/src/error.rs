//! Canonical error type for all stashq operations.
//!
//! Every crate in the workspace returns this one type so callers match on a
//! single taxonomy instead of per-layer wrappers.

use thiserror::Error;

/// All stashq errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying store could not be opened.
    #[error("storage initialization failed: {0}")]
    StorageInit(String),

    /// The initial session record could not be written.
    #[error("session initialization failed: {0}")]
    SessionInit(String),

    /// No session record exists where one is required.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Batch metadata was missing for an operation that requires it.
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// A transition was attempted on a batch that already left the pending
    /// state.
    #[error("batch already loaded: {0}")]
    BatchAlreadyLoaded(String),

    /// An operation required a loaded batch but found a pending one.
    #[error("batch not loaded: {0}")]
    BatchNotLoaded(String),

    /// Batch metadata failed to parse.
    #[error("corrupted batch metadata: {0}")]
    CorruptedBatch(String),

    /// A session was accessed past its heartbeat deadline.
    #[error("session timed out: {0}")]
    SessionTimeout(String),

    /// Transient failure in the underlying store.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for stashq operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error means a required record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::BatchNotFound(_) | Error::SessionNotFound(_))
    }

    /// Check if this error is a transient store failure.
    ///
    /// Transient errors may succeed on retry; retrying is the caller's
    /// responsibility.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
