//! Error types for the sync engine.

use metasync_archive::ArchiveError;
use metasync_protocol::ProtocolError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to the server or reconciling.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or HTTP-level failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether a caller may reasonably try again.
        retryable: bool,
    },

    /// Malformed or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An authenticated operation was called without a session.
    #[error("not authenticated: login first")]
    NotAuthenticated,

    /// Starting the export job failed.
    #[error("export submit failed: {0}")]
    ExportSubmit(#[source] Box<SyncError>),

    /// The delivered archive could not be decoded.
    #[error("archive decode failed: {0}")]
    ArchiveDecode(#[source] ArchiveError),

    /// The reconciled archive could not be encoded.
    #[error("archive encode failed: {0}")]
    ArchiveEncode(#[source] ArchiveError),

    /// A local counterpart of a remote entry is missing or unreadable.
    #[error("local file missing: {}", path.display())]
    LocalFileMissing {
        /// Mapped local path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A remote entry path cannot be mapped into the working tree.
    #[error("cannot map remote path to working tree: {0}")]
    UnmappedPath(String),

    /// The export job did not become ready within the configured bound.
    #[error("export not ready after {attempts} polls ({elapsed:?})")]
    PollTimeout {
        /// Number of status checks performed.
        attempts: u32,
        /// Time spent polling.
        elapsed: Duration,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a caller may retry the failed operation.
    ///
    /// Nothing in this crate retries on its own; this is advice for callers
    /// that wrap operations in their own retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ExportSubmit(inner) => inner.is_retryable(),
            SyncError::PollTimeout { .. } => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
