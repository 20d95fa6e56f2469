//! Error types for PageDB core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in PageDB core operations.
///
/// Each failure kind the engine reports upward has its own variant so callers
/// can branch on it. Only [`CoreError::LockTimeout`] is worth retrying.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] pagedb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The engine settings are unusable.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The data file or the log file could not be opened.
    #[error("cannot open storage at {path}: {source}")]
    StorageOpen {
        /// Path of the file that failed to open.
        path: String,
        /// Underlying storage failure.
        #[source]
        source: pagedb_storage::StorageError,
    },

    /// Log replay failed; the engine refuses to open.
    #[error("recovery failed: {message}")]
    Recovery {
        /// Description of the corruption.
        message: String,
    },

    /// A lock could not be acquired within the configured timeout.
    #[error("timed out after {timeout:?} waiting for {mode} lock on {resource}")]
    LockTimeout {
        /// The contended resource.
        resource: String,
        /// Requested lock mode.
        mode: &'static str,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The engine is shutting down and no longer admits work.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// A temporary companion engine was supplied after one already existed.
    #[error("temporary engine already defined")]
    TempEngineAlreadyDefined,

    /// The engine has been disposed.
    #[error("engine is disposed")]
    Disposed,

    /// A write was attempted on a read-only engine.
    #[error("engine is read-only")]
    ReadOnly,

    /// Invalid file format or version.
    #[error("invalid format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a storage-open error for `path`.
    pub fn storage_open(path: impl Into<String>, source: pagedb_storage::StorageError) -> Self {
        Self::StorageOpen {
            path: path.into(),
            source,
        }
    }

    /// Creates a recovery error.
    pub fn recovery(message: impl Into<String>) -> Self {
        Self::Recovery {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the same operation later can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Maps storage-level "closed" and "read-only" failures onto the
    /// engine-level kinds callers branch on.
    pub(crate) fn from_storage(err: pagedb_storage::StorageError) -> Self {
        match err {
            pagedb_storage::StorageError::Closed => Self::Disposed,
            pagedb_storage::StorageError::ReadOnly => Self::ReadOnly,
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagedb_storage::StorageError;

    #[test]
    fn only_lock_timeout_is_retryable() {
        let timeout = CoreError::LockTimeout {
            resource: "page:3".into(),
            mode: "exclusive",
            timeout: Duration::from_millis(10),
        };
        assert!(timeout.is_retryable());
        assert!(!CoreError::ShuttingDown.is_retryable());
        assert!(!CoreError::recovery("bad record").is_retryable());
        assert!(!CoreError::Disposed.is_retryable());
    }

    #[test]
    fn storage_kinds_are_mapped() {
        assert!(matches!(
            CoreError::from_storage(StorageError::Closed),
            CoreError::Disposed
        ));
        assert!(matches!(
            CoreError::from_storage(StorageError::ReadOnly),
            CoreError::ReadOnly
        ));
        assert!(matches!(
            CoreError::from_storage(StorageError::ReadPastEnd {
                offset: 0,
                len: 1,
                size: 0
            }),
            CoreError::Storage(_)
        ));
    }

    #[test]
    fn messages_name_the_resource() {
        let err = CoreError::LockTimeout {
            resource: "header".into(),
            mode: "exclusive",
            timeout: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("header"));
        assert!(err.to_string().contains("exclusive"));
    }
}
