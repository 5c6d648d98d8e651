//! Error types and Result aliases for memvault
//!
//! Two layers share this module. The VFS layer speaks SQLite-style result
//! codes (`ErrorCode` + `Error`); the tracking shim propagates these
//! unchanged and never introduces codes of its own. The persistence layer
//! (coordinator, worker client) uses the structured `PersistError` taxonomy.

use std::fmt;

use thiserror::Error as ThisError;

use crate::worker::protocol::WorkerErrorKind;

// ============================================================================
// VFS-layer error codes
// ============================================================================

/// SQLite-compatible result codes surfaced by the VFS layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Generic error
    Error = 1,
    /// Access permission denied
    Perm = 3,
    /// Operation aborted
    Abort = 4,
    /// File is locked by another connection
    Busy = 5,
    /// Memory allocation failed
    NoMem = 7,
    /// Attempt to write a readonly file
    ReadOnly = 8,
    /// Operation interrupted
    Interrupt = 9,
    /// Disk I/O error
    IoErr = 10,
    /// File content is malformed
    Corrupt = 11,
    /// Requested object not found
    NotFound = 12,
    /// Insertion failed because storage is full
    Full = 13,
    /// Unable to open the file
    CantOpen = 14,
    /// Library used incorrectly
    Misuse = 21,
    /// Parameter out of range
    Range = 25,
}

impl ErrorCode {
    /// Short symbolic name matching the SQLite convention
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Error => "SQLITE_ERROR",
            ErrorCode::Perm => "SQLITE_PERM",
            ErrorCode::Abort => "SQLITE_ABORT",
            ErrorCode::Busy => "SQLITE_BUSY",
            ErrorCode::NoMem => "SQLITE_NOMEM",
            ErrorCode::ReadOnly => "SQLITE_READONLY",
            ErrorCode::Interrupt => "SQLITE_INTERRUPT",
            ErrorCode::IoErr => "SQLITE_IOERR",
            ErrorCode::Corrupt => "SQLITE_CORRUPT",
            ErrorCode::NotFound => "SQLITE_NOTFOUND",
            ErrorCode::Full => "SQLITE_FULL",
            ErrorCode::CantOpen => "SQLITE_CANTOPEN",
            ErrorCode::Misuse => "SQLITE_MISUSE",
            ErrorCode::Range => "SQLITE_RANGE",
        }
    }
}

/// VFS-layer error: a result code plus an optional detail message
#[derive(Debug, Clone)]
pub struct Error {
    code: ErrorCode,
    message: Option<String>,
}

impl Error {
    /// Create an error carrying only a result code
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    /// Create an error with a detail message
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// The result code
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The detail message, if any
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.code.as_str(), msg),
            None => write!(f, "{}", self.code.as_str()),
        }
    }
}

impl std::error::Error for Error {}

/// Result type alias for VFS-layer operations
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// Persistence-layer errors
// ============================================================================

/// Errors surfaced by the tracker registry, worker client, and coordinator
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum PersistError {
    /// The named base VFS is not registered
    #[error("base VFS {0:?} is not registered")]
    UnknownBaseVfs(String),

    /// Page size is not a positive power of two >= 512
    #[error("invalid page size {0}")]
    InvalidPageSize(u32),

    /// Tracking was never initialised (or was shut down)
    #[error("tracker registry is not initialised")]
    NotInitialized,

    /// The in-memory file image does not contain the requested file
    #[error("no in-memory image for file {0:?}")]
    FileImageMissing(String),

    /// Worker handle missing or request channel closed
    #[error("persistence worker is unavailable")]
    WorkerUnavailable,

    /// Per-request timer expired before a response arrived
    #[error("persistence worker request timed out")]
    WorkerTimeout,

    /// Structured error reported by the worker
    #[error("worker error ({kind:?}): {message}")]
    Worker {
        kind: WorkerErrorKind,
        message: String,
    },

    /// Worker aborted a dirty-page sequence mid-way
    #[error("partial write failed at page {page_index}")]
    PartialWrite { page_index: u32 },

    /// Response arrived but did not match the request kind
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// `pause` called while a pause set is already active
    #[error("persistence is already paused")]
    AlreadyPaused,

    /// `resume` called with no active pause set
    #[error("persistence is not paused")]
    NotPaused,
}

impl PersistError {
    /// True for error classes the coordinator recovers from by demoting
    /// the flush to a whole-file persist.
    pub fn is_demotable(&self) -> bool {
        !matches!(
            self,
            PersistError::AlreadyPaused | PersistError::NotPaused | PersistError::InvalidPageSize(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::new(ErrorCode::IoErr);
        assert_eq!(err.to_string(), "SQLITE_IOERR");

        let err = Error::with_message(ErrorCode::CantOpen, "no such file");
        assert_eq!(err.to_string(), "SQLITE_CANTOPEN: no such file");
        assert_eq!(err.code(), ErrorCode::CantOpen);
    }

    #[test]
    fn test_worker_errors_are_demotable() {
        assert!(PersistError::WorkerTimeout.is_demotable());
        assert!(PersistError::WorkerUnavailable.is_demotable());
        assert!(PersistError::PartialWrite { page_index: 7 }.is_demotable());
        assert!(!PersistError::NotPaused.is_demotable());
    }
}
