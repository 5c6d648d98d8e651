//! Worker protocol: request/response envelopes
//!
//! Every request carries a monotonically increasing correlation id and a
//! discriminated operation kind; responses echo the id and carry either the
//! matching success payload or a structured error. The channel itself moves
//! typed envelopes in-process; `encode_*`/`decode_*` provide the binary wire
//! form for hosts that need a byte stream.

use serde::{Deserialize, Serialize};

use crate::error::PersistError;

// ============================================================================
// Payload types
// ============================================================================

/// One dirty page: index plus exactly `page_size` bytes of content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyPage {
    pub page_index: u32,
    pub bytes: Vec<u8>,
}

/// Worker-side log verbosity, settable over the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum WorkerLogLevel {
    None,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl WorkerLogLevel {
    /// Whether a message at `level` passes this verbosity setting
    pub fn allows(&self, level: WorkerLogLevel) -> bool {
        level <= *self && level != WorkerLogLevel::None
    }
}

/// Error classes a worker can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerErrorKind {
    /// Named file does not exist in the backing store
    NotFound,
    /// Backing-store quota exhausted
    Quota,
    /// Handle is not open
    BadHandle,
    /// Request failed validation before any I/O
    InvalidRequest,
    /// Backing-store I/O failure
    Io,
}

/// Structured error returned by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub kind: WorkerErrorKind,
    pub message: String,
    /// For mid-sequence dirty-page failures: the page that failed
    pub page_index: Option<u32>,
}

impl WorkerFailure {
    pub fn new(kind: WorkerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            page_index: None,
        }
    }

    pub fn at_page(kind: WorkerErrorKind, message: impl Into<String>, page_index: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            page_index: Some(page_index),
        }
    }

    /// Lift into the coordinator-side error taxonomy
    pub fn into_persist_error(self) -> PersistError {
        match self.page_index {
            Some(page_index) => PersistError::PartialWrite { page_index },
            None => PersistError::Worker {
                kind: self.kind,
                message: self.message,
            },
        }
    }
}

// ============================================================================
// Requests and responses
// ============================================================================

/// Operations the coordinator (and the outer system) may request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Open a backing file, returning a worker handle
    Open { filename: String, create: bool },
    /// Close a previously opened handle
    Close { handle: u32 },
    /// Read a whole file
    ReadFullFile { filename: String },
    /// Replace a whole file
    WriteFullFile { filename: String, bytes: Vec<u8> },
    /// Flush only the listed pages, then truncate to `file_size` and sync.
    /// Page indices are strictly ascending and pairwise distinct; every
    /// entry carries exactly `page_size` bytes.
    WriteDirtyPages {
        filename: String,
        page_size: u32,
        file_size: u64,
        pages: Vec<DirtyPage>,
    },
    /// Remove a file
    Delete { filename: String },
    /// Existence test
    Exists { filename: String },
    /// List all files in the backing store
    List,
    /// Report quota usage
    GetCapacity,
    /// Request more quota
    AddCapacity { bytes: u64 },
    /// Set the worker's log verbosity
    SetLogLevel { level: WorkerLogLevel },
    /// Release all backing-store handles before shutdown
    Cleanup,
}

impl Request {
    /// Short operation name for logging
    pub fn kind_name(&self) -> &'static str {
        match self {
            Request::Open { .. } => "open",
            Request::Close { .. } => "close",
            Request::ReadFullFile { .. } => "read_full_file",
            Request::WriteFullFile { .. } => "write_full_file",
            Request::WriteDirtyPages { .. } => "write_dirty_pages",
            Request::Delete { .. } => "delete",
            Request::Exists { .. } => "exists",
            Request::List => "list",
            Request::GetCapacity => "get_capacity",
            Request::AddCapacity { .. } => "add_capacity",
            Request::SetLogLevel { .. } => "set_log_level",
            Request::Cleanup => "cleanup",
        }
    }
}

/// Success payloads, one per request kind, plus the error arm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Opened { handle: u32 },
    Closed,
    FileData { bytes: Vec<u8> },
    FullFileWritten { bytes_written: u64 },
    PagesWritten { pages_written: u32, bytes_written: u64 },
    Deleted,
    Existence { exists: bool },
    FileList { filenames: Vec<String> },
    Capacity { used: u64, granted: u64 },
    CapacityAdded { granted: u64 },
    LogLevelSet,
    CleanedUp,
    Error(WorkerFailure),
}

/// Request with correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u32,
    pub body: Request,
}

/// Response echoing the correlation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: u32,
    pub body: Response,
}

// ============================================================================
// Wire encoding
// ============================================================================

pub fn encode_request(envelope: &RequestEnvelope) -> Result<Vec<u8>, PersistError> {
    bincode::serde::encode_to_vec(envelope, bincode::config::standard())
        .map_err(|e| PersistError::Protocol(format!("encode request: {}", e)))
}

pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, PersistError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(envelope, _)| envelope)
        .map_err(|e| PersistError::Protocol(format!("decode request: {}", e)))
}

pub fn encode_response(envelope: &ResponseEnvelope) -> Result<Vec<u8>, PersistError> {
    bincode::serde::encode_to_vec(envelope, bincode::config::standard())
        .map_err(|e| PersistError::Protocol(format!("encode response: {}", e)))
}

pub fn decode_response(bytes: &[u8]) -> Result<ResponseEnvelope, PersistError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(envelope, _)| envelope)
        .map_err(|e| PersistError::Protocol(format!("decode response: {}", e)))
}

// ============================================================================
// Tests
// ============================================================================
