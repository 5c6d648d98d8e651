//! Client half of the worker protocol
//!
//! Allocates correlation ids, keeps the pending-request table, and exposes
//! one typed call per request kind. Nothing here assumes a runtime: a
//! request future completes when the host delivers the matching response
//! via `dispatch_response`, fails when `expire` passes its deadline, and
//! late responses for retired ids are logged and dropped.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::channel::oneshot;

use crate::error::PersistError;
use crate::worker::protocol::{
    DirtyPage, Request, RequestEnvelope, Response, ResponseEnvelope, WorkerErrorKind,
    WorkerLogLevel,
};

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport the client pushes request envelopes into. `Err` means the
/// channel to the worker is gone.
pub trait RequestSink: Send + Sync {
    fn send(&self, envelope: RequestEnvelope) -> Result<(), PersistError>;
}

type PendingResult = Result<Response, PersistError>;

struct Pending {
    tx: oneshot::Sender<PendingResult>,
    deadline: Instant,
}

struct ClientInner {
    next_id: u32,
    pending: HashMap<u32, Pending>,
}

/// Request/response client for the persistence worker
pub struct WorkerClient {
    sink: Box<dyn RequestSink>,
    timeout: Duration,
    inner: Mutex<ClientInner>,
}

impl WorkerClient {
    pub fn new(sink: Box<dyn RequestSink>) -> Self {
        Self::with_timeout(sink, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(sink: Box<dyn RequestSink>, timeout: Duration) -> Self {
        Self {
            sink,
            timeout,
            inner: Mutex::new(ClientInner {
                next_id: 0,
                pending: HashMap::new(),
            }),
        }
    }

    /// Configured per-request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Send one request and await its response
    pub async fn request(&self, body: Request) -> Result<Response, PersistError> {
        let (id, rx) = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id = inner.next_id.wrapping_add(1);
            let (tx, rx) = oneshot::channel();
            inner.pending.insert(
                id,
                Pending {
                    tx,
                    deadline: Instant::now() + self.timeout,
                },
            );
            (id, rx)
        };

        if let Err(e) = self.sink.send(RequestEnvelope { id, body }) {
            self.inner.lock().unwrap().pending.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            // Sender dropped without completing: client torn down
            Err(_) => Err(PersistError::WorkerUnavailable),
        }
    }

    /// Complete the pending request matching this response's id. Responses
    /// for unknown (retired) ids are logged and dropped.
    pub fn dispatch_response(&self, envelope: ResponseEnvelope) {
        let pending = self.inner.lock().unwrap().pending.remove(&envelope.id);
        match pending {
            Some(p) => {
                let _ = p.tx.send(Ok(envelope.body));
            }
            None => log::debug!("dropping response for retired request id {}", envelope.id),
        }
    }

    /// Fail every request whose deadline has passed and retire its id.
    /// Returns the number of requests timed out.
    pub fn expire(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let expired: Vec<u32> = inner
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        for &id in &expired {
            if let Some(p) = inner.pending.remove(&id) {
                log::warn!("worker request {} timed out", id);
                let _ = p.tx.send(Err(PersistError::WorkerTimeout));
            }
        }
        expired.len()
    }

    /// Fail every outstanding request; called when the transport closes
    pub fn fail_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        for (_, p) in inner.pending.drain() {
            let _ = p.tx.send(Err(PersistError::WorkerUnavailable));
        }
    }

    // ------------------------------------------------------------------
    // Typed calls
    // ------------------------------------------------------------------

    pub async fn open(&self, filename: &str, create: bool) -> Result<u32, PersistError> {
        match self
            .request(Request::Open {
                filename: filename.to_string(),
                create,
            })
            .await?
        {
            Response::Opened { handle } => Ok(handle),
            other => Err(unexpected("open", other)),
        }
    }

    pub async fn close(&self, handle: u32) -> Result<(), PersistError> {
        match self.request(Request::Close { handle }).await? {
            Response::Closed => Ok(()),
            other => Err(unexpected("close", other)),
        }
    }

    /// Whole-file read; `Ok(None)` when the file does not exist
    pub async fn read_full_file(&self, filename: &str) -> Result<Option<Vec<u8>>, PersistError> {
        match self
            .request(Request::ReadFullFile {
                filename: filename.to_string(),
            })
            .await?
        {
            Response::FileData { bytes } => Ok(Some(bytes)),
            Response::Error(f) if f.kind == WorkerErrorKind::NotFound => Ok(None),
            other => Err(unexpected("read_full_file", other)),
        }
    }

    pub async fn write_full_file(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<u64, PersistError> {
        match self
            .request(Request::WriteFullFile {
                filename: filename.to_string(),
                bytes,
            })
            .await?
        {
            Response::FullFileWritten { bytes_written } => Ok(bytes_written),
            other => Err(unexpected("write_full_file", other)),
        }
    }

    /// Partial flush; returns `(pages_written, bytes_written)`
    pub async fn write_dirty_pages(
        &self,
        filename: &str,
        page_size: u32,
        file_size: u64,
        pages: Vec<DirtyPage>,
    ) -> Result<(u32, u64), PersistError> {
        match self
            .request(Request::WriteDirtyPages {
                filename: filename.to_string(),
                page_size,
                file_size,
                pages,
            })
            .await?
        {
            Response::PagesWritten {
                pages_written,
                bytes_written,
            } => Ok((pages_written, bytes_written)),
            other => Err(unexpected("write_dirty_pages", other)),
        }
    }

    pub async fn delete(&self, filename: &str) -> Result<(), PersistError> {
        match self
            .request(Request::Delete {
                filename: filename.to_string(),
            })
            .await?
        {
            Response::Deleted => Ok(()),
            other => Err(unexpected("delete", other)),
        }
    }

    pub async fn exists(&self, filename: &str) -> Result<bool, PersistError> {
        match self
            .request(Request::Exists {
                filename: filename.to_string(),
            })
            .await?
        {
            Response::Existence { exists } => Ok(exists),
            other => Err(unexpected("exists", other)),
        }
    }

    pub async fn list(&self) -> Result<Vec<String>, PersistError> {
        match self.request(Request::List).await? {
            Response::FileList { filenames } => Ok(filenames),
            other => Err(unexpected("list", other)),
        }
    }

    pub async fn get_capacity(&self) -> Result<(u64, u64), PersistError> {
        match self.request(Request::GetCapacity).await? {
            Response::Capacity { used, granted } => Ok((used, granted)),
            other => Err(unexpected("get_capacity", other)),
        }
    }

    pub async fn add_capacity(&self, bytes: u64) -> Result<u64, PersistError> {
        match self.request(Request::AddCapacity { bytes }).await? {
            Response::CapacityAdded { granted } => Ok(granted),
            other => Err(unexpected("add_capacity", other)),
        }
    }

    pub async fn set_log_level(&self, level: WorkerLogLevel) -> Result<(), PersistError> {
        match self.request(Request::SetLogLevel { level }).await? {
            Response::LogLevelSet => Ok(()),
            other => Err(unexpected("set_log_level", other)),
        }
    }

    /// Pre-shutdown handle release. Best-effort: failures are logged.
    pub async fn cleanup(&self) {
        match self.request(Request::Cleanup).await {
            Ok(Response::CleanedUp) => {}
            Ok(other) => log::warn!("cleanup: unexpected response {:?}", other),
            Err(e) => log::warn!("cleanup failed: {}", e),
        }
    }
}

fn unexpected(op: &str, response: Response) -> PersistError {
    match response {
        Response::Error(failure) => failure.into_persist_error(),
        other => PersistError::Protocol(format!("unexpected response to {}: {:?}", op, other)),
    }
}

// ============================================================================
// Tests
// ============================================================================
