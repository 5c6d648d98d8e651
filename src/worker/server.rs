//! Worker request servicing
//!
//! The worker owns the backing store exclusively and services one request
//! at a time. `write_dirty_pages` follows a fixed discipline: validate
//! before any I/O, write every page, truncate to the reported file size,
//! one sync, then close. A mid-sequence failure aborts the request and
//! names the failing page.

use std::collections::HashSet;

use crate::worker::protocol::{
    DirtyPage, Request, RequestEnvelope, Response, ResponseEnvelope, WorkerErrorKind,
    WorkerFailure, WorkerLogLevel,
};
use crate::worker::store::{BackingStore, StoreError};

type OpResult = Result<Response, WorkerFailure>;

/// Services protocol requests against a backing store
pub struct Worker<S: BackingStore> {
    store: S,
    /// Handles opened on behalf of the client, released on `cleanup`
    client_handles: HashSet<u32>,
    log_level: WorkerLogLevel,
}

impl<S: BackingStore> Worker<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            client_handles: HashSet::new(),
            log_level: WorkerLogLevel::default(),
        }
    }

    /// The underlying store (test inspection)
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Current protocol-set verbosity
    pub fn log_level(&self) -> WorkerLogLevel {
        self.log_level
    }

    /// Service one request, producing the response with the echoed id
    pub fn handle(&mut self, envelope: RequestEnvelope) -> ResponseEnvelope {
        if self.log_level.allows(WorkerLogLevel::Debug) {
            log::debug!(
                "worker request #{}: {}",
                envelope.id,
                envelope.body.kind_name()
            );
        }

        let result = match envelope.body {
            Request::Open { filename, create } => self.op_open(&filename, create),
            Request::Close { handle } => self.op_close(handle),
            Request::ReadFullFile { filename } => self.op_read_full_file(&filename),
            Request::WriteFullFile { filename, bytes } => {
                self.op_write_full_file(&filename, &bytes)
            }
            Request::WriteDirtyPages {
                filename,
                page_size,
                file_size,
                pages,
            } => self.op_write_dirty_pages(&filename, page_size, file_size, &pages),
            Request::Delete { filename } => self.op_delete(&filename),
            Request::Exists { filename } => self.op_exists(&filename),
            Request::List => self.op_list(),
            Request::GetCapacity => self.op_get_capacity(),
            Request::AddCapacity { bytes } => self.op_add_capacity(bytes),
            Request::SetLogLevel { level } => {
                self.log_level = level;
                Ok(Response::LogLevelSet)
            }
            Request::Cleanup => self.op_cleanup(),
        };

        let body = result.unwrap_or_else(|failure| {
            if self.log_level.allows(WorkerLogLevel::Error) {
                log::error!("worker request #{} failed: {}", envelope.id, failure.message);
            }
            Response::Error(failure)
        });

        ResponseEnvelope {
            id: envelope.id,
            body,
        }
    }

    fn op_open(&mut self, filename: &str, create: bool) -> OpResult {
        let handle = self.store.open(filename, create).map_err(fail)?;
        self.client_handles.insert(handle);
        Ok(Response::Opened { handle })
    }

    fn op_close(&mut self, handle: u32) -> OpResult {
        self.client_handles.remove(&handle);
        self.store.close(handle).map_err(fail)?;
        Ok(Response::Closed)
    }

    fn op_read_full_file(&mut self, filename: &str) -> OpResult {
        let handle = self.store.open(filename, false).map_err(fail)?;
        let result = (|| {
            let size = self.store.file_size(handle)?;
            let mut bytes = vec![0u8; size as usize];
            let n = self.store.read(handle, &mut bytes, 0)?;
            bytes.truncate(n);
            Ok(bytes)
        })();
        let _ = self.store.close(handle);
        Ok(Response::FileData {
            bytes: result.map_err(fail)?,
        })
    }

    fn op_write_full_file(&mut self, filename: &str, bytes: &[u8]) -> OpResult {
        let handle = self.store.open(filename, true).map_err(fail)?;
        let result = (|| {
            self.store.write(handle, bytes, 0)?;
            self.store.truncate(handle, bytes.len() as u64)?;
            self.store.sync(handle)
        })();
        let close_result = self.store.close(handle);
        result.map_err(fail)?;
        close_result.map_err(fail)?;
        Ok(Response::FullFileWritten {
            bytes_written: bytes.len() as u64,
        })
    }

    fn op_write_dirty_pages(
        &mut self,
        filename: &str,
        page_size: u32,
        file_size: u64,
        pages: &[DirtyPage],
    ) -> OpResult {
        // Validate the whole request before touching the store
        if page_size == 0 {
            return Err(WorkerFailure::new(
                WorkerErrorKind::InvalidRequest,
                "page_size must be non-zero",
            ));
        }
        for pair in pages.windows(2) {
            if pair[0].page_index >= pair[1].page_index {
                return Err(WorkerFailure::new(
                    WorkerErrorKind::InvalidRequest,
                    format!(
                        "page indices not strictly ascending: {} then {}",
                        pair[0].page_index, pair[1].page_index
                    ),
                ));
            }
        }
        for page in pages {
            if page.bytes.len() != page_size as usize {
                return Err(WorkerFailure::new(
                    WorkerErrorKind::InvalidRequest,
                    format!(
                        "page {} carries {} bytes, expected {}",
                        page.page_index,
                        page.bytes.len(),
                        page_size
                    ),
                ));
            }
        }

        let handle = self.store.open(filename, true).map_err(fail)?;
        for page in pages {
            let offset = page.page_index as u64 * page_size as u64;
            if let Err(e) = self.store.write(handle, &page.bytes, offset) {
                let _ = self.store.close(handle);
                return Err(WorkerFailure::at_page(
                    e.kind(),
                    e.to_string(),
                    page.page_index,
                ));
            }
        }

        let result = (|| {
            self.store.truncate(handle, file_size)?;
            self.store.sync(handle)
        })();
        let close_result = self.store.close(handle);
        result.map_err(fail)?;
        close_result.map_err(fail)?;

        Ok(Response::PagesWritten {
            pages_written: pages.len() as u32,
            bytes_written: pages.len() as u64 * page_size as u64,
        })
    }

    fn op_delete(&mut self, filename: &str) -> OpResult {
        self.store.delete(filename).map_err(fail)?;
        Ok(Response::Deleted)
    }

    fn op_exists(&mut self, filename: &str) -> OpResult {
        let exists = self.store.exists(filename).map_err(fail)?;
        Ok(Response::Existence { exists })
    }

    fn op_list(&mut self) -> OpResult {
        let filenames = self.store.list_files().map_err(fail)?;
        Ok(Response::FileList { filenames })
    }

    fn op_get_capacity(&mut self) -> OpResult {
        let capacity = self.store.capacity().map_err(fail)?;
        Ok(Response::Capacity {
            used: capacity.used,
            granted: capacity.granted,
        })
    }

    fn op_add_capacity(&mut self, bytes: u64) -> OpResult {
        let granted = self.store.add_capacity(bytes).map_err(fail)?;
        Ok(Response::CapacityAdded { granted })
    }

    /// Best-effort release of every client-owned handle
    fn op_cleanup(&mut self) -> OpResult {
        for handle in self.client_handles.drain() {
            if let Err(e) = self.store.close(handle) {
                log::warn!("cleanup: closing handle {} failed: {}", handle, e);
            }
        }
        Ok(Response::CleanedUp)
    }
}

fn fail(e: StoreError) -> WorkerFailure {
    WorkerFailure::new(e.kind(), e.to_string())
}

// ============================================================================
// Tests
// ============================================================================
