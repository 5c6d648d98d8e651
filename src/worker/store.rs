//! Backing-store capability surface
//!
//! The worker is the only component allowed to touch durable storage, and
//! only through this narrow trait. `MemoryStore` is the in-process
//! reference implementation; a deployment substitutes its own binding.

use std::collections::HashMap;

use thiserror::Error;

use crate::worker::protocol::WorkerErrorKind;

/// Default quota granted to a fresh `MemoryStore`
pub const DEFAULT_CAPACITY: u64 = 64 * 1024 * 1024;

/// Errors surfaced by a backing store
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("bad handle: {0}")]
    BadHandle(u32),
    #[error("quota exceeded: need {needed} more bytes, {available} available")]
    Quota { needed: u64, available: u64 },
    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Protocol-level error class for this failure
    pub fn kind(&self) -> WorkerErrorKind {
        match self {
            StoreError::NotFound(_) => WorkerErrorKind::NotFound,
            StoreError::BadHandle(_) => WorkerErrorKind::BadHandle,
            StoreError::Quota { .. } => WorkerErrorKind::Quota,
            StoreError::Io(_) => WorkerErrorKind::Io,
        }
    }
}

/// Quota usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapacity {
    pub used: u64,
    pub granted: u64,
}

/// Capability set the worker requires from its storage binding
pub trait BackingStore: Send {
    /// Open a file, creating it when `create` is set
    fn open(&mut self, filename: &str, create: bool) -> Result<u32, StoreError>;

    /// Write bytes at an absolute offset, extending the file as needed
    fn write(&mut self, handle: u32, bytes: &[u8], offset: u64) -> Result<(), StoreError>;

    /// Set the file length; growth zero-fills
    fn truncate(&mut self, handle: u32, size: u64) -> Result<(), StoreError>;

    /// Flush the file to durable storage
    fn sync(&mut self, handle: u32) -> Result<(), StoreError>;

    /// Release a handle
    fn close(&mut self, handle: u32) -> Result<(), StoreError>;

    /// Read bytes at an absolute offset; returns the count actually read
    fn read(&mut self, handle: u32, buf: &mut [u8], offset: u64) -> Result<usize, StoreError>;

    /// Current file length
    fn file_size(&self, handle: u32) -> Result<u64, StoreError>;

    /// Remove a file by name
    fn delete(&mut self, filename: &str) -> Result<(), StoreError>;

    /// Existence test
    fn exists(&self, filename: &str) -> Result<bool, StoreError>;

    /// All filenames currently stored
    fn list_files(&self) -> Result<Vec<String>, StoreError>;

    /// Quota usage
    fn capacity(&self) -> Result<StoreCapacity, StoreError>;

    /// Grow the quota; returns the new grant
    fn add_capacity(&mut self, bytes: u64) -> Result<u64, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory backing store with byte-quota accounting
pub struct MemoryStore {
    files: HashMap<String, Vec<u8>>,
    handles: HashMap<u32, String>,
    next_handle: u32,
    used: u64,
    granted: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Store with an explicit quota grant
    pub fn with_capacity(granted: u64) -> Self {
        Self {
            files: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 1,
            used: 0,
            granted,
        }
    }

    /// Direct view of a file's bytes (test inspection)
    pub fn file_bytes(&self, filename: &str) -> Option<&[u8]> {
        self.files.get(filename).map(Vec::as_slice)
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    fn resolve(&self, handle: u32) -> Result<&str, StoreError> {
        self.handles
            .get(&handle)
            .map(String::as_str)
            .ok_or(StoreError::BadHandle(handle))
    }

    fn charge_growth(&mut self, new_len: u64, old_len: u64) -> Result<(), StoreError> {
        if new_len <= old_len {
            self.used -= old_len - new_len;
            return Ok(());
        }
        let growth = new_len - old_len;
        let available = self.granted.saturating_sub(self.used);
        if growth > available {
            return Err(StoreError::Quota {
                needed: growth,
                available,
            });
        }
        self.used += growth;
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BackingStore for MemoryStore {
    fn open(&mut self, filename: &str, create: bool) -> Result<u32, StoreError> {
        if !self.files.contains_key(filename) {
            if !create {
                return Err(StoreError::NotFound(filename.to_string()));
            }
            self.files.insert(filename.to_string(), Vec::new());
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, filename.to_string());
        Ok(handle)
    }

    fn write(&mut self, handle: u32, bytes: &[u8], offset: u64) -> Result<(), StoreError> {
        let name = self.resolve(handle)?.to_string();
        let old_len = self.files[&name].len() as u64;
        let end = offset + bytes.len() as u64;
        if end > old_len {
            self.charge_growth(end, old_len)?;
        }
        let file = self.files.get_mut(&name).unwrap();
        if (file.len() as u64) < end {
            file.resize(end as usize, 0);
        }
        file[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self, handle: u32, size: u64) -> Result<(), StoreError> {
        let name = self.resolve(handle)?.to_string();
        let old_len = self.files[&name].len() as u64;
        self.charge_growth(size, old_len)?;
        self.files.get_mut(&name).unwrap().resize(size as usize, 0);
        Ok(())
    }

    fn sync(&mut self, handle: u32) -> Result<(), StoreError> {
        self.resolve(handle).map(|_| ())
    }

    fn close(&mut self, handle: u32) -> Result<(), StoreError> {
        self.handles
            .remove(&handle)
            .map(|_| ())
            .ok_or(StoreError::BadHandle(handle))
    }

    fn read(&mut self, handle: u32, buf: &mut [u8], offset: u64) -> Result<usize, StoreError> {
        let name = self.resolve(handle)?;
        let file = &self.files[name];
        if offset >= file.len() as u64 {
            return Ok(0);
        }
        let n = buf.len().min(file.len() - offset as usize);
        buf[..n].copy_from_slice(&file[offset as usize..offset as usize + n]);
        Ok(n)
    }

    fn file_size(&self, handle: u32) -> Result<u64, StoreError> {
        let name = self.resolve(handle)?;
        Ok(self.files[name].len() as u64)
    }

    fn delete(&mut self, filename: &str) -> Result<(), StoreError> {
        match self.files.remove(filename) {
            Some(bytes) => {
                self.used -= bytes.len() as u64;
                // Handles onto the deleted file go stale
                self.handles.retain(|_, name| name.as_str() != filename);
                Ok(())
            }
            None => Err(StoreError::NotFound(filename.to_string())),
        }
    }

    fn exists(&self, filename: &str) -> Result<bool, StoreError> {
        Ok(self.files.contains_key(filename))
    }

    fn list_files(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn capacity(&self) -> Result<StoreCapacity, StoreError> {
        Ok(StoreCapacity {
            used: self.used,
            granted: self.granted,
        })
    }

    fn add_capacity(&mut self, bytes: u64) -> Result<u64, StoreError> {
        self.granted = self.granted.saturating_add(bytes);
        Ok(self.granted)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_write_read() {
        let mut store = MemoryStore::new();
        let h = store.open("a.db", true).unwrap();
        store.write(h, b"hello", 0).unwrap();
        store.write(h, b"!", 5).unwrap();

        let mut buf = [0u8; 6];
        assert_eq!(store.read(h, &mut buf, 0).unwrap(), 6);
        assert_eq!(&buf, b"hello!");
        assert_eq!(store.file_size(h).unwrap(), 6);
        store.close(h).unwrap();
    }

    #[test]
    fn test_open_missing_without_create() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            store.open("nope", false),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_closed_handle_is_rejected() {
        let mut store = MemoryStore::new();
        let h = store.open("a.db", true).unwrap();
        store.close(h).unwrap();
        assert!(matches!(
            store.write(h, b"x", 0),
            Err(StoreError::BadHandle(_))
        ));
    }

    #[test]
    fn test_quota_enforced_on_growth() {
        let mut store = MemoryStore::with_capacity(10);
        let h = store.open("a.db", true).unwrap();
        store.write(h, &[1u8; 10], 0).unwrap();

        let err = store.write(h, &[1u8; 1], 10).unwrap_err();
        assert!(matches!(err, StoreError::Quota { .. }));
        assert_eq!(err.kind(), WorkerErrorKind::Quota);

        // Overwrite within the allocation is free
        store.write(h, &[2u8; 10], 0).unwrap();
    }

    #[test]
    fn test_quota_released_on_shrink_and_delete() {
        let mut store = MemoryStore::with_capacity(100);
        let h = store.open("a.db", true).unwrap();
        store.write(h, &[1u8; 100], 0).unwrap();

        store.truncate(h, 40).unwrap();
        assert_eq!(store.capacity().unwrap().used, 40);

        store.close(h).unwrap();
        store.delete("a.db").unwrap();
        assert_eq!(store.capacity().unwrap().used, 0);
    }

    #[test]
    fn test_add_capacity() {
        let mut store = MemoryStore::with_capacity(4);
        let h = store.open("a.db", true).unwrap();
        assert!(store.write(h, &[0u8; 8], 0).is_err());

        assert_eq!(store.add_capacity(12).unwrap(), 16);
        store.write(h, &[0u8; 8], 0).unwrap();
    }

    #[test]
    fn test_list_is_sorted() {
        let mut store = MemoryStore::new();
        store.open("b.db", true).unwrap();
        store.open("a.db", true).unwrap();
        assert_eq!(store.list_files().unwrap(), vec!["a.db", "b.db"]);
    }
}
