//! Tracking VFS shim
//!
//! Transparent pass-through over a base VFS. The only behaviour it adds:
//! successful writes and truncates mark pages dirty in the registry's
//! tracker for the opened file. Every other operation, hook, and error code
//! is the base's own.

use std::sync::Arc;

use crate::error::Result;
use crate::os::memvfs::normalize_name;
use crate::os::vfs::{
    AccessFlags, DeviceCharacteristics, FileControlOp, LockType, OpenFlags, ShmLockFlags,
    SyncFlags, Vfs, VfsFile,
};
use crate::track::TrackerRegistry;

// ============================================================================
// Tracking VFS
// ============================================================================

/// VFS wrapper that records writes into the tracker registry
pub struct TrackingVfs {
    name: String,
    base: Arc<dyn Vfs>,
    registry: Arc<TrackerRegistry>,
}

impl TrackingVfs {
    pub fn new(name: &str, base: Arc<dyn Vfs>, registry: Arc<TrackerRegistry>) -> Self {
        Self {
            name: name.to_string(),
            base,
            registry,
        }
    }
}

impl Vfs for TrackingVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_pathname(&self) -> i32 {
        self.base.max_pathname()
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> Result<Box<dyn VfsFile>> {
        let file = self.base.open(path, flags)?;
        match path {
            Some(p) => {
                // Tracker exists from here on; the handle pins it open
                self.registry.note_open(p);
                log::trace!("tracking open {:?}", normalize_name(p));
                Ok(Box::new(TrackingFile {
                    base: file,
                    key: normalize_name(p).to_string(),
                    registry: Arc::clone(&self.registry),
                }))
            }
            // Unnamed temp files are never persisted, so never tracked
            None => Ok(file),
        }
    }

    fn delete(&self, path: &str, sync_dir: bool) -> Result<()> {
        self.base.delete(path, sync_dir)
    }

    fn access(&self, path: &str, flags: AccessFlags) -> Result<bool> {
        self.base.access(path, flags)
    }

    fn full_pathname(&self, path: &str) -> Result<String> {
        self.base.full_pathname(path)
    }

    fn dlopen(&self, path: &str) -> Result<*mut ()> {
        self.base.dlopen(path)
    }

    fn dlerror(&self) -> String {
        self.base.dlerror()
    }

    fn dlsym(&self, handle: *mut (), symbol: &str) -> Option<*mut ()> {
        self.base.dlsym(handle, symbol)
    }

    fn dlclose(&self, handle: *mut ()) {
        self.base.dlclose(handle)
    }

    fn randomness(&self, buf: &mut [u8]) -> i32 {
        self.base.randomness(buf)
    }

    fn sleep(&self, microseconds: i32) -> i32 {
        self.base.sleep(microseconds)
    }

    fn current_time(&self) -> f64 {
        self.base.current_time()
    }

    fn current_time_i64(&self) -> i64 {
        self.base.current_time_i64()
    }

    fn get_last_error(&self) -> (i32, String) {
        self.base.get_last_error()
    }

    fn get_system_call(&self, name: &str) -> Option<*const ()> {
        self.base.get_system_call(name)
    }

    fn next_system_call(&self, name: &str) -> Option<&str> {
        self.base.next_system_call(name)
    }
}

// ============================================================================
// Tracking file handle
// ============================================================================

/// File handle that owns the base handle and the tracker key
pub struct TrackingFile {
    base: Box<dyn VfsFile>,
    key: String,
    registry: Arc<TrackerRegistry>,
}

impl VfsFile for TrackingFile {
    fn read(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        self.base.read(buf, offset)
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> Result<usize> {
        // Mark iff the base accepted the write; a failed write must leave
        // the bitmap untouched and surface the base's code unchanged.
        let n = self.base.write(buf, offset)?;
        if n > 0 {
            self.registry.mark_dirty(&self.key, offset, n as i64);
        }
        Ok(n)
    }

    fn truncate(&mut self, size: i64) -> Result<()> {
        self.base.truncate(size)?;
        // The page containing the new end-of-file gets resent next flush
        self.registry.mark_dirty(&self.key, size, 1);
        Ok(())
    }

    fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        self.base.sync(flags)
    }

    fn file_size(&self) -> Result<i64> {
        self.base.file_size()
    }

    fn lock(&mut self, lock_type: LockType) -> Result<()> {
        self.base.lock(lock_type)
    }

    fn unlock(&mut self, lock_type: LockType) -> Result<()> {
        self.base.unlock(lock_type)
    }

    fn check_reserved_lock(&self) -> Result<bool> {
        self.base.check_reserved_lock()
    }

    fn file_control(&mut self, op: FileControlOp) -> Result<()> {
        self.base.file_control(op)
    }

    fn sector_size(&self) -> i32 {
        self.base.sector_size()
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        self.base.device_characteristics()
    }

    fn shm_map(&mut self, region: i32, size: i32, extend: bool) -> Result<*mut u8> {
        self.base.shm_map(region, size, extend)
    }

    fn shm_lock(&mut self, offset: i32, n: i32, flags: ShmLockFlags) -> Result<()> {
        self.base.shm_lock(offset, n, flags)
    }

    fn shm_barrier(&self) {
        self.base.shm_barrier()
    }

    fn shm_unmap(&mut self, delete: bool) -> Result<()> {
        self.base.shm_unmap(delete)
    }
}

impl Drop for TrackingFile {
    fn drop(&mut self) {
        self.registry.note_close(&self.key);
    }
}

// ============================================================================
// Tests
// ============================================================================
