//! Virtual File System trait and types
//!
//! This module defines the VFS abstraction layer the embedded SQL engine
//! programs against, mirroring SQLite's os.c interface. The tracking shim
//! registers here as the default VFS so the engine picks it up without
//! cooperation.

use crate::error::{Error, ErrorCode, Result};
use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ============================================================================
// Flags and Enums
// ============================================================================

bitflags! {
    /// Flags for opening files
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READONLY         = 0x00000001;
        const READWRITE        = 0x00000002;
        const CREATE           = 0x00000004;
        const DELETEONCLOSE    = 0x00000008;
        const EXCLUSIVE        = 0x00000010;
        const MAIN_DB          = 0x00000100;
        const TEMP_DB          = 0x00000200;
        const TRANSIENT_DB     = 0x00000400;
        const MAIN_JOURNAL     = 0x00000800;
        const TEMP_JOURNAL     = 0x00001000;
        const SUBJOURNAL       = 0x00002000;
        const SUPER_JOURNAL    = 0x00004000;
        const WAL              = 0x00080000;
    }
}

bitflags! {
    /// Flags for checking file access
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// Check if file exists
        const EXISTS = 0;
        /// Check if file is readable and writable
        const READWRITE = 1;
        /// Check if file is readable
        const READ = 2;
    }
}

bitflags! {
    /// Flags for file sync operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SyncFlags: u32 {
        const NORMAL   = 0x00002;
        const FULL     = 0x00003;
        const DATAONLY = 0x00010;
    }
}

bitflags! {
    /// Device characteristics flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCharacteristics: u32 {
        const ATOMIC                  = 0x00000001;
        const ATOMIC4K                = 0x00000010;
        const SAFE_APPEND             = 0x00000200;
        const SEQUENTIAL              = 0x00000400;
        const UNDELETABLE_WHEN_OPEN   = 0x00000800;
        const POWERSAFE_OVERWRITE     = 0x00001000;
        const IMMUTABLE               = 0x00002000;
        const BATCH_ATOMIC            = 0x00004000;
    }
}

bitflags! {
    /// Flags for shared memory lock operations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShmLockFlags: u32 {
        const UNLOCK    = 1;
        const LOCK      = 2;
        const SHARED    = 4;
        const EXCLUSIVE = 8;
    }
}

/// File lock types (from SQLite's lock state machine)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(i32)]
pub enum LockType {
    /// No lock held
    #[default]
    None = 0,
    /// Shared lock (multiple readers)
    Shared = 1,
    /// Reserved lock (intend to write)
    Reserved = 2,
    /// Pending lock (waiting for exclusive)
    Pending = 3,
    /// Exclusive lock (single writer)
    Exclusive = 4,
}

/// File control operations
#[derive(Debug)]
pub enum FileControlOp {
    /// Get current lock state
    LockState,
    /// Hint about expected file size
    SizeHint(i64),
    /// Set chunk size for incremental vacuum
    ChunkSize(i32),
    /// Sync was omitted
    SyncOmitted,
    /// Persist WAL file after close
    PersistWal(bool),
    /// File was overwritten
    OverWrite,
    /// Check if file has moved
    HasMoved,
    /// Force sync
    Sync,
    /// Get data version
    DataVersion,
    /// Custom file control operation
    Custom(i32),
}

// ============================================================================
// VFS File Trait
// ============================================================================

/// File handle abstraction
///
/// This trait defines the interface for file operations that the SQL engine
/// performs. Each VFS implementation provides a concrete type implementing
/// this trait.
pub trait VfsFile: Send {
    /// Read from file at the given offset; short reads zero-fill the tail
    /// of the buffer and return the byte count actually present
    fn read(&mut self, buf: &mut [u8], offset: i64) -> Result<usize>;

    /// Write to file at the given offset
    fn write(&mut self, buf: &[u8], offset: i64) -> Result<usize>;

    /// Truncate file to the given size
    fn truncate(&mut self, size: i64) -> Result<()>;

    /// Sync file to durable storage
    fn sync(&mut self, flags: SyncFlags) -> Result<()>;

    /// Get file size
    fn file_size(&self) -> Result<i64>;

    /// Acquire a file lock
    fn lock(&mut self, lock_type: LockType) -> Result<()>;

    /// Release a file lock
    fn unlock(&mut self, lock_type: LockType) -> Result<()>;

    /// Check if a reserved lock is held by another connection
    fn check_reserved_lock(&self) -> Result<bool>;

    /// File control operations
    fn file_control(&mut self, op: FileControlOp) -> Result<()>;

    /// Get sector size for this file
    fn sector_size(&self) -> i32 {
        4096
    }

    /// Get device characteristics
    fn device_characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::empty()
    }

    /// Map shared memory region (for WAL)
    fn shm_map(&mut self, _region: i32, _size: i32, _extend: bool) -> Result<*mut u8> {
        Err(Error::new(ErrorCode::IoErr))
    }

    /// Lock shared memory region
    fn shm_lock(&mut self, _offset: i32, _n: i32, _flags: ShmLockFlags) -> Result<()> {
        Err(Error::new(ErrorCode::IoErr))
    }

    /// Shared memory barrier
    fn shm_barrier(&self) {}

    /// Unmap shared memory
    fn shm_unmap(&mut self, _delete: bool) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// VFS Trait
// ============================================================================

/// Virtual File System - platform abstraction
///
/// This trait defines the interface for file-system operations the SQL
/// engine delegates. Implementations register with the global registry;
/// the default VFS is the one unnamed opens resolve to.
pub trait Vfs: Send + Sync {
    /// VFS name (e.g., "mem", "tracking")
    fn name(&self) -> &str;

    /// Maximum pathname length supported
    fn max_pathname(&self) -> i32 {
        1024
    }

    /// Open a file; `None` path requests an unnamed temp file
    fn open(&self, path: Option<&str>, flags: OpenFlags) -> Result<Box<dyn VfsFile>>;

    /// Delete a file
    fn delete(&self, path: &str, sync_dir: bool) -> Result<()>;

    /// Check if file exists/is accessible
    fn access(&self, path: &str, flags: AccessFlags) -> Result<bool>;

    /// Get full pathname from relative path
    fn full_pathname(&self, path: &str) -> Result<String>;

    /// Open a dynamic library
    fn dlopen(&self, _path: &str) -> Result<*mut ()> {
        Err(Error::with_message(
            ErrorCode::Error,
            "Dynamic loading not supported",
        ))
    }

    /// Get last dynamic library error
    fn dlerror(&self) -> String {
        String::new()
    }

    /// Get symbol from dynamic library
    fn dlsym(&self, _handle: *mut (), _symbol: &str) -> Option<*mut ()> {
        None
    }

    /// Close dynamic library
    fn dlclose(&self, _handle: *mut ()) {}

    /// Fill buffer with random bytes
    fn randomness(&self, buf: &mut [u8]) -> i32;

    /// Sleep for specified microseconds, returns actual sleep time
    fn sleep(&self, microseconds: i32) -> i32;

    /// Get current time as Julian day number
    fn current_time(&self) -> f64;

    /// Get current time with higher precision (milliseconds on the Julian scale)
    fn current_time_i64(&self) -> i64;

    /// Get last OS error
    fn get_last_error(&self) -> (i32, String);

    /// Set a system call replacement
    fn set_system_call(&mut self, _name: &str, _ptr: *const ()) -> Result<()> {
        Err(Error::new(ErrorCode::NotFound))
    }

    /// Get current system call pointer
    fn get_system_call(&self, _name: &str) -> Option<*const ()> {
        None
    }

    /// Get next system call name in iteration
    fn next_system_call(&self, _name: &str) -> Option<&str> {
        None
    }
}

// ============================================================================
// VFS Catalog
// ============================================================================

/// Process-wide catalog of registered VFS implementations, keyed by name.
///
/// The default entry, tracked by name rather than by handle, is what
/// unnamed opens resolve to; the tracking shim installs itself as that
/// entry so the SQL engine routes through it without cooperation. The
/// catalog itself stays private: registration happens only through the
/// `vfs_*` functions below, which is the surface the engine knows.
struct VfsCatalog {
    by_name: HashMap<String, Arc<dyn Vfs>>,
    default_name: Option<String>,
}

impl VfsCatalog {
    fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            default_name: None,
        }
    }

    /// Install an implementation; the first install, or any with
    /// `make_default`, becomes the default entry. Re-installing a name
    /// replaces the previous implementation.
    fn install(&mut self, vfs: Arc<dyn Vfs>, make_default: bool) {
        let name = vfs.name().to_string();
        if make_default || self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.by_name.insert(name, vfs);
    }

    /// Remove a name; a surviving entry takes over as the default when
    /// the removed one held it.
    fn remove(&mut self, name: &str) {
        self.by_name.remove(name);
        if self.default_name.as_deref() == Some(name) {
            self.default_name = self.by_name.keys().next().cloned();
        }
    }

    /// Resolve a name, or the default entry when no name is given
    fn resolve(&self, name: Option<&str>) -> Option<Arc<dyn Vfs>> {
        let name = name.or(self.default_name.as_deref())?;
        self.by_name.get(name).cloned()
    }
}

lazy_static::lazy_static! {
    static ref CATALOG: Mutex<VfsCatalog> = Mutex::new(VfsCatalog::new());
}

/// Find a registered VFS by name, or the default when `name` is `None`
pub fn vfs_find(name: Option<&str>) -> Option<Arc<dyn Vfs>> {
    CATALOG.lock().unwrap().resolve(name)
}

/// Register a VFS, optionally making it the default
pub fn vfs_register(vfs: Arc<dyn Vfs>, make_default: bool) -> Result<()> {
    CATALOG.lock().unwrap().install(vfs, make_default);
    Ok(())
}

/// Unregister a VFS by name
pub fn vfs_unregister(name: &str) -> Result<()> {
    CATALOG.lock().unwrap().remove(name);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_flags() {
        let flags = OpenFlags::READWRITE | OpenFlags::CREATE;
        assert!(flags.contains(OpenFlags::READWRITE));
        assert!(flags.contains(OpenFlags::CREATE));
        assert!(!flags.contains(OpenFlags::READONLY));
    }

    #[test]
    fn test_lock_type_ordering() {
        assert!(LockType::None < LockType::Shared);
        assert!(LockType::Shared < LockType::Reserved);
        assert!(LockType::Reserved < LockType::Pending);
        assert!(LockType::Pending < LockType::Exclusive);
    }

    #[test]
    fn test_catalog_default_resolution() {
        use crate::os::memvfs::{FileImageStore, MemVfs};

        let mut catalog = VfsCatalog::new();
        assert!(catalog.resolve(None).is_none());
        assert!(catalog.resolve(Some("alpha")).is_none());

        let store = FileImageStore::new();
        catalog.install(
            Arc::new(MemVfs::with_name("alpha", store.clone())),
            false,
        );
        // The first install becomes the default even without the flag
        assert_eq!(catalog.resolve(None).unwrap().name(), "alpha");

        catalog.install(Arc::new(MemVfs::with_name("beta", store)), true);
        assert_eq!(catalog.resolve(None).unwrap().name(), "beta");
        assert_eq!(catalog.resolve(Some("alpha")).unwrap().name(), "alpha");

        catalog.remove("beta");
        // The surviving entry takes over as the default
        assert_eq!(catalog.resolve(None).unwrap().name(), "alpha");
        assert!(catalog.resolve(Some("beta")).is_none());
    }
}
