//! Write tracking: per-file dirty accounting and the tracker registry
//!
//! The registry owns one [`FileTracker`] per logical filename and wires the
//! tracking shim in front of a base VFS. Initialisation registers the shim
//! as the process default so the SQL engine routes every open through it.

pub mod bitmap;
pub mod shim;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::PersistError;
use crate::os::memvfs::normalize_name;
use crate::os::vfs::{vfs_find, vfs_register, vfs_unregister, Vfs};
use bitmap::DirtyBitmap;
use shim::TrackingVfs;

/// Name the tracking shim registers under
pub const TRACKING_VFS_NAME: &str = "memvault-tracking";

/// Default page size when none is configured
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Smallest legal page size
pub const MIN_PAGE_SIZE: u32 = 512;

// ============================================================================
// File tracker
// ============================================================================

/// Per-file dirty-page accounting
pub struct FileTracker {
    /// Normalised logical filename
    name: String,
    /// Dirty bits, one per page
    bitmap: DirtyBitmap,
    /// Number of currently open descriptors on this logical file
    open_count: u32,
}

impl FileTracker {
    fn new(name: String, page_size: u32) -> Self {
        Self {
            name,
            bitmap: DirtyBitmap::new(page_size),
            open_count: 0,
        }
    }

    /// Normalised filename this tracker accounts for
    pub fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Tracker registry
// ============================================================================

struct RegistryInner {
    trackers: HashMap<String, FileTracker>,
}

/// Process-level owner of trackers and the wrapped base VFS
pub struct TrackerRegistry {
    base: Arc<dyn Vfs>,
    page_size: u32,
    inner: Mutex<RegistryInner>,
}

lazy_static::lazy_static! {
    static ref ACTIVE: Mutex<Option<Arc<TrackerRegistry>>> = Mutex::new(None);
}

impl fmt::Debug for TrackerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("TrackerRegistry")
            .field("base", &self.base.name())
            .field("page_size", &self.page_size)
            .field("trackers", &inner.trackers.len())
            .finish()
    }
}

impl TrackerRegistry {
    /// Build a registry over an explicit base VFS without touching global
    /// state. `init` is the global-registration wrapper around this.
    pub fn with_base(base: Arc<dyn Vfs>, page_size: u32) -> Result<Arc<Self>, PersistError> {
        if page_size < MIN_PAGE_SIZE || !page_size.is_power_of_two() {
            return Err(PersistError::InvalidPageSize(page_size));
        }
        Ok(Arc::new(Self {
            base,
            page_size,
            inner: Mutex::new(RegistryInner {
                trackers: HashMap::new(),
            }),
        }))
    }

    /// Locate the named base VFS, wrap it in a tracking shim, and register
    /// the shim as the process default. Idempotent on repeated successful
    /// calls: the already-active registry is returned.
    pub fn init(base_vfs_name: &str, page_size: u32) -> Result<Arc<Self>, PersistError> {
        let mut active = ACTIVE.lock().unwrap();
        if let Some(existing) = active.as_ref() {
            return Ok(Arc::clone(existing));
        }

        let base = vfs_find(Some(base_vfs_name))
            .ok_or_else(|| PersistError::UnknownBaseVfs(base_vfs_name.to_string()))?;
        let registry = Self::with_base(base, page_size)?;

        let shim = Arc::new(TrackingVfs::new(
            TRACKING_VFS_NAME,
            Arc::clone(&registry.base),
            Arc::clone(&registry),
        ));
        vfs_register(shim, true)
            .map_err(|e| PersistError::Protocol(format!("shim registration failed: {}", e)))?;

        log::info!(
            "tracking shim registered over base VFS {:?} (page size {})",
            base_vfs_name,
            page_size
        );
        *active = Some(Arc::clone(&registry));
        Ok(registry)
    }

    /// Unregister the shim and drop all trackers. After shutdown, `init`
    /// may be called again.
    pub fn shutdown() {
        let mut active = ACTIVE.lock().unwrap();
        if let Some(registry) = active.take() {
            let _ = vfs_unregister(TRACKING_VFS_NAME);
            registry.inner.lock().unwrap().trackers.clear();
            log::info!("tracking shim unregistered");
        }
    }

    /// The currently active registry, if `init` succeeded
    pub fn active() -> Option<Arc<TrackerRegistry>> {
        ACTIVE.lock().unwrap().clone()
    }

    /// Registry-wide page size
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// The base VFS the shim delegates to
    pub fn base(&self) -> Arc<dyn Vfs> {
        Arc::clone(&self.base)
    }

    /// Ensure a tracker exists for the filename, allocating a zero-state
    /// one on first touch. Returns the normalised name trackers are keyed
    /// by.
    pub fn get_or_create_tracker(&self, filename: &str) -> String {
        let mut inner = self.inner.lock().unwrap();
        Self::entry(&mut inner, filename, self.page_size)
            .name()
            .to_string()
    }

    /// Record a successful write of `len` bytes at `offset`, creating the
    /// tracker on first touch.
    pub fn mark_dirty(&self, filename: &str, offset: i64, len: i64) {
        let mut inner = self.inner.lock().unwrap();
        let tracker = Self::entry(&mut inner, filename, self.page_size);
        tracker.bitmap.mark_range(offset, len);
    }

    /// Dirty page indices for a file, ascending. Empty for unknown names.
    pub fn get_dirty_pages(&self, filename: &str) -> Vec<u32> {
        let inner = self.inner.lock().unwrap();
        inner
            .trackers
            .get(normalize_name(filename))
            .map(|t| t.bitmap.collect_dirty())
            .unwrap_or_default()
    }

    /// Clear a file's dirty bits. No-op for unknown names.
    pub fn reset_dirty(&self, filename: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tracker) = inner.trackers.get_mut(normalize_name(filename)) {
            tracker.bitmap.reset();
        }
    }

    /// Whether a specific page is currently dirty
    pub fn is_dirty(&self, filename: &str, page_index: u32) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .trackers
            .get(normalize_name(filename))
            .map(|t| t.bitmap.contains(page_index))
            .unwrap_or(false)
    }

    /// Tracker's `total_pages` high-water mark; 0 for unknown names
    pub fn total_pages(&self, filename: &str) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner
            .trackers
            .get(normalize_name(filename))
            .map(|t| t.bitmap.total_pages())
            .unwrap_or(0)
    }

    /// Open-descriptor count for a logical file
    pub fn open_count(&self, filename: &str) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner
            .trackers
            .get(normalize_name(filename))
            .map(|t| t.open_count)
            .unwrap_or(0)
    }

    /// Called by the shim after a successful tracked open
    pub(crate) fn note_open(&self, filename: &str) {
        let mut inner = self.inner.lock().unwrap();
        let tracker = Self::entry(&mut inner, filename, self.page_size);
        tracker.open_count += 1;
    }

    /// Called by the shim when a tracked handle closes. The tracker itself
    /// persists so bitmap state survives close/reopen cycles.
    pub(crate) fn note_close(&self, filename: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(tracker) = inner.trackers.get_mut(normalize_name(filename)) {
            tracker.open_count = tracker.open_count.saturating_sub(1);
        }
    }

    fn entry<'a>(
        inner: &'a mut RegistryInner,
        filename: &str,
        page_size: u32,
    ) -> &'a mut FileTracker {
        let key = normalize_name(filename).to_string();
        inner
            .trackers
            .entry(key.clone())
            .or_insert_with(|| FileTracker::new(key, page_size))
    }
}

// ============================================================================
// Tests
// ============================================================================
