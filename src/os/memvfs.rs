//! In-memory VFS
//!
//! The base VFS the tracking shim wraps in this deployment: every logical
//! file lives as a byte image in a shared [`FileImageStore`]. The SQL engine
//! reads and writes the images through normal VFS calls; the persistence
//! coordinator reads the same images synchronously at flush time.

use crate::error::{Error, ErrorCode, Result};
use crate::os::vfs::{
    AccessFlags, DeviceCharacteristics, FileControlOp, LockType, OpenFlags, SyncFlags, Vfs,
    VfsFile,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unix epoch on the Julian-day millisecond scale
const UNIX_EPOCH_JULIAN_MS: i64 = 210_866_760_000_000;

/// Strip the leading path separator; image keys are byte-exact after this.
pub fn normalize_name(name: &str) -> &str {
    name.trim_start_matches('/')
}

// ============================================================================
// Randomness source
// ============================================================================

/// Xorshift generator behind the VFS randomness hook.
///
/// Seeded from the clock on first use; `prng_seed` pins the state so tests
/// get reproducible output, `prng_reset` drops back to clock seeding.
struct MemPrng {
    state: u64,
    seeded: bool,
}

impl MemPrng {
    fn seed(&mut self, seed: u64) {
        // Zero is an absorbing state for xorshift
        self.state = seed | 1;
        self.seeded = true;
    }

    fn reset(&mut self) {
        self.seeded = false;
    }

    fn fill(&mut self, buf: &mut [u8]) {
        if !self.seeded {
            let clock = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9e37_79b9_7f4a_7c15);
            self.seed(clock);
        }
        for byte in buf.iter_mut() {
            self.state ^= self.state << 13;
            self.state ^= self.state >> 7;
            self.state ^= self.state << 17;
            *byte = self.state as u8;
        }
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_PRNG: Mutex<MemPrng> = Mutex::new(MemPrng {
        state: 0,
        seeded: false,
    });
}

/// Seed the shared generator; subsequent output is deterministic
pub fn prng_seed(seed: u64) {
    GLOBAL_PRNG.lock().unwrap().seed(seed);
}

/// Forget the seed; the next use reseeds from the clock
pub fn prng_reset() {
    GLOBAL_PRNG.lock().unwrap().reset();
}

// ============================================================================
// File image store
// ============================================================================

/// Shared map of logical filename to in-memory file image.
///
/// Cloning is shallow; all clones observe the same images.
#[derive(Clone, Default)]
pub struct FileImageStore {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl FileImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an image exists for the given name
    pub fn contains(&self, name: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .contains_key(normalize_name(name))
    }

    /// Current image length in bytes
    pub fn len(&self, name: &str) -> Option<u64> {
        self.files
            .lock()
            .unwrap()
            .get(normalize_name(name))
            .map(|f| f.len() as u64)
    }

    /// Copy out the whole image
    pub fn snapshot(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(normalize_name(name)).cloned()
    }

    /// Replace (or create) the image for a name
    pub fn install(&self, name: &str, bytes: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert(normalize_name(name).to_string(), bytes);
    }

    /// Drop the image for a name; false if it did not exist
    pub fn remove(&self, name: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .remove(normalize_name(name))
            .is_some()
    }

    /// Names of all current images
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy out one page, zero-padded to `page_size` when it extends past
    /// the end of the image. `None` when the file has no image at all.
    pub fn read_page(&self, name: &str, page_index: u32, page_size: u32) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap();
        let image = files.get(normalize_name(name))?;
        let start = page_index as usize * page_size as usize;
        let end = start + page_size as usize;
        let mut page = vec![0u8; page_size as usize];
        if start < image.len() {
            let avail = image.len().min(end);
            page[..avail - start].copy_from_slice(&image[start..avail]);
        }
        Some(page)
    }
}

// ============================================================================
// Mem VFS
// ============================================================================

/// VFS backed entirely by the image store
pub struct MemVfs {
    name: String,
    images: FileImageStore,
    temp_counter: AtomicU64,
}

impl MemVfs {
    /// Create a new mem VFS with the default name "mem"
    pub fn new(images: FileImageStore) -> Self {
        Self::with_name("mem", images)
    }

    /// Create a new mem VFS with a custom name
    pub fn with_name(name: &str, images: FileImageStore) -> Self {
        Self {
            name: name.to_string(),
            images,
            temp_counter: AtomicU64::new(0),
        }
    }

    /// The image store this VFS serves
    pub fn images(&self) -> FileImageStore {
        self.images.clone()
    }
}

impl Vfs for MemVfs {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, path: Option<&str>, flags: OpenFlags) -> Result<Box<dyn VfsFile>> {
        let (key, delete_on_close) = match path {
            Some(p) => (
                normalize_name(p).to_string(),
                flags.contains(OpenFlags::DELETEONCLOSE),
            ),
            // Unnamed temp files never outlive their handle
            None => {
                let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
                (format!(".memvault-temp-{}", n), true)
            }
        };

        {
            let mut files = self.images.files.lock().unwrap();
            if !files.contains_key(&key) {
                if !flags.contains(OpenFlags::CREATE) && path.is_some() {
                    return Err(Error::with_message(
                        ErrorCode::CantOpen,
                        format!("no such file: {}", key),
                    ));
                }
                files.insert(key.clone(), Vec::new());
            } else if flags.contains(OpenFlags::EXCLUSIVE) && flags.contains(OpenFlags::CREATE) {
                return Err(Error::with_message(
                    ErrorCode::CantOpen,
                    format!("file exists: {}", key),
                ));
            }
        }

        Ok(Box::new(MemFile {
            images: self.images.clone(),
            key,
            delete_on_close,
            lock: LockType::None,
        }))
    }

    fn delete(&self, path: &str, _sync_dir: bool) -> Result<()> {
        // Deleting a missing file is not an error
        self.images.remove(path);
        Ok(())
    }

    fn access(&self, path: &str, _flags: AccessFlags) -> Result<bool> {
        Ok(self.images.contains(path))
    }

    fn full_pathname(&self, path: &str) -> Result<String> {
        Ok(normalize_name(path).to_string())
    }

    fn randomness(&self, buf: &mut [u8]) -> i32 {
        GLOBAL_PRNG.lock().unwrap().fill(buf);
        buf.len() as i32
    }

    fn sleep(&self, microseconds: i32) -> i32 {
        std::thread::sleep(std::time::Duration::from_micros(microseconds.max(0) as u64));
        microseconds
    }

    fn current_time(&self) -> f64 {
        self.current_time_i64() as f64 / 86_400_000.0
    }

    fn current_time_i64(&self) -> i64 {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        UNIX_EPOCH_JULIAN_MS + unix_ms
    }

    fn get_last_error(&self) -> (i32, String) {
        (0, String::new())
    }
}

// ============================================================================
// Mem file handle
// ============================================================================

/// Open handle onto one image in the store
pub struct MemFile {
    images: FileImageStore,
    key: String,
    delete_on_close: bool,
    lock: LockType,
}

impl VfsFile for MemFile {
    fn read(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(Error::new(ErrorCode::Range));
        }
        let files = self.images.files.lock().unwrap();
        let image = files.get(&self.key).map(Vec::as_slice).unwrap_or(&[]);
        let offset = offset as usize;

        buf.fill(0);
        if offset >= image.len() {
            return Ok(0);
        }
        let n = buf.len().min(image.len() - offset);
        buf[..n].copy_from_slice(&image[offset..offset + n]);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], offset: i64) -> Result<usize> {
        if offset < 0 {
            return Err(Error::new(ErrorCode::Range));
        }
        let mut files = self.images.files.lock().unwrap();
        let image = files.entry(self.key.clone()).or_default();
        let offset = offset as usize;
        let end = offset + buf.len();
        if image.len() < end {
            image.resize(end, 0);
        }
        image[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn truncate(&mut self, size: i64) -> Result<()> {
        if size < 0 {
            return Err(Error::new(ErrorCode::Range));
        }
        let mut files = self.images.files.lock().unwrap();
        let image = files.entry(self.key.clone()).or_default();
        image.resize(size as usize, 0);
        Ok(())
    }

    fn sync(&mut self, _flags: SyncFlags) -> Result<()> {
        Ok(())
    }

    fn file_size(&self) -> Result<i64> {
        Ok(self.images.len(&self.key).unwrap_or(0) as i64)
    }

    fn lock(&mut self, lock_type: LockType) -> Result<()> {
        self.lock = lock_type;
        Ok(())
    }

    fn unlock(&mut self, lock_type: LockType) -> Result<()> {
        if lock_type < self.lock {
            self.lock = lock_type;
        }
        Ok(())
    }

    fn check_reserved_lock(&self) -> Result<bool> {
        Ok(self.lock >= LockType::Reserved)
    }

    fn file_control(&mut self, op: FileControlOp) -> Result<()> {
        match op {
            FileControlOp::SizeHint(_) | FileControlOp::ChunkSize(_) | FileControlOp::Sync => {
                Ok(())
            }
            _ => Err(Error::new(ErrorCode::NotFound)),
        }
    }

    fn device_characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::ATOMIC | DeviceCharacteristics::SAFE_APPEND
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        if self.delete_on_close {
            self.images.remove(&self.key);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
