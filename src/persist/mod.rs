//! Persistence coordinator
//!
//! Converts a "persist file F" request into either a precise partial-write
//! message or a whole-file fallback. The body of `persist` is a straight
//! line: enumerate dirty pages, read their bytes out of the in-memory image
//! before the first suspension point, dispatch, await, and reset the bitmap
//! only on a fully acknowledged flush. Every failure past the empty-set
//! check demotes to a whole-file persist; demotion is the only recovery
//! mechanism and is always safe.

use std::sync::{Arc, Mutex};

use crate::config::PersistConfig;
use crate::error::PersistError;
use crate::os::memvfs::{normalize_name, FileImageStore};
use crate::track::TrackerRegistry;
use crate::worker::client::WorkerClient;
use crate::worker::protocol::DirtyPage;

/// Filenames recorded while persistence is paused, in first-appearance
/// order, each at most once.
#[derive(Default)]
struct PauseSet {
    names: Vec<String>,
}

impl PauseSet {
    fn record(&mut self, name: &str) {
        if !self.names.iter().any(|n| n == name) {
            self.names.push(name.to_string());
        }
    }
}

/// Orchestrates flushes between the tracker registry, the in-memory file
/// images, and the persistence worker.
pub struct Coordinator {
    /// `None` when tracking init failed; every persist is then whole-file
    registry: Option<Arc<TrackerRegistry>>,
    client: Arc<WorkerClient>,
    images: FileImageStore,
    config: PersistConfig,
    paused: Mutex<Option<PauseSet>>,
}

impl Coordinator {
    pub fn new(
        registry: Option<Arc<TrackerRegistry>>,
        client: Arc<WorkerClient>,
        images: FileImageStore,
        config: PersistConfig,
    ) -> Self {
        Self {
            registry,
            client,
            images,
            config,
            paused: Mutex::new(None),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &PersistConfig {
        &self.config
    }

    /// Whether a pause set is currently collecting filenames
    pub fn is_paused(&self) -> bool {
        self.paused.lock().unwrap().is_some()
    }

    /// Push the configured log verbosity to the worker
    pub async fn configure_worker(&self) -> Result<(), PersistError> {
        self.client.set_log_level(self.config.log_level).await
    }

    /// Flush the file's modifications to the backing store.
    ///
    /// While paused, only records the filename. With tracking available and
    /// incremental persistence enabled, sends exactly the dirty pages and
    /// resets the bitmap on full acknowledgement; otherwise (or on any
    /// failure) writes the whole file image. The caller serialises persists
    /// of the same filename.
    pub async fn persist(&self, filename: &str) -> Result<(), PersistError> {
        let filename = normalize_name(filename);

        {
            let mut paused = self.paused.lock().unwrap();
            if let Some(set) = paused.as_mut() {
                set.record(filename);
                return Ok(());
            }
        }

        let registry = match &self.registry {
            Some(registry) if self.config.incremental_enabled => registry,
            _ => {
                log::debug!("incremental persistence off; writing {} in full", filename);
                return self.persist_full(filename).await;
            }
        };

        let dirty = registry.get_dirty_pages(filename);
        if dirty.is_empty() {
            return Ok(());
        }

        // Page bytes leave the image synchronously, before the first await;
        // nothing borrows the image across a suspension point.
        let page_size = registry.page_size();
        let (file_size, pages) = match self.read_dirty_pages(filename, &dirty, page_size) {
            Some(snapshot) => snapshot,
            None => {
                log::warn!("no image for {}; demoting to whole-file persist", filename);
                return self.persist_full(filename).await;
            }
        };

        log::debug!(
            "flushing {} dirty page(s) of {} ({} bytes)",
            pages.len(),
            filename,
            pages.len() as u64 * page_size as u64
        );

        match self
            .client
            .write_dirty_pages(filename, page_size, file_size, pages)
            .await
        {
            Ok((pages_written, _bytes_written)) if pages_written as usize == dirty.len() => {
                registry.reset_dirty(filename);
                Ok(())
            }
            Ok((pages_written, _bytes_written)) => {
                log::warn!(
                    "flush of {} acknowledged {} of {} pages; demoting to whole-file persist",
                    filename,
                    pages_written,
                    dirty.len()
                );
                self.persist_full(filename).await
            }
            Err(e) => {
                log::warn!(
                    "incremental persist of {} failed ({}); demoting to whole-file persist",
                    filename,
                    e
                );
                self.persist_full(filename).await
            }
        }
    }

    /// Write the complete current file image to the backing store. Does not
    /// touch the dirty bitmap: a later incremental flush of still-set pages
    /// rewrites content this persist already covered, which is harmless.
    pub async fn persist_full(&self, filename: &str) -> Result<(), PersistError> {
        let filename = normalize_name(filename);
        let image = self
            .images
            .snapshot(filename)
            .ok_or_else(|| PersistError::FileImageMissing(filename.to_string()))?;
        self.client.write_full_file(filename, image).await?;
        Ok(())
    }

    /// Fetch the file from the backing store into the in-memory image.
    /// A missing backing file is a successful no-op; the SQL engine will
    /// create the image on first write.
    pub async fn load(&self, filename: &str) -> Result<(), PersistError> {
        let filename = normalize_name(filename);
        match self.client.read_full_file(filename).await? {
            Some(bytes) => {
                log::debug!("loaded {} ({} bytes)", filename, bytes.len());
                self.images.install(filename, bytes);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Start batching: until `resume`, `persist` only records filenames
    pub fn pause(&self) -> Result<(), PersistError> {
        let mut paused = self.paused.lock().unwrap();
        if paused.is_some() {
            return Err(PersistError::AlreadyPaused);
        }
        *paused = Some(PauseSet::default());
        Ok(())
    }

    /// Clear the pause set and persist each recorded filename once, in
    /// first-appearance order.
    pub async fn resume(&self) -> Result<(), PersistError> {
        let set = self
            .paused
            .lock()
            .unwrap()
            .take()
            .ok_or(PersistError::NotPaused)?;
        for name in set.names {
            self.persist(&name).await?;
        }
        Ok(())
    }

    /// Best-effort pre-shutdown release of worker-held handles
    pub async fn shutdown(&self) {
        self.client.cleanup().await;
    }

    fn read_dirty_pages(
        &self,
        filename: &str,
        dirty: &[u32],
        page_size: u32,
    ) -> Option<(u64, Vec<DirtyPage>)> {
        let file_size = self.images.len(filename)?;
        let mut pages = Vec::with_capacity(dirty.len());
        for &page_index in dirty {
            pages.push(DirtyPage {
                page_index,
                bytes: self.images.read_page(filename, page_index, page_size)?,
            });
        }
        Some((file_size, pages))
    }
}

// ============================================================================
// Tests
// ============================================================================
