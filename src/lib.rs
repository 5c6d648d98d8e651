//! memvault - incremental persistence engine for an embedded SQLite-style VFS
//!
//! A page-granular dirty-tracking VFS shim layered over a base VFS, plus the
//! block-level partial-write protocol that flushes only modified pages to a
//! worker-owned backing store. The SQL engine itself is out of scope; it
//! programs against the VFS traits in [`os::vfs`] and picks up the tracking
//! shim once [`track::TrackerRegistry::init`] registers it as the default.

pub mod config;
pub mod error;
pub mod os;
pub mod persist;
pub mod track;
pub mod worker;

// Re-export main public types
pub use config::PersistConfig;
pub use error::{Error, ErrorCode, PersistError, Result};

// Re-export the VFS surface the SQL engine programs against
pub use os::memvfs::{prng_reset, prng_seed, FileImageStore, MemVfs};
pub use os::vfs::{vfs_find, vfs_register, vfs_unregister, OpenFlags, Vfs, VfsFile};

// Re-export the persistence engine
pub use persist::Coordinator;
pub use track::{TrackerRegistry, DEFAULT_PAGE_SIZE, TRACKING_VFS_NAME};
pub use worker::client::{RequestSink, WorkerClient, DEFAULT_REQUEST_TIMEOUT};
pub use worker::protocol::{
    DirtyPage, Request, RequestEnvelope, Response, ResponseEnvelope, WorkerErrorKind,
    WorkerFailure, WorkerLogLevel,
};
pub use worker::server::Worker;
pub use worker::store::{BackingStore, MemoryStore, StoreCapacity, StoreError};
