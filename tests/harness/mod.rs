//! Shared test fixture: the full engine wired to an in-process worker.
//!
//! The sink pushes request envelopes onto a queue. In immediate mode each
//! send services the queue before returning, so coordinator futures resolve
//! under a plain `block_on`. In manual mode the test drives `pump_one`
//! itself and polls futures with a no-op waker, which makes the
//! interleaving at suspension points observable.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::task::{Context, Poll};

use futures::task::noop_waker;

use memvault::track::shim::TrackingVfs;
use memvault::{
    Coordinator, FileImageStore, MemVfs, MemoryStore, OpenFlags, PersistConfig, PersistError,
    Request, RequestEnvelope, RequestSink, Response, ResponseEnvelope, TrackerRegistry, Vfs,
    VfsFile, Worker, WorkerClient, WorkerFailure,
};

struct Shared {
    worker: Mutex<Worker<MemoryStore>>,
    queue: Mutex<VecDeque<RequestEnvelope>>,
    client: OnceLock<Weak<WorkerClient>>,
    log: Mutex<Vec<RequestEnvelope>>,
    fail_dirty_writes: Mutex<Option<WorkerFailure>>,
    immediate: bool,
}

impl Shared {
    fn service_one(&self) -> bool {
        let envelope = self.queue.lock().unwrap().pop_front();
        let Some(envelope) = envelope else {
            return false;
        };

        let fail = self.fail_dirty_writes.lock().unwrap().clone();
        let is_flush = matches!(envelope.body, Request::WriteDirtyPages { .. });
        let response = match fail {
            Some(failure) if is_flush => ResponseEnvelope {
                id: envelope.id,
                body: Response::Error(failure),
            },
            _ => self.worker.lock().unwrap().handle(envelope),
        };

        if let Some(client) = self.client.get().and_then(Weak::upgrade) {
            client.dispatch_response(response);
        }
        true
    }
}

struct HarnessSink {
    shared: Arc<Shared>,
}

impl RequestSink for HarnessSink {
    fn send(&self, envelope: RequestEnvelope) -> Result<(), PersistError> {
        self.shared.log.lock().unwrap().push(envelope.clone());
        self.shared.queue.lock().unwrap().push_back(envelope);
        if self.shared.immediate {
            while self.shared.service_one() {}
        }
        Ok(())
    }
}

pub struct Harness {
    pub images: FileImageStore,
    pub registry: Arc<TrackerRegistry>,
    pub shim: TrackingVfs,
    pub client: Arc<WorkerClient>,
    pub coordinator: Coordinator,
    shared: Arc<Shared>,
}

impl Harness {
    /// Fixture whose worker services every request inside `send`
    pub fn new() -> Self {
        Self::build(PersistConfig::default(), MemoryStore::new(), true)
    }

    /// Fixture whose worker only runs when the test calls `pump_one`
    pub fn manual() -> Self {
        Self::build(PersistConfig::default(), MemoryStore::new(), false)
    }

    /// Immediate-mode fixture over a preconfigured store
    pub fn with_store(store: MemoryStore) -> Self {
        Self::build(PersistConfig::default(), store, true)
    }

    /// Immediate-mode fixture with explicit configuration
    pub fn with_config(config: PersistConfig) -> Self {
        Self::build(config, MemoryStore::new(), true)
    }

    fn build(config: PersistConfig, store: MemoryStore, immediate: bool) -> Self {
        let images = FileImageStore::new();
        let base: Arc<dyn Vfs> = Arc::new(MemVfs::new(images.clone()));
        let registry = TrackerRegistry::with_base(Arc::clone(&base), config.page_size).unwrap();
        let shim = TrackingVfs::new("tracking", base, Arc::clone(&registry));

        let shared = Arc::new(Shared {
            worker: Mutex::new(Worker::new(store)),
            queue: Mutex::new(VecDeque::new()),
            client: OnceLock::new(),
            log: Mutex::new(Vec::new()),
            fail_dirty_writes: Mutex::new(None),
            immediate,
        });
        let client = Arc::new(WorkerClient::with_timeout(
            Box::new(HarnessSink {
                shared: Arc::clone(&shared),
            }),
            config.request_timeout,
        ));
        shared.client.set(Arc::downgrade(&client)).ok().unwrap();

        let coordinator = Coordinator::new(
            Some(Arc::clone(&registry)),
            Arc::clone(&client),
            images.clone(),
            config,
        );

        Self {
            images,
            registry,
            shim,
            client,
            coordinator,
            shared,
        }
    }

    /// Open a tracked file through the shim
    pub fn open(&self, name: &str) -> Box<dyn VfsFile> {
        self.shim
            .open(Some(name), OpenFlags::READWRITE | OpenFlags::CREATE)
            .unwrap()
    }

    /// Drive a future to completion (immediate mode only)
    pub fn run<F: Future>(&self, fut: F) -> F::Output {
        futures::executor::block_on(fut)
    }

    /// Service exactly one queued request (manual mode)
    pub fn pump_one(&self) -> bool {
        self.shared.service_one()
    }

    /// Every request sent so far, in order
    pub fn requests(&self) -> Vec<RequestEnvelope> {
        self.shared.log.lock().unwrap().clone()
    }

    /// Requests of one kind sent so far
    pub fn requests_of_kind(&self, kind: &str) -> Vec<RequestEnvelope> {
        self.requests()
            .into_iter()
            .filter(|envelope| envelope.body.kind_name() == kind)
            .collect()
    }

    pub fn clear_log(&self) {
        self.shared.log.lock().unwrap().clear();
    }

    /// Make the worker answer every `write_dirty_pages` with this failure
    pub fn fail_dirty_writes(&self, failure: WorkerFailure) {
        *self.shared.fail_dirty_writes.lock().unwrap() = Some(failure);
    }

    pub fn clear_dirty_write_failure(&self) {
        *self.shared.fail_dirty_writes.lock().unwrap() = None;
    }

    /// Bytes of a file as the backing store holds them
    pub fn worker_file(&self, name: &str) -> Option<Vec<u8>> {
        self.shared
            .worker
            .lock()
            .unwrap()
            .store()
            .file_bytes(name)
            .map(|bytes| bytes.to_vec())
    }
}

/// Poll a boxed future once with a no-op waker
pub fn poll_once<F: Future>(fut: &mut Pin<Box<F>>) -> Poll<F::Output> {
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    fut.as_mut().poll(&mut cx)
}
