//! Demotion paths: any failure of the incremental flush falls back to a
//! whole-file persist and leaves the dirty bitmap untouched.

mod harness;

use std::time::{Duration, Instant};

use harness::{poll_once, Harness};
use memvault::{
    MemoryStore, PersistError, Request, VfsFile as _, WorkerErrorKind, WorkerFailure,
};

#[test]
fn worker_error_demotes_to_whole_file() {
    let h = Harness::new();
    let content = vec![0xC4u8; 4096];

    let mut file = h.open("app.db");
    file.write(&content, 0).unwrap();
    h.fail_dirty_writes(WorkerFailure::new(WorkerErrorKind::Quota, "quota"));

    h.run(h.coordinator.persist("app.db")).unwrap();

    // Demotion issued the whole-file write after the failed flush
    let kinds: Vec<&str> = h
        .requests()
        .iter()
        .map(|envelope| envelope.body.kind_name())
        .collect();
    assert_eq!(kinds, vec!["write_dirty_pages", "write_full_file"]);
    match &h.requests_of_kind("write_full_file")[0].body {
        Request::WriteFullFile { filename, bytes } => {
            assert_eq!(filename, "app.db");
            assert_eq!(bytes, &content);
        }
        other => panic!("expected whole-file write, got {:?}", other),
    }
    assert_eq!(h.worker_file("app.db").unwrap(), content);

    // The bitmap still holds the page, so the next incremental persist
    // resends it once the worker recovers
    assert_eq!(h.registry.get_dirty_pages("app.db"), vec![0]);

    h.clear_dirty_write_failure();
    h.clear_log();
    h.run(h.coordinator.persist("app.db")).unwrap();
    assert_eq!(h.requests_of_kind("write_dirty_pages").len(), 1);
    assert!(h.registry.get_dirty_pages("app.db").is_empty());
}

#[test]
fn failing_fallback_surfaces_worker_error() {
    // Quota too small for even the whole-file write
    let h = Harness::with_store(MemoryStore::with_capacity(100));
    let mut file = h.open("app.db");
    file.write(&[1u8; 4096], 0).unwrap();

    let result = h.run(h.coordinator.persist("app.db"));
    assert!(matches!(
        result,
        Err(PersistError::Worker {
            kind: WorkerErrorKind::Quota,
            ..
        })
    ));
    assert_eq!(h.registry.get_dirty_pages("app.db"), vec![0]);
}

#[test]
fn missing_image_with_dirty_pages_reports_image_missing() {
    let h = Harness::new();
    // Dirty state without any image: both the flush and the fallback fail
    h.registry.mark_dirty("ghost.db", 0, 1);

    let result = h.run(h.coordinator.persist("ghost.db"));
    assert_eq!(
        result,
        Err(PersistError::FileImageMissing("ghost.db".into()))
    );
    assert_eq!(h.registry.get_dirty_pages("ghost.db"), vec![0]);
    assert!(h.requests().is_empty());
}

#[test]
fn timeout_demotes_and_late_response_is_dropped() {
    let h = Harness::manual();
    let content = vec![0x7Au8; 4096];
    let mut file = h.open("app.db");
    file.write(&content, 0).unwrap();

    let mut fut = Box::pin(h.coordinator.persist("app.db"));
    assert!(poll_once(&mut fut).is_pending());
    assert_eq!(h.requests_of_kind("write_dirty_pages").len(), 1);

    // The request timer fires before any response arrives
    assert_eq!(h.client.expire(Instant::now() + Duration::from_secs(31)), 1);

    // The coordinator wakes with the timeout, demotes, and suspends on the
    // whole-file request
    assert!(poll_once(&mut fut).is_pending());
    assert_eq!(h.requests_of_kind("write_full_file").len(), 1);

    // Servicing the stale flush produces a response for a retired id,
    // which the client drops
    assert!(h.pump_one());
    assert!(poll_once(&mut fut).is_pending());

    // The whole-file response completes the persist
    assert!(h.pump_one());
    match poll_once(&mut fut) {
        std::task::Poll::Ready(Ok(())) => {}
        other => panic!("unexpected poll result: {:?}", other),
    }

    drop(fut);
    assert_eq!(h.worker_file("app.db").unwrap(), content);
    assert_eq!(h.registry.get_dirty_pages("app.db"), vec![0]);
}
