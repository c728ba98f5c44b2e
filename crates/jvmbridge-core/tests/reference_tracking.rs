//! Reference Tracking Integration Tests
//!
//! Tests validate:
//! - Exactly-once release of tracked handles
//! - Scope conversion round trips preserving guest identity
//! - Leak dumps with acquisition sites
//! - A handle is never tracked under both scopes
//! - Teardown of the global registry
//!
//! # Running Tests
//! ```bash
//! cargo test --test reference_tracking
//! ```

use std::sync::Arc;

use jvmbridge_core::fake::FakeRuntime;
use jvmbridge_core::{GuestRuntime, ManagedRef, Provenance, RawHandle, RefTracker, Scope};

fn setup() -> (Arc<FakeRuntime>, Arc<RefTracker>) {
    let runtime = Arc::new(FakeRuntime::new());
    let tracker = RefTracker::new(runtime.clone());
    (runtime, tracker)
}

fn assert_single_scope(tracker: &RefTracker, handle: RawHandle) {
    let local = tracker.contains(handle, Scope::Local);
    let global = tracker.contains(handle, Scope::Global);
    assert!(!(local && global), "{:?} tracked under both scopes", handle);
}

// ===== Release =====

#[test]
fn test_release_twice_deletes_once() {
    let (runtime, tracker) = setup();
    for scope in [Scope::Local, Scope::Global] {
        let obj = runtime.new_plain_object();
        let handle = tracker.acquire(obj, scope, Provenance::here()).unwrap();
        runtime.delete_local_ref(obj);

        tracker.release(handle, scope);
        let after_first = (runtime.live_handles(scope), tracker.count(scope));
        tracker.release(handle, scope);
        let after_second = (runtime.live_handles(scope), tracker.count(scope));

        assert_eq!(after_first, after_second);
        assert_eq!(after_first, (0, 0));
    }
    assert_eq!(runtime.invalid_deletes(), 0);
}

#[test]
fn test_explicit_release_then_drop() {
    let (runtime, tracker) = setup();
    let r = ManagedRef::adopt(&tracker, runtime.new_plain_object(), Scope::Local);
    let handle = r.handle();
    r.release();
    assert!(!tracker.release(handle, Scope::Local));
    assert_eq!(runtime.invalid_deletes(), 0);
}

// ===== Conversion =====

#[test]
fn test_round_trip_preserves_identity() {
    let (runtime, tracker) = setup();
    let original = ManagedRef::adopt(&tracker, runtime.new_plain_object(), Scope::Local);
    let witness = original.duplicate(Scope::Global).unwrap();

    let global = original.convert(Scope::Global).unwrap();
    assert_single_scope(&tracker, global.handle());
    let local = global.convert(Scope::Local).unwrap();
    assert_single_scope(&tracker, local.handle());

    assert_eq!(local.scope(), Some(Scope::Local));
    assert!(local.is_same_object(&witness).unwrap());
}

#[test]
fn test_never_both_scopes_through_conversions() {
    let (runtime, tracker) = setup();
    let mut r = ManagedRef::adopt(&tracker, runtime.new_plain_object(), Scope::Local);
    for scope in [Scope::Global, Scope::Global, Scope::Local, Scope::Global, Scope::Local] {
        r.set_scope(scope).unwrap();
        assert_eq!(r.scope(), Some(scope));
        assert_single_scope(&tracker, r.handle());
        assert_eq!(tracker.scope_of(r.handle()).unwrap(), scope);
    }
    drop(r);
    assert_eq!(tracker.count(Scope::Local), 0);
    assert_eq!(tracker.count(Scope::Global), 0);
    assert_eq!(runtime.invalid_deletes(), 0);
}

#[test]
fn test_convert_empty_is_empty() {
    let (_runtime, _tracker) = setup();
    let r = ManagedRef::empty().convert(Scope::Global).unwrap();
    assert!(r.is_empty());
}

// ===== Leak Diagnostics =====

#[test]
fn test_dump_lists_every_unreleased_local() {
    let (runtime, tracker) = setup();
    const N: usize = 5;

    let mut refs = Vec::new();
    let site = line!() + 2;
    for _ in 0..N {
        refs.push(ManagedRef::adopt(&tracker, runtime.new_plain_object(), Scope::Local));
    }

    let dump = tracker.dump(Scope::Local);
    assert_eq!(dump.len(), N);
    for entry in &dump {
        assert_eq!(entry.scope, Scope::Local);
        assert!(entry.provenance.file.ends_with("reference_tracking.rs"));
        assert_eq!(entry.provenance.line, site);
        assert!(refs.iter().any(|r| r.handle() == entry.handle));
    }

    // Leaked on purpose: keep the handles tracked past the dump.
    std::mem::forget(refs);
    assert_eq!(tracker.check_for_leaks().locals.len(), N);
}

#[test]
fn test_teardown_releases_globals_only() {
    let (runtime, tracker) = setup();
    let local = ManagedRef::adopt(&tracker, runtime.new_plain_object(), Scope::Local);
    let global = local.duplicate(Scope::Global).unwrap();
    std::mem::forget(global);

    let report = tracker.teardown();
    assert_eq!(report.globals.len(), 1);
    assert_eq!(report.locals.len(), 1);
    assert_eq!(runtime.live_handles(Scope::Global), 0);
    assert_eq!(tracker.count(Scope::Local), 1);
    drop(local);
    assert_eq!(runtime.invalid_deletes(), 0);
}

// ===== Threads =====

#[test]
fn test_global_reference_moves_across_threads() {
    let (runtime, tracker) = setup();
    let global = ManagedRef::adopt(&tracker, runtime.new_plain_object(), Scope::Local)
        .convert(Scope::Global)
        .unwrap();

    let handle = std::thread::spawn(move || {
        let h = global.handle();
        drop(global);
        h
    })
    .join()
    .unwrap();

    assert!(!tracker.contains(handle, Scope::Global));
    assert_eq!(runtime.live_handles(Scope::Global), 0);
}

#[test]
fn test_local_reference_dropped_on_foreign_thread_is_reported() {
    let (runtime, tracker) = setup();
    let local = ManagedRef::adopt(&tracker, runtime.new_plain_object(), Scope::Local);
    let handle = local.handle();

    std::thread::spawn(move || drop(local)).join().unwrap();

    // Still tracked on the owning thread, and never deleted.
    assert!(tracker.contains(handle, Scope::Local));
    assert_eq!(runtime.live_handles(Scope::Local), 1);
    assert!(tracker.release(handle, Scope::Local));
}
