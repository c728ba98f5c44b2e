//! Reference tracking
//!
//! Every handle the bridge owns is recorded here together with the site that
//! acquired it. LOCAL handles live in a registry confined to the acquiring
//! thread; GLOBAL handles live in one registry shared by all threads.
//!
//! # Thread Safety
//!
//! The LOCAL registry is thread-local storage keyed by tracker, so it needs no
//! lock. The GLOBAL registry and the native-class table sit behind a mutex.

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{RawHandle, Scope};
use crate::runtime::GuestRuntime;

// ============================================================================
// Provenance
// ============================================================================

/// Where and by whom a handle was acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Source file of the acquiring call
    pub file: &'static str,
    /// Line of the acquiring call
    pub line: u32,
    /// Column of the acquiring call
    pub column: u32,
    /// Name of the acquiring thread, if it has one
    pub thread: Option<String>,
    /// Free-form context, e.g. the class being looked up
    pub details: Option<String>,
}

impl Provenance {
    /// Provenance of the caller
    #[track_caller]
    pub fn here() -> Self {
        Self::from_location(Location::caller(), None)
    }

    /// Provenance of the caller, with details
    #[track_caller]
    pub fn with_details(details: impl Into<String>) -> Self {
        Self::from_location(Location::caller(), Some(details.into()))
    }

    /// Provenance of an explicit source location
    pub fn from_location(location: &'static Location<'static>, details: Option<String>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
            thread: std::thread::current().name().map(str::to_string),
            details,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)?;
        if let Some(thread) = &self.thread {
            write!(f, " [{}]", thread)?;
        }
        if let Some(details) = &self.details {
            write!(f, " | {}", details)?;
        }
        Ok(())
    }
}

/// A live tracked handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// The handle
    pub handle: RawHandle,
    /// Scope it is tracked under
    pub scope: Scope,
    /// Acquisition site
    pub provenance: Provenance,
}

/// Outstanding references and native registrations at a check point.
#[derive(Debug, Clone, Default)]
pub struct LeakReport {
    /// LOCAL handles of the checking thread
    pub locals: Vec<RegistryEntry>,
    /// GLOBAL handles
    pub globals: Vec<RegistryEntry>,
    /// Classes that still have natives registered, with the registered count
    pub native_classes: Vec<(String, usize)>,
}

impl LeakReport {
    /// No outstanding references or registrations
    pub fn is_clean(&self) -> bool {
        self.locals.is_empty() && self.globals.is_empty() && self.native_classes.is_empty()
    }

    fn log(&self) {
        if self.is_clean() {
            tracing::debug!("reference tracker is clean");
            return;
        }
        tracing::warn!(
            locals = self.locals.len(),
            globals = self.globals.len(),
            native_classes = self.native_classes.len(),
            "outstanding guest references"
        );
        for entry in self.locals.iter().chain(&self.globals) {
            tracing::warn!(
                handle = ?entry.handle,
                scope = %entry.scope,
                origin = %entry.provenance,
                "leaked reference"
            );
        }
        for (class, count) in &self.native_classes {
            tracing::warn!(class = %class, count, "natives still registered");
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Unique tracker identifier, used to key thread-local registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerId(u64);

impl TrackerId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        TrackerId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Registry = FxHashMap<RawHandle, Provenance>;

thread_local! {
    static LOCAL_REGISTRIES: RefCell<FxHashMap<TrackerId, Registry>> =
        RefCell::new(FxHashMap::default());
}

/// Registry of every handle owned through the bridge.
///
/// A tracker is a service shared as `Arc<RefTracker>` by managed references,
/// method signatures and the signature factory. It holds the runtime used to
/// delete handles on release.
pub struct RefTracker {
    id: TrackerId,
    runtime: Arc<dyn GuestRuntime>,
    globals: Mutex<Registry>,
    native_classes: Mutex<FxHashMap<String, usize>>,
}

impl RefTracker {
    /// Create a tracker over a runtime
    pub fn new(runtime: Arc<dyn GuestRuntime>) -> Arc<Self> {
        Arc::new(Self {
            id: TrackerId::next(),
            runtime,
            globals: Mutex::new(FxHashMap::default()),
            native_classes: Mutex::new(FxHashMap::default()),
        })
    }

    /// Tracker identifier
    pub fn id(&self) -> TrackerId {
        self.id
    }

    /// The runtime handles are deleted through
    pub fn runtime(&self) -> &Arc<dyn GuestRuntime> {
        &self.runtime
    }

    /// Run `f` on this tracker's LOCAL registry for the current thread.
    ///
    /// Returns `None` during thread teardown, once thread-local storage is gone.
    fn with_locals<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> Option<R> {
        LOCAL_REGISTRIES
            .try_with(|cell| {
                let mut all = cell.borrow_mut();
                let registry = all.entry(self.id).or_default();
                let result = f(registry);
                if registry.is_empty() {
                    all.remove(&self.id);
                }
                result
            })
            .ok()
    }

    /// Record a handle. Null handles are ignored and existing entries are kept.
    pub fn register(&self, handle: RawHandle, scope: Scope, provenance: Provenance) {
        if handle.is_null() {
            return;
        }
        let inserted = match scope {
            Scope::Local => self
                .with_locals(|locals| insert_once(locals, handle, provenance))
                .unwrap_or(false),
            Scope::Global => insert_once(&mut self.globals.lock(), handle, provenance),
        };
        if !inserted {
            tracing::debug!(handle = ?handle, scope = %scope, "handle already tracked");
        }
    }

    /// Forget a handle and delete it in the runtime.
    ///
    /// Untracked handles are ignored, so releasing twice deletes once. Returns
    /// whether a delete was issued.
    pub fn release(&self, handle: RawHandle, scope: Scope) -> bool {
        if handle.is_null() {
            return false;
        }
        let removed = match scope {
            Scope::Local => self
                .with_locals(|locals| locals.remove(&handle))
                .flatten(),
            Scope::Global => self.globals.lock().remove(&handle),
        };
        if removed.is_none() {
            if scope == Scope::Local {
                tracing::warn!(
                    handle = ?handle,
                    thread = std::thread::current().name().unwrap_or("<unnamed>"),
                    "local handle not tracked on this thread; release ignored"
                );
            }
            return false;
        }
        match scope {
            Scope::Local => self.runtime.delete_local_ref(handle),
            Scope::Global => self.runtime.delete_global_ref(handle),
        }
        true
    }

    /// Ask the runtime for a new handle of `scope` to the object behind
    /// `source`, and record it.
    pub fn acquire(
        &self,
        source: RawHandle,
        scope: Scope,
        provenance: Provenance,
    ) -> BridgeResult<RawHandle> {
        if source.is_null() {
            return Err(BridgeError::InvalidHandle(
                "cannot acquire a reference to the null handle".to_string(),
            ));
        }
        let handle = match scope {
            Scope::Local => self.runtime.new_local_ref(source)?,
            Scope::Global => self.runtime.new_global_ref(source)?,
        };
        if handle.is_null() {
            return Err(BridgeError::InvalidHandle(format!(
                "runtime returned null for new {} reference to {:?}",
                scope, source
            )));
        }
        self.register(handle, scope, provenance);
        Ok(handle)
    }

    /// Whether `handle` is tracked under `scope`
    pub fn contains(&self, handle: RawHandle, scope: Scope) -> bool {
        match scope {
            Scope::Local => self
                .with_locals(|locals| locals.contains_key(&handle))
                .unwrap_or(false),
            Scope::Global => self.globals.lock().contains_key(&handle),
        }
    }

    /// The single scope `handle` is tracked under.
    ///
    /// Fails with [`BridgeError::OwnershipPolicy`] if it is tracked under
    /// neither or both.
    pub fn scope_of(&self, handle: RawHandle) -> BridgeResult<Scope> {
        let local = self.contains(handle, Scope::Local);
        let global = self.contains(handle, Scope::Global);
        match (local, global) {
            (true, false) => Ok(Scope::Local),
            (false, true) => Ok(Scope::Global),
            (false, false) => Err(BridgeError::OwnershipPolicy {
                handle,
                detail: "not tracked in either scope".to_string(),
            }),
            (true, true) => Err(BridgeError::OwnershipPolicy {
                handle,
                detail: "tracked as both LOCAL and GLOBAL".to_string(),
            }),
        }
    }

    /// Number of live handles in `scope` (LOCAL: current thread only)
    pub fn count(&self, scope: Scope) -> usize {
        match scope {
            Scope::Local => self.with_locals(|locals| locals.len()).unwrap_or(0),
            Scope::Global => self.globals.lock().len(),
        }
    }

    /// Live handles in `scope` with their provenance (LOCAL: current thread only)
    pub fn dump(&self, scope: Scope) -> Vec<RegistryEntry> {
        let collect = |registry: &Registry| {
            registry
                .iter()
                .map(|(handle, provenance)| RegistryEntry {
                    handle: *handle,
                    scope,
                    provenance: provenance.clone(),
                })
                .collect::<Vec<_>>()
        };
        match scope {
            Scope::Local => self.with_locals(|locals| collect(locals)).unwrap_or_default(),
            Scope::Global => collect(&self.globals.lock()),
        }
    }

    // ========================================================================
    // Native Classes
    // ========================================================================

    /// Record that `count` natives were registered on `class`
    pub fn note_natives_registered(&self, class: &str, count: usize) {
        self.native_classes.lock().insert(class.to_string(), count);
    }

    /// Record that the natives of `class` were unregistered
    pub fn note_natives_unregistered(&self, class: &str) {
        self.native_classes.lock().remove(class);
    }

    /// Registered native count for `class`
    pub fn native_count(&self, class: &str) -> Option<usize> {
        self.native_classes.lock().get(class).copied()
    }

    // ========================================================================
    // Diagnostics and Teardown
    // ========================================================================

    /// Report outstanding references and registrations, logging each one.
    pub fn check_for_leaks(&self) -> LeakReport {
        let mut native_classes: Vec<(String, usize)> = self
            .native_classes
            .lock()
            .iter()
            .map(|(class, count)| (class.clone(), *count))
            .collect();
        native_classes.sort();
        let report = LeakReport {
            locals: self.dump(Scope::Local),
            globals: self.dump(Scope::Global),
            native_classes,
        };
        report.log();
        report
    }

    /// Force-release every GLOBAL handle.
    ///
    /// LOCAL handles of the calling thread are reported, not released.
    /// A panic inside a delete is logged and the remaining handles are still
    /// released. Returns the report taken before releasing.
    pub fn teardown(&self) -> LeakReport {
        let report = self.check_for_leaks();
        let globals = std::mem::take(&mut *self.globals.lock());
        for (handle, provenance) in globals {
            let runtime = &self.runtime;
            let result =
                std::panic::catch_unwind(AssertUnwindSafe(|| runtime.delete_global_ref(handle)));
            match result {
                Ok(()) => tracing::debug!(handle = ?handle, "released global reference"),
                Err(panic) => tracing::error!(
                    handle = ?handle,
                    origin = %provenance,
                    "forced release panicked: {}",
                    panic_message(panic.as_ref())
                ),
            }
        }
        report
    }
}

impl Drop for RefTracker {
    fn drop(&mut self) {
        let id = self.id;
        let leftover = LOCAL_REGISTRIES
            .try_with(|cell| cell.borrow_mut().remove(&id))
            .ok()
            .flatten();
        if let Some(locals) = leftover.filter(|locals| !locals.is_empty()) {
            tracing::warn!(count = locals.len(), "tracker dropped with live local references");
        }
    }
}

impl fmt::Debug for RefTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefTracker")
            .field("id", &self.id)
            .field("locals", &self.count(Scope::Local))
            .field("globals", &self.count(Scope::Global))
            .finish()
    }
}

fn insert_once(registry: &mut Registry, handle: RawHandle, provenance: Provenance) -> bool {
    match registry.entry(handle) {
        std::collections::hash_map::Entry::Occupied(_) => false,
        std::collections::hash_map::Entry::Vacant(slot) => {
            slot.insert(provenance);
            true
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
