//! Managed references
//!
//! A [`ManagedRef`] owns exactly one tracked handle and releases it exactly
//! once: on [`release`](ManagedRef::release), on scope conversion, or on drop.

use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{RawHandle, Scope};
use crate::tracker::{Provenance, RefTracker};

struct Owned {
    tracker: Arc<RefTracker>,
    handle: RawHandle,
    scope: Scope,
}

/// Owning wrapper around a guest handle.
///
/// Not `Clone`: use [`duplicate`](Self::duplicate) for a second, independently
/// owned handle. Moving out with [`take`](Self::take) leaves an empty
/// reference behind, and dropping an empty reference does nothing.
#[derive(Default)]
pub struct ManagedRef {
    inner: Option<Owned>,
}

impl ManagedRef {
    /// A reference that owns nothing
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    /// Take ownership of a freshly obtained handle and register it.
    ///
    /// A null handle yields an empty reference.
    #[track_caller]
    pub fn adopt(tracker: &Arc<RefTracker>, handle: RawHandle, scope: Scope) -> Self {
        Self::adopt_with(tracker, handle, scope, Provenance::here())
    }

    /// [`adopt`](Self::adopt) with explicit provenance
    pub fn adopt_with(
        tracker: &Arc<RefTracker>,
        handle: RawHandle,
        scope: Scope,
        provenance: Provenance,
    ) -> Self {
        if handle.is_null() {
            return Self::empty();
        }
        tracker.register(handle, scope, provenance);
        Self {
            inner: Some(Owned {
                tracker: tracker.clone(),
                handle,
                scope,
            }),
        }
    }

    /// The handle, or null when empty
    pub fn handle(&self) -> RawHandle {
        self.inner.as_ref().map_or(RawHandle::NULL, |o| o.handle)
    }

    /// Scope of the owned handle, `None` when empty
    pub fn scope(&self) -> Option<Scope> {
        self.inner.as_ref().map(|o| o.scope)
    }

    /// Tracker the handle is registered with, `None` when empty
    pub fn tracker(&self) -> Option<&Arc<RefTracker>> {
        self.inner.as_ref().map(|o| &o.tracker)
    }

    /// Whether this reference owns nothing
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// The handle, or [`BridgeError::InvalidHandle`] when empty
    pub fn require(&self, what: &str) -> BridgeResult<RawHandle> {
        match &self.inner {
            Some(o) => Ok(o.handle),
            None => Err(BridgeError::InvalidHandle(format!("{} is empty", what))),
        }
    }

    /// Move the handle out, leaving this reference empty
    pub fn take(&mut self) -> ManagedRef {
        std::mem::take(self)
    }

    /// Release the handle now
    pub fn release(mut self) {
        self.release_in_place();
    }

    fn release_in_place(&mut self) {
        if let Some(owned) = self.inner.take() {
            owned.tracker.release(owned.handle, owned.scope);
        }
    }

    /// Convert to `scope`.
    ///
    /// The handle must be tracked under exactly one scope. Converting to the
    /// scope already held returns the same reference untouched. Otherwise a
    /// new handle of `scope` is acquired and registered, then the old one is
    /// released. Converting an empty reference yields an empty reference.
    #[track_caller]
    pub fn convert(self, scope: Scope) -> BridgeResult<ManagedRef> {
        self.convert_with(scope, Provenance::here())
    }

    /// Convert in place; see [`convert`](Self::convert)
    #[track_caller]
    pub fn set_scope(&mut self, scope: Scope) -> BridgeResult<()> {
        let provenance = Provenance::here();
        let converted = self.take().convert_with(scope, provenance)?;
        *self = converted;
        Ok(())
    }

    pub(crate) fn convert_with(
        mut self,
        scope: Scope,
        provenance: Provenance,
    ) -> BridgeResult<ManagedRef> {
        let tracker = match self.tracker().cloned() {
            Some(tracker) => tracker,
            None => return Ok(self),
        };
        let source = self.handle();
        if tracker.scope_of(source)? == scope {
            return Ok(self);
        }
        let handle = tracker.acquire(source, scope, provenance)?;
        self.release_in_place();
        Ok(ManagedRef {
            inner: Some(Owned {
                tracker,
                handle,
                scope,
            }),
        })
    }

    /// A second, independently owned handle of `scope` to the same object
    #[track_caller]
    pub fn duplicate(&self, scope: Scope) -> BridgeResult<ManagedRef> {
        let Some(owned) = &self.inner else {
            return Ok(ManagedRef::empty());
        };
        let handle = owned
            .tracker
            .acquire(owned.handle, scope, Provenance::here())?;
        Ok(ManagedRef {
            inner: Some(Owned {
                tracker: owned.tracker.clone(),
                handle,
                scope,
            }),
        })
    }

    /// Guest identity comparison; two empty references are the same object.
    pub fn is_same_object(&self, other: &ManagedRef) -> BridgeResult<bool> {
        match (&self.inner, &other.inner) {
            (None, None) => Ok(true),
            (Some(o), _) | (None, Some(o)) => o
                .tracker
                .runtime()
                .is_same_object(self.handle(), other.handle()),
        }
    }
}

impl Drop for ManagedRef {
    fn drop(&mut self) {
        self.release_in_place();
    }
}

impl fmt::Debug for ManagedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(o) => f
                .debug_struct("ManagedRef")
                .field("handle", &o.handle)
                .field("scope", &o.scope)
                .finish(),
            None => f.write_str("ManagedRef(empty)"),
        }
    }
}
