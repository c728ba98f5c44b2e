//! jvmbridge core - typed, ownership-tracked access to an embedded JVM
//!
//! This crate holds everything that does not depend on a concrete JVM:
//!
//! - [`RefTracker`]: LOCAL and GLOBAL registries of every owned handle, with
//!   the acquiring call site for leak reports
//! - [`ManagedRef`]: exactly-once ownership of a handle, with scope conversion
//! - [`MethodSignature`]: a resolved method with typed invocation
//! - [`SignatureFactory`]: discovery of a class's declared methods
//! - [`resolve_bindings`]: matching of declared methods against native
//!   implementations
//!
//! The guest runtime sits behind the [`GuestRuntime`] trait. The JNI backend
//! lives in `jvmbridge-jni`. With the `fake` feature, `fake::FakeRuntime` is
//! an in-memory stand-in for tests.
//!
//! # Example
//!
//! ```ignore
//! let tracker = RefTracker::new(runtime);
//! let class = ClassRef::find(&tracker, "org/example/Native")?;
//! let factory = SignatureFactory::new(&tracker)?;
//!
//! let table = BindingTable::new().with("open", open_fn, &["int"]);
//! let report = factory.map_natives(&class, &table)?;
//! class.register_natives(&report.methods)?;
//! ```

#![warn(missing_docs)]

pub mod binding;
pub mod class;
pub mod descriptor;
pub mod discovery;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod handle;
pub mod instance;
pub mod reference;
pub mod runtime;
pub mod signature;
pub mod tracker;

pub use binding::{
    resolve_bindings, BindingEntry, BindingReport, BindingTable, DeclaredMethod, UnmatchedBinding,
};
pub use class::ClassRef;
pub use discovery::SignatureFactory;
pub use error::{BridgeError, BridgeResult, GuestThrowable};
pub use handle::{
    CallTarget, JValue, MethodId, NativeFn, NativeMethod, RawHandle, RawValue, ReturnKind, Scope,
};
pub use instance::Instance;
pub use reference::ManagedRef;
pub use runtime::{check_exception, GuestRuntime, ACC_NATIVE, ACC_STATIC};
pub use signature::{FromGuestValue, GuestValue, MethodSignature, MethodSpec};
pub use tracker::{LeakReport, Provenance, RefTracker, RegistryEntry, TrackerId};
