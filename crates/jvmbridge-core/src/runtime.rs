//! GuestRuntime trait: abstract JVM operations
//!
//! Defines the surface the bridge needs from an embedded JVM. The JNI backend
//! in `jvmbridge-jni` provides the real implementation; tests use
//! [`FakeRuntime`](crate::fake::FakeRuntime).

use crate::error::{BridgeResult, GuestThrowable};
use crate::handle::{CallTarget, JValue, MethodId, NativeMethod, RawHandle, RawValue, ReturnKind};

/// `static` modifier bit
pub const ACC_STATIC: i32 = 0x0008;
/// `native` modifier bit
pub const ACC_NATIVE: i32 = 0x0100;

/// Abstract guest runtime.
///
/// Every handle returned by a method of this trait is a fresh LOCAL handle
/// owned by the caller, unless stated otherwise. Implementations attach the
/// calling thread on demand and report attachment failure as
/// [`BridgeError::Attach`](crate::BridgeError::Attach).
///
/// Calls that may run guest code leave a pending exception in place; callers
/// drain it with [`take_pending_exception`](Self::take_pending_exception).
pub trait GuestRuntime: Send + Sync {
    // ========================================================================
    // References
    // ========================================================================

    /// New LOCAL handle to the object behind `obj`
    fn new_local_ref(&self, obj: RawHandle) -> BridgeResult<RawHandle>;

    /// Delete a LOCAL handle. Failures are logged, never raised.
    fn delete_local_ref(&self, obj: RawHandle);

    /// New GLOBAL handle to the object behind `obj`
    fn new_global_ref(&self, obj: RawHandle) -> BridgeResult<RawHandle>;

    /// Delete a GLOBAL handle. Failures are logged, never raised.
    fn delete_global_ref(&self, obj: RawHandle);

    /// Guest identity comparison
    fn is_same_object(&self, a: RawHandle, b: RawHandle) -> BridgeResult<bool>;

    // ========================================================================
    // Classes and Methods
    // ========================================================================

    /// Look up a class by internal name (`java/lang/String`).
    ///
    /// Returns the null handle when the class is missing; the runtime may
    /// leave a pending `NoClassDefFoundError`.
    fn find_class(&self, name: &str) -> BridgeResult<RawHandle>;

    /// Resolve a method identity; `None` when missing.
    fn get_method_id(
        &self,
        class: RawHandle,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> BridgeResult<Option<MethodId>>;

    /// Call a method with the call form selected by `target` and `kind`.
    fn call_method(
        &self,
        target: CallTarget,
        method: MethodId,
        kind: ReturnKind,
        args: &[JValue],
    ) -> BridgeResult<RawValue>;

    /// Allocate and construct an object
    fn new_object(
        &self,
        class: RawHandle,
        constructor: MethodId,
        args: &[JValue],
    ) -> BridgeResult<RawHandle>;

    // ========================================================================
    // Exceptions
    // ========================================================================

    /// Check, clear and describe the pending exception, if any.
    fn take_pending_exception(&self) -> BridgeResult<Option<GuestThrowable>>;

    // ========================================================================
    // Arrays and Strings
    // ========================================================================

    /// Length of a guest array
    fn array_length(&self, array: RawHandle) -> BridgeResult<usize>;

    /// Element of an object array
    fn object_array_element(&self, array: RawHandle, index: usize) -> BridgeResult<RawHandle>;

    /// Read a guest string as UTF-8
    fn read_string(&self, string: RawHandle) -> BridgeResult<String>;

    /// Create a guest string
    fn new_string(&self, value: &str) -> BridgeResult<RawHandle>;

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Method identity behind a `java.lang.reflect.Method` object
    fn from_reflected_method(&self, method: RawHandle) -> BridgeResult<Option<MethodId>>;

    /// Name and raw descriptor of a method.
    ///
    /// Returns [`BridgeError::Unsupported`](crate::BridgeError::Unsupported)
    /// when no introspection interface is available.
    fn method_name(&self, method: MethodId) -> BridgeResult<(String, String)>;

    /// Modifier bits of a method (`ACC_STATIC`, `ACC_NATIVE`, ...)
    fn method_modifiers(&self, method: MethodId) -> BridgeResult<i32>;

    // ========================================================================
    // Native Registration
    // ========================================================================

    /// Bind native implementations to methods of `class`.
    ///
    /// A failed status is returned as [`BridgeError::Registration`] with an
    /// empty class name. Any exception the runtime raised is left pending and
    /// no further guest call is made.
    fn register_natives(&self, class: RawHandle, methods: &[NativeMethod]) -> BridgeResult<()>;

    /// Unbind every native implementation of `class`. Failures follow
    /// [`register_natives`](Self::register_natives).
    fn unregister_natives(&self, class: RawHandle) -> BridgeResult<()>;
}

/// Drain the pending exception into an error.
pub fn check_exception(runtime: &dyn GuestRuntime) -> BridgeResult<()> {
    match runtime.take_pending_exception()? {
        Some(throwable) => Err(throwable.into()),
        None => Ok(()),
    }
}
