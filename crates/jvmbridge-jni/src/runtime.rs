//! JNI implementation of [`GuestRuntime`]
//!
//! Calls go through the `jni-sys` function table of the calling thread's
//! `JNIEnv`. Threads are attached on first use and detached when they exit.
//! Name and modifier lookups use JVMTI when an environment was obtained.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jni_sys::{
    jboolean, jclass, jint, jmethodID, jobject, jsize, jstring, jvalue, JNIEnv, JNINativeMethod,
    JavaVM, JNI_EDETACHED, JNI_FALSE, JNI_OK,
};
use jvmbridge_core::{
    BridgeError, BridgeResult, CallTarget, GuestRuntime, GuestThrowable, JValue, MethodId,
    NativeMethod, RawHandle, RawValue, ReturnKind,
};

use crate::sys::jvmti::{self, jvmtiCapabilities, jvmtiEnv, JVMTI_ERROR_NONE};

/// Call a JNI function through the table, or fail with `Unsupported`.
macro_rules! jni {
    ($env:expr, $name:ident $(, $arg:expr)* $(,)?) => {{
        let env: *mut JNIEnv = $env;
        match (**env).$name {
            Some(f) => f(env $(, $arg)*),
            None => return Err(BridgeError::Unsupported(stringify!($name))),
        }
    }};
}

/// Call a JVMTI function through the table, or fail with `Unsupported`.
macro_rules! jvmti {
    ($env:expr, $name:ident $(, $arg:expr)* $(,)?) => {{
        let env: *mut jvmtiEnv = $env;
        match (**env).$name {
            Some(f) => f(env $(, $arg)*),
            None => return Err(BridgeError::Unsupported(stringify!($name))),
        }
    }};
}

macro_rules! call {
    ($env:expr, $target:expr, $method:expr, $args:expr, $instance:ident, $static:ident) => {
        match $target {
            CallTarget::Instance(obj) => jni!($env, $instance, obj.as_ptr(), $method, $args),
            CallTarget::Static(class) => jni!($env, $static, class.as_ptr(), $method, $args),
        }
    };
}

/// The VM pointer plus a liveness flag shared with attach guards.
struct VmCell {
    vm: *mut JavaVM,
    alive: AtomicBool,
}

unsafe impl Send for VmCell {}
unsafe impl Sync for VmCell {}

/// Detaches the owning thread on thread exit.
struct AttachGuard {
    cell: Arc<VmCell>,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if !self.cell.alive.load(Ordering::Acquire) {
            return;
        }
        let vm = self.cell.vm;
        // SAFETY: the VM is alive and this thread attached itself.
        unsafe {
            if let Some(detach) = (**vm).DetachCurrentThread {
                detach(vm);
            }
        }
    }
}

thread_local! {
    static ATTACHMENT: RefCell<Option<AttachGuard>> = const { RefCell::new(None) };
}

/// [`GuestRuntime`] backed by a live JVM.
pub struct JniRuntime {
    cell: Arc<VmCell>,
    jni_version: jint,
    jvmti: Option<*mut jvmtiEnv>,
}

// Both interface pointers are process-wide and documented as thread-safe.
unsafe impl Send for JniRuntime {}
unsafe impl Sync for JniRuntime {}

impl JniRuntime {
    /// Wrap a VM.
    ///
    /// # Safety
    ///
    /// `vm` must be a live VM for the lifetime of the runtime, or until
    /// [`invalidate`](Self::invalidate) is called. `jvmti`, when given, must be
    /// an environment obtained from the same VM.
    pub unsafe fn new(vm: *mut JavaVM, jni_version: jint, jvmti: Option<*mut jvmtiEnv>) -> Self {
        Self {
            cell: Arc::new(VmCell {
                vm,
                alive: AtomicBool::new(true),
            }),
            jni_version,
            jvmti: jvmti.filter(|env| !env.is_null()),
        }
    }

    /// The wrapped VM
    pub fn vm(&self) -> *mut JavaVM {
        self.cell.vm
    }

    /// Check whether a JVMTI environment is available
    pub fn has_jvmti(&self) -> bool {
        self.jvmti.is_some()
    }

    /// Mark the VM as gone; later calls fail with [`BridgeError::Attach`].
    pub fn invalidate(&self) {
        self.cell.alive.store(false, Ordering::Release);
    }

    /// `JNIEnv` of the calling thread, attaching it if needed.
    fn env(&self) -> BridgeResult<*mut JNIEnv> {
        if !self.cell.alive.load(Ordering::Acquire) {
            return Err(BridgeError::Attach("the JVM has been destroyed".to_string()));
        }
        let vm = self.cell.vm;
        let mut env: *mut c_void = ptr::null_mut();
        // SAFETY: vm is live while the cell is alive.
        unsafe {
            let get_env = (**vm)
                .GetEnv
                .ok_or(BridgeError::Unsupported("GetEnv"))?;
            match get_env(vm, &mut env, self.jni_version) {
                JNI_OK => return Ok(env.cast()),
                JNI_EDETACHED => {}
                status => {
                    return Err(BridgeError::Attach(format!(
                        "GetEnv failed with status {}",
                        status
                    )))
                }
            }

            // Daemon threads do not hold up DestroyJavaVM.
            let attach = (**vm)
                .AttachCurrentThreadAsDaemon
                .ok_or(BridgeError::Unsupported("AttachCurrentThreadAsDaemon"))?;
            let status = attach(vm, &mut env, ptr::null_mut());
            if status != JNI_OK || env.is_null() {
                return Err(BridgeError::Attach(format!(
                    "AttachCurrentThreadAsDaemon failed with status {}",
                    status
                )));
            }
        }

        let thread = std::thread::current();
        tracing::debug!(thread = thread.name().unwrap_or("<unnamed>"), "attached thread to JVM");
        let guard = AttachGuard {
            cell: self.cell.clone(),
        };
        let _ = ATTACHMENT.try_with(|slot| *slot.borrow_mut() = Some(guard));
        Ok(env.cast())
    }

    fn jvmti_env(&self) -> BridgeResult<*mut jvmtiEnv> {
        self.jvmti.ok_or(BridgeError::Unsupported("introspection interface"))
    }

    /// Name of a JVMTI error code
    fn error_name(&self, code: jvmti::jvmtiError) -> String {
        let fallback = || format!("JVMTI error {}", code);
        let Some(env) = self.jvmti else {
            return fallback();
        };
        let mut name: *mut std::os::raw::c_char = ptr::null_mut();
        // SAFETY: env is a live JVMTI environment.
        unsafe {
            let Some(get_error_name) = (**env).GetErrorName else {
                return fallback();
            };
            if get_error_name(env, code, &mut name) != JVMTI_ERROR_NONE || name.is_null() {
                return fallback();
            }
            let text = CStr::from_ptr(name).to_string_lossy().into_owned();
            self.deallocate(env, name.cast());
            text
        }
    }

    unsafe fn deallocate(&self, env: *mut jvmtiEnv, mem: *mut u8) {
        if mem.is_null() {
            return;
        }
        if let Some(deallocate) = (**env).Deallocate {
            deallocate(env, mem);
        }
    }

    fn introspection_error(&self, call: &str, code: jvmti::jvmtiError) -> BridgeError {
        BridgeError::Introspection(format!("{} failed: {}", call, self.error_name(code)))
    }

    /// Add capabilities to the JVMTI environment.
    pub fn add_capabilities(&self, capabilities: &jvmtiCapabilities) -> BridgeResult<()> {
        let env = self.jvmti_env()?;
        // SAFETY: env is a live JVMTI environment and the bitset outlives the call.
        let code = unsafe { jvmti!(env, AddCapabilities, capabilities) };
        if code != JVMTI_ERROR_NONE {
            return Err(self.introspection_error("AddCapabilities", code));
        }
        Ok(())
    }

    // ========================================================================
    // Raw helpers
    //
    // These never consult the pending-exception machinery of the trait, so
    // they can run while an exception is being described.
    // ========================================================================

    unsafe fn delete_local(&self, env: *mut JNIEnv, obj: jobject) {
        if obj.is_null() {
            return;
        }
        if let Some(delete) = (**env).DeleteLocalRef {
            delete(env, obj);
        }
    }

    /// Clear any pending exception; true if one was pending.
    unsafe fn clear_pending(&self, env: *mut JNIEnv) -> bool {
        match ((**env).ExceptionCheck, (**env).ExceptionClear) {
            (Some(check), Some(clear)) if check(env) != JNI_FALSE => {
                clear(env);
                true
            }
            _ => false,
        }
    }

    unsafe fn java_string(&self, env: *mut JNIEnv, string: jstring) -> BridgeResult<String> {
        let len = jni!(env, GetStringLength, string);
        let mut buf = vec![0u16; len.max(0) as usize];
        jni!(env, GetStringRegion, string, 0, len, buf.as_mut_ptr());
        Ok(String::from_utf16_lossy(&buf))
    }

    /// Call a `String`-returning no-argument method, swallowing failures.
    unsafe fn call_string_method(
        &self,
        env: *mut JNIEnv,
        obj: jobject,
        name: &CStr,
        descriptor: &CStr,
    ) -> BridgeResult<Option<String>> {
        let class = jni!(env, GetObjectClass, obj);
        let method = jni!(env, GetMethodID, class, name.as_ptr(), descriptor.as_ptr());
        self.delete_local(env, class);
        if method.is_null() {
            self.clear_pending(env);
            return Ok(None);
        }
        let result = jni!(env, CallObjectMethodA, obj, method, ptr::null());
        if self.clear_pending(env) || result.is_null() {
            self.delete_local(env, result);
            return Ok(None);
        }
        let text = self.java_string(env, result);
        self.delete_local(env, result);
        text.map(Some)
    }

    /// Binary name of a class object (`java.lang.IllegalStateException`)
    unsafe fn class_name(&self, env: *mut JNIEnv, class: jclass) -> BridgeResult<String> {
        Ok(self
            .call_string_method(env, class, c"getName", c"()Ljava/lang/String;")?
            .unwrap_or_else(|| "<unknown class>".to_string()))
    }

    unsafe fn stack_trace(&self, env: *mut JNIEnv, throwable: jobject) -> BridgeResult<Vec<String>> {
        let class = jni!(env, GetObjectClass, throwable);
        let method = jni!(
            env,
            GetMethodID,
            class,
            c"getStackTrace".as_ptr(),
            c"()[Ljava/lang/StackTraceElement;".as_ptr()
        );
        self.delete_local(env, class);
        if method.is_null() {
            self.clear_pending(env);
            return Ok(Vec::new());
        }
        let frames = jni!(env, CallObjectMethodA, throwable, method, ptr::null());
        if self.clear_pending(env) || frames.is_null() {
            self.delete_local(env, frames);
            return Ok(Vec::new());
        }

        let len = jni!(env, GetArrayLength, frames);
        let mut lines = Vec::with_capacity(len.max(0) as usize);
        for i in 0..len {
            let frame = jni!(env, GetObjectArrayElement, frames, i);
            if frame.is_null() {
                continue;
            }
            if let Some(line) =
                self.call_string_method(env, frame, c"toString", c"()Ljava/lang/String;")?
            {
                lines.push(line);
            }
            self.delete_local(env, frame);
        }
        self.delete_local(env, frames);
        Ok(lines)
    }

    unsafe fn describe_throwable(&self, env: *mut JNIEnv, throwable: jobject) -> BridgeResult<GuestThrowable> {
        let class = jni!(env, GetObjectClass, throwable);
        let class_name = self.class_name(env, class)?;
        self.delete_local(env, class);

        let message =
            self.call_string_method(env, throwable, c"getMessage", c"()Ljava/lang/String;")?;
        let mut described = GuestThrowable::new(class_name, message.as_deref());
        if let Some(description) =
            self.call_string_method(env, throwable, c"toString", c"()Ljava/lang/String;")?
        {
            described.description = description;
        }
        described.stack_trace = self.stack_trace(env, throwable)?;
        Ok(described)
    }
}

fn to_jvalue(value: &JValue) -> jvalue {
    match *value {
        JValue::Boolean(v) => jvalue { z: v as jboolean },
        JValue::Byte(v) => jvalue { b: v },
        JValue::Char(v) => jvalue { c: v },
        JValue::Short(v) => jvalue { s: v },
        JValue::Int(v) => jvalue { i: v },
        JValue::Long(v) => jvalue { j: v },
        JValue::Float(v) => jvalue { f: v },
        JValue::Double(v) => jvalue { d: v },
        JValue::Object(h) => jvalue { l: h.as_ptr() },
    }
}

fn c_string(what: &str, value: &str) -> BridgeResult<CString> {
    CString::new(value).map_err(|_| BridgeError::resolution(value, format!("{} contains a NUL byte", what)))
}

impl GuestRuntime for JniRuntime {
    fn new_local_ref(&self, obj: RawHandle) -> BridgeResult<RawHandle> {
        let env = self.env()?;
        let local = unsafe { jni!(env, NewLocalRef, obj.as_ptr()) };
        if local.is_null() && !obj.is_null() {
            return Err(BridgeError::InvalidHandle(format!("NewLocalRef failed for {:?}", obj)));
        }
        Ok(RawHandle::from_ptr(local))
    }

    fn delete_local_ref(&self, obj: RawHandle) {
        match self.env() {
            Ok(env) => unsafe { self.delete_local(env, obj.as_ptr()) },
            Err(e) => tracing::warn!(handle = ?obj, error = %e, "cannot delete local reference"),
        }
    }

    fn new_global_ref(&self, obj: RawHandle) -> BridgeResult<RawHandle> {
        let env = self.env()?;
        let global = unsafe { jni!(env, NewGlobalRef, obj.as_ptr()) };
        if global.is_null() && !obj.is_null() {
            return Err(BridgeError::InvalidHandle(format!("NewGlobalRef failed for {:?}", obj)));
        }
        Ok(RawHandle::from_ptr(global))
    }

    fn delete_global_ref(&self, obj: RawHandle) {
        let env = match self.env() {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(handle = ?obj, error = %e, "cannot delete global reference");
                return;
            }
        };
        unsafe {
            if let Some(delete) = (**env).DeleteGlobalRef {
                delete(env, obj.as_ptr());
            }
        }
    }

    fn is_same_object(&self, a: RawHandle, b: RawHandle) -> BridgeResult<bool> {
        let env = self.env()?;
        Ok(unsafe { jni!(env, IsSameObject, a.as_ptr(), b.as_ptr()) } != JNI_FALSE)
    }

    fn find_class(&self, name: &str) -> BridgeResult<RawHandle> {
        let env = self.env()?;
        let c_name = c_string("class name", name)?;
        Ok(RawHandle::from_ptr(unsafe { jni!(env, FindClass, c_name.as_ptr()) }))
    }

    fn get_method_id(
        &self,
        class: RawHandle,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> BridgeResult<Option<MethodId>> {
        let env = self.env()?;
        let c_name = c_string("method name", name)?;
        let c_descriptor = c_string("descriptor", descriptor)?;
        let id: jmethodID = unsafe {
            if is_static {
                jni!(env, GetStaticMethodID, class.as_ptr(), c_name.as_ptr(), c_descriptor.as_ptr())
            } else {
                jni!(env, GetMethodID, class.as_ptr(), c_name.as_ptr(), c_descriptor.as_ptr())
            }
        };
        Ok((!id.is_null()).then(|| MethodId::from_ptr(id)))
    }

    fn call_method(
        &self,
        target: CallTarget,
        method: MethodId,
        kind: ReturnKind,
        args: &[JValue],
    ) -> BridgeResult<RawValue> {
        let env = self.env()?;
        let args: Vec<jvalue> = args.iter().map(to_jvalue).collect();
        let id: jmethodID = method.as_ptr();
        let args = args.as_ptr();

        let value = unsafe {
            match kind {
                ReturnKind::Void => {
                    call!(env, target, id, args, CallVoidMethodA, CallStaticVoidMethodA);
                    RawValue::Void
                }
                ReturnKind::Boolean => RawValue::Boolean(
                    call!(env, target, id, args, CallBooleanMethodA, CallStaticBooleanMethodA)
                        != JNI_FALSE,
                ),
                ReturnKind::Byte => {
                    RawValue::Byte(call!(env, target, id, args, CallByteMethodA, CallStaticByteMethodA))
                }
                ReturnKind::Char => {
                    RawValue::Char(call!(env, target, id, args, CallCharMethodA, CallStaticCharMethodA))
                }
                ReturnKind::Short => RawValue::Short(call!(
                    env, target, id, args, CallShortMethodA, CallStaticShortMethodA
                )),
                ReturnKind::Int => {
                    RawValue::Int(call!(env, target, id, args, CallIntMethodA, CallStaticIntMethodA))
                }
                ReturnKind::Long => {
                    RawValue::Long(call!(env, target, id, args, CallLongMethodA, CallStaticLongMethodA))
                }
                ReturnKind::Float => RawValue::Float(call!(
                    env, target, id, args, CallFloatMethodA, CallStaticFloatMethodA
                )),
                ReturnKind::Double => RawValue::Double(call!(
                    env, target, id, args, CallDoubleMethodA, CallStaticDoubleMethodA
                )),
                ReturnKind::Object => RawValue::Object(RawHandle::from_ptr(call!(
                    env, target, id, args, CallObjectMethodA, CallStaticObjectMethodA
                ))),
            }
        };
        Ok(value)
    }

    fn new_object(&self, class: RawHandle, constructor: MethodId, args: &[JValue]) -> BridgeResult<RawHandle> {
        let env = self.env()?;
        let args: Vec<jvalue> = args.iter().map(to_jvalue).collect();
        let id: jmethodID = constructor.as_ptr();
        let obj = unsafe { jni!(env, NewObjectA, class.as_ptr(), id, args.as_ptr()) };
        Ok(RawHandle::from_ptr(obj))
    }

    fn take_pending_exception(&self) -> BridgeResult<Option<GuestThrowable>> {
        let env = self.env()?;
        unsafe {
            let throwable = jni!(env, ExceptionOccurred);
            if throwable.is_null() {
                return Ok(None);
            }
            jni!(env, ExceptionClear);
            let described = self.describe_throwable(env, throwable);
            self.clear_pending(env);
            self.delete_local(env, throwable);
            described.map(Some)
        }
    }

    fn array_length(&self, array: RawHandle) -> BridgeResult<usize> {
        if array.is_null() {
            return Err(BridgeError::InvalidHandle("array length of null".to_string()));
        }
        let env = self.env()?;
        let len = unsafe { jni!(env, GetArrayLength, array.as_ptr()) };
        Ok(len.max(0) as usize)
    }

    fn object_array_element(&self, array: RawHandle, index: usize) -> BridgeResult<RawHandle> {
        if array.is_null() {
            return Err(BridgeError::InvalidHandle("element of null array".to_string()));
        }
        let env = self.env()?;
        let index = jsize::try_from(index)
            .map_err(|_| BridgeError::InvalidHandle(format!("array index {} out of range", index)))?;
        Ok(RawHandle::from_ptr(unsafe {
            jni!(env, GetObjectArrayElement, array.as_ptr(), index)
        }))
    }

    fn read_string(&self, string: RawHandle) -> BridgeResult<String> {
        if string.is_null() {
            return Err(BridgeError::InvalidHandle("read of null string".to_string()));
        }
        let env = self.env()?;
        unsafe { self.java_string(env, string.as_ptr()) }
    }

    fn new_string(&self, value: &str) -> BridgeResult<RawHandle> {
        let env = self.env()?;
        let utf16: Vec<u16> = value.encode_utf16().collect();
        let len = jsize::try_from(utf16.len())
            .map_err(|_| BridgeError::InvalidHandle("string too long".to_string()))?;
        Ok(RawHandle::from_ptr(unsafe { jni!(env, NewString, utf16.as_ptr(), len) }))
    }

    fn from_reflected_method(&self, method: RawHandle) -> BridgeResult<Option<MethodId>> {
        let env = self.env()?;
        let id = unsafe { jni!(env, FromReflectedMethod, method.as_ptr()) };
        Ok((!id.is_null()).then(|| MethodId::from_ptr(id)))
    }

    fn method_name(&self, method: MethodId) -> BridgeResult<(String, String)> {
        let ti = self.jvmti_env()?;
        self.env()?;
        let mut name: *mut std::os::raw::c_char = ptr::null_mut();
        let mut signature: *mut std::os::raw::c_char = ptr::null_mut();
        unsafe {
            let code = jvmti!(
                ti,
                GetMethodName,
                method.as_ptr(),
                &mut name,
                &mut signature,
                ptr::null_mut()
            );
            if code != JVMTI_ERROR_NONE {
                return Err(self.introspection_error("GetMethodName", code));
            }
            let owned = |p: *mut std::os::raw::c_char| {
                (!p.is_null()).then(|| CStr::from_ptr(p).to_string_lossy().into_owned())
            };
            let result = (owned(name), owned(signature));
            self.deallocate(ti, name.cast());
            self.deallocate(ti, signature.cast());
            match result {
                (Some(name), Some(signature)) => Ok((name, signature)),
                _ => Err(BridgeError::Introspection(
                    "GetMethodName returned no name".to_string(),
                )),
            }
        }
    }

    fn method_modifiers(&self, method: MethodId) -> BridgeResult<i32> {
        let ti = self.jvmti_env()?;
        self.env()?;
        let mut modifiers: jint = 0;
        let code = unsafe { jvmti!(ti, GetMethodModifiers, method.as_ptr(), &mut modifiers) };
        if code != JVMTI_ERROR_NONE {
            return Err(self.introspection_error("GetMethodModifiers", code));
        }
        Ok(modifiers)
    }

    fn register_natives(&self, class: RawHandle, methods: &[NativeMethod]) -> BridgeResult<()> {
        let env = self.env()?;
        let names = methods
            .iter()
            .map(|m| -> BridgeResult<(CString, CString)> {
                Ok((c_string("method name", &m.name)?, c_string("descriptor", &m.descriptor)?))
            })
            .collect::<BridgeResult<Vec<_>>>()?;
        let table: Vec<JNINativeMethod> = methods
            .iter()
            .zip(&names)
            .map(|(m, (name, descriptor))| JNINativeMethod {
                name: name.as_ptr() as *mut _,
                signature: descriptor.as_ptr() as *mut _,
                fnPtr: m.function.as_ptr(),
            })
            .collect();
        let count = jint::try_from(table.len())
            .map_err(|_| BridgeError::InvalidHandle("native table too large".to_string()))?;

        let status = unsafe { jni!(env, RegisterNatives, class.as_ptr(), table.as_ptr(), count) };
        if status != JNI_OK {
            // The failure's exception stays pending for the caller.
            return Err(BridgeError::Registration {
                class: String::new(),
                status,
            });
        }
        Ok(())
    }

    fn unregister_natives(&self, class: RawHandle) -> BridgeResult<()> {
        let env = self.env()?;
        let status = unsafe { jni!(env, UnregisterNatives, class.as_ptr()) };
        if status != JNI_OK {
            // The failure's exception stays pending for the caller.
            return Err(BridgeError::Registration {
                class: String::new(),
                status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jvalue_conversion() {
        let v = to_jvalue(&JValue::Int(42));
        assert_eq!(unsafe { v.i }, 42);
        let v = to_jvalue(&JValue::Boolean(true));
        assert_eq!(unsafe { v.z }, 1);
        let v = to_jvalue(&JValue::NULL);
        assert!(unsafe { v.l }.is_null());
    }

    #[test]
    fn test_c_string_rejects_nul() {
        assert!(c_string("method name", "open").is_ok());
        let err = c_string("method name", "op\0en").unwrap_err();
        assert!(matches!(err, BridgeError::Resolution { .. }));
    }

    #[test]
    fn test_invalidated_runtime_refuses_calls() {
        let runtime = unsafe { JniRuntime::new(ptr::null_mut(), crate::sys::JNI_VERSION_1_8, None) };
        runtime.invalidate();
        assert!(!runtime.has_jvmti());
        assert!(matches!(runtime.find_class("java/lang/Object"), Err(BridgeError::Attach(_))));
        assert!(matches!(
            runtime.method_name(MethodId::from_raw(1)),
            Err(BridgeError::Unsupported(_))
        ));
    }
}
