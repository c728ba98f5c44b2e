//! JVM lifecycle
//!
//! [`Jvm`] owns the process's single embedded VM together with the reference
//! tracker and a shared signature factory. Dropping it tears everything down
//! in order: tracked GLOBAL references first, then the VM itself.

use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jni_sys::{jboolean, jint, JavaVM, JavaVMInitArgs, JavaVMOption, JNI_ERR, JNI_OK};
use jvmbridge_core::{BridgeResult, ClassRef, LeakReport, RefTracker, SignatureFactory};
use parking_lot::Mutex;

use crate::error::{JvmError, JvmResult};
use crate::loader::JvmLibrary;
use crate::options::{JniVersion, JvmOptions, JvmtiOptions};
use crate::runtime::JniRuntime;
use crate::sys::jvmti::jvmtiEnv;

/// Set while a [`Jvm`] exists in this process.
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// The embedded JVM
pub struct Jvm {
    runtime: Arc<JniRuntime>,
    tracker: Arc<RefTracker>,
    factory: Mutex<Option<Arc<SignatureFactory>>>,
    /// Present when this process created the VM and must destroy it
    library: Option<JvmLibrary>,
    shut_down: bool,
}

impl Jvm {
    /// Load the JVM library and create a VM.
    ///
    /// Fails with [`JvmError::AlreadyActive`] when a VM already exists.
    pub fn create(options: JvmOptions) -> JvmResult<Self> {
        options.validate()?;
        claim()?;
        Self::create_claimed(&options).inspect_err(|_| ACTIVE.store(false, Ordering::Release))
    }

    fn create_claimed(options: &JvmOptions) -> JvmResult<Self> {
        let library = JvmLibrary::open_first(&options.libjvm_candidates()?)?;
        if library.created_vm_count() > 0 {
            return Err(JvmError::AlreadyActive);
        }

        let strings = options
            .all_vm_options()
            .into_iter()
            .map(|o| CString::new(o).map_err(|e| JvmError::ValidationError(e.to_string())))
            .collect::<JvmResult<Vec<_>>>()?;
        let mut vm_options: Vec<JavaVMOption> = strings
            .iter()
            .map(|s| JavaVMOption {
                optionString: s.as_ptr() as *mut _,
                extraInfo: ptr::null_mut(),
            })
            .collect();
        let mut args = JavaVMInitArgs {
            version: options.jni_version.raw(),
            nOptions: vm_options.len() as jint,
            options: vm_options.as_mut_ptr(),
            ignoreUnrecognized: options.ignore_unrecognized as jboolean,
        };

        let mut vm: *mut JavaVM = ptr::null_mut();
        let mut env: *mut c_void = ptr::null_mut();
        // SAFETY: args and its option strings outlive the call.
        let status = unsafe { library.create_java_vm(&mut vm, &mut env, &mut args) };
        if status != JNI_OK || vm.is_null() {
            return Err(JvmError::CreateFailed(status));
        }
        tracing::debug!(
            library = %library.path().display(),
            options = strings.len(),
            "created JVM"
        );

        // SAFETY: vm was just created by this process.
        match unsafe { Self::adopt(vm, options.jni_version, options.jvmti, Some(library)) } {
            Ok(jvm) => Ok(jvm),
            Err(e) => {
                unsafe { destroy_vm(vm) };
                Err(e)
            }
        }
    }

    /// Adopt a VM created elsewhere, e.g. inside `JNI_OnLoad` or an agent.
    ///
    /// The VM is not destroyed on shutdown.
    ///
    /// # Safety
    ///
    /// `vm` must be a live VM that outlives the returned value.
    pub unsafe fn wrap(
        vm: *mut JavaVM,
        jni_version: JniVersion,
        jvmti: Option<JvmtiOptions>,
    ) -> JvmResult<Self> {
        if vm.is_null() {
            return Err(JvmError::ValidationError("null JavaVM pointer".to_string()));
        }
        claim()?;
        Self::adopt(vm, jni_version, jvmti, None).inspect_err(|_| ACTIVE.store(false, Ordering::Release))
    }

    unsafe fn adopt(
        vm: *mut JavaVM,
        jni_version: JniVersion,
        jvmti: Option<JvmtiOptions>,
        library: Option<JvmLibrary>,
    ) -> JvmResult<Self> {
        let ti = match jvmti {
            Some(settings) => Some(jvmti_env(vm, settings.version.raw())?),
            None => None,
        };
        let runtime = Arc::new(JniRuntime::new(vm, jni_version.raw(), ti));

        if let Some(settings) = jvmti.filter(|s| s.capabilities.any()) {
            runtime
                .add_capabilities(&settings.capabilities.to_raw())
                .map_err(|e| JvmError::Jvmti {
                    call: "AddCapabilities",
                    name: e.to_string(),
                })?;
        }

        let tracker = RefTracker::new(runtime.clone());
        Ok(Self {
            runtime,
            tracker,
            factory: Mutex::new(None),
            library,
            shut_down: false,
        })
    }

    /// The reference tracker shared by every handle of this VM
    pub fn tracker(&self) -> &Arc<RefTracker> {
        &self.tracker
    }

    /// The JNI runtime
    pub fn runtime(&self) -> &Arc<JniRuntime> {
        &self.runtime
    }

    /// Whether this process created the VM
    pub fn is_owned(&self) -> bool {
        self.library.is_some()
    }

    /// Shared signature factory, built on first use.
    pub fn signature_factory(&self) -> BridgeResult<Arc<SignatureFactory>> {
        let mut slot = self.factory.lock();
        if let Some(factory) = slot.as_ref() {
            return Ok(factory.clone());
        }
        let factory = Arc::new(SignatureFactory::new(&self.tracker)?);
        *slot = Some(factory.clone());
        Ok(factory)
    }

    /// Look up a class by internal name.
    #[track_caller]
    pub fn find_class(&self, name: &str) -> BridgeResult<Arc<ClassRef>> {
        ClassRef::find(&self.tracker, name)
    }

    /// Tear down the VM and report what was still tracked.
    pub fn shutdown(mut self) -> JvmResult<LeakReport> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> JvmResult<LeakReport> {
        if self.shut_down {
            return Ok(LeakReport::default());
        }
        self.shut_down = true;

        self.factory.lock().take();
        let report = self.tracker.teardown();

        let mut result = Ok(());
        if self.library.take().is_some() {
            let status = unsafe { destroy_vm(self.runtime.vm()) };
            if status != JNI_OK {
                result = Err(JvmError::DestroyFailed(status));
            }
            tracing::debug!("destroyed JVM");
        }
        self.runtime.invalidate();
        ACTIVE.store(false, Ordering::Release);
        result.map(|()| report)
    }
}

impl Drop for Jvm {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            tracing::error!(error = %e, "JVM shutdown failed");
        }
    }
}

fn claim() -> JvmResult<()> {
    ACTIVE
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .map(|_| ())
        .map_err(|_| JvmError::AlreadyActive)
}

unsafe fn jvmti_env(vm: *mut JavaVM, version: jint) -> JvmResult<*mut jvmtiEnv> {
    let get_env = (**vm).GetEnv.ok_or(JvmError::EnvUnavailable {
        version,
        status: JNI_ERR,
    })?;
    let mut env: *mut c_void = ptr::null_mut();
    let status = get_env(vm, &mut env, version);
    if status != JNI_OK || env.is_null() {
        return Err(JvmError::EnvUnavailable { version, status });
    }
    Ok(env.cast())
}

unsafe fn destroy_vm(vm: *mut JavaVM) -> jint {
    match (**vm).DestroyJavaVM {
        Some(destroy) => destroy(vm),
        None => JNI_ERR,
    }
}
