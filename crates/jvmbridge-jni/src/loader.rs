//! Dynamic loading of the JVM library
//!
//! Opens `libjvm` (.so, .dylib, .dll) and resolves the two JNI invocation
//! entry points. The library is never unloaded: a destroyed VM cannot be
//! recreated in the same process, so there is nothing to reclaim.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use jni_sys::{jint, JavaVM, JavaVMInitArgs};
use thiserror::Error;

/// Errors that can occur while loading the JVM library
#[derive(Debug, Error)]
pub enum LoadError {
    /// Library file could not be loaded
    #[error("Failed to load {}: {reason}", .path.display())]
    NotFound {
        /// Path that was attempted
        path: PathBuf,
        /// Loader message
        reason: String,
    },

    /// Entry point missing from the library
    #[error("Symbol {symbol} not found in {}", .path.display())]
    SymbolNotFound {
        /// Symbol name
        symbol: &'static str,
        /// Library path
        path: PathBuf,
    },

    /// No candidate location holds a JVM library
    #[error("No JVM library found; searched: {0}")]
    NoCandidate(String),
}

/// `JNI_CreateJavaVM`
pub type CreateJavaVmFn =
    unsafe extern "system" fn(pvm: *mut *mut JavaVM, penv: *mut *mut c_void, args: *mut c_void) -> jint;

/// `JNI_GetCreatedJavaVMs`
pub type GetCreatedJavaVmsFn =
    unsafe extern "system" fn(vm_buf: *mut *mut JavaVM, buf_len: jint, n_vms: *mut jint) -> jint;

/// An opened JVM library with its invocation entry points.
pub struct JvmLibrary {
    path: PathBuf,
    create_java_vm: CreateJavaVmFn,
    get_created_java_vms: GetCreatedJavaVmsFn,
}

impl JvmLibrary {
    /// Open `path` and resolve the invocation entry points.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();
        let handle = sys::open(&path)?;
        let create = sys::symbol(handle, c"JNI_CreateJavaVM");
        let created = sys::symbol(handle, c"JNI_GetCreatedJavaVMs");
        let missing = |symbol| LoadError::SymbolNotFound {
            symbol,
            path: path.clone(),
        };
        if create.is_null() {
            return Err(missing("JNI_CreateJavaVM"));
        }
        if created.is_null() {
            return Err(missing("JNI_GetCreatedJavaVMs"));
        }
        tracing::debug!(path = %path.display(), "loaded JVM library");
        // SAFETY: both symbols are non-null and have the invocation API signatures.
        Ok(unsafe {
            Self {
                path,
                create_java_vm: std::mem::transmute::<*mut c_void, CreateJavaVmFn>(create),
                get_created_java_vms: std::mem::transmute::<*mut c_void, GetCreatedJavaVmsFn>(created),
            }
        })
    }

    /// Open the first existing candidate.
    pub fn open_first(candidates: &[PathBuf]) -> Result<Self, LoadError> {
        match candidates.iter().find(|p| p.is_file()) {
            Some(path) => Self::open(path),
            None => Err(LoadError::NoCandidate(
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Path the library was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call `JNI_CreateJavaVM`.
    ///
    /// # Safety
    ///
    /// `args` must point to valid init args whose strings outlive the call.
    pub unsafe fn create_java_vm(
        &self,
        vm: *mut *mut JavaVM,
        env: *mut *mut c_void,
        args: *mut JavaVMInitArgs,
    ) -> jint {
        (self.create_java_vm)(vm, env, args.cast())
    }

    /// Number of VMs already created in this process.
    pub fn created_vm_count(&self) -> jint {
        let mut vm: *mut JavaVM = std::ptr::null_mut();
        let mut count: jint = 0;
        // SAFETY: a one-element buffer and a valid count out-pointer.
        let status = unsafe { (self.get_created_java_vms)(&mut vm, 1, &mut count) };
        if status != jni_sys::JNI_OK {
            return 0;
        }
        count
    }
}

/// Locations probed for the JVM library under a Java home.
pub fn libjvm_candidates(java_home: &Path) -> Vec<PathBuf> {
    let names: &[&str] = if cfg!(windows) {
        &["bin/server/jvm.dll", "jre/bin/server/jvm.dll", "bin/client/jvm.dll"]
    } else if cfg!(target_os = "macos") {
        &["lib/server/libjvm.dylib", "jre/lib/server/libjvm.dylib"]
    } else {
        &[
            "lib/server/libjvm.so",
            "jre/lib/server/libjvm.so",
            "lib/amd64/server/libjvm.so",
            "jre/lib/amd64/server/libjvm.so",
        ]
    };
    names.iter().map(|n| java_home.join(n)).collect()
}

#[cfg(unix)]
mod sys {
    use std::ffi::{c_void, CStr, CString};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use super::LoadError;

    pub(super) fn open(path: &Path) -> Result<*mut c_void, LoadError> {
        let not_found = |reason: String| LoadError::NotFound {
            path: path.to_path_buf(),
            reason,
        };
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| not_found("path contains a NUL byte".to_string()))?;

        // RTLD_LOCAL keeps libjvm's symbols out of later loads.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(not_found(last_error()));
        }
        Ok(handle)
    }

    pub(super) fn symbol(handle: *mut c_void, name: &CStr) -> *mut c_void {
        unsafe { libc::dlsym(handle, name.as_ptr()) }
    }

    fn last_error() -> String {
        let err = unsafe { libc::dlerror() };
        if err.is_null() {
            return "unknown error".to_string();
        }
        unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
    }
}

#[cfg(windows)]
mod sys {
    use std::ffi::{c_char, c_void, CStr};
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use super::LoadError;

    extern "system" {
        fn LoadLibraryW(filename: *const u16) -> *mut c_void;
        fn GetProcAddress(module: *mut c_void, procname: *const c_char) -> *mut c_void;
        fn GetLastError() -> u32;
    }

    pub(super) fn open(path: &Path) -> Result<*mut c_void, LoadError> {
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle.is_null() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
                reason: format!("error code {}", unsafe { GetLastError() }),
            });
        }
        Ok(handle)
    }

    pub(super) fn symbol(handle: *mut c_void, name: &CStr) -> *mut c_void {
        unsafe { GetProcAddress(handle, name.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_not_found() {
        match JvmLibrary::open("/nonexistent/libjvm.so") {
            Err(LoadError::NotFound { path, .. }) => {
                assert_eq!(path, Path::new("/nonexistent/libjvm.so"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected NotFound error"),
        }
    }

    #[test]
    fn test_open_first_without_candidates() {
        let candidates = libjvm_candidates(Path::new("/nonexistent/jdk"));
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|p| p.starts_with("/nonexistent/jdk")));
        match JvmLibrary::open_first(&candidates) {
            Err(LoadError::NoCandidate(searched)) => assert!(searched.contains("/nonexistent/jdk")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected NoCandidate error"),
        }
    }
}
