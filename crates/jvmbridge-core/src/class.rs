//! Class handles

use std::fmt;
use std::sync::Arc;

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{NativeMethod, RawHandle, Scope};
use crate::reference::ManagedRef;
use crate::tracker::{Provenance, RefTracker};

/// GLOBAL reference to a guest class, with its internal name.
pub struct ClassRef {
    name: String,
    reference: ManagedRef,
    tracker: Arc<RefTracker>,
}

impl ClassRef {
    /// Look up a class by internal name (`org/example/Native`) and pin it
    /// with a GLOBAL reference.
    #[track_caller]
    pub fn find(tracker: &Arc<RefTracker>, name: &str) -> BridgeResult<Arc<ClassRef>> {
        let provenance = Provenance::with_details(format!("class: {}", name));
        let runtime = tracker.runtime();
        let handle = runtime.find_class(name)?;
        let pending = runtime.take_pending_exception()?;
        let local = ManagedRef::adopt_with(tracker, handle, Scope::Local, provenance.clone());
        if local.is_empty() || pending.is_some() {
            let reason = pending.map_or_else(|| "class not found".to_string(), |t| t.description);
            return Err(BridgeError::resolution(format!("class {}", name), reason));
        }
        let reference = local.convert_with(Scope::Global, provenance)?;
        tracing::debug!(class = %name, "resolved class");
        Ok(Arc::new(ClassRef {
            name: name.to_string(),
            reference,
            tracker: tracker.clone(),
        }))
    }

    /// Wrap a class object obtained elsewhere, promoting it to GLOBAL.
    #[track_caller]
    pub fn from_ref(
        tracker: &Arc<RefTracker>,
        name: &str,
        class: ManagedRef,
    ) -> BridgeResult<Arc<ClassRef>> {
        class.require("class reference")?;
        let reference = class.convert_with(
            Scope::Global,
            Provenance::with_details(format!("class: {}", name)),
        )?;
        Ok(Arc::new(ClassRef {
            name: name.to_string(),
            reference,
            tracker: tracker.clone(),
        }))
    }

    /// Internal name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// GLOBAL class handle
    pub fn handle(&self) -> RawHandle {
        self.reference.handle()
    }

    /// The owning reference
    pub fn reference(&self) -> &ManagedRef {
        &self.reference
    }

    /// Tracker the class reference is registered with
    pub fn tracker(&self) -> &Arc<RefTracker> {
        &self.tracker
    }

    /// Bind native implementations to this class.
    ///
    /// Entries with an empty name or descriptor are skipped. Returns the
    /// number of methods registered.
    pub fn register_natives(&self, methods: &[NativeMethod]) -> BridgeResult<usize> {
        let valid: Vec<NativeMethod> = methods
            .iter()
            .filter(|m| {
                let ok = !m.name.is_empty() && !m.descriptor.is_empty();
                if !ok {
                    tracing::warn!(
                        class = %self.name,
                        name = %m.name,
                        descriptor = %m.descriptor,
                        "skipping invalid native method entry"
                    );
                }
                ok
            })
            .cloned()
            .collect();
        if valid.is_empty() {
            tracing::warn!(class = %self.name, "no valid native methods to register");
            return Ok(0);
        }

        let runtime = self.tracker.runtime();
        let result = runtime.register_natives(self.handle(), &valid);
        if let Some(throwable) = runtime.take_pending_exception()? {
            return Err(throwable.into());
        }
        result.map_err(|e| self.name_registration_error(e))?;

        for m in &valid {
            tracing::debug!(class = %self.name, name = %m.name, descriptor = %m.descriptor, "registered native");
        }
        self.tracker.note_natives_registered(&self.name, valid.len());
        Ok(valid.len())
    }

    /// Unbind every native implementation of this class.
    pub fn unregister_natives(&self) -> BridgeResult<()> {
        let runtime = self.tracker.runtime();
        let result = runtime.unregister_natives(self.handle());
        if let Some(throwable) = runtime.take_pending_exception()? {
            return Err(throwable.into());
        }
        result.map_err(|e| self.name_registration_error(e))?;
        self.tracker.note_natives_unregistered(&self.name);
        tracing::debug!(class = %self.name, "unregistered natives");
        Ok(())
    }

    fn name_registration_error(&self, err: BridgeError) -> BridgeError {
        match err {
            BridgeError::Registration { status, .. } => BridgeError::Registration {
                class: self.name.clone(),
                status,
            },
            other => other,
        }
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRef")
            .field("name", &self.name)
            .field("handle", &self.handle())
            .finish()
    }
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeClass, FakeMethod, FakeRuntime};
    use crate::handle::NativeFn;

    extern "system" fn native_open() {}

    fn setup() -> (Arc<FakeRuntime>, Arc<RefTracker>) {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.define_class(
            FakeClass::new("org/example/Native")
                .method(FakeMethod::instance("open", &["int"], "void").native()),
        );
        let tracker = RefTracker::new(runtime.clone());
        (runtime, tracker)
    }

    #[test]
    fn test_find_pins_global() {
        let (runtime, tracker) = setup();
        let class = ClassRef::find(&tracker, "org/example/Native").unwrap();
        assert_eq!(class.name(), "org/example/Native");
        assert_eq!(class.reference().scope(), Some(Scope::Global));
        assert_eq!(tracker.count(Scope::Local), 0);
        assert_eq!(tracker.count(Scope::Global), 1);

        let entry = &tracker.dump(Scope::Global)[0];
        assert_eq!(
            entry.provenance.details.as_deref(),
            Some("class: org/example/Native")
        );
        drop(class);
        assert_eq!(runtime.live_handles(Scope::Global), 0);
    }

    #[test]
    fn test_find_missing_class() {
        let (runtime, tracker) = setup();
        let err = ClassRef::find(&tracker, "org/example/Missing").unwrap_err();
        match err {
            BridgeError::Resolution { target, reason } => {
                assert!(target.contains("org/example/Missing"));
                assert!(reason.contains("NoClassDefFoundError"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runtime.has_pending_exception());
    }

    #[test]
    fn test_register_and_unregister_natives() {
        let (runtime, tracker) = setup();
        let class = ClassRef::find(&tracker, "org/example/Native").unwrap();
        let function = NativeFn::new(native_open as *mut std::ffi::c_void).unwrap();
        let methods = vec![
            NativeMethod {
                name: "open".into(),
                descriptor: "(I)V".into(),
                function,
            },
            NativeMethod {
                name: String::new(),
                descriptor: "()V".into(),
                function,
            },
        ];

        assert_eq!(class.register_natives(&methods).unwrap(), 1);
        assert_eq!(tracker.native_count("org/example/Native"), Some(1));
        assert_eq!(
            runtime.registered_natives("org/example/Native"),
            vec![("open".to_string(), "(I)V".to_string())]
        );

        class.unregister_natives().unwrap();
        assert_eq!(tracker.native_count("org/example/Native"), None);
        assert!(runtime.registered_natives("org/example/Native").is_empty());
    }

    #[test]
    fn test_register_unknown_native_fails() {
        let (runtime, tracker) = setup();
        let class = ClassRef::find(&tracker, "org/example/Native").unwrap();
        let function = NativeFn::new(native_open as *mut std::ffi::c_void).unwrap();
        let err = class
            .register_natives(&[NativeMethod {
                name: "close".into(),
                descriptor: "()V".into(),
                function,
            }])
            .unwrap_err();
        match err {
            BridgeError::GuestException(throwable) => {
                assert_eq!(throwable.class_name, "java.lang.NoSuchMethodError");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runtime.has_pending_exception());
        assert_eq!(tracker.native_count("org/example/Native"), None);
    }

    #[test]
    fn test_registration_status_names_class() {
        let (_runtime, tracker) = setup();
        let class = ClassRef::find(&tracker, "org/example/Native").unwrap();
        let failure = BridgeError::Registration {
            class: String::new(),
            status: -1,
        };
        match class.name_registration_error(failure) {
            BridgeError::Registration { class, status } => {
                assert_eq!(class, "org/example/Native");
                assert_eq!(status, -1);
            }
            other => panic!("unexpected error: {other}"),
        }
        let other = class.name_registration_error(BridgeError::Unsupported("RegisterNatives"));
        assert!(matches!(other, BridgeError::Unsupported("RegisterNatives")));
    }
}
