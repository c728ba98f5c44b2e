//! Method signatures and typed invocation
//!
//! A [`MethodSignature`] is a call identity resolved once against its
//! declaring class. Invocation dispatches the static or instance call form for
//! the signature's [`ReturnKind`], wraps object results into LOCAL
//! [`ManagedRef`]s and turns a pending guest exception into
//! [`BridgeError::GuestException`].

use std::fmt;
use std::sync::Arc;

use crate::class::ClassRef;
use crate::descriptor::method_descriptor;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{CallTarget, JValue, MethodId, RawHandle, RawValue, ReturnKind, Scope};
use crate::reference::ManagedRef;
use crate::runtime::{check_exception, ACC_NATIVE};
use crate::tracker::Provenance;

// ============================================================================
// Method Spec
// ============================================================================

/// Name, descriptor and shape of a method, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSpec {
    /// Method name (`<init>` for constructors)
    pub name: String,
    /// Raw descriptor, e.g. `(I)V`
    pub descriptor: String,
    /// Parameter type names in declaration order
    pub parameters: Vec<String>,
    /// Return-type tag
    pub return_kind: ReturnKind,
    /// Static or instance
    pub is_static: bool,
}

impl MethodSpec {
    /// Spec from type names; the descriptor is derived.
    ///
    /// ```ignore
    /// let spec = MethodSpec::new("write", &["byte[]", "int"], "void", false);
    /// assert_eq!(spec.descriptor, "([BI)V");
    /// ```
    pub fn new<S: AsRef<str>>(name: &str, params: &[S], return_type: &str, is_static: bool) -> Self {
        Self {
            name: name.to_string(),
            descriptor: method_descriptor(params, return_type),
            parameters: params.iter().map(|p| p.as_ref().to_string()).collect(),
            return_kind: ReturnKind::from_type_name(return_type),
            is_static,
        }
    }

    /// Spec with a caller-supplied descriptor, used verbatim.
    pub fn with_descriptor(
        name: &str,
        descriptor: &str,
        return_kind: ReturnKind,
        is_static: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            parameters: Vec::new(),
            return_kind,
            is_static,
        }
    }

    /// Constructor spec
    pub fn constructor<S: AsRef<str>>(params: &[S]) -> Self {
        Self::new("<init>", params, "void", false)
    }

    /// Set the parameter type names
    pub fn parameters<S: AsRef<str>>(mut self, params: &[S]) -> Self {
        self.parameters = params.iter().map(|p| p.as_ref().to_string()).collect();
        self
    }

    fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

// ============================================================================
// Guest Values
// ============================================================================

/// Result of a guest call.
#[derive(Debug)]
pub enum GuestValue {
    /// No value
    Void,
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char`
    Char(u16),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// Object result, owned as a LOCAL reference; empty for null
    Object(ManagedRef),
}

impl GuestValue {
    /// Return kind of this value
    pub fn kind(&self) -> ReturnKind {
        match self {
            GuestValue::Void => ReturnKind::Void,
            GuestValue::Boolean(_) => ReturnKind::Boolean,
            GuestValue::Byte(_) => ReturnKind::Byte,
            GuestValue::Char(_) => ReturnKind::Char,
            GuestValue::Short(_) => ReturnKind::Short,
            GuestValue::Int(_) => ReturnKind::Int,
            GuestValue::Long(_) => ReturnKind::Long,
            GuestValue::Float(_) => ReturnKind::Float,
            GuestValue::Double(_) => ReturnKind::Double,
            GuestValue::Object(_) => ReturnKind::Object,
        }
    }

    fn mismatch<T>(self, expected: ReturnKind) -> BridgeResult<T> {
        Err(BridgeError::TypeMismatch {
            expected: expected.name().to_string(),
            got: self.kind().name().to_string(),
        })
    }
}

/// Conversion from a [`GuestValue`] to a Rust type.
pub trait FromGuestValue: Sized {
    /// Convert, failing with [`BridgeError::TypeMismatch`] on the wrong variant
    fn from_guest(value: GuestValue) -> BridgeResult<Self>;
}

impl FromGuestValue for GuestValue {
    fn from_guest(value: GuestValue) -> BridgeResult<Self> {
        Ok(value)
    }
}

impl FromGuestValue for () {
    fn from_guest(value: GuestValue) -> BridgeResult<Self> {
        match value {
            GuestValue::Void => Ok(()),
            other => other.mismatch(ReturnKind::Void),
        }
    }
}

macro_rules! from_guest_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromGuestValue for $ty {
                fn from_guest(value: GuestValue) -> BridgeResult<Self> {
                    match value {
                        GuestValue::$variant(v) => Ok(v),
                        other => other.mismatch(ReturnKind::$variant),
                    }
                }
            }
        )*
    };
}

from_guest_primitive! {
    bool => Boolean,
    i8 => Byte,
    u16 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
}

impl FromGuestValue for ManagedRef {
    fn from_guest(value: GuestValue) -> BridgeResult<Self> {
        match value {
            GuestValue::Object(r) => Ok(r),
            other => other.mismatch(ReturnKind::Object),
        }
    }
}

impl FromGuestValue for Option<ManagedRef> {
    fn from_guest(value: GuestValue) -> BridgeResult<Self> {
        let r = ManagedRef::from_guest(value)?;
        Ok((!r.is_empty()).then_some(r))
    }
}

impl FromGuestValue for String {
    fn from_guest(value: GuestValue) -> BridgeResult<Self> {
        let r = ManagedRef::from_guest(value)?;
        let handle = r.require("string result")?;
        match r.tracker() {
            Some(tracker) => tracker.runtime().read_string(handle),
            None => Err(BridgeError::InvalidHandle("string result is empty".to_string())),
        }
    }
}

// ============================================================================
// Method Signature
// ============================================================================

/// A resolved method of a guest class.
pub struct MethodSignature {
    class: Arc<ClassRef>,
    spec: MethodSpec,
    id: MethodId,
    modifiers: Option<i32>,
}

impl MethodSignature {
    /// Resolve `spec` against `class`.
    ///
    /// Fails with [`BridgeError::Resolution`] naming the method and descriptor
    /// when the runtime has no such method.
    pub fn resolve(class: &Arc<ClassRef>, spec: MethodSpec) -> BridgeResult<Self> {
        let runtime = class.tracker().runtime();
        if spec.is_constructor() && spec.is_static {
            return Err(BridgeError::resolution(
                describe(class, &spec),
                "constructors cannot be static",
            ));
        }
        let id = runtime.get_method_id(class.handle(), &spec.name, &spec.descriptor, spec.is_static)?;
        let pending = runtime.take_pending_exception()?;
        match (id, pending) {
            (Some(id), None) => Ok(Self {
                class: class.clone(),
                spec,
                id,
                modifiers: None,
            }),
            (Some(_), Some(throwable)) => Err(throwable.into()),
            (None, pending) => Err(BridgeError::resolution(
                describe(class, &spec),
                pending.map_or_else(|| "method not found".to_string(), |t| t.description),
            )),
        }
    }

    /// Declaring class
    pub fn class(&self) -> &Arc<ClassRef> {
        &self.class
    }

    /// Method name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Raw descriptor
    pub fn descriptor(&self) -> &str {
        &self.spec.descriptor
    }

    /// Parameter type names
    pub fn parameters(&self) -> &[String] {
        &self.spec.parameters
    }

    /// Return-type tag
    pub fn return_kind(&self) -> ReturnKind {
        self.spec.return_kind
    }

    /// Static or instance
    pub fn is_static(&self) -> bool {
        self.spec.is_static
    }

    /// Resolved call identity
    pub fn method_id(&self) -> MethodId {
        self.id
    }

    /// The spec this signature was resolved from
    pub fn spec(&self) -> &MethodSpec {
        &self.spec
    }

    /// Attach the access flags reported for the method.
    pub fn with_modifiers(mut self, modifiers: i32) -> Self {
        self.modifiers = Some(modifiers);
        self
    }

    /// Access flags, when discovery reported them
    pub fn modifiers(&self) -> Option<i32> {
        self.modifiers
    }

    /// Declared `native`. Signatures without reported modifiers count as native.
    pub fn is_native(&self) -> bool {
        self.modifiers.map_or(true, |m| m & ACC_NATIVE != 0)
    }

    /// Call the method.
    ///
    /// Static methods are called on the declaring class and ignore
    /// `instance`. Instance methods require a non-empty `instance`.
    #[track_caller]
    pub fn invoke(&self, instance: Option<&ManagedRef>, args: &[JValue]) -> BridgeResult<GuestValue> {
        if self.spec.is_constructor() {
            return Err(BridgeError::resolution(
                self.to_string(),
                "constructors are called through construct",
            ));
        }
        let target = if self.spec.is_static {
            CallTarget::Static(self.class.handle())
        } else {
            let receiver = instance.map_or(RawHandle::NULL, ManagedRef::handle);
            if receiver.is_null() {
                return Err(BridgeError::InvalidHandle(format!(
                    "instance method {} called without a receiver",
                    self
                )));
            }
            CallTarget::Instance(receiver)
        };

        let tracker = self.class.tracker();
        let runtime = tracker.runtime();
        let raw = runtime.call_method(target, self.id, self.spec.return_kind, args)?;
        // Wrap before checking so a result left behind by a throwing call is released.
        let value = match raw {
            RawValue::Void => GuestValue::Void,
            RawValue::Boolean(v) => GuestValue::Boolean(v),
            RawValue::Byte(v) => GuestValue::Byte(v),
            RawValue::Char(v) => GuestValue::Char(v),
            RawValue::Short(v) => GuestValue::Short(v),
            RawValue::Int(v) => GuestValue::Int(v),
            RawValue::Long(v) => GuestValue::Long(v),
            RawValue::Float(v) => GuestValue::Float(v),
            RawValue::Double(v) => GuestValue::Double(v),
            RawValue::Object(h) => {
                let provenance = Provenance::with_details(format!("result of {}", self));
                GuestValue::Object(ManagedRef::adopt_with(tracker, h, Scope::Local, provenance))
            }
        };
        check_exception(runtime.as_ref())?;
        Ok(value)
    }

    /// Call the method and convert the result.
    #[track_caller]
    pub fn invoke_as<R: FromGuestValue>(
        &self,
        instance: Option<&ManagedRef>,
        args: &[JValue],
    ) -> BridgeResult<R> {
        R::from_guest(self.invoke(instance, args)?)
    }

    /// Construct a new object with this constructor, owned as LOCAL.
    #[track_caller]
    pub fn construct(&self, args: &[JValue]) -> BridgeResult<ManagedRef> {
        let provenance = Provenance::with_details(format!("new {}", self.class.name()));
        if !self.spec.is_constructor() {
            return Err(BridgeError::resolution(self.to_string(), "not a constructor"));
        }
        let tracker = self.class.tracker();
        let runtime = tracker.runtime();
        let handle = runtime.new_object(self.class.handle(), self.id, args)?;
        let object = ManagedRef::adopt_with(tracker, handle, Scope::Local, provenance);
        check_exception(runtime.as_ref())?;
        if object.is_empty() {
            return Err(BridgeError::InvalidHandle(format!(
                "construction of {} returned null",
                self.class.name()
            )));
        }
        Ok(object)
    }
}

fn describe(class: &ClassRef, spec: &MethodSpec) -> String {
    format!(
        "method {} with descriptor {} (static: {}) in {}",
        spec.name,
        spec.descriptor,
        spec.is_static,
        class.name()
    )
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class.name(), self.spec.name, self.spec.descriptor)
    }
}

impl fmt::Debug for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodSignature")
            .field("class", &self.class.name())
            .field("name", &self.spec.name)
            .field("descriptor", &self.spec.descriptor)
            .field("parameters", &self.spec.parameters)
            .field("is_static", &self.spec.is_static)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBody, FakeClass, FakeMethod, FakeReturn, FakeRuntime};
    use crate::tracker::RefTracker;
    use crate::GuestThrowable;

    fn setup() -> (Arc<FakeRuntime>, Arc<RefTracker>, Arc<ClassRef>) {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.define_class(
            FakeClass::new("org/example/Counter")
                .method(FakeMethod::constructor(&[] as &[&str]))
                .method(
                    FakeMethod::instance("add", &["int", "int"], "int").body(FakeBody::Sum),
                )
                .method(
                    FakeMethod::static_method("version", &[] as &[&str], "long")
                        .body(FakeBody::Returns(FakeReturn::Long(21))),
                )
                .method(
                    FakeMethod::instance("label", &[] as &[&str], "java.lang.String")
                        .body(FakeBody::Returns(FakeReturn::Str("counter".into()))),
                )
                .method(
                    FakeMethod::instance("fail", &[] as &[&str], "void").body(FakeBody::Throws(
                        GuestThrowable::new("java.lang.IllegalStateException", Some("closed")),
                    )),
                ),
        );
        let tracker = RefTracker::new(runtime.clone());
        let class = ClassRef::find(&tracker, "org/example/Counter").unwrap();
        (runtime, tracker, class)
    }

    fn new_counter(class: &Arc<ClassRef>) -> ManagedRef {
        let ctor = MethodSignature::resolve(class, MethodSpec::constructor(&[] as &[&str])).unwrap();
        ctor.construct(&[]).unwrap()
    }

    #[test]
    fn test_resolve_missing_method() {
        let (runtime, _tracker, class) = setup();
        let err = MethodSignature::resolve(&class, MethodSpec::new("add", &["long"], "int", false))
            .unwrap_err();
        match err {
            BridgeError::Resolution { target, .. } => {
                assert!(target.contains("add"));
                assert!(target.contains("(J)I"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runtime.has_pending_exception());
    }

    #[test]
    fn test_resolve_checks_static_flag() {
        let (_runtime, _tracker, class) = setup();
        assert!(
            MethodSignature::resolve(&class, MethodSpec::new("version", &[] as &[&str], "long", false))
                .is_err()
        );
        assert!(
            MethodSignature::resolve(&class, MethodSpec::new("version", &[] as &[&str], "long", true))
                .is_ok()
        );
    }

    #[test]
    fn test_invoke_instance() {
        let (_runtime, _tracker, class) = setup();
        let add = MethodSignature::resolve(&class, MethodSpec::new("add", &["int", "int"], "int", false))
            .unwrap();
        let counter = new_counter(&class);
        let sum: i32 = add
            .invoke_as(Some(&counter), &[JValue::Int(2), JValue::Int(40)])
            .unwrap();
        assert_eq!(sum, 42);
    }

    #[test]
    fn test_invoke_instance_requires_receiver() {
        let (_runtime, _tracker, class) = setup();
        let add = MethodSignature::resolve(&class, MethodSpec::new("add", &["int", "int"], "int", false))
            .unwrap();
        let err = add.invoke(None, &[JValue::Int(1), JValue::Int(1)]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle(_)));
        let empty = ManagedRef::empty();
        let err = add.invoke(Some(&empty), &[JValue::Int(1), JValue::Int(1)]).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidHandle(_)));
    }

    #[test]
    fn test_invoke_static_ignores_instance() {
        let (_runtime, _tracker, class) = setup();
        let version = MethodSignature::resolve(&class, MethodSpec::new("version", &[] as &[&str], "long", true))
            .unwrap();
        assert_eq!(version.invoke_as::<i64>(None, &[]).unwrap(), 21);
        let counter = new_counter(&class);
        assert_eq!(version.invoke_as::<i64>(Some(&counter), &[]).unwrap(), 21);
    }

    #[test]
    fn test_object_result_is_local_managed() {
        let (_runtime, tracker, class) = setup();
        let label = MethodSignature::resolve(&class, MethodSpec::new("label", &[] as &[&str], "java.lang.String", false))
            .unwrap();
        let counter = new_counter(&class);
        let before = tracker.count(Scope::Local);

        let value = label.invoke(Some(&counter), &[]).unwrap();
        assert_eq!(value.kind(), ReturnKind::Object);
        assert_eq!(tracker.count(Scope::Local), before + 1);

        let text = String::from_guest(value).unwrap();
        assert_eq!(text, "counter");
        assert_eq!(tracker.count(Scope::Local), before);
    }

    #[test]
    fn test_object_result_provenance_points_at_caller() {
        let (_runtime, tracker, class) = setup();
        let label = MethodSignature::resolve(&class, MethodSpec::new("label", &[] as &[&str], "java.lang.String", false))
            .unwrap();
        let add = MethodSignature::resolve(&class, MethodSpec::new("add", &["int", "int"], "int", false))
            .unwrap();
        let counter = new_counter(&class);
        let before = tracker.count(Scope::Local);

        let sum = add.invoke(Some(&counter), &[JValue::Int(1), JValue::Int(1)]).unwrap();
        assert_eq!(sum.kind(), ReturnKind::Int);
        assert_eq!(tracker.count(Scope::Local), before);

        let line = line!() + 1;
        let value = label.invoke(Some(&counter), &[]).unwrap();
        let entry = tracker
            .dump(Scope::Local)
            .into_iter()
            .find(|e| e.provenance.details.as_deref().is_some_and(|d| d.starts_with("result of")))
            .unwrap();
        assert_eq!(entry.provenance.line, line);
        assert!(entry.provenance.file.ends_with("signature.rs"));
        assert_eq!(
            entry.provenance.details.as_deref(),
            Some("result of org/example/Counter.label()Ljava/lang/String;")
        );
        drop(value);
    }

    #[test]
    fn test_type_mismatch() {
        let (_runtime, _tracker, class) = setup();
        let version = MethodSignature::resolve(&class, MethodSpec::new("version", &[] as &[&str], "long", true))
            .unwrap();
        let err = version.invoke_as::<i32>(None, &[]).unwrap_err();
        assert!(matches!(err, BridgeError::TypeMismatch { .. }));
    }

    #[test]
    fn test_guest_exception_is_surfaced_and_cleared() {
        let (runtime, _tracker, class) = setup();
        let fail = MethodSignature::resolve(&class, MethodSpec::new("fail", &[] as &[&str], "void", false))
            .unwrap();
        let counter = new_counter(&class);
        let err = fail.invoke(Some(&counter), &[]).unwrap_err();
        match err {
            BridgeError::GuestException(t) => {
                assert_eq!(t.class_name, "java.lang.IllegalStateException");
                assert_eq!(t.message.as_deref(), Some("closed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!runtime.has_pending_exception());
    }

    #[test]
    fn test_construct_requires_constructor() {
        let (_runtime, _tracker, class) = setup();
        let add = MethodSignature::resolve(&class, MethodSpec::new("add", &["int", "int"], "int", false))
            .unwrap();
        assert!(add.construct(&[]).is_err());
    }
}
