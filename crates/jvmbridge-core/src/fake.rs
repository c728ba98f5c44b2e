//! In-memory guest runtime
//!
//! [`FakeRuntime`] implements [`GuestRuntime`] over a small object heap so the
//! bridge can be exercised without a JVM. It models handle scopes, identity,
//! pending exceptions, the reflective methods signature discovery calls, the
//! introspection interface and native registration.
//!
//! Deleting a handle that is not live in the given scope is counted rather
//! than treated as an error; see [`FakeRuntime::invalid_deletes`].

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::descriptor::{binary_name, internal_name, method_descriptor};
use crate::error::{BridgeError, BridgeResult, GuestThrowable};
use crate::handle::{
    CallTarget, JValue, MethodId, NativeMethod, RawHandle, RawValue, ReturnKind, Scope,
};
use crate::runtime::{GuestRuntime, ACC_NATIVE, ACC_STATIC};

const ACC_PUBLIC: i32 = 0x0001;

// ============================================================================
// Class Definitions
// ============================================================================

/// Canned result of a fake method.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeReturn {
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
    /// Null object
    Null,
    /// A new string
    Str(String),
}

/// Behavior of a fake method.
#[derive(Debug, Clone, PartialEq)]
pub enum FakeBody {
    /// Zero value of the return kind
    Default,
    /// Fixed result
    Returns(FakeReturn),
    /// Leave an exception pending and return the zero value
    Throws(GuestThrowable),
    /// Sum of the `int`/`long` arguments
    Sum,
    /// The argument at this index
    Echo(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    GetDeclaredMethods,
    GetTypeName,
    GetParameterTypes,
    GetReturnType,
    GetName,
    GetModifiers,
}

#[derive(Debug, Clone, PartialEq)]
enum Body {
    User(FakeBody),
    Builtin(Builtin),
}

/// A method declared by a [`FakeClass`].
#[derive(Debug, Clone, PartialEq)]
pub struct FakeMethod {
    name: String,
    parameters: Vec<String>,
    return_type: String,
    is_static: bool,
    is_native: bool,
    body: Body,
}

impl FakeMethod {
    fn build<S: AsRef<str>>(name: &str, params: &[S], return_type: &str, is_static: bool) -> Self {
        Self {
            name: name.to_string(),
            parameters: params.iter().map(|p| p.as_ref().to_string()).collect(),
            return_type: return_type.to_string(),
            is_static,
            is_native: false,
            body: Body::User(FakeBody::Default),
        }
    }

    /// Instance method
    pub fn instance<S: AsRef<str>>(name: &str, params: &[S], return_type: &str) -> Self {
        Self::build(name, params, return_type, false)
    }

    /// Static method
    pub fn static_method<S: AsRef<str>>(name: &str, params: &[S], return_type: &str) -> Self {
        Self::build(name, params, return_type, true)
    }

    /// Constructor
    pub fn constructor<S: AsRef<str>>(params: &[S]) -> Self {
        Self::build("<init>", params, "void", false)
    }

    fn builtin(name: &str, return_type: &str, builtin: Builtin) -> Self {
        Self {
            body: Body::Builtin(builtin),
            ..Self::build::<&str>(name, &[], return_type, false)
        }
    }

    /// Mark the method `native`
    pub fn native(mut self) -> Self {
        self.is_native = true;
        self
    }

    /// Set the method body
    pub fn body(mut self, body: FakeBody) -> Self {
        self.body = Body::User(body);
        self
    }

    fn descriptor(&self) -> String {
        method_descriptor(&self.parameters, &self.return_type)
    }

    fn modifiers(&self) -> i32 {
        let mut bits = ACC_PUBLIC;
        if self.is_static {
            bits |= ACC_STATIC;
        }
        if self.is_native {
            bits |= ACC_NATIVE;
        }
        bits
    }
}

/// A class definition for [`FakeRuntime::define_class`].
#[derive(Debug, Clone, PartialEq)]
pub struct FakeClass {
    name: String,
    methods: Vec<FakeMethod>,
}

impl FakeClass {
    /// Class with an internal name (`org/example/Native`)
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: Vec::new(),
        }
    }

    /// Declare a method
    pub fn method(mut self, method: FakeMethod) -> Self {
        self.methods.push(method);
        self
    }
}

// ============================================================================
// Heap
// ============================================================================

type ObjId = usize;

#[derive(Debug)]
enum Object {
    Plain,
    Class { type_name: String, def: Option<usize> },
    Instance { class: usize },
    Str(String),
    Array(Vec<ObjId>),
    Method { class: usize, index: usize },
}

struct ClassDef {
    name: String,
    methods: Vec<FakeMethod>,
    object: ObjId,
}

#[derive(Default)]
struct State {
    objects: Vec<Object>,
    handles: FxHashMap<RawHandle, (ObjId, Scope)>,
    next_handle: usize,
    classes: Vec<ClassDef>,
    class_by_name: FxHashMap<String, usize>,
    type_classes: FxHashMap<String, ObjId>,
    pending: Option<GuestThrowable>,
    natives: FxHashMap<String, Vec<(String, String)>>,
    invalid_deletes: usize,
    no_introspection: bool,
    failing_introspection: FxHashSet<String>,
}

impl State {
    fn alloc(&mut self, object: Object) -> ObjId {
        self.objects.push(object);
        self.objects.len() - 1
    }

    fn new_handle(&mut self, obj: ObjId, scope: Scope) -> RawHandle {
        self.next_handle += 8;
        let handle = RawHandle::from_raw(0x1000 + self.next_handle);
        self.handles.insert(handle, (obj, scope));
        handle
    }

    fn local(&mut self, obj: ObjId) -> RawHandle {
        self.new_handle(obj, Scope::Local)
    }

    fn deref(&self, handle: RawHandle) -> BridgeResult<ObjId> {
        self.handles
            .get(&handle)
            .map(|(obj, _)| *obj)
            .ok_or_else(|| BridgeError::InvalidHandle(format!("stale or unknown handle {:?}", handle)))
    }

    fn delete(&mut self, handle: RawHandle, scope: Scope) {
        if handle.is_null() {
            return;
        }
        match self.handles.get(&handle) {
            Some((_, s)) if *s == scope => {
                self.handles.remove(&handle);
            }
            _ => self.invalid_deletes += 1,
        }
    }

    fn throw(&mut self, class_name: &str, message: &str) {
        self.pending = Some(GuestThrowable::new(class_name, Some(message)));
    }

    fn define(&mut self, class: FakeClass) -> usize {
        let index = self.classes.len();
        let object = self.alloc(Object::Class {
            type_name: binary_name(&class.name),
            def: Some(index),
        });
        self.class_by_name.insert(class.name.clone(), index);
        self.classes.push(ClassDef {
            name: class.name,
            methods: class.methods,
            object,
        });
        index
    }

    fn class_object_for_type(&mut self, type_name: &str) -> ObjId {
        if let Some(&index) = self.class_by_name.get(&internal_name(type_name)) {
            return self.classes[index].object;
        }
        if let Some(&obj) = self.type_classes.get(type_name) {
            return obj;
        }
        let obj = self.alloc(Object::Class {
            type_name: type_name.to_string(),
            def: None,
        });
        self.type_classes.insert(type_name.to_string(), obj);
        obj
    }

    fn encode(class: usize, index: usize) -> MethodId {
        MethodId::from_raw(((class + 1) << 16) | index)
    }

    fn decode(&self, id: MethodId) -> BridgeResult<(usize, usize)> {
        let raw = id.as_raw();
        let class = (raw >> 16).wrapping_sub(1);
        let index = raw & 0xffff;
        match self.classes.get(class) {
            Some(def) if index < def.methods.len() => Ok((class, index)),
            _ => Err(BridgeError::InvalidHandle(format!("unknown {:?}", id))),
        }
    }

    fn method(&self, id: MethodId) -> BridgeResult<&FakeMethod> {
        let (class, index) = self.decode(id)?;
        Ok(&self.classes[class].methods[index])
    }

    fn class_of_handle(&self, handle: RawHandle) -> BridgeResult<usize> {
        match self.objects.get(self.deref(handle)?) {
            Some(Object::Class { def: Some(index), .. }) => Ok(*index),
            _ => Err(BridgeError::InvalidHandle(format!("{:?} is not a defined class", handle))),
        }
    }

    fn is_bound(&self, class: usize, method: &FakeMethod) -> bool {
        let descriptor = method.descriptor();
        self.natives
            .get(&self.classes[class].name)
            .is_some_and(|bound| bound.iter().any(|(n, d)| *n == method.name && *d == descriptor))
    }

    fn string(&mut self, value: String) -> RawValue {
        let obj = self.alloc(Object::Str(value));
        RawValue::Object(self.local(obj))
    }

    fn class_array(&mut self, type_names: &[String]) -> RawValue {
        let elements = type_names
            .iter()
            .map(|t| self.class_object_for_type(t))
            .collect();
        let array = self.alloc(Object::Array(elements));
        RawValue::Object(self.local(array))
    }

    fn run_builtin(&mut self, builtin: Builtin, receiver: ObjId) -> BridgeResult<RawValue> {
        let wrong_receiver = || BridgeError::InvalidHandle(format!("bad receiver for {:?}", builtin));
        match (builtin, self.objects.get(receiver)) {
            (Builtin::GetDeclaredMethods, Some(Object::Class { def, .. })) => {
                let declared: Vec<(usize, usize)> = match def {
                    Some(class) => self.classes[*class]
                        .methods
                        .iter()
                        .enumerate()
                        .filter(|(_, m)| m.name != "<init>")
                        .map(|(index, _)| (*class, index))
                        .collect(),
                    None => Vec::new(),
                };
                let elements = declared
                    .into_iter()
                    .map(|(class, index)| self.alloc(Object::Method { class, index }))
                    .collect();
                let array = self.alloc(Object::Array(elements));
                Ok(RawValue::Object(self.local(array)))
            }
            (Builtin::GetTypeName, Some(Object::Class { type_name, .. })) => {
                let name = type_name.clone();
                Ok(self.string(name))
            }
            (Builtin::GetParameterTypes, Some(Object::Method { class, index })) => {
                let params = self.classes[*class].methods[*index].parameters.clone();
                Ok(self.class_array(&params))
            }
            (Builtin::GetReturnType, Some(Object::Method { class, index })) => {
                let return_type = self.classes[*class].methods[*index].return_type.clone();
                let obj = self.class_object_for_type(&return_type);
                Ok(RawValue::Object(self.local(obj)))
            }
            (Builtin::GetName, Some(Object::Method { class, index })) => {
                let name = self.classes[*class].methods[*index].name.clone();
                Ok(self.string(name))
            }
            (Builtin::GetModifiers, Some(Object::Method { class, index })) => {
                Ok(RawValue::Int(self.classes[*class].methods[*index].modifiers()))
            }
            _ => Err(wrong_receiver()),
        }
    }

    fn run_body(&mut self, body: &FakeBody, kind: ReturnKind, args: &[JValue]) -> BridgeResult<RawValue> {
        Ok(match body {
            FakeBody::Default => RawValue::default_for(kind),
            FakeBody::Throws(throwable) => {
                self.pending = Some(throwable.clone());
                RawValue::default_for(kind)
            }
            FakeBody::Returns(value) => match value.clone() {
                FakeReturn::Void => RawValue::Void,
                FakeReturn::Boolean(v) => RawValue::Boolean(v),
                FakeReturn::Byte(v) => RawValue::Byte(v),
                FakeReturn::Char(v) => RawValue::Char(v),
                FakeReturn::Short(v) => RawValue::Short(v),
                FakeReturn::Int(v) => RawValue::Int(v),
                FakeReturn::Long(v) => RawValue::Long(v),
                FakeReturn::Float(v) => RawValue::Float(v),
                FakeReturn::Double(v) => RawValue::Double(v),
                FakeReturn::Null => RawValue::Object(RawHandle::NULL),
                FakeReturn::Str(s) => self.string(s),
            },
            FakeBody::Sum => {
                let total = args.iter().fold(0i64, |acc, arg| match arg {
                    JValue::Int(v) => acc.wrapping_add(i64::from(*v)),
                    JValue::Long(v) => acc.wrapping_add(*v),
                    _ => acc,
                });
                match kind {
                    ReturnKind::Int => RawValue::Int(total as i32),
                    ReturnKind::Long => RawValue::Long(total),
                    other => RawValue::default_for(other),
                }
            }
            FakeBody::Echo(index) => match args.get(*index) {
                Some(JValue::Object(h)) if h.is_null() => RawValue::Object(RawHandle::NULL),
                Some(JValue::Object(h)) => {
                    let obj = self.deref(*h)?;
                    RawValue::Object(self.local(obj))
                }
                Some(JValue::Boolean(v)) => RawValue::Boolean(*v),
                Some(JValue::Byte(v)) => RawValue::Byte(*v),
                Some(JValue::Char(v)) => RawValue::Char(*v),
                Some(JValue::Short(v)) => RawValue::Short(*v),
                Some(JValue::Int(v)) => RawValue::Int(*v),
                Some(JValue::Long(v)) => RawValue::Long(*v),
                Some(JValue::Float(v)) => RawValue::Float(*v),
                Some(JValue::Double(v)) => RawValue::Double(*v),
                None => RawValue::default_for(kind),
            },
        })
    }
}

// ============================================================================
// Fake Runtime
// ============================================================================

/// In-memory [`GuestRuntime`].
///
/// `java/lang/Object`, `java/lang/String`, `java/lang/Class` and
/// `java/lang/reflect/Method` are predefined.
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    /// Create a runtime with the predefined classes
    pub fn new() -> Self {
        let mut state = State::default();
        state.define(FakeClass::new("java/lang/Object").method(FakeMethod::constructor::<&str>(&[])));
        state.define(FakeClass::new("java/lang/String"));
        state.define(
            FakeClass::new("java/lang/Class")
                .method(FakeMethod::builtin(
                    "getDeclaredMethods",
                    "java.lang.reflect.Method[]",
                    Builtin::GetDeclaredMethods,
                ))
                .method(FakeMethod::builtin("getTypeName", "java.lang.String", Builtin::GetTypeName)),
        );
        state.define(
            FakeClass::new("java/lang/reflect/Method")
                .method(FakeMethod::builtin(
                    "getParameterTypes",
                    "java.lang.Class[]",
                    Builtin::GetParameterTypes,
                ))
                .method(FakeMethod::builtin("getReturnType", "java.lang.Class", Builtin::GetReturnType))
                .method(FakeMethod::builtin("getName", "java.lang.String", Builtin::GetName))
                .method(FakeMethod::builtin("getModifiers", "int", Builtin::GetModifiers)),
        );
        Self {
            state: Mutex::new(state),
        }
    }

    /// Report every method-name query as unsupported, as when no
    /// introspection interface was obtained.
    pub fn without_introspection(self) -> Self {
        self.state.lock().no_introspection = true;
        self
    }

    /// Fail introspection queries for methods named `name`
    pub fn fail_introspection_for(&self, name: &str) {
        self.state.lock().failing_introspection.insert(name.to_string());
    }

    /// Define a class
    pub fn define_class(&self, class: FakeClass) {
        self.state.lock().define(class);
    }

    /// Allocate a plain object and return a LOCAL handle to it
    pub fn new_plain_object(&self) -> RawHandle {
        let mut state = self.state.lock();
        let obj = state.alloc(Object::Plain);
        state.local(obj)
    }

    /// Leave an exception pending
    pub fn throw(&self, throwable: GuestThrowable) {
        self.state.lock().pending = Some(throwable);
    }

    /// Whether an exception is pending
    pub fn has_pending_exception(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Number of live handles in `scope`
    pub fn live_handles(&self, scope: Scope) -> usize {
        self.state
            .lock()
            .handles
            .values()
            .filter(|(_, s)| *s == scope)
            .count()
    }

    /// Deletes of handles that were not live in the given scope
    pub fn invalid_deletes(&self) -> usize {
        self.state.lock().invalid_deletes
    }

    /// Registered natives of `class` as (name, descriptor) pairs
    pub fn registered_natives(&self, class: &str) -> Vec<(String, String)> {
        self.state
            .lock()
            .natives
            .get(class)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl GuestRuntime for FakeRuntime {
    fn new_local_ref(&self, obj: RawHandle) -> BridgeResult<RawHandle> {
        let mut state = self.state.lock();
        let target = state.deref(obj)?;
        Ok(state.new_handle(target, Scope::Local))
    }

    fn delete_local_ref(&self, obj: RawHandle) {
        self.state.lock().delete(obj, Scope::Local);
    }

    fn new_global_ref(&self, obj: RawHandle) -> BridgeResult<RawHandle> {
        let mut state = self.state.lock();
        let target = state.deref(obj)?;
        Ok(state.new_handle(target, Scope::Global))
    }

    fn delete_global_ref(&self, obj: RawHandle) {
        self.state.lock().delete(obj, Scope::Global);
    }

    fn is_same_object(&self, a: RawHandle, b: RawHandle) -> BridgeResult<bool> {
        let state = self.state.lock();
        let resolve = |h: RawHandle| -> BridgeResult<Option<ObjId>> {
            if h.is_null() {
                Ok(None)
            } else {
                state.deref(h).map(Some)
            }
        };
        Ok(resolve(a)? == resolve(b)?)
    }

    fn find_class(&self, name: &str) -> BridgeResult<RawHandle> {
        let mut state = self.state.lock();
        match state.class_by_name.get(name).copied() {
            Some(index) => {
                let obj = state.classes[index].object;
                Ok(state.local(obj))
            }
            None => {
                state.throw("java.lang.NoClassDefFoundError", name);
                Ok(RawHandle::NULL)
            }
        }
    }

    fn get_method_id(
        &self,
        class: RawHandle,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> BridgeResult<Option<MethodId>> {
        let mut state = self.state.lock();
        let index = state.class_of_handle(class)?;
        let found = state.classes[index]
            .methods
            .iter()
            .position(|m| m.name == name && m.is_static == is_static && m.descriptor() == descriptor);
        match found {
            Some(method) => Ok(Some(State::encode(index, method))),
            None => {
                state.throw("java.lang.NoSuchMethodError", name);
                Ok(None)
            }
        }
    }

    fn call_method(
        &self,
        target: CallTarget,
        method: MethodId,
        kind: ReturnKind,
        args: &[JValue],
    ) -> BridgeResult<RawValue> {
        let mut state = self.state.lock();
        let (class, index) = state.decode(method)?;
        let m = state.classes[class].methods[index].clone();
        if m.name == "<init>" {
            return Err(BridgeError::InvalidHandle("constructor called as a method".to_string()));
        }
        let declared = ReturnKind::from_type_name(&m.return_type);
        if declared != kind {
            return Err(BridgeError::TypeMismatch {
                expected: declared.name().to_string(),
                got: kind.name().to_string(),
            });
        }

        let receiver = match (target, m.is_static) {
            (CallTarget::Static(h), true) => {
                if state.class_of_handle(h)? != class {
                    return Err(BridgeError::InvalidHandle(format!(
                        "static call to {} against another class",
                        m.name
                    )));
                }
                state.deref(h)?
            }
            (CallTarget::Instance(h), false) => {
                let obj = state.deref(h)?;
                let is_instance = matches!(state.objects.get(obj), Some(Object::Instance { class: c }) if *c == class);
                if matches!(m.body, Body::User(_)) && !is_instance {
                    return Err(BridgeError::InvalidHandle(format!(
                        "receiver of {} is not an instance of {}",
                        m.name, state.classes[class].name
                    )));
                }
                obj
            }
            _ => {
                return Err(BridgeError::InvalidHandle(format!(
                    "call form does not match {} method {}",
                    if m.is_static { "static" } else { "instance" },
                    m.name
                )))
            }
        };

        if m.is_native {
            if !state.is_bound(class, &m) {
                state.throw("java.lang.UnsatisfiedLinkError", &m.name);
            }
            return Ok(RawValue::default_for(kind));
        }
        match &m.body {
            Body::Builtin(builtin) => state.run_builtin(*builtin, receiver),
            Body::User(body) => state.run_body(body, kind, args),
        }
    }

    fn new_object(
        &self,
        class: RawHandle,
        constructor: MethodId,
        _args: &[JValue],
    ) -> BridgeResult<RawHandle> {
        let mut state = self.state.lock();
        let index = state.class_of_handle(class)?;
        let (ctor_class, ctor_index) = state.decode(constructor)?;
        let ctor = state.classes[ctor_class].methods[ctor_index].clone();
        if ctor_class != index || ctor.name != "<init>" {
            return Err(BridgeError::InvalidHandle("not a constructor of this class".to_string()));
        }
        if let Body::User(FakeBody::Throws(throwable)) = ctor.body {
            state.pending = Some(throwable);
            return Ok(RawHandle::NULL);
        }
        let obj = state.alloc(Object::Instance { class: index });
        Ok(state.local(obj))
    }

    fn take_pending_exception(&self) -> BridgeResult<Option<GuestThrowable>> {
        Ok(self.state.lock().pending.take())
    }

    fn array_length(&self, array: RawHandle) -> BridgeResult<usize> {
        let state = self.state.lock();
        match state.objects.get(state.deref(array)?) {
            Some(Object::Array(elements)) => Ok(elements.len()),
            _ => Err(BridgeError::InvalidHandle(format!("{:?} is not an array", array))),
        }
    }

    fn object_array_element(&self, array: RawHandle, index: usize) -> BridgeResult<RawHandle> {
        let mut state = self.state.lock();
        let element = match state.objects.get(state.deref(array)?) {
            Some(Object::Array(elements)) => elements.get(index).copied(),
            _ => return Err(BridgeError::InvalidHandle(format!("{:?} is not an array", array))),
        };
        match element {
            Some(obj) => Ok(state.local(obj)),
            None => {
                state.throw("java.lang.ArrayIndexOutOfBoundsException", &index.to_string());
                Ok(RawHandle::NULL)
            }
        }
    }

    fn read_string(&self, string: RawHandle) -> BridgeResult<String> {
        let state = self.state.lock();
        match state.objects.get(state.deref(string)?) {
            Some(Object::Str(s)) => Ok(s.clone()),
            _ => Err(BridgeError::InvalidHandle(format!("{:?} is not a string", string))),
        }
    }

    fn new_string(&self, value: &str) -> BridgeResult<RawHandle> {
        let mut state = self.state.lock();
        let obj = state.alloc(Object::Str(value.to_string()));
        Ok(state.local(obj))
    }

    fn from_reflected_method(&self, method: RawHandle) -> BridgeResult<Option<MethodId>> {
        let state = self.state.lock();
        match state.objects.get(state.deref(method)?) {
            Some(Object::Method { class, index }) => Ok(Some(State::encode(*class, *index))),
            _ => Ok(None),
        }
    }

    fn method_name(&self, method: MethodId) -> BridgeResult<(String, String)> {
        let state = self.state.lock();
        if state.no_introspection {
            return Err(BridgeError::Unsupported("introspection interface"));
        }
        let m = state.method(method)?;
        if state.failing_introspection.contains(&m.name) {
            return Err(BridgeError::Introspection("JVMTI_ERROR_INVALID_METHODID".to_string()));
        }
        Ok((m.name.clone(), m.descriptor()))
    }

    fn method_modifiers(&self, method: MethodId) -> BridgeResult<i32> {
        let state = self.state.lock();
        if state.no_introspection {
            return Err(BridgeError::Unsupported("introspection interface"));
        }
        Ok(state.method(method)?.modifiers())
    }

    fn register_natives(&self, class: RawHandle, methods: &[NativeMethod]) -> BridgeResult<()> {
        let mut state = self.state.lock();
        let index = state.class_of_handle(class)?;
        for native in methods {
            let declared = state.classes[index].methods.iter().any(|m| {
                m.is_native && m.name == native.name && m.descriptor() == native.descriptor
            });
            if !declared {
                state.throw("java.lang.NoSuchMethodError", &native.name);
                return Err(BridgeError::Registration {
                    class: String::new(),
                    status: -1,
                });
            }
        }
        let class_name = state.classes[index].name.clone();
        let bound = state.natives.entry(class_name).or_default();
        for native in methods {
            let key = (native.name.clone(), native.descriptor.clone());
            if !bound.contains(&key) {
                bound.push(key);
            }
        }
        Ok(())
    }

    fn unregister_natives(&self, class: RawHandle) -> BridgeResult<()> {
        let mut state = self.state.lock();
        let index = state.class_of_handle(class)?;
        let class_name = state.classes[index].name.clone();
        state.natives.remove(&class_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_per_scope() {
        let runtime = FakeRuntime::new();
        let local = runtime.new_plain_object();
        let global = runtime.new_global_ref(local).unwrap();
        assert_eq!(runtime.live_handles(Scope::Local), 1);
        assert_eq!(runtime.live_handles(Scope::Global), 1);
        assert!(runtime.is_same_object(local, global).unwrap());

        runtime.delete_local_ref(global);
        assert_eq!(runtime.invalid_deletes(), 1);
        runtime.delete_global_ref(global);
        runtime.delete_global_ref(global);
        assert_eq!(runtime.invalid_deletes(), 2);
        assert_eq!(runtime.live_handles(Scope::Global), 0);
    }

    #[test]
    fn test_find_class_missing_sets_pending() {
        let runtime = FakeRuntime::new();
        assert!(runtime.find_class("org/example/Missing").unwrap().is_null());
        let pending = runtime.take_pending_exception().unwrap().unwrap();
        assert_eq!(pending.class_name, "java.lang.NoClassDefFoundError");
        assert!(runtime.take_pending_exception().unwrap().is_none());
    }

    #[test]
    fn test_unbound_native_throws() {
        let runtime = FakeRuntime::new();
        runtime.define_class(
            FakeClass::new("org/example/Native")
                .method(FakeMethod::static_method("open", &["int"], "void").native()),
        );
        let class = runtime.find_class("org/example/Native").unwrap();
        let id = runtime
            .get_method_id(class, "open", "(I)V", true)
            .unwrap()
            .unwrap();
        runtime
            .call_method(CallTarget::Static(class), id, ReturnKind::Void, &[JValue::Int(1)])
            .unwrap();
        let pending = runtime.take_pending_exception().unwrap().unwrap();
        assert_eq!(pending.class_name, "java.lang.UnsatisfiedLinkError");
    }

    #[test]
    fn test_modifiers() {
        let m = FakeMethod::static_method("open", &["int"], "void").native();
        assert_eq!(m.modifiers() & ACC_STATIC, ACC_STATIC);
        assert_eq!(m.modifiers() & ACC_NATIVE, ACC_NATIVE);
        assert_eq!(FakeMethod::instance("close", &[] as &[&str], "void").modifiers() & ACC_STATIC, 0);
    }
}
