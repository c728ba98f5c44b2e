//! Raw guest handles and call values
//!
//! Everything in this module is plain data: handles are never dereferenced by
//! the bridge, only passed back into [`GuestRuntime`](crate::GuestRuntime) calls.

use std::ffi::c_void;
use std::fmt;

// ============================================================================
// Handles
// ============================================================================

/// Opaque identifier for an object in the guest heap.
///
/// The zero value is the null handle.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RawHandle(usize);

impl RawHandle {
    /// The null handle
    pub const NULL: RawHandle = RawHandle(0);

    /// Create a handle from its raw bits
    pub const fn from_raw(raw: usize) -> Self {
        RawHandle(raw)
    }

    /// Create a handle from a guest object pointer
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        RawHandle(ptr as usize)
    }

    /// Raw bits of the handle
    pub const fn as_raw(self) -> usize {
        self.0
    }

    /// The handle as a guest object pointer
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Check for the null handle
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawHandle({:#x})", self.0)
    }
}

/// Resolved call identity of a guest method.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(usize);

impl MethodId {
    /// Create a method id from its raw bits
    pub const fn from_raw(raw: usize) -> Self {
        MethodId(raw)
    }

    /// Create a method id from a runtime pointer
    pub fn from_ptr<T>(ptr: *mut T) -> Self {
        MethodId(ptr as usize)
    }

    /// Raw bits of the method id
    pub const fn as_raw(self) -> usize {
        self.0
    }

    /// The method id as a runtime pointer
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::Debug for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodId({:#x})", self.0)
    }
}

/// Lifetime scope of a guest handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Valid for the current native frame on the current thread
    Local,
    /// Valid on every thread until released
    Global,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Local => f.write_str("LOCAL"),
            Scope::Global => f.write_str("GLOBAL"),
        }
    }
}

// ============================================================================
// Call Values
// ============================================================================

/// Argument passed to a guest call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JValue {
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char` (UTF-16 code unit)
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
    /// Object reference, possibly null
    Object(RawHandle),
}

impl JValue {
    /// Null object argument
    pub const NULL: JValue = JValue::Object(RawHandle::NULL);
}

macro_rules! jvalue_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for JValue {
                fn from(v: $ty) -> Self {
                    JValue::$variant(v)
                }
            }
        )*
    };
}

jvalue_from! {
    bool => Boolean,
    i8 => Byte,
    u16 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    RawHandle => Object,
}

impl From<&crate::ManagedRef> for JValue {
    fn from(r: &crate::ManagedRef) -> Self {
        JValue::Object(r.handle())
    }
}

/// Return-type tag of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    /// `void`
    Void,
    /// `boolean`
    Boolean,
    /// `byte`
    Byte,
    /// `char`
    Char,
    /// `short`
    Short,
    /// `int`
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Any reference type, strings and arrays included
    Object,
}

impl ReturnKind {
    /// Map a guest type name (`"int"`, `"java.lang.String"`, `"byte[]"`) to its kind.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "void" => ReturnKind::Void,
            "boolean" => ReturnKind::Boolean,
            "byte" => ReturnKind::Byte,
            "char" => ReturnKind::Char,
            "short" => ReturnKind::Short,
            "int" => ReturnKind::Int,
            "long" => ReturnKind::Long,
            "float" => ReturnKind::Float,
            "double" => ReturnKind::Double,
            _ => ReturnKind::Object,
        }
    }

    /// Lower-case name used in diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ReturnKind::Void => "void",
            ReturnKind::Boolean => "boolean",
            ReturnKind::Byte => "byte",
            ReturnKind::Char => "char",
            ReturnKind::Short => "short",
            ReturnKind::Int => "int",
            ReturnKind::Long => "long",
            ReturnKind::Float => "float",
            ReturnKind::Double => "double",
            ReturnKind::Object => "object",
        }
    }
}

/// Unwrapped result of a guest call, as returned by the runtime.
///
/// Object results are bare LOCAL handles here; [`MethodSignature`](crate::MethodSignature)
/// wraps them before they reach callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
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
    /// Fresh LOCAL handle, or null
    Object(RawHandle),
}

impl RawValue {
    /// Zero value of a return kind
    pub fn default_for(kind: ReturnKind) -> Self {
        match kind {
            ReturnKind::Void => RawValue::Void,
            ReturnKind::Boolean => RawValue::Boolean(false),
            ReturnKind::Byte => RawValue::Byte(0),
            ReturnKind::Char => RawValue::Char(0),
            ReturnKind::Short => RawValue::Short(0),
            ReturnKind::Int => RawValue::Int(0),
            ReturnKind::Long => RawValue::Long(0),
            ReturnKind::Float => RawValue::Float(0.0),
            ReturnKind::Double => RawValue::Double(0.0),
            ReturnKind::Object => RawValue::Object(RawHandle::NULL),
        }
    }
}

/// Receiver of a guest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    /// Static call against a class handle
    Static(RawHandle),
    /// Instance call against an object handle
    Instance(RawHandle),
}

// ============================================================================
// Native Functions
// ============================================================================

/// Non-null pointer to a native function implementation.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFn(std::ptr::NonNull<c_void>);

// Function pointers are immutable code addresses.
unsafe impl Send for NativeFn {}
unsafe impl Sync for NativeFn {}

impl NativeFn {
    /// Wrap a function pointer; `None` if null.
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        std::ptr::NonNull::new(ptr).map(NativeFn)
    }

    /// The function pointer
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({:p})", self.0)
    }
}

/// Entry of a native-method registration table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMethod {
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Implementation
    pub function: NativeFn,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle() {
        assert!(RawHandle::NULL.is_null());
        assert!(RawHandle::default().is_null());
        assert!(!RawHandle::from_raw(0x10).is_null());
        assert_eq!(format!("{:?}", RawHandle::from_raw(0x10)), "RawHandle(0x10)");
    }

    #[test]
    fn test_return_kind_from_type_name() {
        assert_eq!(ReturnKind::from_type_name("void"), ReturnKind::Void);
        assert_eq!(ReturnKind::from_type_name("int"), ReturnKind::Int);
        assert_eq!(ReturnKind::from_type_name("char"), ReturnKind::Char);
        assert_eq!(ReturnKind::from_type_name("int[]"), ReturnKind::Object);
        assert_eq!(
            ReturnKind::from_type_name("java.lang.String"),
            ReturnKind::Object
        );
    }

    #[test]
    fn test_native_fn_rejects_null() {
        assert!(NativeFn::new(std::ptr::null_mut()).is_none());
        let mut slot = 0u8;
        let f = NativeFn::new(&mut slot as *mut u8 as *mut c_void);
        assert!(f.is_some());
    }

    #[test]
    fn test_jvalue_conversions() {
        assert_eq!(JValue::from(7i32), JValue::Int(7));
        assert_eq!(JValue::from(7i64), JValue::Long(7));
        assert_eq!(JValue::from(true), JValue::Boolean(true));
        assert_eq!(JValue::NULL, JValue::Object(RawHandle::NULL));
    }
}
