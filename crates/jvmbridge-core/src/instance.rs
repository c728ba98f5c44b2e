//! Guest object instances

use std::sync::Arc;

use crate::class::ClassRef;
use crate::error::BridgeResult;
use crate::handle::{JValue, Scope};
use crate::reference::ManagedRef;
use crate::signature::{FromGuestValue, GuestValue, MethodSignature};

/// A constructed guest object, pinned with a GLOBAL reference.
#[derive(Debug)]
pub struct Instance {
    class: Arc<ClassRef>,
    object: ManagedRef,
}

impl Instance {
    /// Construct an object with `constructor` and promote it to GLOBAL.
    #[track_caller]
    pub fn new(constructor: &MethodSignature, args: &[JValue]) -> BridgeResult<Self> {
        let object = constructor.construct(args)?.convert(Scope::Global)?;
        Ok(Self {
            class: constructor.class().clone(),
            object,
        })
    }

    /// Adopt an existing object of `class`, promoting it to GLOBAL.
    #[track_caller]
    pub fn from_ref(class: &Arc<ClassRef>, object: ManagedRef) -> BridgeResult<Self> {
        object.require("instance")?;
        Ok(Self {
            class: class.clone(),
            object: object.convert(Scope::Global)?,
        })
    }

    /// Declaring class
    pub fn class(&self) -> &Arc<ClassRef> {
        &self.class
    }

    /// The owning GLOBAL reference
    pub fn object(&self) -> &ManagedRef {
        &self.object
    }

    /// Give up the wrapper, keeping the reference
    pub fn into_ref(self) -> ManagedRef {
        self.object
    }

    /// Call `method` on this object
    #[track_caller]
    pub fn invoke(&self, method: &MethodSignature, args: &[JValue]) -> BridgeResult<GuestValue> {
        method.invoke(Some(&self.object), args)
    }

    /// Call `method` on this object and convert the result
    #[track_caller]
    pub fn invoke_as<R: FromGuestValue>(
        &self,
        method: &MethodSignature,
        args: &[JValue],
    ) -> BridgeResult<R> {
        method.invoke_as(Some(&self.object), args)
    }
}
