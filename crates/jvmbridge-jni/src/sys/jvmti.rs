//! Minimal JVMTI function table
//!
//! Only the entries the bridge calls are named; every other slot is padding.
//! Slot numbers are 1-based as in `jvmti.h`.

#![allow(non_snake_case, non_upper_case_globals)]

use std::os::raw::{c_char, c_uchar, c_void};

use jni_sys::{jint, jmethodID};

pub const JVMTI_VERSION_1_2: jint = 0x3001_0200;
pub const JVMTI_VERSION_9: jint = 0x3009_0000;
pub const JVMTI_VERSION_11: jint = 0x300B_0000;
pub const JVMTI_VERSION_21: jint = 0x3015_0000;

pub type jvmtiError = u32;
pub const JVMTI_ERROR_NONE: jvmtiError = 0;

/// Capability bit offsets within [`jvmtiCapabilities`]
pub const CAN_GET_BYTECODES: usize = 3;
pub const CAN_MAINTAIN_ORIGINAL_METHOD_ORDER: usize = 15;
pub const CAN_GENERATE_ALL_CLASS_HOOK_EVENTS: usize = 26;

/// The capabilities bitfield, 128 bits wide.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct jvmtiCapabilities {
    bits: [u32; 4],
}

impl jvmtiCapabilities {
    pub fn set_bit(&mut self, offset: usize) {
        self.bits[offset / 32] |= 1 << (offset % 32);
    }

    pub fn has_bit(&self, offset: usize) -> bool {
        self.bits[offset / 32] & (1 << (offset % 32)) != 0
    }
}

pub type jvmtiEnv = *const jvmtiInterface;

pub type DeallocateFn = unsafe extern "system" fn(env: *mut jvmtiEnv, mem: *mut c_uchar) -> jvmtiError;
pub type GetMethodNameFn = unsafe extern "system" fn(
    env: *mut jvmtiEnv,
    method: jmethodID,
    name_ptr: *mut *mut c_char,
    signature_ptr: *mut *mut c_char,
    generic_ptr: *mut *mut c_char,
) -> jvmtiError;
pub type GetMethodModifiersFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, method: jmethodID, modifiers_ptr: *mut jint) -> jvmtiError;
pub type GetErrorNameFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, error: jvmtiError, name_ptr: *mut *mut c_char) -> jvmtiError;
pub type AddCapabilitiesFn =
    unsafe extern "system" fn(env: *mut jvmtiEnv, capabilities_ptr: *const jvmtiCapabilities) -> jvmtiError;

#[repr(C)]
pub struct jvmtiInterface {
    _slots_1_46: [*mut c_void; 46],
    /*  47 */ pub Deallocate: Option<DeallocateFn>,
    _slots_48_63: [*mut c_void; 16],
    /*  64 */ pub GetMethodName: Option<GetMethodNameFn>,
    _slot_65: *mut c_void,
    /*  66 */ pub GetMethodModifiers: Option<GetMethodModifiersFn>,
    _slots_67_127: [*mut c_void; 61],
    /* 128 */ pub GetErrorName: Option<GetErrorNameFn>,
    _slots_129_141: [*mut c_void; 13],
    /* 142 */ pub AddCapabilities: Option<AddCapabilitiesFn>,
}
