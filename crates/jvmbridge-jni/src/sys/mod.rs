//! Raw interface declarations
//!
//! JNI comes from `jni-sys`; the few JVMTI entries the bridge calls are
//! declared in [`jvmti`].

#![allow(non_camel_case_types)]

pub mod jvmti;

use jni_sys::jint;

/// JNI 1.8
pub const JNI_VERSION_1_8: jint = 0x0001_0008;
/// JNI 9
pub const JNI_VERSION_9: jint = 0x0009_0000;
/// JNI 10
pub const JNI_VERSION_10: jint = 0x000a_0000;
/// JNI 19
pub const JNI_VERSION_19: jint = 0x0013_0000;
/// JNI 20
pub const JNI_VERSION_20: jint = 0x0014_0000;
/// JNI 21
pub const JNI_VERSION_21: jint = 0x0015_0000;
