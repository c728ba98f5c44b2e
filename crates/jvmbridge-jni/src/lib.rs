//! jvmbridge JNI backend
//!
//! Embeds a JVM and implements [`jvmbridge_core::GuestRuntime`] on top of JNI,
//! with JVMTI for method introspection when it is requested.
//!
//! # Example
//!
//! ```ignore
//! use jvmbridge_jni::{Jvm, JvmOptions};
//!
//! let jvm = Jvm::create(JvmOptions::from_file("jvm.toml".as_ref())?)?;
//! let class = jvm.find_class("org/example/Native")?;
//! let report = jvm.signature_factory()?.map_natives(&class, &table)?;
//! class.register_natives(&report.methods)?;
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod jvm;
pub mod loader;
pub mod options;
pub mod runtime;
#[allow(missing_docs)]
pub mod sys;

pub use error::{JvmError, JvmResult};
pub use jvm::Jvm;
pub use loader::{libjvm_candidates, JvmLibrary, LoadError};
pub use options::{Capabilities, JniVersion, JvmOptions, JvmtiOptions, JvmtiVersion};
pub use runtime::JniRuntime;
