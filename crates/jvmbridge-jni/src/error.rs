//! Bootstrap error types

use jvmbridge_core::BridgeError;
use thiserror::Error;

use crate::loader::LoadError;

/// Result type for JVM lifecycle operations
pub type JvmResult<T> = Result<T, JvmError>;

/// Errors raised while configuring, creating or tearing down a JVM
#[derive(Debug, Error)]
pub enum JvmError {
    /// Failed to read a configuration file
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// The JVM library could not be loaded
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A JVM is already active in this process
    #[error("A JVM is already active in this process")]
    AlreadyActive,

    /// `JNI_CreateJavaVM` failed
    #[error("JNI_CreateJavaVM failed with status {0}")]
    CreateFailed(i32),

    /// `DestroyJavaVM` failed
    #[error("DestroyJavaVM failed with status {0}")]
    DestroyFailed(i32),

    /// The requested JNI or JVMTI environment is unavailable
    #[error("GetEnv for version {version:#x} failed with status {status}")]
    EnvUnavailable {
        /// Requested interface version
        version: i32,
        /// Status returned by `GetEnv`
        status: i32,
    },

    /// A JVMTI call failed
    #[error("JVMTI {call} failed: {name}")]
    Jvmti {
        /// Function that failed
        call: &'static str,
        /// JVMTI error name
        name: String,
    },

    /// Bridge operation failed
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}
