//! Error types for the bridge

use std::fmt;

use crate::handle::RawHandle;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// A guest exception captured after a call, with whatever detail the runtime exposed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GuestThrowable {
    /// Binary name of the exception class (`java.lang.IllegalStateException`)
    pub class_name: String,
    /// `getMessage()`, when present
    pub message: Option<String>,
    /// `toString()` of the throwable
    pub description: String,
    /// One line per stack frame, outermost last
    pub stack_trace: Vec<String>,
}

impl GuestThrowable {
    /// Create a throwable with a class name and message.
    pub fn new(class_name: impl Into<String>, message: Option<&str>) -> Self {
        let class_name = class_name.into();
        let description = match message {
            Some(msg) => format!("{}: {}", class_name, msg),
            None => class_name.clone(),
        };
        Self {
            class_name,
            message: message.map(str::to_string),
            description,
            stack_trace: Vec::new(),
        }
    }
}

impl fmt::Display for GuestThrowable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)?;
        for frame in &self.stack_trace {
            write!(f, "\n\tat {}", frame)?;
        }
        Ok(())
    }
}

/// Bridge error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// Class or method could not be resolved
    #[error("Failed to resolve {target}: {reason}")]
    Resolution {
        /// What was being looked up (class name, or method name + descriptor)
        target: String,
        /// Why it failed
        reason: String,
    },

    /// Null or empty handle where a live one is required
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Handle tracked under zero or both scopes
    #[error("Ownership policy violated for handle {handle:?}: {detail}")]
    OwnershipPolicy {
        /// Offending handle
        handle: RawHandle,
        /// Tracking state found
        detail: String,
    },

    /// The guest runtime reported a pending exception after a call
    #[error("Guest exception: {0}")]
    GuestException(GuestThrowable),

    /// Native binding matched fewer entries than supplied
    #[error("Partial native binding for {class}: {shortfall} of the supplied entries unmatched ({})", .unmatched.join(", "))]
    PartialBinding {
        /// Class being bound
        class: String,
        /// Table size minus emitted entries
        shortfall: usize,
        /// Unmatched names with their expected parameter lists
        unmatched: Vec<String>,
    },

    /// Typed conversion of a call result failed
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected return kind
        expected: String,
        /// Actual return kind
        got: String,
    },

    /// Current thread could not be attached to the guest runtime
    #[error("Failed to attach thread: {0}")]
    Attach(String),

    /// Introspection interface returned an error
    #[error("Introspection error: {0}")]
    Introspection(String),

    /// Native registration primitive failed
    #[error("Native registration failed for {class} (status {status})")]
    Registration {
        /// Class being registered
        class: String,
        /// Status code reported by the runtime
        status: i32,
    },

    /// The runtime lacks an operation or capability
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl BridgeError {
    /// Build a resolution error.
    pub fn resolution(target: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Resolution {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Errors that leave tracking or thread state unusable.
    ///
    /// Enumerations that tolerate per-entry failures must still abort on these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::OwnershipPolicy { .. } | BridgeError::Attach(_)
        )
    }
}

impl From<GuestThrowable> for BridgeError {
    fn from(t: GuestThrowable) -> Self {
        BridgeError::GuestException(t)
    }
}
