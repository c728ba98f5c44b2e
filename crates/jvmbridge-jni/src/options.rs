//! JVM configuration
//!
//! Handles parsing and validation of `jvm.toml` files:
//!
//! ```toml
//! classpath = ["target/classes", "lib/native-api.jar"]
//! jni_version = "21"
//! vm_options = ["-Xmx512m"]
//!
//! [jvmti]
//! version = "21"
//!
//! [jvmti.capabilities]
//! can_get_bytecodes = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{JvmError, JvmResult};
use crate::loader::libjvm_candidates;
use crate::sys::{self, jvmti};

/// Complete JVM configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmOptions {
    /// Class path entries, joined with the platform separator
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub classpath: Vec<PathBuf>,

    /// Requested JNI version
    pub jni_version: JniVersion,

    /// JVMTI environment settings; no JVMTI environment when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jvmti: Option<JvmtiOptions>,

    /// Java home used to locate the JVM library
    #[serde(skip_serializing_if = "Option::is_none")]
    pub java_home: Option<PathBuf>,

    /// Explicit JVM library path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub libjvm_path: Option<PathBuf>,

    /// Extra options passed verbatim to the VM
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vm_options: Vec<String>,

    /// Let the VM skip options it does not recognize
    pub ignore_unrecognized: bool,
}

/// JNI interface version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JniVersion {
    /// JNI 1.8
    #[default]
    #[serde(rename = "1.8")]
    V1_8,
    /// JNI 9
    #[serde(rename = "9")]
    V9,
    /// JNI 10
    #[serde(rename = "10")]
    V10,
    /// JNI 19
    #[serde(rename = "19")]
    V19,
    /// JNI 20
    #[serde(rename = "20")]
    V20,
    /// JNI 21
    #[serde(rename = "21")]
    V21,
}

impl JniVersion {
    /// Raw version constant
    pub fn raw(self) -> i32 {
        match self {
            JniVersion::V1_8 => sys::JNI_VERSION_1_8,
            JniVersion::V9 => sys::JNI_VERSION_9,
            JniVersion::V10 => sys::JNI_VERSION_10,
            JniVersion::V19 => sys::JNI_VERSION_19,
            JniVersion::V20 => sys::JNI_VERSION_20,
            JniVersion::V21 => sys::JNI_VERSION_21,
        }
    }
}

/// JVMTI interface version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JvmtiVersion {
    /// JVMTI 1.2
    #[default]
    #[serde(rename = "1.2")]
    V1_2,
    /// JVMTI 9
    #[serde(rename = "9")]
    V9,
    /// JVMTI 11
    #[serde(rename = "11")]
    V11,
    /// JVMTI 21
    #[serde(rename = "21")]
    V21,
}

impl JvmtiVersion {
    /// Raw version constant
    pub fn raw(self) -> i32 {
        match self {
            JvmtiVersion::V1_2 => jvmti::JVMTI_VERSION_1_2,
            JvmtiVersion::V9 => jvmti::JVMTI_VERSION_9,
            JvmtiVersion::V11 => jvmti::JVMTI_VERSION_11,
            JvmtiVersion::V21 => jvmti::JVMTI_VERSION_21,
        }
    }
}

/// JVMTI environment settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JvmtiOptions {
    /// Requested JVMTI version
    pub version: JvmtiVersion,

    /// Capabilities added to the environment
    pub capabilities: Capabilities,
}

impl JvmtiOptions {
    /// Settings for `version` with no extra capabilities
    pub fn new(version: JvmtiVersion) -> Self {
        Self {
            version,
            capabilities: Capabilities::default(),
        }
    }

    /// Set the capabilities
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Optional JVMTI capabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// `can_get_bytecodes`
    pub can_get_bytecodes: bool,
    /// `can_generate_all_class_hook_events`
    pub can_generate_all_class_hook_events: bool,
}

impl Capabilities {
    /// Check whether any capability is requested
    pub fn any(&self) -> bool {
        self.can_get_bytecodes || self.can_generate_all_class_hook_events
    }

    /// The raw capability bitset
    pub fn to_raw(self) -> jvmti::jvmtiCapabilities {
        let mut raw = jvmti::jvmtiCapabilities::default();
        if self.can_get_bytecodes {
            raw.set_bit(jvmti::CAN_GET_BYTECODES);
        }
        if self.can_generate_all_class_hook_events {
            raw.set_bit(jvmti::CAN_GENERATE_ALL_CLASS_HOOK_EVENTS);
        }
        raw
    }
}

#[cfg(windows)]
const CLASSPATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const CLASSPATH_SEPARATOR: &str = ":";

impl JvmOptions {
    /// Parse options from a TOML file
    pub fn from_file(path: &Path) -> JvmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse options from a TOML string
    pub fn from_toml_str(content: &str) -> JvmResult<Self> {
        let options: JvmOptions = toml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Serialize to a TOML string
    pub fn to_toml_string(&self) -> JvmResult<String> {
        toml::to_string_pretty(self).map_err(|e| JvmError::ValidationError(e.to_string()))
    }

    /// Validate the options
    pub fn validate(&self) -> JvmResult<()> {
        for entry in &self.classpath {
            if entry.as_os_str().is_empty() {
                return Err(JvmError::ValidationError(
                    "Classpath entries cannot be empty".to_string(),
                ));
            }
            if !entry.exists() {
                return Err(JvmError::ValidationError(format!(
                    "Classpath entry does not exist: {}",
                    entry.display()
                )));
            }
        }

        for option in &self.vm_options {
            if option.contains('\0') {
                return Err(JvmError::ValidationError(format!(
                    "VM option contains a NUL byte: {:?}",
                    option
                )));
            }
            if option.starts_with("-Djava.class.path=") {
                return Err(JvmError::ValidationError(
                    "Use `classpath` instead of -Djava.class.path".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Append a classpath entry
    pub fn with_classpath(mut self, path: impl Into<PathBuf>) -> Self {
        self.classpath.push(path.into());
        self
    }

    /// Request a JVMTI environment
    pub fn with_jvmti(mut self, jvmti: JvmtiOptions) -> Self {
        self.jvmti = Some(jvmti);
        self
    }

    /// Append a raw VM option
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.vm_options.push(option.into());
        self
    }

    /// Set the JNI version
    pub fn with_jni_version(mut self, version: JniVersion) -> Self {
        self.jni_version = version;
        self
    }

    /// The `-Djava.class.path=` option, if there is a classpath
    pub fn classpath_option(&self) -> Option<String> {
        if self.classpath.is_empty() {
            return None;
        }
        let joined = self
            .classpath
            .iter()
            .map(|p| p.to_string_lossy())
            .collect::<Vec<_>>()
            .join(CLASSPATH_SEPARATOR);
        Some(format!("-Djava.class.path={}", joined))
    }

    /// Every option passed to `JNI_CreateJavaVM`, in order
    pub fn all_vm_options(&self) -> Vec<String> {
        self.classpath_option()
            .into_iter()
            .chain(self.vm_options.iter().cloned())
            .collect()
    }

    /// Candidate JVM library paths in probing order
    pub fn libjvm_candidates(&self) -> JvmResult<Vec<PathBuf>> {
        if let Some(path) = &self.libjvm_path {
            return Ok(vec![path.clone()]);
        }
        let home = match &self.java_home {
            Some(home) => home.clone(),
            None => std::env::var_os("JAVA_HOME").map(PathBuf::from).ok_or_else(|| {
                JvmError::ValidationError(
                    "Set `libjvm_path`, `java_home` or JAVA_HOME to locate the JVM".to_string(),
                )
            })?,
        };
        Ok(libjvm_candidates(&home))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_options() {
        let options = JvmOptions::from_toml_str("").unwrap();
        assert_eq!(options, JvmOptions::default());
        assert_eq!(options.jni_version, JniVersion::V1_8);
        assert!(options.jvmti.is_none());
        assert!(options.classpath_option().is_none());
    }

    #[test]
    fn test_parse_full_options() {
        let toml = r#"
jni_version = "21"
java_home = "/opt/jdk"
vm_options = ["-Xmx256m", "-Xcheck:jni"]
ignore_unrecognized = true

[jvmti]
version = "11"

[jvmti.capabilities]
can_get_bytecodes = true
"#;
        let options = JvmOptions::from_toml_str(toml).unwrap();
        assert_eq!(options.jni_version, JniVersion::V21);
        assert_eq!(options.java_home, Some(PathBuf::from("/opt/jdk")));
        assert_eq!(options.vm_options, vec!["-Xmx256m", "-Xcheck:jni"]);
        assert!(options.ignore_unrecognized);

        let jvmti = options.jvmti.unwrap();
        assert_eq!(jvmti.version, JvmtiVersion::V11);
        assert!(jvmti.capabilities.can_get_bytecodes);
        assert!(!jvmti.capabilities.can_generate_all_class_hook_events);
    }

    #[test]
    fn test_parse_unknown_version() {
        let err = JvmOptions::from_toml_str("jni_version = \"1.1\"").unwrap_err();
        assert!(matches!(err, JvmError::ParseError(_)));
    }

    #[test]
    fn test_validate_missing_classpath_entry() {
        let options = JvmOptions::default().with_classpath("/nonexistent/classes");
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/classes"));
    }

    #[test]
    fn test_validate_rejects_raw_classpath_option() {
        let options = JvmOptions::default().with_option("-Djava.class.path=/tmp");
        assert!(matches!(
            options.validate(),
            Err(JvmError::ValidationError(_))
        ));
    }

    #[test]
    fn test_version_constants() {
        assert_eq!(JniVersion::V1_8.raw(), 0x0001_0008);
        assert_eq!(JniVersion::V21.raw(), 0x0015_0000);
        assert_eq!(JvmtiVersion::V1_2.raw(), 0x3001_0200);
        assert_eq!(JvmtiVersion::V21.raw(), 0x3015_0000);
    }

    #[test]
    fn test_capabilities_bits() {
        let caps = Capabilities {
            can_get_bytecodes: true,
            can_generate_all_class_hook_events: true,
        };
        assert!(caps.any());
        let raw = caps.to_raw();
        assert!(raw.has_bit(jvmti::CAN_GET_BYTECODES));
        assert!(raw.has_bit(jvmti::CAN_GENERATE_ALL_CLASS_HOOK_EVENTS));
        assert!(!Capabilities::default().any());
    }

    #[test]
    fn test_explicit_libjvm_path_wins() {
        let options = JvmOptions {
            libjvm_path: Some(PathBuf::from("/opt/jdk/lib/server/libjvm.so")),
            java_home: Some(PathBuf::from("/elsewhere")),
            ..Default::default()
        };
        assert_eq!(
            options.libjvm_candidates().unwrap(),
            vec![PathBuf::from("/opt/jdk/lib/server/libjvm.so")]
        );
    }

    #[test]
    fn test_java_home_candidates() {
        let options = JvmOptions {
            java_home: Some(PathBuf::from("/opt/jdk")),
            ..Default::default()
        };
        let candidates = options.libjvm_candidates().unwrap();
        assert!(candidates.iter().all(|p| p.starts_with("/opt/jdk")));
    }
}
