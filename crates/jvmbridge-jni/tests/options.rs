//! Configuration File Tests
//!
//! Tests validate:
//! - Loading `jvm.toml` files from disk
//! - Classpath validation against the filesystem
//! - VM option assembly
//!
//! # Running Tests
//! ```bash
//! cargo test --test options
//! ```

use std::fs;
use std::path::PathBuf;

use jvmbridge_jni::{JniVersion, JvmError, JvmOptions, JvmtiOptions, JvmtiVersion};
use tempfile::TempDir;

#[test]
fn test_load_options_from_file() {
    let dir = TempDir::new().unwrap();
    let classes = dir.path().join("classes");
    fs::create_dir(&classes).unwrap();
    let jar = dir.path().join("native-api.jar");
    fs::write(&jar, b"").unwrap();

    let config = dir.path().join("jvm.toml");
    fs::write(
        &config,
        format!(
            r#"
classpath = [{:?}, {:?}]
jni_version = "9"
vm_options = ["-Xss2m"]

[jvmti]
version = "9"
"#,
            classes.display().to_string(),
            jar.display().to_string()
        ),
    )
    .unwrap();

    let options = JvmOptions::from_file(&config).unwrap();
    assert_eq!(options.classpath, vec![classes.clone(), jar.clone()]);
    assert_eq!(options.jni_version, JniVersion::V9);
    assert_eq!(options.jvmti.unwrap().version, JvmtiVersion::V9);

    let vm_options = options.all_vm_options();
    assert_eq!(vm_options.len(), 2);
    assert!(vm_options[0].starts_with("-Djava.class.path="));
    assert!(vm_options[0].contains(&*classes.to_string_lossy()));
    assert!(vm_options[0].contains(&*jar.to_string_lossy()));
    assert_eq!(vm_options[1], "-Xss2m");
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = JvmOptions::from_file(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, JvmError::IoError(_)));
}

#[test]
fn test_missing_classpath_entry_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("jvm.toml");
    fs::write(&config, "classpath = [\"/nonexistent/classes\"]\n").unwrap();

    let err = JvmOptions::from_file(&config).unwrap_err();
    assert!(matches!(err, JvmError::ValidationError(_)));
}

#[test]
fn test_builder_round_trips_through_toml() {
    let dir = TempDir::new().unwrap();
    let options = JvmOptions::default()
        .with_classpath(dir.path())
        .with_jni_version(JniVersion::V21)
        .with_jvmti(JvmtiOptions::new(JvmtiVersion::V21))
        .with_option("-Xmx128m");

    let text = options.to_toml_string().unwrap();
    let config = dir.path().join("jvm.toml");
    fs::write(&config, &text).unwrap();

    assert_eq!(JvmOptions::from_file(&config).unwrap(), options);
}

#[test]
fn test_java_home_probing() {
    let dir = TempDir::new().unwrap();
    let options = JvmOptions {
        java_home: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let candidates: Vec<PathBuf> = options.libjvm_candidates().unwrap();
    assert!(candidates.iter().all(|p| p.starts_with(dir.path())));
    assert!(candidates
        .iter()
        .any(|p| p.to_string_lossy().contains("server")));
}
