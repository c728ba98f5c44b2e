//! Signature Discovery Integration Tests
//!
//! Tests validate:
//! - Enumeration of declared methods with names, descriptors and parameters
//! - Exact, order-sensitive lookup of a single overload
//! - Skipping of methods the introspection interface cannot describe
//! - Reflection fallback when no introspection interface is available
//! - No handles are left behind by discovery
//!
//! # Running Tests
//! ```bash
//! cargo test --test signature_discovery
//! ```

use std::sync::Arc;

use jvmbridge_core::fake::{FakeBody, FakeClass, FakeMethod, FakeReturn, FakeRuntime};
use jvmbridge_core::{ClassRef, JValue, RefTracker, ReturnKind, Scope, SignatureFactory};

fn native_class() -> FakeClass {
    FakeClass::new("org/example/Native")
        .method(FakeMethod::constructor(&[] as &[&str]))
        .method(FakeMethod::instance("open", &["long"], "void").native())
        .method(FakeMethod::instance("write", &["int"], "void").native())
        .method(FakeMethod::instance("write", &["byte[]", "int"], "int").native())
        .method(
            FakeMethod::static_method("version", &[] as &[&str], "java.lang.String")
                .body(FakeBody::Returns(FakeReturn::Str("1.0".into()))),
        )
}

fn setup(runtime: FakeRuntime) -> (Arc<FakeRuntime>, Arc<RefTracker>, Arc<ClassRef>, SignatureFactory) {
    let runtime = Arc::new(runtime);
    runtime.define_class(native_class());
    let tracker = RefTracker::new(runtime.clone());
    let class = ClassRef::find(&tracker, "org/example/Native").unwrap();
    let factory = SignatureFactory::new(&tracker).unwrap();
    (runtime, tracker, class, factory)
}

// ===== discover_all =====

#[test]
fn test_discover_all_lists_declared_methods() {
    let (_runtime, _tracker, class, factory) = setup(FakeRuntime::new());
    let signatures = factory.discover_all(&class).unwrap();

    let shapes: Vec<(&str, &str, bool)> = signatures
        .iter()
        .map(|s| (s.name(), s.descriptor(), s.is_static()))
        .collect();
    assert_eq!(
        shapes,
        vec![
            ("open", "(J)V", false),
            ("write", "(I)V", false),
            ("write", "([BI)I", false),
            ("version", "()Ljava/lang/String;", true),
        ]
    );
    assert_eq!(signatures[2].parameters(), ["byte[]", "int"]);
    assert_eq!(signatures[2].return_kind(), ReturnKind::Int);
    assert_eq!(signatures[3].return_kind(), ReturnKind::Object);
}

#[test]
fn test_discovered_signature_is_invocable() {
    let (_runtime, _tracker, class, factory) = setup(FakeRuntime::new());
    let version = factory
        .discover_one(&class, "version", &[] as &[&str])
        .unwrap()
        .unwrap();
    assert_eq!(version.invoke_as::<String>(None, &[]).unwrap(), "1.0");
}

#[test]
fn test_discovery_releases_its_handles() {
    let (runtime, tracker, class, factory) = setup(FakeRuntime::new());
    let locals_before = runtime.live_handles(Scope::Local);
    let signatures = factory.discover_all(&class).unwrap();
    assert_eq!(signatures.len(), 4);
    assert_eq!(tracker.count(Scope::Local), 0);
    assert_eq!(runtime.live_handles(Scope::Local), locals_before);
    assert_eq!(runtime.invalid_deletes(), 0);
}

#[test]
fn test_discover_all_skips_undescribable_methods() {
    let (runtime, _tracker, class, factory) = setup(FakeRuntime::new());
    runtime.fail_introspection_for("open");
    let names: Vec<String> = factory
        .discover_all(&class)
        .unwrap()
        .iter()
        .map(|s| s.name().to_string())
        .collect();
    assert_eq!(names, vec!["write", "write", "version"]);
}

#[test]
fn test_discover_all_without_introspection() {
    let (_runtime, _tracker, class, factory) = setup(FakeRuntime::new().without_introspection());
    let signatures = factory.discover_all(&class).unwrap();
    assert_eq!(signatures.len(), 4);
    assert_eq!(signatures[2].name(), "write");
    assert_eq!(signatures[2].descriptor(), "([BI)I");
    assert!(signatures[3].is_static());
}

// ===== discover_one =====

#[test]
fn test_discover_one_requires_exact_parameters() {
    let (_runtime, _tracker, class, factory) = setup(FakeRuntime::new());
    // The only declared "open" takes a long.
    assert!(factory.discover_one(&class, "open", &["int"]).unwrap().is_none());
    let open = factory.discover_one(&class, "open", &["long"]).unwrap().unwrap();
    assert_eq!(open.descriptor(), "(J)V");
}

#[test]
fn test_discover_one_matches_int_overload() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.define_class(
        FakeClass::new("org/example/Channel")
            .method(FakeMethod::instance("open", &["long"], "void"))
            .method(FakeMethod::instance("open", &["int"], "void")),
    );
    let tracker = RefTracker::new(runtime.clone());
    let class = ClassRef::find(&tracker, "org/example/Channel").unwrap();
    let factory = SignatureFactory::new(&tracker).unwrap();

    let open = factory.discover_one(&class, "open", &["int"]).unwrap().unwrap();
    assert_eq!(open.parameters(), ["int"]);
    assert_eq!(open.descriptor(), "(I)V");
}

#[test]
fn test_discover_one_is_order_sensitive() {
    let (_runtime, _tracker, class, factory) = setup(FakeRuntime::new());
    assert!(factory
        .discover_one(&class, "write", &["int", "byte[]"])
        .unwrap()
        .is_none());
    assert!(factory
        .discover_one(&class, "write", &["byte[]"])
        .unwrap()
        .is_none());
    let write = factory
        .discover_one(&class, "write", &["byte[]", "int"])
        .unwrap()
        .unwrap();
    assert_eq!(write.return_kind(), ReturnKind::Int);
}

#[test]
fn test_unbound_native_call_raises_guest_exception() {
    let (_runtime, _tracker, class, factory) = setup(FakeRuntime::new());
    let ctor = factory_constructor(&class);
    let object = ctor.construct(&[]).unwrap();
    let write = factory.discover_one(&class, "write", &["int"]).unwrap().unwrap();
    let err = write.invoke(Some(&object), &[JValue::Int(1)]).unwrap_err();
    assert!(err.to_string().contains("UnsatisfiedLinkError"));
}

fn factory_constructor(class: &Arc<ClassRef>) -> jvmbridge_core::MethodSignature {
    jvmbridge_core::MethodSignature::resolve(
        class,
        jvmbridge_core::MethodSpec::constructor(&[] as &[&str]),
    )
    .unwrap()
}
