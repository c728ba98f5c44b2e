//! Signature discovery
//!
//! Enumerates the declared methods of a guest class through reflection and
//! the runtime's introspection interface, producing one [`MethodSignature`]
//! per method.

use std::sync::Arc;

use crate::binding::{resolve_bindings, BindingReport, BindingTable};
use crate::class::ClassRef;
use crate::descriptor::method_descriptor;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{ReturnKind, Scope};
use crate::reference::ManagedRef;
use crate::runtime::{check_exception, ACC_STATIC};
use crate::signature::{MethodSignature, MethodSpec};
use crate::tracker::RefTracker;

/// Reflective methods discovery is built on.
struct Reflection {
    get_declared_methods: MethodSignature,
    get_type_name: MethodSignature,
    get_parameter_types: MethodSignature,
    get_return_type: MethodSignature,
    get_name: MethodSignature,
    get_modifiers: MethodSignature,
}

impl Reflection {
    fn resolve(tracker: &Arc<RefTracker>) -> BridgeResult<Self> {
        let class = ClassRef::find(tracker, "java/lang/Class")?;
        let method = ClassRef::find(tracker, "java/lang/reflect/Method")?;
        let instance = |class: &Arc<ClassRef>, name: &str, descriptor: &str, kind| {
            MethodSignature::resolve(class, MethodSpec::with_descriptor(name, descriptor, kind, false))
        };
        Ok(Self {
            get_declared_methods: instance(
                &class,
                "getDeclaredMethods",
                "()[Ljava/lang/reflect/Method;",
                ReturnKind::Object,
            )?,
            get_type_name: instance(&class, "getTypeName", "()Ljava/lang/String;", ReturnKind::Object)?,
            get_parameter_types: instance(
                &method,
                "getParameterTypes",
                "()[Ljava/lang/Class;",
                ReturnKind::Object,
            )?,
            get_return_type: instance(&method, "getReturnType", "()Ljava/lang/Class;", ReturnKind::Object)?,
            get_name: instance(&method, "getName", "()Ljava/lang/String;", ReturnKind::Object)?,
            get_modifiers: instance(&method, "getModifiers", "()I", ReturnKind::Int)?,
        })
    }
}

/// Builds [`MethodSignature`]s for the declared methods of guest classes.
pub struct SignatureFactory {
    tracker: Arc<RefTracker>,
    reflection: Reflection,
}

impl SignatureFactory {
    /// Create a factory, resolving the reflective methods it relies on.
    pub fn new(tracker: &Arc<RefTracker>) -> BridgeResult<Self> {
        Ok(Self {
            tracker: tracker.clone(),
            reflection: Reflection::resolve(tracker)?,
        })
    }

    /// Signatures of every declared method of `class`.
    ///
    /// Methods whose name, descriptor or parameter types cannot be extracted
    /// are skipped with a warning. Fatal errors abort the enumeration.
    pub fn discover_all(&self, class: &Arc<ClassRef>) -> BridgeResult<Vec<MethodSignature>> {
        let runtime = self.tracker.runtime();
        let methods: ManagedRef = self
            .reflection
            .get_declared_methods
            .invoke_as(Some(class.reference()), &[])?;
        let array = methods.require("declared methods")?;
        let len = runtime.array_length(array)?;

        let mut signatures = Vec::with_capacity(len);
        for index in 0..len {
            let element = runtime.object_array_element(array, index)?;
            let method = ManagedRef::adopt(&self.tracker, element, Scope::Local);
            check_exception(runtime.as_ref())?;

            match self.describe(class, &method) {
                Ok(signature) => signatures.push(signature),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(class = %class.name(), index, error = %e, "skipping declared method");
                }
            }
        }
        tracing::debug!(class = %class.name(), count = signatures.len(), "discovered methods");
        Ok(signatures)
    }

    /// First declared method named `name` whose parameter types equal
    /// `expected_params` exactly, in order.
    pub fn discover_one<S: AsRef<str>>(
        &self,
        class: &Arc<ClassRef>,
        name: &str,
        expected_params: &[S],
    ) -> BridgeResult<Option<MethodSignature>> {
        Ok(self
            .discover_all(class)?
            .into_iter()
            .find(|sig| sig.name() == name && params_equal(sig.parameters(), expected_params)))
    }

    /// Discover the methods of `class` and match them against `table`.
    pub fn map_natives(&self, class: &Arc<ClassRef>, table: &BindingTable) -> BridgeResult<BindingReport> {
        let signatures = self.discover_all(class)?;
        Ok(resolve_bindings(class.name(), &signatures, table))
    }

    fn describe(&self, class: &Arc<ClassRef>, method: &ManagedRef) -> BridgeResult<MethodSignature> {
        let runtime = self.tracker.runtime();
        let id = runtime
            .from_reflected_method(method.require("reflected method")?)?
            .ok_or_else(|| BridgeError::Introspection("reflected method has no method id".to_string()))?;

        let (name, descriptor, modifiers) = match runtime.method_name(id) {
            Ok((name, descriptor)) => (name, Some(descriptor), runtime.method_modifiers(id)?),
            Err(BridgeError::Unsupported(_)) => (
                self.reflection.get_name.invoke_as::<String>(Some(method), &[])?,
                None,
                self.reflection.get_modifiers.invoke_as::<i32>(Some(method), &[])?,
            ),
            Err(e) => return Err(e),
        };

        let parameters = self.parameter_types(method)?;
        let return_class: ManagedRef = self.reflection.get_return_type.invoke_as(Some(method), &[])?;
        let return_type = self.type_name(&return_class)?;
        let descriptor = descriptor.unwrap_or_else(|| method_descriptor(&parameters, &return_type));

        MethodSignature::resolve(
            class,
            MethodSpec {
                name,
                descriptor,
                parameters,
                return_kind: ReturnKind::from_type_name(&return_type),
                is_static: modifiers & ACC_STATIC != 0,
            },
        )
        .map(|signature| signature.with_modifiers(modifiers))
    }

    fn parameter_types(&self, method: &ManagedRef) -> BridgeResult<Vec<String>> {
        let runtime = self.tracker.runtime();
        let types: ManagedRef = self
            .reflection
            .get_parameter_types
            .invoke_as(Some(method), &[])?;
        let array = types.require("parameter types")?;
        let len = runtime.array_length(array)?;
        let mut names = Vec::with_capacity(len);
        for index in 0..len {
            let element = runtime.object_array_element(array, index)?;
            let param = ManagedRef::adopt(&self.tracker, element, Scope::Local);
            check_exception(runtime.as_ref())?;
            names.push(self.type_name(&param)?);
        }
        Ok(names)
    }

    fn type_name(&self, class: &ManagedRef) -> BridgeResult<String> {
        self.reflection.get_type_name.invoke_as(Some(class), &[])
    }
}

/// Exact, order-sensitive parameter list equality
pub(crate) fn params_equal<A: AsRef<str>, B: AsRef<str>>(declared: &[A], expected: &[B]) -> bool {
    declared.len() == expected.len()
        && declared
            .iter()
            .zip(expected)
            .all(|(d, e)| d.as_ref() == e.as_ref())
}
