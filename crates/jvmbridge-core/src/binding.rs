//! Native binding resolution
//!
//! Matches the declared methods of a class against a table of native
//! implementations keyed by method name. Overloads are told apart by their
//! exact parameter type lists.
//!
//! # Example
//!
//! ```ignore
//! let mut table = BindingTable::new();
//! table.insert("write", write_int, &["int"]);
//! table.insert("write", write_bytes, &["byte[]"]);
//!
//! let report = factory.map_natives(&class, &table)?;
//! class.register_natives(&report.require_complete()?)?;
//! ```

use std::fmt;

use rustc_hash::FxHashSet;

use crate::discovery::params_equal;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{NativeFn, NativeMethod};
use crate::signature::{MethodSignature, MethodSpec};

// ============================================================================
// Binding Table
// ============================================================================

/// A native implementation offered for a method name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingEntry {
    /// Method name
    pub name: String,
    /// Implementation
    pub function: NativeFn,
    /// Parameter type names the implementation expects
    pub parameters: Vec<String>,
}

/// Multimap of method name to native implementations, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: Vec<BindingEntry>,
}

impl BindingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an implementation for `name` taking `params`
    pub fn insert<S: AsRef<str>>(&mut self, name: &str, function: NativeFn, params: &[S]) -> &mut Self {
        self.entries.push(BindingEntry {
            name: name.to_string(),
            function,
            parameters: params.iter().map(|p| p.as_ref().to_string()).collect(),
        });
        self
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with<S: AsRef<str>>(mut self, name: &str, function: NativeFn, params: &[S]) -> Self {
        self.insert(name, function, params);
        self
    }

    /// Number of entries, overloads counted separately
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in insertion order
    pub fn entries(&self) -> &[BindingEntry] {
        &self.entries
    }

    /// Entries under `name`, in insertion order
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a BindingEntry> + 'a {
        self.entries.iter().filter(move |e| e.name == name)
    }

    /// Distinct names, in first-insertion order
    pub fn names(&self) -> Vec<&str> {
        let mut seen = FxHashSet::default();
        self.entries
            .iter()
            .map(|e| e.name.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

// ============================================================================
// Declared Methods
// ============================================================================

/// A method the resolver can bind against.
pub trait DeclaredMethod {
    /// Method name
    fn name(&self) -> &str;
    /// Raw descriptor
    fn descriptor(&self) -> &str;
    /// Parameter type names in declaration order
    fn parameters(&self) -> &[String];
    /// Declared `native`; other methods are never bound
    fn is_native(&self) -> bool {
        true
    }
}

impl DeclaredMethod for MethodSignature {
    fn name(&self) -> &str {
        MethodSignature::name(self)
    }

    fn descriptor(&self) -> &str {
        MethodSignature::descriptor(self)
    }

    fn parameters(&self) -> &[String] {
        MethodSignature::parameters(self)
    }

    fn is_native(&self) -> bool {
        MethodSignature::is_native(self)
    }
}

impl DeclaredMethod for MethodSpec {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn parameters(&self) -> &[String] {
        &self.parameters
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Table entries under one name that received no binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedBinding {
    /// Method name
    pub name: String,
    /// Expected parameter lists of the unbound entries
    pub expected: Vec<Vec<String>>,
}

impl fmt::Display for UnmatchedBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, params) in self.expected.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}({})", self.name, params.join(", "))?;
        }
        Ok(())
    }
}

/// Outcome of matching a class against a binding table.
#[derive(Debug, Clone)]
pub struct BindingReport {
    /// Class the methods were discovered on
    pub class: String,
    /// Registration table
    pub methods: Vec<NativeMethod>,
    /// Table entries bound to no declared method, zero when complete
    pub shortfall: usize,
    /// Unbound entries grouped by name
    pub unmatched: Vec<UnmatchedBinding>,
}

impl BindingReport {
    /// Whether every table entry was bound
    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }

    /// The registration table, or [`BridgeError::PartialBinding`] on a shortfall
    pub fn require_complete(self) -> BridgeResult<Vec<NativeMethod>> {
        if self.is_complete() {
            return Ok(self.methods);
        }
        Err(BridgeError::PartialBinding {
            class: self.class,
            shortfall: self.shortfall,
            unmatched: self.unmatched.iter().map(ToString::to_string).collect(),
        })
    }
}

/// Bind each native declared method to the first table entry with its name
/// and exactly its parameter list.
///
/// Several declared methods may share one entry. The shortfall counts table
/// entries that no declared method used. It is reported and logged, never
/// raised.
pub fn resolve_bindings<M: DeclaredMethod>(
    class: &str,
    methods: &[M],
    table: &BindingTable,
) -> BindingReport {
    let mut used = FxHashSet::default();
    let mut emitted = Vec::new();
    for method in methods {
        if !method.is_native() {
            tracing::debug!(
                class = %class,
                name = %method.name(),
                descriptor = %method.descriptor(),
                "skipping non-native declared method"
            );
            continue;
        }
        let found = table
            .entries()
            .iter()
            .enumerate()
            .find(|(_, entry)| {
                entry.name == method.name() && params_equal(method.parameters(), &entry.parameters)
            });
        if let Some((index, entry)) = found {
            used.insert(index);
            emitted.push(NativeMethod {
                name: method.name().to_string(),
                descriptor: method.descriptor().to_string(),
                function: entry.function,
            });
        }
    }

    let shortfall = table.len() - used.len();
    let mut unmatched = Vec::new();
    if shortfall > 0 {
        for name in table.names() {
            let expected: Vec<Vec<String>> = table
                .entries()
                .iter()
                .enumerate()
                .filter(|(index, entry)| entry.name == name && !used.contains(index))
                .map(|(_, entry)| entry.parameters.clone())
                .collect();
            if expected.is_empty() {
                continue;
            }
            let missing = UnmatchedBinding {
                name: name.to_string(),
                expected,
            };
            tracing::warn!(class = %class, method = %missing, "no declared method matches native binding");
            unmatched.push(missing);
        }
        tracing::warn!(
            class = %class,
            expected = table.len(),
            bound = used.len(),
            shortfall,
            "partial native binding"
        );
    }

    BindingReport {
        class: class.to_string(),
        methods: emitted,
        shortfall,
        unmatched,
    }
}
