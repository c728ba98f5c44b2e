//! Descriptor construction
//!
//! Builds JVM descriptors from type names as reported by
//! `Class#getTypeName`: `"int"`, `"byte[]"`, `"java.lang.String"`,
//! `"org.example.Outer$Inner[][]"`. Descriptors are never parsed.

/// Field descriptor of a type name: `"int"` → `I`, `"java.lang.String[]"` →
/// `[Ljava/lang/String;`.
pub fn type_descriptor(type_name: &str) -> String {
    let mut base = type_name.trim();
    let mut dims = 0;
    while let Some(inner) = base.strip_suffix("[]") {
        base = inner.trim_end();
        dims += 1;
    }

    let mut out = "[".repeat(dims);
    match primitive_code(base) {
        Some(code) => out.push(code),
        None => {
            out.push('L');
            out.push_str(&internal_name(base));
            out.push(';');
        }
    }
    out
}

/// Method descriptor of parameter and return type names:
/// `(["int", "byte[]"], "void")` → `(I[B)V`.
pub fn method_descriptor<S: AsRef<str>>(params: &[S], return_type: &str) -> String {
    let mut out = String::from("(");
    for p in params {
        out.push_str(&type_descriptor(p.as_ref()));
    }
    out.push(')');
    out.push_str(&type_descriptor(return_type));
    out
}

/// Internal form of a binary class name: `java.lang.String` → `java/lang/String`
pub fn internal_name(binary_name: &str) -> String {
    binary_name.replace('.', "/")
}

/// Binary form of an internal class name: `java/lang/String` → `java.lang.String`
pub fn binary_name(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

fn primitive_code(name: &str) -> Option<char> {
    Some(match name {
        "boolean" => 'Z',
        "byte" => 'B',
        "char" => 'C',
        "short" => 'S',
        "int" => 'I',
        "long" => 'J',
        "float" => 'F',
        "double" => 'D',
        "void" => 'V',
        _ => return None,
    })
}
