//! Demangling of Rust and C++ symbol names.

use std::borrow::Cow;

use cpp_demangle::DemangleOptions;
use cpp_demangle::Symbol;


/// Demangle `name`, passing it through unchanged if it does not look
/// like a mangled symbol.
pub(crate) fn maybe_demangle(name: &str) -> Cow<'_, str> {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        // Use the alternate format to strip the trailing hash.
        return Cow::Owned(format!("{demangled:#}"))
    }

    if name.starts_with("_Z") {
        if let Some(demangled) = Symbol::new(name)
            .ok()
            .and_then(|symbol| symbol.demangle(&DemangleOptions::default()).ok())
        {
            return Cow::Owned(demangled)
        }
    }

    Cow::Borrowed(name)
}
