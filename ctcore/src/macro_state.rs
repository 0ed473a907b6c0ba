//! Mutable macro environment (spec §3 `MacroState`, §4.4).
//!
//! `core` holds immutable compiler/target built-ins, populated once from
//! [`EngineConfig`](crate::config::EngineConfig). `variable` holds
//! file-defined macros and can be freely mutated by `#define`/`#undef`.
//! `masked` records names that were `#undef`'d while still present in
//! `core`, so a lookup can report them `Undefined` instead of silently
//! falling through to the (otherwise immutable) built-in — the
//! "masked-core tombstone" in spec §4.4.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use crate::config::{Compiler, EngineConfig, Target};
use crate::content::ContentHash;
use crate::macro_def::{Macro, MacroBody};

/// Result of looking a name up in a [`MacroState`].
#[derive(Clone, Debug)]
pub enum MacroValue {
    /// The name is defined, with the given macro.
    Defined(Rc<Macro>),
    /// The name is not defined anywhere.
    Undefined,
    /// The name names a compiler/target built-in that has been `#undef`'d.
    MaskedBuiltin,
}

impl MacroValue {
    /// Whether this value counts as "defined" for `defined(NAME)` and `#ifdef`.
    #[must_use]
    pub const fn is_defined(&self) -> bool {
        matches!(self, Self::Defined(_))
    }

    /// The macro itself, if defined.
    #[must_use]
    pub fn macro_ref(&self) -> Option<&Rc<Macro>> {
        match self {
            Self::Defined(m) => Some(m),
            _ => None,
        }
    }
}

/// The full macro environment threaded through one translation unit's
/// preprocessing.
#[derive(Clone, Debug, Default)]
pub struct MacroState {
    core: HashMap<String, Rc<Macro>>,
    variable: HashMap<String, Rc<Macro>>,
    masked: HashSet<String>,
}

impl MacroState {
    /// An empty state with no built-ins at all (useful for expression-only tests).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build the `core` partition from an [`EngineConfig`]'s resolved variant.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut state = Self::default();
        state.define_target_macros(config.variant.target);
        state.define_compiler_macros(config.variant.compiler);
        state.stub_compiler_intrinsics();
        state.define_sizeof_stubs();
        for (name, value) in &config.variant.extra_defines {
            state.define_core_object_like(name, value);
        }
        state
    }

    fn define_core_object_like(&mut self, name: &str, value: &str) {
        let tokens = crate::lexer::tokenize_line(value);
        self.core
            .insert(name.to_string(), Rc::new(Macro::builtin(name, MacroBody::ObjectLike(tokens))));
    }

    fn define_target_macros(&mut self, target: Target) {
        match target {
            Target::Linux => {
                self.define_core_object_like("__linux__", "1");
                self.define_core_object_like("__unix__", "1");
                self.define_core_object_like("__LP64__", "1");
            }
            Target::Windows => {
                self.define_core_object_like("_WIN32", "1");
                self.define_core_object_like("WIN32", "1");
                self.define_core_object_like("_WINDOWS", "1");
            }
            Target::MacOS => {
                self.define_core_object_like("__APPLE__", "1");
                self.define_core_object_like("__MACH__", "1");
                self.define_core_object_like("TARGET_OS_MAC", "1");
                self.define_core_object_like("__LP64__", "1");
            }
        }
    }

    fn define_compiler_macros(&mut self, compiler: Compiler) {
        match compiler {
            Compiler::GCC => {
                self.define_core_object_like("__GNUC__", "11");
                self.define_core_object_like("__GNUC_MINOR__", "2");
                self.define_core_object_like("__GNUC_PATCHLEVEL__", "0");
                self.define_core_object_like("_GNU_SOURCE", "1");
            }
            Compiler::Clang => {
                self.define_core_object_like("__clang__", "1");
                self.define_core_object_like("__clang_major__", "14");
                self.define_core_object_like("__clang_minor__", "0");
                self.define_core_object_like("__clang_patchlevel__", "0");
            }
            Compiler::MSVC => {
                self.define_core_object_like("_MSC_VER", "1920");
                self.define_core_object_like("_MSC_FULL_VER", "192027508");
                self.define_core_object_like("WIN32_LEAN_AND_MEAN", "");
                self.define_core_object_like("_CRT_SECURE_NO_WARNINGS", "");
            }
        }
    }

    fn stub_compiler_intrinsics(&mut self) {
        for name in [
            "__builtin_expect",
            "__builtin_unreachable",
            "__builtin_va_start",
            "__builtin_va_arg",
            "__builtin_va_end",
        ] {
            self.define_core_object_like(name, "");
        }
    }

    fn define_sizeof_stubs(&mut self) {
        for (name, value) in [
            ("__SIZEOF_INT__", "4"),
            ("__SIZEOF_LONG__", "8"),
            ("__SIZEOF_LONG_LONG__", "8"),
            ("__SIZEOF_POINTER__", "8"),
            ("__SIZEOF_SIZE_T__", "8"),
            ("__SIZEOF_PTRDIFF_T__", "8"),
        ] {
            self.define_core_object_like(name, value);
        }
    }

    /// Look a name up, respecting masking.
    #[must_use]
    pub fn lookup(&self, name: &str) -> MacroValue {
        if let Some(m) = self.variable.get(name) {
            return MacroValue::Defined(m.clone());
        }
        if self.masked.contains(name) {
            return MacroValue::MaskedBuiltin;
        }
        if let Some(m) = self.core.get(name) {
            return MacroValue::Defined(m.clone());
        }
        MacroValue::Undefined
    }

    /// Whether `name` is currently defined (variable, or unmasked core).
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup(name).is_defined()
    }

    /// Define (or redefine) a file-level macro. Masks any core built-in of
    /// the same name, matching C's "last `#define` wins" semantics.
    pub fn define(&mut self, name: impl Into<String>, macro_def: Macro) {
        let name = name.into();
        self.masked.remove(&name);
        self.variable.insert(name, Rc::new(macro_def));
    }

    /// `#undef NAME`. If `NAME` only exists in `core`, records a mask rather
    /// than mutating `core` (which stays immutable for the lifetime of the
    /// state) — this is the "masked-core tombstone".
    pub fn undef(&mut self, name: &str) {
        if self.variable.remove(name).is_some() {
            return;
        }
        if self.core.contains_key(name) {
            self.masked.insert(name.to_string());
        }
    }

    /// Iterator over file-defined (variable) macro names, for `defines_delta`
    /// construction and for the magic-flag extractor's "defined here" notes.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variable.keys().map(String::as_str)
    }

    /// A fingerprint over exactly the given names' current values, stable
    /// regardless of insertion order or unrelated keys (spec §4.4, §4.5).
    ///
    /// An undefined/masked name contributes a fixed `"\0UNDEF"` sentinel so
    /// that "defined as empty body" and "undefined" fingerprint differently.
    #[must_use]
    pub fn restricted_fingerprint(&self, names: &BTreeSet<String>) -> ContentHash {
        let rendered: Vec<(String, String)> = names
            .iter()
            .map(|name| {
                let value = match self.lookup(name) {
                    MacroValue::Defined(m) => render_macro_for_fingerprint(&m),
                    MacroValue::Undefined | MacroValue::MaskedBuiltin => "\0UNDEF".to_string(),
                };
                (name.clone(), value)
            })
            .collect();
        ContentHash::of_pairs(rendered.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Cheap clone of the whole state, used when recursing into an
    /// `#include`d file — the nested preprocessor run gets its own copy and
    /// any `#define`/`#undef` it performs is visible to the includer only
    /// because the includer replaces its own state with the nested result
    /// afterward (never merges), matching how C translation units behave.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}

fn render_macro_for_fingerprint(m: &Macro) -> String {
    let body = crate::lexer::tokens_to_string(m.body.tokens());
    match &m.body {
        MacroBody::ObjectLike(_) => format!("obj:{body}"),
        MacroBody::FunctionLike { params, is_variadic, .. } => {
            format!("fn({},{}):{body}", params.join(","), is_variadic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::for_linux()
    }

    #[test]
    fn undef_of_builtin_masks_rather_than_falls_through() {
        let mut state = MacroState::from_config(&cfg());
        assert!(state.is_defined("__linux__"));
        state.undef("__linux__");
        assert!(!state.is_defined("__linux__"));
        assert!(matches!(state.lookup("__linux__"), MacroValue::MaskedBuiltin));
    }

    #[test]
    fn redefine_clears_mask() {
        let mut state = MacroState::from_config(&cfg());
        state.undef("__linux__");
        state.define(
            "__linux__",
            Macro::defined_at("__linux__", MacroBody::ObjectLike(vec![]), "a.c", 1),
        );
        assert!(state.is_defined("__linux__"));
    }

    #[test]
    fn fingerprint_is_insensitive_to_unrelated_keys() {
        let mut a = MacroState::from_config(&cfg());
        let mut b = MacroState::from_config(&cfg());
        b.define(
            "UNRELATED",
            Macro::defined_at("UNRELATED", MacroBody::ObjectLike(vec![]), "b.c", 1),
        );
        let names: BTreeSet<String> = ["__linux__".to_string()].into_iter().collect();
        assert_eq!(a.restricted_fingerprint(&names), b.restricted_fingerprint(&names));
        a.undef("__linux__");
        assert_ne!(a.restricted_fingerprint(&names), b.restricted_fingerprint(&names));
    }
}
