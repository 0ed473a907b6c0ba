//! Configuration (spec §9: "model as an explicitly enumerated options
//! record; unknown keys are rejected rather than silently accepted").

use std::path::PathBuf;
use std::rc::Rc;

/// Kind of include directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum IncludeKind {
    /// Local include with quotes: `#include "file.h"`.
    Local,
    /// System include with angles: `#include <file.h>`.
    System,
}

/// Context passed to an [`IncludeResolver`] so it can make cycle- and
/// search-path-aware decisions.
#[derive(Clone, Debug, Default)]
pub struct IncludeContext {
    /// Stack of currently-included files, nearest last.
    pub include_stack: Vec<String>,
    /// Include directories to search, in search order.
    pub include_dirs: Vec<PathBuf>,
}

/// Resolves an `#include` target to a path on disk, or `None` if it cannot be found.
pub type IncludeResolver = Rc<dyn Fn(&str, IncludeKind, &IncludeContext) -> Option<PathBuf>>;

/// Handles `#warning` directive text.
pub type WarningHandler = Rc<dyn Fn(&str)>;

/// Target operating system for preprocessing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Linux.
    Linux,
    /// Windows.
    Windows,
    /// macOS.
    MacOS,
}

/// Compiler dialect for preprocessing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compiler {
    /// GNU Compiler Collection.
    GCC,
    /// LLVM Clang.
    Clang,
    /// Microsoft Visual C++.
    MSVC,
}

/// `--headerdeps` mode (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HeaderDepsMode {
    /// Walk the include graph directly with the built-in preprocessor.
    #[default]
    Direct,
    /// Shell out to the system preprocessor's `-MM` output.
    Cpp,
}

/// A named, resolved `(target, compiler, extra defines)` triple (spec
/// Glossary: "Variant").
#[derive(Clone, Debug)]
pub struct VariantProfile {
    /// Profile name, as requested via `--variant`.
    pub name: String,
    /// Target OS.
    pub target: Target,
    /// Compiler dialect.
    pub compiler: Compiler,
    /// Macros this variant defines in addition to the compiler/target built-ins.
    pub extra_defines: Vec<(String, String)>,
}

impl VariantProfile {
    /// Resolve a named variant from the fixed built-in table, or `None` if
    /// `name` isn't recognized.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        let (target, compiler) = match name {
            "gcc.debug" | "gcc.release" => (Target::Linux, Compiler::GCC),
            "clang.debug" | "clang.release" => (Target::Linux, Compiler::Clang),
            "msvc.debug" | "msvc.release" => (Target::Windows, Compiler::MSVC),
            "macos.clang" => (Target::MacOS, Compiler::Clang),
            _ => return None,
        };
        let extra_defines = if name.ends_with("debug") {
            vec![("DEBUG".to_string(), "1".to_string())]
        } else {
            vec![("NDEBUG".to_string(), "1".to_string())]
        };
        Some(Self {
            name: name.to_string(),
            target,
            compiler,
            extra_defines,
        })
    }
}

/// Top-level engine configuration (spec §9 "Configuration object").
///
/// Every field is explicit; there is no catch-all map of arbitrary keys, so a
/// typo'd `--variant` name is rejected at construction rather than silently
/// falling back to defaults.
pub struct EngineConfig {
    /// Resolved variant (target + compiler + extra defines).
    pub variant: VariantProfile,
    /// Maximum recursion depth for macro expansion and nested includes.
    pub recursion_limit: usize,
    /// Quoted/angled include search directories, in search order.
    pub include_dirs: Vec<PathBuf>,
    /// How `#include` targets are resolved; `None` uses the default
    /// filesystem resolver (spec §4.6).
    pub include_resolver: Option<IncludeResolver>,
    /// Optional `#warning` sink.
    pub warning_handler: Option<WarningHandler>,
    /// Header-dependency discovery strategy.
    pub headerdeps: HeaderDepsMode,
}

impl EngineConfig {
    /// Build a config from a named variant, falling back to `gcc.debug` when
    /// `variant_name` is `None`.
    ///
    /// # Errors
    /// Returns [`crate::error::PreprocessError::Configuration`] if `variant_name`
    /// is `Some` but not a known variant.
    pub fn from_variant_name(
        variant_name: Option<&str>,
    ) -> Result<Self, crate::error::PreprocessError> {
        let name = variant_name.unwrap_or("gcc.debug");
        let variant = VariantProfile::lookup(name).ok_or_else(|| {
            crate::error::PreprocessError::Configuration {
                detail: format!("unknown variant '{name}'"),
            }
        })?;
        Ok(Self {
            variant,
            recursion_limit: 128,
            include_dirs: Vec::new(),
            include_resolver: None,
            warning_handler: None,
            headerdeps: HeaderDepsMode::Direct,
        })
    }

    /// Convenience constructor: Linux + GCC, the historical default.
    #[must_use]
    pub fn for_linux() -> Self {
        match Self::from_variant_name(Some("gcc.debug")) {
            Ok(cfg) => cfg,
            Err(_) => unreachable!("gcc.debug is always a known variant"),
        }
    }

    /// Override the include search directories.
    #[must_use]
    pub fn with_include_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.include_dirs = dirs;
        self
    }

    /// Override the include resolver.
    #[must_use]
    pub fn with_include_resolver<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, IncludeKind, &IncludeContext) -> Option<PathBuf> + 'static,
    {
        self.include_resolver = Some(Rc::new(f));
        self
    }

    /// Set a `#warning` sink.
    #[must_use]
    pub fn with_warning_handler(mut self, handler: WarningHandler) -> Self {
        self.warning_handler = Some(handler);
        self
    }

    /// Override the header-dependency discovery strategy.
    #[must_use]
    pub const fn with_headerdeps(mut self, mode: HeaderDepsMode) -> Self {
        self.headerdeps = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_variant_is_rejected() {
        let err = EngineConfig::from_variant_name(Some("bogus")).unwrap_err();
        assert!(matches!(err, crate::error::PreprocessError::Configuration { .. }));
    }

    #[test]
    fn known_variant_resolves() {
        let cfg = EngineConfig::from_variant_name(Some("clang.release")).unwrap();
        assert_eq!(cfg.variant.compiler, Compiler::Clang);
        assert!(cfg
            .variant
            .extra_defines
            .contains(&("NDEBUG".to_string(), "1".to_string())));
    }
}
