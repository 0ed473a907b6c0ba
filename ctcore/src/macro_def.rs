//! The macro definition type (spec §3 `Macro`, §9 "tagged `Macro` variant").

use crate::token::Token;

/// The body shape of a macro definition.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum MacroBody {
    /// `#define NAME body` — expands in place, no argument list.
    ObjectLike(Vec<Token>),
    /// `#define NAME(a, b, ...) body` — requires a parenthesized invocation.
    FunctionLike {
        /// Formal parameter names, in order.
        params: Vec<String>,
        /// Whether the last parameter is `...` / `__VA_ARGS__`.
        is_variadic: bool,
        /// Replacement token sequence.
        body: Vec<Token>,
    },
}

impl MacroBody {
    /// The raw replacement tokens, regardless of shape.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        match self {
            Self::ObjectLike(tokens) => tokens,
            Self::FunctionLike { body, .. } => body,
        }
    }

    /// Whether this macro requires a parenthesized argument list to invoke.
    #[must_use]
    pub const fn is_function_like(&self) -> bool {
        matches!(self, Self::FunctionLike { .. })
    }
}

/// A single macro definition, with enough provenance to explain itself in
/// diagnostics and to drive the magic-flag extractor's "defined here" notes.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Macro {
    /// Name this macro is bound under.
    pub name: String,
    /// Replacement shape and tokens.
    pub body: MacroBody,
    /// `(file, line)` of the `#define` that produced this macro, or `None`
    /// for compiler/target built-ins that have no source location.
    pub definition_location: Option<(String, usize)>,
    /// Whether this is a compiler/target built-in rather than a file-defined
    /// macro. Built-ins live in [`crate::macro_state::MacroState`]'s `core`
    /// partition.
    pub is_builtin: bool,
}

impl Macro {
    /// Construct a file-defined macro at the given location.
    #[must_use]
    pub fn defined_at(name: impl Into<String>, body: MacroBody, file: impl Into<String>, line: usize) -> Self {
        Self {
            name: name.into(),
            body,
            definition_location: Some((file.into(), line)),
            is_builtin: false,
        }
    }

    /// Construct a compiler/target built-in with no source location.
    #[must_use]
    pub fn builtin(name: impl Into<String>, body: MacroBody) -> Self {
        Self {
            name: name.into(),
            body,
            definition_location: None,
            is_builtin: true,
        }
    }
}
