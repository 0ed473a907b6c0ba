//! Error taxonomy (spec §7).
//!
//! Fatal conditions abort the enclosing operation as a [`PreprocessError`].
//! Recoverable conditions (unknown directives, malformed `#if` expressions
//! that evaluate to 0, unterminated comments at EOF) are instead collected as
//! [`Diagnostic`]s and attached to whatever result the caller was building.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors that abort preprocessing or dependency-graph traversal.
#[derive(Debug, Error)]
pub enum PreprocessError {
    /// A source or header file could not be read from disk.
    #[error("{path}: {source}")]
    UnreadableFile {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A `#define`, `#undef`, `#include`, `#if`/`#elif`, or `#line` directive
    /// could not be parsed.
    #[error("{file}:{line}:{column}: malformed directive: {detail}{source_line}")]
    MalformedDirective {
        /// File the directive appeared in.
        file: String,
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
        /// What was wrong with it.
        detail: String,
        /// Formatted source-line context, if attached.
        source_line: SourceLineSuffix,
    },

    /// An `#if`/`#elif`/`#else`/`#endif` stack was unbalanced, or `#elif`/
    /// `#else` appeared without a matching `#if`.
    #[error("{file}:{line}:{column}: conditional compilation error: {detail}{source_line}")]
    ConditionalStackError {
        /// File the directive appeared in.
        file: String,
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
        /// What was structurally wrong.
        detail: String,
        /// Formatted source-line context, if attached.
        source_line: SourceLineSuffix,
    },

    /// An included file could not be resolved by any configured resolver or
    /// search path.
    #[error("{file}:{line}:{column}: include not found: {target}{source_line}")]
    IncludeNotFound {
        /// File containing the `#include`.
        file: String,
        /// 1-based line number.
        line: usize,
        /// 1-based column number.
        column: usize,
        /// The quoted/angled include target that failed to resolve.
        target: String,
        /// Formatted source-line context, if attached.
        source_line: SourceLineSuffix,
    },

    /// A function-like macro was invoked with the wrong number of arguments,
    /// or its argument list was unterminated.
    #[error("{file}:{line}: macro argument mismatch: {detail}")]
    MacroArgMismatch {
        /// File the invocation appeared in.
        file: String,
        /// 1-based line number.
        line: usize,
        /// Description of the mismatch.
        detail: String,
    },

    /// Macro expansion or include nesting exceeded its configured limit.
    #[error("{file}:{line}: recursion limit exceeded: {detail}")]
    RecursionLimitExceeded {
        /// File where the limit was hit.
        file: String,
        /// 1-based line number.
        line: usize,
        /// What recursed.
        detail: String,
    },

    /// A controlling expression in `#if`/`#elif` could not be evaluated at
    /// all (as opposed to evaluating to 0, which is not an error).
    #[error("{file}:{line}: expression error: {detail}")]
    ExpressionError {
        /// File the expression appeared in.
        file: String,
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        detail: String,
    },

    /// An external collaborator the engine shelled out to (the system `cpp`
    /// for `--headerdeps=cpp`, or `pkg-config`) failed.
    #[error("external tool failed: {detail}")]
    ExternalToolFailure {
        /// Description including the command and its failure.
        detail: String,
    },

    /// A configuration value (e.g. an unknown `--variant` name) was invalid.
    #[error("configuration error: {detail}")]
    Configuration {
        /// What was invalid.
        detail: String,
    },

    /// Any other I/O failure not already covered above.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The engine's cancellation token was set before or during a closure
    /// walk.
    #[error("operation cancelled")]
    Cancelled,
}

/// Lazily-attachable "here's the offending line" suffix, so the common case
/// (no source line attached) doesn't allocate a second string.
#[derive(Debug, Default, Clone)]
pub struct SourceLineSuffix(Option<String>);

impl std::fmt::Display for SourceLineSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Some(line) => write!(f, "\n  {line}"),
            None => Ok(()),
        }
    }
}

impl PreprocessError {
    /// Construct a [`PreprocessError::MalformedDirective`].
    #[must_use]
    pub fn malformed_directive(file: String, line: usize, detail: String) -> Self {
        Self::MalformedDirective {
            file,
            line,
            column: 1,
            detail,
            source_line: SourceLineSuffix::default(),
        }
    }

    /// Construct a [`PreprocessError::ConditionalStackError`].
    #[must_use]
    pub fn conditional_error(file: String, line: usize, detail: String) -> Self {
        Self::ConditionalStackError {
            file,
            line,
            column: 1,
            detail,
            source_line: SourceLineSuffix::default(),
        }
    }

    /// Construct a [`PreprocessError::IncludeNotFound`].
    #[must_use]
    pub fn include_not_found(file: String, line: usize, target: String) -> Self {
        Self::IncludeNotFound {
            file,
            line,
            column: 1,
            target,
            source_line: SourceLineSuffix::default(),
        }
    }

    /// Construct a [`PreprocessError::MacroArgMismatch`].
    #[must_use]
    pub fn macro_arg_mismatch(file: String, line: usize, detail: String) -> Self {
        Self::MacroArgMismatch { file, line, detail }
    }

    /// Construct a [`PreprocessError::RecursionLimitExceeded`].
    #[must_use]
    pub fn recursion_limit_exceeded(file: String, line: usize, detail: String) -> Self {
        Self::RecursionLimitExceeded { file, line, detail }
    }

    /// Construct a [`PreprocessError::ExpressionError`].
    #[must_use]
    pub fn expression_error(file: String, line: usize, detail: String) -> Self {
        Self::ExpressionError { file, line, detail }
    }

    /// Attach a column number to `MalformedDirective`/`ConditionalStackError`/
    /// `IncludeNotFound` variants; a no-op on the others.
    #[must_use]
    pub fn with_column(mut self, col: usize) -> Self {
        match &mut self {
            Self::MalformedDirective { column, .. }
            | Self::ConditionalStackError { column, .. }
            | Self::IncludeNotFound { column, .. } => *column = col,
            _ => {}
        }
        self
    }

    /// Attach the offending source line as context, formatted on its own
    /// indented line beneath the message.
    #[must_use]
    pub fn with_source_line(mut self, line: String) -> Self {
        match &mut self {
            Self::MalformedDirective { source_line, .. }
            | Self::ConditionalStackError { source_line, .. }
            | Self::IncludeNotFound { source_line, .. } => *source_line = SourceLineSuffix(Some(line)),
            _ => {}
        }
        self
    }
}

/// A non-fatal finding surfaced during analysis or preprocessing (spec §7).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Diagnostic {
    /// File the diagnostic pertains to.
    pub file: String,
    /// 1-based line number.
    pub line: usize,
    /// Short machine-stable tag, e.g. `"unknown-directive"`.
    pub tag: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Build a diagnostic.
    #[must_use]
    pub fn new(file: impl Into<String>, line: usize, tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            tag,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: warning: {} [{}]", self.file, self.line, self.message, self.tag)
    }
}
