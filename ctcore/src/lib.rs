#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # ctcore
//!
//! Header-dependency analysis and macro-aware C/C++ preprocessing: walks a
//! translation unit's `#include` graph, evaluates conditional compilation
//! against a mutable macro environment, extracts magic build-flag
//! annotations (`//#CXXFLAGS=`, `//#LINKFLAGS=`, `//#PKG-CONFIG=`,
//! `//#SOURCE=`), and caches preprocessing results by content hash plus the
//! minimal set of macros each file actually consulted.
//!
//! The [`Engine`] is the entry point: it owns the [`ContentRegistry`] and
//! [`PreprocessingCache`] a build session reuses across every file it walks.
//!
//! ```rust,no_run
//! use ctcore::{Engine, EngineConfig};
//! use std::path::Path;
//!
//! let mut engine = Engine::new(EngineConfig::for_linux());
//! let closure = engine.closure(Path::new("main.c")).unwrap();
//! for file in &closure.files {
//!     println!("{}", file.display());
//! }
//! ```

mod analyzer;
mod cache;
mod config;
mod content;
mod date_time;
mod engine;
mod error;
mod expr;
mod lexer;
mod lock;
mod macro_def;
mod macro_state;
mod magic;
mod preprocessor;
mod resolver;
mod token;
mod walker;

pub use analyzer::{AnalysisResult, Directive, DirectiveKind, analyze};
pub use cache::{CacheKey, CacheValue, DefineDelta, PreprocessingCache};
pub use config::{
    Compiler, EngineConfig, HeaderDepsMode, IncludeContext, IncludeKind, IncludeResolver, Target,
    VariantProfile, WarningHandler,
};
pub use content::{ContentHash, ContentRegistry, FileContent};
pub use engine::{CancellationToken, Engine};
pub use error::{Diagnostic, PreprocessError};
pub use expr::{EvalOutcome, evaluate};
pub use lock::{ArtifactLock, LockGuard, NullLock, NullLockGuard};
pub use macro_def::{Macro, MacroBody};
pub use macro_state::{MacroState, MacroValue};
pub use magic::{MagicAnnotation, MagicKey};
pub use preprocessor::preprocess;
pub use resolver::resolve_filesystem;
pub use walker::{DependencyClosure, HeaderDependencyWalker};
