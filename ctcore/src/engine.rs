//! Top-level orchestrator (spec §4.1 "Engine", Glossary "THE CORE"): owns the
//! content registry and preprocessing cache and wires them together with a
//! resolved [`EngineConfig`] for the two entry points callers actually need —
//! full dependency-closure discovery and single-file macro expansion.
//!
//! Grounded in the teacher's top-level `PreprocessorDriver`, which bundled
//! its macro table, include resolver, and diagnostics behind one struct with
//! `new`/`process` as the public surface. `Engine` keeps that shape but
//! delegates the two concerns the teacher's driver used to do itself —
//! walking `#include`s and expanding one file's text — to
//! [`crate::walker::HeaderDependencyWalker`] and [`crate::preprocessor::preprocess`]
//! respectively, since those are now independently testable.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::analyzer;
use crate::cache::{CacheValue, PreprocessingCache};
use crate::config::EngineConfig;
use crate::content::ContentRegistry;
use crate::error::PreprocessError;
use crate::macro_state::MacroState;
use crate::walker::{DependencyClosure, HeaderDependencyWalker};

/// Cooperative cancellation: the walker checks this between files and bails
/// out with [`PreprocessError::Cancelled`] rather than finishing a closure
/// nobody wants anymore.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A token that starts un-cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Owns the registry and cache a build session reuses across every seed file
/// it walks, plus the configuration all of them preprocess under.
pub struct Engine {
    registry: ContentRegistry,
    cache: PreprocessingCache,
    config: EngineConfig,
    cancellation: CancellationToken,
}

impl Engine {
    /// Build an engine over a fresh, empty registry and cache.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            registry: ContentRegistry::new(),
            cache: PreprocessingCache::new(),
            config,
            cancellation: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token a caller can use to abort a long-running
    /// closure walk from another thread.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The configuration this engine preprocesses under.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute the full `#include` dependency closure rooted at `seed`,
    /// including aggregated magic build flags and implied-source discovery
    /// (spec §4.6, §4.7).
    ///
    /// # Errors
    /// Returns a [`PreprocessError`] if `seed` cannot be read, a visited
    /// file's directives are structurally malformed, or the engine's
    /// cancellation token was set mid-walk.
    pub fn closure(&mut self, seed: &Path) -> Result<DependencyClosure, PreprocessError> {
        let mut walker = HeaderDependencyWalker::with_cancellation(
            &mut self.registry,
            &self.cache,
            &self.config,
            self.cancellation.clone(),
        );
        walker.closure(seed)
    }

    /// Expand one file's own text in isolation, the teacher-compatible
    /// convenience entry point for callers that don't need the full
    /// dependency closure — just "preprocess this file against a starting
    /// macro state."
    ///
    /// # Errors
    /// Returns a [`PreprocessError`] for malformed directives, unbalanced
    /// conditionals, or macro-expansion failures in `path`'s own text.
    pub fn expand_text(&mut self, path: &Path) -> Result<Arc<CacheValue>, PreprocessError> {
        let content = self.registry.load(path)?;
        let display_path = path.display().to_string();
        let analysis = analyzer::analyze(&content, &display_path);
        let state = MacroState::from_config(&self.config);
        let value = crate::preprocessor::preprocess(&content, &analysis, state, &self.config, &display_path)?;
        Ok(self.cache.put(
            crate::cache::CacheKey::Invariant(content.content_hash),
            value,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn expand_text_runs_preprocessor_on_a_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.c");
        fs::write(&path, "#define X 1\nint v = X;\n").unwrap();

        let mut engine = Engine::new(EngineConfig::for_linux());
        let value = engine.expand_text(&path).unwrap();
        assert!(value.expanded_text.contains("int v = 1;"));
    }

    #[test]
    fn closure_delegates_to_the_header_dependency_walker() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.h"), "int a;\n").unwrap();
        let main = dir.path().join("main.c");
        fs::write(&main, "#include \"a.h\"\n").unwrap();

        let mut engine = Engine::new(EngineConfig::for_linux());
        let closure = engine.closure(&main).unwrap();
        assert_eq!(closure.files.len(), 2);
    }

    #[test]
    fn cancelled_token_short_circuits_closure() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.c");
        fs::write(&main, "int x;\n").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let mut engine = Engine::new(EngineConfig::for_linux()).with_cancellation(token);
        let err = engine.closure(&main).unwrap_err();
        assert!(matches!(err, PreprocessError::Cancelled));
    }
}
