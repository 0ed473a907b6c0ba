//! Two-tier content-addressed preprocessing cache (spec §3 `CacheKey`/
//! `CacheValue`, §4.5).
//!
//! The **invariant** tier is keyed only by a file's content hash: it holds
//! results for files whose expansion cannot depend on macro state at all
//! (the read set recorded by the last run was empty). The **variant** tier
//! is keyed by `(content hash, read-set fingerprint)` and covers everything
//! else. A lookup tries invariant first, then variant; a miss on both runs
//! the preprocessor and files the result under whichever tier its resulting
//! read set says it belongs in.
//!
//! The critical correctness invariant (spec §4.5, Testable Property 4): a
//! cache hit never merges `defines_delta` into the caller's existing
//! variable-macro partition. It clones the caller's current state and
//! *replaces* its variable partition by replaying `defines_delta` in order,
//! so a `#undef` recorded in the delta is honored even if the caller's
//! incoming state happened to still define that name.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::config::IncludeKind;
use crate::content::ContentHash;
use crate::error::{Diagnostic, PreprocessError};
use crate::macro_def::Macro;
use crate::macro_state::MacroState;
use crate::magic::MagicAnnotation;

/// One recorded mutation to the variable macro partition, in the order it
/// was performed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DefineDelta {
    /// A `#define` (including redefinition).
    Define(Macro),
    /// An `#undef`.
    Undef(String),
}

/// Cached result of preprocessing one file under one macro-state variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheValue {
    /// Fully macro-expanded text.
    pub expanded_text: String,
    /// `#define`/`#undef` operations this file performed, in order.
    pub defines_delta: Vec<DefineDelta>,
    /// Non-fatal findings collected while processing this file.
    pub diagnostics: Vec<Diagnostic>,
    /// Magic build-flag annotations found in this file.
    pub magic: Vec<MagicAnnotation>,
    /// Every macro name this file's conditional directives actually
    /// consulted — the read set that sizes the variant fingerprint.
    pub read_set: BTreeSet<String>,
    /// `#include` targets found in this file, already macro-expanded if
    /// computed — `(line, target, kind)`. These depend on macro state just
    /// like `expanded_text` does, so they're part of the cached value rather
    /// than recomputed by re-running the preprocessor on every cache hit.
    pub includes: Vec<(usize, String, IncludeKind)>,
}

impl CacheValue {
    /// Apply this value's `defines_delta` to `state`, replacing (never
    /// merging) whatever it currently holds for the names touched.
    pub fn apply_defines_delta(&self, state: &mut MacroState) {
        for delta in &self.defines_delta {
            match delta {
                DefineDelta::Define(m) => state.define(m.name.clone(), m.clone()),
                DefineDelta::Undef(name) => state.undef(name),
            }
        }
    }
}

/// Lookup key for the preprocessing cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Content-hash-only key, for files whose expansion doesn't depend on
    /// macro state.
    Invariant(ContentHash),
    /// Content hash plus the restricted read-set fingerprint.
    Variant(ContentHash, ContentHash),
}

impl CacheKey {
    fn filename(self) -> String {
        match self {
            Self::Invariant(h) => format!("inv-{}", h.to_hex()),
            Self::Variant(h, fp) => format!("var-{}-{}", h.to_hex(), fp.to_hex()),
        }
    }
}

type InFlight = Arc<OnceCell<Result<Arc<CacheValue>, String>>>;

/// The two-tier cache, safe to share across worker threads.
pub struct PreprocessingCache {
    invariant: DashMap<ContentHash, Arc<CacheValue>>,
    variant: DashMap<(ContentHash, ContentHash), Arc<CacheValue>>,
    /// The read set a content hash's last computation actually consulted,
    /// so a caller can derive the variant fingerprint *before* running the
    /// preprocessor again, rather than only after (spec §4.5). Absent for a
    /// hash never computed before, or one whose only computation landed in
    /// the invariant tier (empty read set).
    read_sets: DashMap<ContentHash, BTreeSet<String>>,
    inflight: DashMap<CacheKey, InFlight>,
    disk_dir: Option<PathBuf>,
}

impl PreprocessingCache {
    /// An in-memory-only cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            invariant: DashMap::new(),
            variant: DashMap::new(),
            read_sets: DashMap::new(),
            inflight: DashMap::new(),
            disk_dir: None,
        }
    }

    /// The read set recorded by the last computation for `hash`, if any —
    /// lets a caller derive a variant fingerprint without recomputing first.
    #[must_use]
    pub fn known_read_set(&self, hash: ContentHash) -> Option<BTreeSet<String>> {
        self.read_sets.get(&hash).map(|r| r.clone())
    }

    /// Total number of distinct entries across both cache tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.invariant.len() + self.variant.len()
    }

    /// Whether the cache currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An in-memory cache that also persists entries under `dir`.
    #[must_use]
    pub fn with_disk_store(dir: PathBuf) -> Self {
        Self {
            disk_dir: Some(dir),
            ..Self::new()
        }
    }

    /// Look up a previously-stored value without running anything.
    #[must_use]
    pub fn get(&self, key: CacheKey) -> Option<Arc<CacheValue>> {
        match key {
            CacheKey::Invariant(h) => self.invariant.get(&h).map(|v| v.clone()),
            CacheKey::Variant(h, fp) => self.variant.get(&(h, fp)).map(|v| v.clone()),
        }
    }

    /// Get a value, computing it with `produce` on miss. Concurrent callers
    /// requesting the same key share one in-flight computation (spec §5).
    ///
    /// # Errors
    /// Propagates whatever `produce` returns on failure.
    pub fn get_or_insert_with(
        &self,
        key: CacheKey,
        produce: impl FnOnce() -> Result<CacheValue, PreprocessError>,
    ) -> Result<Arc<CacheValue>, PreprocessError> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        if let Some(hit) = self.load_from_disk(key) {
            self.insert(key, hit.clone());
            return Ok(hit);
        }

        let slot = self
            .inflight
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = slot.get_or_init(|| produce().map(Arc::new).map_err(|e| e.to_string()));
        self.inflight.remove(&key);

        match result {
            Ok(value) => {
                self.insert(key, value.clone());
                Ok(value.clone())
            }
            Err(message) => Err(PreprocessError::Configuration {
                detail: message.clone(),
            }),
        }
    }

    /// Record an already-computed value under `key` directly, for callers
    /// (the walker) that had to run the preprocessor once just to discover
    /// which tier a never-before-seen content hash belongs in.
    pub fn put(&self, key: CacheKey, value: CacheValue) -> Arc<CacheValue> {
        let value = Arc::new(value);
        self.insert(key, value.clone());
        value
    }

    fn insert(&self, key: CacheKey, value: Arc<CacheValue>) {
        match key {
            CacheKey::Invariant(h) => {
                self.invariant.insert(h, value.clone());
            }
            CacheKey::Variant(h, fp) => {
                self.read_sets.insert(h, value.read_set.clone());
                self.variant.insert((h, fp), value.clone());
            }
        }
        self.store_to_disk(key, &value);
    }

    fn load_from_disk(&self, key: CacheKey) -> Option<Arc<CacheValue>> {
        let dir = self.disk_dir.as_ref()?;
        let path = dir.join(key.filename());
        let bytes = std::fs::read(path).ok()?;
        let (value, _): (CacheValue, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).ok()?;
        Some(Arc::new(value))
    }

    /// Write-through to disk. A failure here is logged and otherwise
    /// ignored — per spec §7, a cache-store failure downgrades silently to
    /// in-memory-only rather than aborting the build.
    fn store_to_disk(&self, key: CacheKey, value: &CacheValue) {
        let Some(dir) = &self.disk_dir else { return };
        if let Err(err) = self.try_store_to_disk(dir, key, value) {
            tracing::debug!(error = %err, "cache disk store failed, continuing in-memory-only");
        }
    }

    fn try_store_to_disk(&self, dir: &Path, key: CacheKey, value: &CacheValue) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let encoded = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(std::io::Error::other)?;
        let final_path = dir.join(key.filename());
        let tmp_path = dir.join(format!("{}.tmp-{}", key.filename(), std::process::id()));
        std::fs::write(&tmp_path, encoded)?;
        std::fs::rename(&tmp_path, &final_path)
    }
}

impl Default for PreprocessingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macro_def::MacroBody;

    #[test]
    fn concurrent_misses_on_same_key_only_compute_once() {
        let cache = PreprocessingCache::new();
        let key = CacheKey::Invariant(ContentHash::of(b"x"));
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let produce = || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(CacheValue {
                expanded_text: "x".to_string(),
                defines_delta: vec![],
                diagnostics: vec![],
                magic: vec![],
                read_set: BTreeSet::new(),
                includes: vec![],
            })
        };
        let _ = cache.get_or_insert_with(key, produce);
        let _ = cache.get_or_insert_with(key, produce);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn defines_delta_replaces_rather_than_merges_on_undef() {
        let mut state = MacroState::empty();
        state.define(
            "FOO",
            Macro::defined_at("FOO", MacroBody::ObjectLike(vec![]), "a.c", 1),
        );
        assert!(state.is_defined("FOO"));

        let value = CacheValue {
            expanded_text: String::new(),
            defines_delta: vec![DefineDelta::Undef("FOO".to_string())],
            diagnostics: vec![],
            magic: vec![],
            read_set: BTreeSet::new(),
            includes: vec![],
        };
        value.apply_defines_delta(&mut state);
        assert!(!state.is_defined("FOO"));
    }
}
