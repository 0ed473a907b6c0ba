//! Content-addressed storage for source files.
//!
//! Every file the engine touches is interned by the hash of its bytes, not its
//! path, so that two paths referring to identical bytes (a common symlink or
//! vendored-copy situation in real C trees) share one cache entry and one
//! `#pragma once` marker.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::PreprocessError;

/// A 128-bit content digest, truncated from a `blake3` hash.
///
/// 128 bits is plenty for collision resistance at the scale of a single
/// build's source tree, and keeps cache filenames short.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(u128);

impl ContentHash {
    /// Hash a byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let digest = blake3::hash(bytes);
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&digest.as_bytes()[..16]);
        Self(u128::from_be_bytes(buf))
    }

    /// Hash a sequence of `(name, value)` pairs in a stable, order-independent way.
    ///
    /// Used for macro read-set fingerprints, where the caller has already
    /// sorted the pairs by name.
    #[must_use]
    pub fn of_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hasher = blake3::Hasher::new();
        for (key, value) in pairs {
            hasher.update(key.as_bytes());
            hasher.update(b"\0");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
        let digest = hasher.finalize();
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&digest.as_bytes()[..16]);
        Self(u128::from_be_bytes(buf))
    }

    /// Render as lowercase hex, suitable for a cache filename.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }

    /// The raw 128-bit value.
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A line-start index over a file's bytes, for mapping byte offsets back to
/// 1-based line numbers without rescanning.
#[derive(Clone, Debug)]
pub struct LineIndex {
    /// Byte offset of the start of each line; `line_starts[0]` is always 0.
    line_starts: Vec<usize>,
}

impl LineIndex {
    /// Build the index by scanning for `\n` bytes.
    #[must_use]
    pub fn new(bytes: &[u8]) -> Self {
        let mut line_starts = vec![0];
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    /// The 1-based line number containing `offset`.
    #[must_use]
    pub fn line_at(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// Total number of lines recorded.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

/// An interned, immutable source file.
#[derive(Clone, Debug)]
pub struct FileContent {
    /// The path this content was last loaded from (informational only —
    /// identity is by `content_hash`).
    pub path: PathBuf,
    /// Content hash of `text`.
    pub content_hash: ContentHash,
    /// Decoded source text. Non-UTF-8 bytes are replaced lossily, matching
    /// how a build-automation front end treats source files it cannot fully
    /// trust the encoding of.
    pub text: Arc<str>,
    /// Line-start index over `text`.
    pub line_index: Arc<LineIndex>,
}

/// Registry of interned file contents, keyed by content hash.
///
/// Loading is the only mutation; once a hash is present its bytes never
/// change, so concurrent readers never need to synchronize on an entry that's
/// already there (spec §5: "content registry... single-writer at load time").
#[derive(Default)]
pub struct ContentRegistry {
    by_hash: HashMap<ContentHash, FileContent>,
}

impl ContentRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a file from disk, interning it by content hash.
    ///
    /// # Errors
    /// Returns [`PreprocessError::UnreadableFile`] if the file cannot be read.
    pub fn load(&mut self, path: &Path) -> Result<FileContent, PreprocessError> {
        let bytes = std::fs::read(path).map_err(|source| PreprocessError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.intern(path, &bytes))
    }

    /// Intern already-read bytes under the given path, without touching disk.
    ///
    /// Used by tests and by the header walker when it has already read a
    /// file's bytes via the resolver.
    pub fn intern(&mut self, path: &Path, bytes: &[u8]) -> FileContent {
        let hash = ContentHash::of(bytes);
        if let Some(existing) = self.by_hash.get(&hash) {
            return existing.clone();
        }
        let text: Arc<str> = Arc::from(String::from_utf8_lossy(bytes).into_owned());
        let line_index = Arc::new(LineIndex::new(bytes));
        let content = FileContent {
            path: path.to_path_buf(),
            content_hash: hash,
            text,
            line_index,
        };
        self.by_hash.insert(hash, content.clone());
        content
    }

    /// Look up an already-interned file by its content hash.
    #[must_use]
    pub fn get(&self, hash: ContentHash) -> Option<&FileContent> {
        self.by_hash.get(&hash)
    }

    /// Number of distinct file contents currently interned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether the registry holds no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_intern_once_regardless_of_path() {
        let mut registry = ContentRegistry::new();
        let a = registry.intern(Path::new("a.h"), b"int x;\n");
        let b = registry.intern(Path::new("b.h"), b"int x;\n");
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn line_index_finds_line_starts() {
        let idx = LineIndex::new(b"a\nbb\nccc");
        assert_eq!(idx.line_at(0), 1);
        assert_eq!(idx.line_at(2), 2);
        assert_eq!(idx.line_at(5), 3);
        assert_eq!(idx.line_count(), 3);
    }

    #[test]
    fn fingerprint_of_pairs_is_order_independent_when_pre_sorted() {
        let a = ContentHash::of_pairs([("A", "1"), ("B", "2")]);
        let b = ContentHash::of_pairs([("A", "1"), ("B", "2")]);
        assert_eq!(a, b);
        let c = ContentHash::of_pairs([("A", "1"), ("B", "3")]);
        assert_ne!(a, c);
    }
}
