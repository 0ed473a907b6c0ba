//! Magic build-flag extraction (spec §4.7, §6): `//#KEY=value` comment
//! annotations harvested during file analysis.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classification of a recognized `//#KEY=value` annotation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MagicKey {
    /// `//#CXXFLAGS=...`
    CxxFlags,
    /// `//#CPPFLAGS=...`
    CppFlags,
    /// `//#CFLAGS=...`
    CFlags,
    /// `//#LINKFLAGS=...`
    LinkFlags,
    /// `//#LDFLAGS=...`
    LdFlags,
    /// `//#PKG-CONFIG=...`
    PkgConfig,
    /// `//#SOURCE=...`
    Source,
    /// An annotation with a key outside the fixed set above, passed through
    /// opaquely per spec §7.
    Other(String),
}

impl MagicKey {
    fn from_raw(raw: &str) -> Self {
        match raw {
            "CXXFLAGS" => Self::CxxFlags,
            "CPPFLAGS" => Self::CppFlags,
            "CFLAGS" => Self::CFlags,
            "LINKFLAGS" => Self::LinkFlags,
            "LDFLAGS" => Self::LdFlags,
            "PKG-CONFIG" => Self::PkgConfig,
            "SOURCE" => Self::Source,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One extracted annotation, with its source location for "first occurrence
/// wins" dedup and for diagnostics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MagicAnnotation {
    /// Classified key.
    pub key: MagicKey,
    /// Raw value text after `=`.
    pub value: String,
    /// 1-based line number the annotation appeared on.
    pub line: usize,
}

static MAGIC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^//#([A-Z][A-Z0-9_-]*)=(.*)$").expect("static magic-annotation pattern is valid")
});

/// Scan comment-body text (the portion after `//`, not including the `//`
/// itself) for a `#KEY=value` magic annotation.
#[must_use]
pub fn parse_comment_body(line_comment_body: &str, line: usize) -> Option<MagicAnnotation> {
    let candidate = format!("//{}", line_comment_body.trim_end());
    MAGIC_RE.captures(&candidate).map(|caps| MagicAnnotation {
        key: MagicKey::from_raw(&caps[1]),
        value: caps[2].to_string(),
        line,
    })
}

/// Deduplicate a sequence of annotations by key, keeping the first occurrence
/// of each (spec §4.7, Testable Property 7).
#[must_use]
pub fn dedup_first_wins(annotations: Vec<MagicAnnotation>) -> Vec<MagicAnnotation> {
    let mut seen = std::collections::HashSet::new();
    annotations
        .into_iter()
        .filter(|a| seen.insert(format!("{:?}", a.key)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_fixed_keys() {
        let a = parse_comment_body("#CXXFLAGS=-std=c++20", 3).unwrap();
        assert_eq!(a.key, MagicKey::CxxFlags);
        assert_eq!(a.value, "-std=c++20");
    }

    #[test]
    fn unknown_key_passes_through_opaquely() {
        let a = parse_comment_body("#FANCYFLAGS=--wat", 1).unwrap();
        assert_eq!(a.key, MagicKey::Other("FANCYFLAGS".to_string()));
    }

    #[test]
    fn non_magic_comment_is_ignored() {
        assert!(parse_comment_body(" just a comment", 1).is_none());
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let annotations = vec![
            MagicAnnotation { key: MagicKey::CxxFlags, value: "-O2".into(), line: 1 },
            MagicAnnotation { key: MagicKey::CxxFlags, value: "-O3".into(), line: 5 },
        ];
        let deduped = dedup_first_wins(annotations);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].value, "-O2");
    }
}
