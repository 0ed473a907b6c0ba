//! Default filesystem `#include` resolver (spec §4.6).
//!
//! The teacher's [`crate::config::IncludeResolver`] type is always a
//! caller-supplied closure with no built-in filesystem behavior; this module
//! adds the default one, grounded in the teacher's own
//! `IncludeContext { include_stack, include_dirs }` shape: quoted includes
//! search the including file's own directory first, then the configured
//! include directories in order; angled includes search only the configured
//! include directories.

use std::path::{Path, PathBuf};

use crate::config::{IncludeContext, IncludeKind};

/// Resolve `target` against the filesystem using spec §4.6's search order.
#[must_use]
pub fn resolve_filesystem(target: &str, kind: IncludeKind, ctx: &IncludeContext) -> Option<PathBuf> {
    if kind == IncludeKind::Local {
        if let Some(including_file) = ctx.include_stack.last() {
            let dir = Path::new(including_file).parent().unwrap_or_else(|| Path::new("."));
            let candidate = dir.join(target);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    for dir in &ctx.include_dirs {
        let candidate = dir.join(target);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn quoted_include_prefers_including_files_own_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("local.h"), "").unwrap();
        let including = sub.join("main.c");
        fs::write(&including, "").unwrap();

        let ctx = IncludeContext {
            include_stack: vec![including.to_string_lossy().into_owned()],
            include_dirs: vec![dir.path().to_path_buf()],
        };
        let resolved = resolve_filesystem("local.h", IncludeKind::Local, &ctx).unwrap();
        assert_eq!(resolved, sub.join("local.h"));
    }

    #[test]
    fn angled_include_only_searches_include_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sys.h"), "").unwrap();
        let ctx = IncludeContext {
            include_stack: vec!["whatever.c".to_string()],
            include_dirs: vec![dir.path().to_path_buf()],
        };
        let resolved = resolve_filesystem("sys.h", IncludeKind::System, &ctx).unwrap();
        assert_eq!(resolved, dir.path().join("sys.h"));
    }

    #[test]
    fn unresolvable_target_returns_none() {
        let ctx = IncludeContext::default();
        assert!(resolve_filesystem("missing.h", IncludeKind::System, &ctx).is_none());
    }
}
