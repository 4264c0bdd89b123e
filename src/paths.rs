//! Path normalization and on-disk cache naming.
//!
//! Client paths are normalized lexically before they touch the cache or the
//! storage root; anything that would climb above the root is rejected.
//! Cached copies are named `<root>/<rel>-v<version>` for the canonical read
//! copy of a version and `<root>/<rel>-v<version>-u<fd>` for a writer's
//! private working copy, so concurrent writers of the same version never
//! collide.

use std::path::{Path, PathBuf};

/// Collapse `.`/`..` segments and strip leading slashes. Returns `None` for
/// empty paths and for paths that escape the root.
pub fn normalize_rel(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Canonical read-copy location for `(rel, version)`.
pub fn read_copy_path(root: &Path, rel: &str, version: i32) -> PathBuf {
    let mut os = root.join(rel).into_os_string();
    os.push(format!("-v{version}"));
    PathBuf::from(os)
}

/// Per-writer working-copy location; the descriptor id keeps it unique.
pub fn write_copy_path(root: &Path, rel: &str, version: i32, fd: u64) -> PathBuf {
    let mut os = root.join(rel).into_os_string();
    os.push(format!("-v{version}-u{fd}"));
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dots_and_slashes() {
        assert_eq!(normalize_rel("a/b.txt").as_deref(), Some("a/b.txt"));
        assert_eq!(normalize_rel("/a//b/./c").as_deref(), Some("a/b/c"));
        assert_eq!(normalize_rel("a/../b").as_deref(), Some("b"));
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert_eq!(normalize_rel(".."), None);
        assert_eq!(normalize_rel("a/../../b"), None);
        assert_eq!(normalize_rel(""), None);
        assert_eq!(normalize_rel("/"), None);
    }

    #[test]
    fn cache_naming_matches_layout() {
        let root = Path::new("/cache");
        assert_eq!(
            read_copy_path(root, "a/b.txt", 3),
            PathBuf::from("/cache/a/b.txt-v3")
        );
        assert_eq!(
            write_copy_path(root, "a/b.txt", 3, 17),
            PathBuf::from("/cache/a/b.txt-v3-u17")
        );
    }
}
