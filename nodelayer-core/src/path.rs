//! Helpers for absolute, slash-separated node paths.
//!
//! Paths are the identity of documents. They are always absolute (`/a/b`), never end in a
//! slash (except the root `/`), and never contain empty or relative segments.

use crate::error::{StoreError, StoreResult};

/// The root path.
pub const ROOT: &str = "/";

/// Validates that `path` is an absolute, normalized path.
pub fn validate(path: &str) -> StoreResult<()> {
    if path == ROOT {
        return Ok(());
    }

    let valid = path.starts_with('/')
        && !path.ends_with('/')
        && path[1..]
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

/// Returns the parent path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }

    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Returns the last segment of the path. The root has an empty name.
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a child name onto a parent path.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Number of segments below the root.
pub fn depth(path: &str) -> usize {
    if path == ROOT {
        0
    } else {
        path.matches('/').count()
    }
}

/// Whether `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path != ROOT;
    }

    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Rewrites `path` from below `from` to below `to`. Returns `None` when `path` is
/// neither `from` nor one of its descendants.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        Some(to.to_string())
    } else if is_descendant(path, from) {
        let rest = if from == ROOT { path } else { &path[from.len()..] };
        Some(if to == ROOT { rest.to_string() } else { format!("{to}{rest}") })
    } else {
        None
    }
}

/// All ancestors of `path` from the root downwards, excluding `path` itself.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = parent(path);

    while let Some(p) = current {
        out.push(p.to_string());
        current = parent(p);
    }

    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_paths() {
        assert!(validate("/").is_ok());
        assert!(validate("/functional/user").is_ok());
        assert!(validate("functional").is_err());
        assert!(validate("/functional/").is_err());
        assert!(validate("/a//b").is_err());
        assert!(validate("/a/../b").is_err());
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(name("/a/b"), "b");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn descendants_and_rebase() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant("/a", "/"));
        assert_eq!(rebase("/a/b/c", "/a/b", "/x"), Some("/x/c".to_string()));
        assert_eq!(rebase("/a/b", "/a/b", "/x/y"), Some("/x/y".to_string()));
        assert_eq!(rebase("/a/bc", "/a/b", "/x"), None);
        assert_eq!(depth("/a/b"), 2);
        assert_eq!(ancestors("/a/b/c"), vec!["/", "/a", "/a/b"]);
    }
}
