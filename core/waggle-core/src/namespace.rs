//! Namespace resolution and scoped deletion.
//!
//! A namespace is the working directory an agent was started in, exactly as
//! the shell's `pwd` reports it. Normalization must produce the same string
//! the hook wrote, so it is purely lexical: `~` is expanded, relative paths
//! are joined onto the current directory, `.` segments and doubled or
//! trailing separators are dropped, and symlinks are never resolved. `..` is
//! kept as written, since `pwd` never emits it and collapsing it lexically
//! can point somewhere the shell would not.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, WaggleError};
use crate::store::Store;

/// Normalizes `path` against the process's current directory and `$HOME`.
pub fn normalize(path: &str) -> Result<String> {
    let cwd = std::env::current_dir()
        .map_err(|err| WaggleError::io("Failed to read current directory", err))?;
    let home = dirs::home_dir();
    if needs_home(path) && home.is_none() {
        return Err(WaggleError::HomeDirNotFound);
    }
    Ok(normalize_with(path, home.as_deref(), &cwd))
}

/// Lexical normalization with explicit home and working directories.
pub fn normalize_with(path: &str, home: Option<&Path>, cwd: &Path) -> String {
    let expanded = match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => home.to_path_buf(),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            home.join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    let text = normalized.to_string_lossy().into_owned();
    if text.len() > 1 && text.ends_with('/') {
        text.trim_end_matches('/').to_string()
    } else if text.is_empty() {
        "/".to_string()
    } else {
        text
    }
}

fn needs_home(path: &str) -> bool {
    path == "~" || path.starts_with("~/")
}

/// Turns a client root hint into a path.
///
/// `file:///p` and `file://localhost/p` yield `/p`, percent-decoded. Anything
/// else is taken as a path already.
pub fn decode_root_uri(root: &str) -> String {
    let Some(rest) = root.strip_prefix("file://") else {
        return root.to_string();
    };

    // Drop the authority (empty or a host name); the path starts at the next '/'.
    let path = match rest.find('/') {
        Some(index) => &rest[index..],
        None => "",
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();

    match urlencoding::decode(path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(path.as_bytes())).into_owned(),
    }
}

/// Picks the namespace for a request: the client root hint when present,
/// otherwise the explicit value. Empty strings count as absent.
pub fn resolve_namespace(root_hint: Option<&str>, explicit: Option<&str>) -> Result<String> {
    let hinted = root_hint
        .map(decode_root_uri)
        .filter(|path| !path.is_empty());
    let raw = match hinted {
        Some(path) => path,
        None => explicit
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(WaggleError::NamespaceUnresolved)?,
    };
    normalize(&raw)
}

/// Normalizes `namespace` and deletes it and its subtree from the store.
pub fn delete_namespace(store: &Store, namespace: &str) -> Result<usize> {
    let namespace = normalize(namespace)?;
    let deleted = store.delete_by_namespace(&namespace)?;
    tracing::info!(namespace = %namespace, deleted, "Deleted namespace agents");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StatusRecord;

    fn norm(path: &str) -> String {
        normalize_with(path, Some(Path::new("/home/pete")), Path::new("/work/dir"))
    }

    #[test]
    fn normalize_strips_trailing_separators_but_keeps_root() {
        assert_eq!(norm("/repo/"), "/repo");
        assert_eq!(norm("/repo///"), "/repo");
        assert_eq!(norm("/"), "/");
        assert_eq!(norm("//"), "/");
    }

    #[test]
    fn normalize_expands_home() {
        assert_eq!(norm("~"), "/home/pete");
        assert_eq!(norm("~/"), "/home/pete");
        assert_eq!(norm("~/Code/waggle"), "/home/pete/Code/waggle");
        assert_eq!(norm("~other/x"), "/work/dir/~other/x");
    }

    #[test]
    fn normalize_makes_relative_paths_absolute() {
        assert_eq!(norm("sub"), "/work/dir/sub");
        assert_eq!(norm("."), "/work/dir");
        assert_eq!(norm("./a/./b"), "/work/dir/a/b");
        assert_eq!(norm(""), "/work/dir");
    }

    #[test]
    fn normalize_is_lexical() {
        assert_eq!(norm("/a//b"), "/a/b");
        assert_eq!(norm("/a/b/../c"), "/a/b/../c");
    }

    #[test]
    fn normalize_does_not_resolve_symlinks() {
        let dir = tempfile::tempdir().expect("temp dir");
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        std::fs::create_dir(&real).expect("create real");
        std::os::unix::fs::symlink(&real, &link).expect("symlink");

        let normalized = normalize(&link.to_string_lossy()).expect("normalize");
        assert_eq!(normalized, link.to_string_lossy());
    }

    #[test]
    fn decode_root_uri_handles_file_uris() {
        assert_eq!(decode_root_uri("file:///path/to/repo"), "/path/to/repo");
        assert_eq!(decode_root_uri("file://localhost/path/to/repo"), "/path/to/repo");
        assert_eq!(
            decode_root_uri("file:///Users/pete/My%20Project%20%28copy%29"),
            "/Users/pete/My Project (copy)"
        );
        assert_eq!(decode_root_uri("/plain/path"), "/plain/path");
        assert_eq!(decode_root_uri("file://"), "");
    }

    #[test]
    fn resolve_prefers_root_hint() {
        let resolved =
            resolve_namespace(Some("file:///path/to/repo/"), Some("/explicit")).expect("resolve");
        assert_eq!(resolved, "/path/to/repo");
    }

    #[test]
    fn resolve_falls_back_to_explicit() {
        assert_eq!(
            resolve_namespace(None, Some("/explicit/path/")).expect("resolve"),
            "/explicit/path"
        );
        assert_eq!(
            resolve_namespace(Some(""), Some("/explicit")).expect("resolve"),
            "/explicit"
        );
    }

    #[test]
    fn resolve_without_any_source_is_actionable_error() {
        for (hint, explicit) in [(None, None), (Some(""), Some("")), (None, Some(""))] {
            let err = resolve_namespace(hint, explicit).unwrap_err();
            assert!(matches!(err, WaggleError::NamespaceUnresolved));
            assert!(err.to_string().contains("namespace parameter"));
        }
    }

    #[test]
    fn delete_namespace_normalizes_before_matching() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("state.db")).expect("open store");
        for (key, namespace) in [
            ("a+$0+1", "/repo"),
            ("b+$1+2", "/repo/sub"),
            ("c+$2+3", "/repository"),
        ] {
            store
                .upsert(&StatusRecord::new(key, namespace, "working"))
                .expect("seed row");
        }

        assert_eq!(delete_namespace(&store, "/repo/").expect("delete"), 2);
        let remaining: Vec<String> = store
            .select_all()
            .expect("select")
            .into_iter()
            .filter_map(|row| row.namespace)
            .collect();
        assert_eq!(remaining, vec!["/repository".to_string()]);
    }

    #[test]
    fn delete_root_namespace_keeps_other_directories() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::open(dir.path().join("state.db")).expect("open store");
        for (key, namespace) in [
            ("a+$0+1", "/"),
            ("b+$1+2", "/home/u/proj"),
            ("c+$2+3", "/srv/other"),
        ] {
            store
                .upsert(&StatusRecord::new(key, namespace, "working"))
                .expect("seed row");
        }

        assert_eq!(delete_namespace(&store, "/").expect("delete"), 1);
        assert_eq!(store.count().expect("count"), 2);
    }
}
