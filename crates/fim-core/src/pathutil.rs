use crate::Error;
use std::path::{Path, PathBuf};

/// Mirrors the `PATH_MAX` ceiling the original C implementation enforced on
/// every `snprintf`-built path. Kept as an explicit bound rather than left
/// implicit so callers get a clear `ConfigInvalid` instead of an
/// arbitrarily long path silently flowing into a kernel syscall.
pub const MAX_PATH_LEN: usize = 4096;

/// Join `dir` and `name` into an absolute path, rejecting the result if it
/// would exceed [`MAX_PATH_LEN`].
pub fn join(dir: &Path, name: &str) -> Result<PathBuf, Error> {
    let joined = dir.join(name);
    if joined.as_os_str().len() > MAX_PATH_LEN {
        return Err(Error::ConfigInvalid(format!(
            "path exceeds {MAX_PATH_LEN} bytes: {}",
            joined.display()
        )));
    }
    Ok(joined)
}

/// True iff `candidate` equals `prefix` or begins with `prefix` followed by
/// a path separator.
///
/// This boundary test is mandatory: a plain string/byte prefix comparison
/// would conflate `/a/b` with `/a/bc`.
#[must_use]
pub fn is_prefix_dir(prefix: &Path, candidate: &Path) -> bool {
    if candidate == prefix {
        return true;
    }
    candidate
        .strip_prefix(prefix)
        .map(|rest| rest.components().next().is_some())
        .unwrap_or(false)
}

/// Identity of a filesystem object, independent of the path used to reach
/// it. Two paths refer to the same object iff their `FsId`s are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsId {
    pub ino: u64,
    pub dev: u64,
}

impl FsId {
    /// `lstat`s `path` and returns its filesystem identity.
    ///
    /// Uses `lstat` semantics (does not follow a trailing symlink), matching
    /// the traversal policy elsewhere in this crate: watches are never
    /// installed by following a symlink.
    pub fn of(path: &Path) -> Result<Self, Error> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::symlink_metadata(path)?;
        Ok(Self {
            ino: meta.ino(),
            dev: meta.dev(),
        })
    }
}

/// Equality on `(inode, device)` — two `FsId`s name the same filesystem
/// object iff they compare equal via `==`; this free function exists only
/// to name the operation the spec calls out explicitly.
#[must_use]
pub fn same_fs_object(a: FsId, b: FsId) -> bool {
    a == b
}

/// Basename used for ignore-list matching. Returns the empty string for a
/// path with no final component (e.g. `/`).
#[must_use]
pub fn basename(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Formats `{directory}/{file}` the way the reference CLI front end prints
/// an event, with no trailing slash duplication.
#[must_use]
pub fn format_event_path(directory: &Path, file_name: Option<&str>) -> String {
    match file_name {
        Some(name) if !name.is_empty() => format!("{}/{name}", directory.display()),
        _ => directory.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_dir_respects_boundary() {
        assert!(is_prefix_dir(Path::new("/a/b"), Path::new("/a/b")));
        assert!(is_prefix_dir(Path::new("/a/b"), Path::new("/a/b/c")));
        assert!(!is_prefix_dir(Path::new("/a/b"), Path::new("/a/bc")));
        assert!(!is_prefix_dir(Path::new("/a/b"), Path::new("/a/bc/d")));
        assert!(!is_prefix_dir(Path::new("/a/b"), Path::new("/a")));
    }

    #[test]
    fn join_rejects_oversized_paths() {
        let dir = Path::new("/tmp");
        let huge = "x".repeat(MAX_PATH_LEN + 1);
        assert!(join(dir, &huge).is_err());
        assert!(join(dir, "ok").is_ok());
    }

    #[test]
    fn fs_id_matches_for_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        let a = FsId::of(&file).unwrap();
        let b = FsId::of(&file).unwrap();
        assert!(same_fs_object(a, b));
    }

    #[test]
    fn basename_of_root_is_empty() {
        assert_eq!(basename(Path::new("/")), "");
        assert_eq!(basename(Path::new("/a/b")), "b");
    }

    #[test]
    fn format_event_path_joins_name() {
        assert_eq!(
            format_event_path(Path::new("/a"), Some("b")),
            "/a/b".to_string()
        );
        assert_eq!(format_event_path(Path::new("/a"), None), "/a".to_string());
    }
}
