//! Bounded-depth directory traversal that installs a kernel watch for each
//! qualifying directory it discovers, honoring the session's ignore list
//! and directories-only policy.
//!
//! Built on `walkdir` rather than a hand-rolled recursive descent (or a
//! port of the source's `nftw`-based traversal): `WalkDir::max_depth`
//! enforces the depth cap, `follow_links(false)` (the default) gives the
//! physical-only traversal the spec requires, and `filter_entry` returning
//! `false` on a directory is exactly `nftw`'s `FTW_SKIP_SUBTREE`.

use crate::session::{InstallOutcome, WatchSession};
use fim_core::Error;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Walks `root` and installs a watch for every directory that survives the
/// session's ignore list, only-directories flag, and `max_depth` (`None`
/// means unlimited, otherwise a depth relative to `root`). Returns the
/// number of watches newly installed (duplicates and skips don't count).
pub(crate) fn walk_and_install(
    session: &mut WatchSession,
    root: &Path,
    max_depth: Option<usize>,
) -> Result<usize, Error> {
    let ignores = session_ignores(session);
    let only_directories = session.flags().only_directories;
    let root_paths: HashSet<PathBuf> = session
        .roots()
        .iter()
        .filter_map(|r| r.path.clone())
        .collect();

    let mut walker = WalkDir::new(root).follow_links(false);
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }

    let iter = walker.into_iter().filter_entry(move |entry| {
        if entry.depth() == 0 {
            // Never prune the traversal root itself.
            return true;
        }
        let name = entry.file_name().to_str().unwrap_or("");
        !(entry.file_type().is_dir() && ignores.contains(name))
    });

    let mut installed = 0usize;
    for entry in iter {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                if err.io_error().map(std::io::Error::kind) == Some(std::io::ErrorKind::NotFound) {
                    tracing::debug!(%err, "path vanished during traversal, continuing");
                    continue;
                }
                return Err(Error::other(format!("directory walk failed: {err}")));
            }
        };

        let path = entry.path();
        let is_dir = entry.file_type().is_dir();
        if !is_dir {
            if only_directories {
                continue;
            }
            if !root_paths.contains(path) {
                continue;
            }
        }

        match session.install_watch_for_path(path)? {
            InstallOutcome::Installed(_) => installed += 1,
            InstallOutcome::AlreadyPresent | InstallOutcome::Skipped => {}
        }
    }

    Ok(installed)
}

fn session_ignores(session: &WatchSession) -> HashSet<String> {
    session.ignores_snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use inotify::WatchMask;
    use std::collections::HashSet as StdHashSet;
    use tempfile::tempdir;

    fn build_tree(root: &Path) {
        std::fs::create_dir_all(root.join("b/c")).unwrap();
        std::fs::create_dir_all(root.join("d")).unwrap();
    }

    fn new_recursive_session(root: PathBuf, ignores: StdHashSet<String>, max_depth: u32) -> WatchSession {
        let inotify = inotify::Inotify::init().expect("inotify available in test sandbox");
        let watches = inotify.watches();
        let mut session = WatchSession::new(SessionConfig {
            id: "t".into(),
            pid: std::process::id() as i32,
            roots: vec![root],
            ignores,
            requested_mask: WatchMask::empty(),
            only_directories: true,
            recursive: true,
            follow_moves: false,
            max_depth,
            tags: Vec::new(),
        })
        .unwrap();
        session.attach_watches(watches);
        session
    }

    #[test]
    fn recursive_build_finds_every_directory() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let mut session = new_recursive_session(dir.path().to_path_buf(), StdHashSet::new(), 0);
        let installed = session.build().unwrap();
        assert_eq!(installed, 4); // root, b, b/c, d
        let paths: StdHashSet<_> = session.expansion().iter().map(|e| e.path.clone()).collect();
        assert!(paths.contains(dir.path()));
        assert!(paths.contains(&dir.path().join("b")));
        assert!(paths.contains(&dir.path().join("b/c")));
        assert!(paths.contains(&dir.path().join("d")));
    }

    #[test]
    fn depth_cap_excludes_grandchildren() {
        let dir = tempdir().unwrap();
        build_tree(dir.path());
        let mut session = new_recursive_session(dir.path().to_path_buf(), StdHashSet::new(), 1);
        session.build().unwrap();
        let paths: StdHashSet<_> = session.expansion().iter().map(|e| e.path.clone()).collect();
        assert!(paths.contains(&dir.path().join("b")));
        assert!(!paths.contains(&dir.path().join("b/c")));
    }

    #[test]
    fn ignore_list_prunes_subtree() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        let mut ignores = StdHashSet::new();
        ignores.insert(".git".to_string());
        let mut session = new_recursive_session(dir.path().to_path_buf(), ignores, 0);
        session.build().unwrap();
        let paths: StdHashSet<_> = session.expansion().iter().map(|e| e.path.clone()).collect();
        assert!(!paths.iter().any(|p| p.starts_with(dir.path().join(".git"))));
    }
}
