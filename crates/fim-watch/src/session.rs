//! A single logical watch subscription: the root-path set, the live
//! expansion (directory -> watch-descriptor mirror), and the mutation
//! routines the event loop drives in response to kernel notifications.

use crate::resolver;
use crate::walker;
use fim_core::pathutil::is_prefix_dir;
use fim_core::{Error, FsId};
use inotify::{WatchDescriptor, WatchMask, Watches};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Mandatory mask kept on every watch regardless of what the owner
/// requested, so the session can keep its mirror of the tree coherent.
const MANDATORY_MASK: WatchMask = WatchMask::from_bits_truncate(
    WatchMask::CREATE.bits() | WatchMask::MOVED_FROM.bits() | WatchMask::MOVED_TO.bits()
        | WatchMask::DELETE_SELF.bits(),
);

/// A configured watch origin. `path` is `None` once the root has been
/// renamed away and not yet recovered — a tombstone that preserves the
/// entry's index in `roots` (spec §3).
#[derive(Debug, Clone)]
pub struct RootEntry {
    pub path: Option<PathBuf>,
    pub stat: FsId,
}

/// One live kernel watch: the directory it covers and the descriptor the
/// kernel issued for it. Realized as a single record rather than the
/// source's parallel `wd[]`/`paths[]` arrays (spec §9 design note).
#[derive(Debug, Clone)]
pub struct ExpansionEntry {
    pub wd: WatchDescriptor,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFlags {
    pub only_directories: bool,
    pub recursive: bool,
    pub follow_moves: bool,
}

/// Whether a failed kernel watch removal is worth surfacing to the owner
/// beyond triggering a rebuild (spec §9, "error recovery escalation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveError {
    /// Likely transient (e.g. the watch was already gone); rebuild and
    /// move on.
    Transient,
    /// Indicates something structurally wrong (e.g. a bad file
    /// descriptor); rebuild, but also worth logging loudly.
    Fatal,
}

pub(crate) enum InstallOutcome {
    Installed(WatchDescriptor),
    AlreadyPresent,
    Skipped,
}

pub struct SessionConfig {
    pub id: String,
    pub pid: i32,
    pub roots: Vec<PathBuf>,
    pub ignores: HashSet<String>,
    pub requested_mask: WatchMask,
    pub only_directories: bool,
    pub recursive: bool,
    pub follow_moves: bool,
    /// 0 means unlimited, otherwise the maximum directory depth relative
    /// to each root.
    pub max_depth: u32,
    /// Static key/value labels copied verbatim onto every `WatchEvent` this
    /// session emits (spec §1's "process/pod metadata decoration"
    /// collaborator, kept to the minimal owner-supplied form since a real
    /// pod/container lookup is out of scope for this crate).
    pub tags: Vec<(String, String)>,
}

pub struct WatchSession {
    id: String,
    pid: i32,
    roots: Vec<RootEntry>,
    expansion: Vec<ExpansionEntry>,
    ignores: HashSet<String>,
    events_mask: WatchMask,
    requested_mask: WatchMask,
    flags: SessionFlags,
    max_depth: u32,
    watches: Option<Watches>,
    live_root_count: usize,
    tags: Vec<(String, String)>,
}

impl WatchSession {
    /// Validates and stages a new session. Does not touch the kernel; call
    /// [`WatchSession::attach_watches`] and [`WatchSession::build`] to
    /// actually install watches.
    pub fn new(config: SessionConfig) -> Result<Self, Error> {
        if config.roots.is_empty() {
            return Err(Error::ConfigInvalid("no root paths configured".into()));
        }

        let mut roots = Vec::with_capacity(config.roots.len());
        let mut seen = HashSet::new();
        for path in &config.roots {
            if config.only_directories && !path.is_dir() {
                return Err(Error::ConfigInvalid(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            let stat = FsId::of(path)?;
            if !seen.insert(stat) {
                return Err(Error::ConfigInvalid(format!(
                    "duplicate root path (same filesystem object): {}",
                    path.display()
                )));
            }
            roots.push(RootEntry {
                path: Some(path.clone()),
                stat,
            });
        }

        let events_mask = config.requested_mask | MANDATORY_MASK;

        Ok(Self {
            id: config.id,
            pid: config.pid,
            live_root_count: roots.len(),
            roots,
            expansion: Vec::new(),
            ignores: config.ignores,
            events_mask,
            requested_mask: config.requested_mask,
            flags: SessionFlags {
                only_directories: config.only_directories,
                recursive: config.recursive,
                follow_moves: config.follow_moves,
            },
            max_depth: config.max_depth,
            watches: None,
            tags: config.tags,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    #[must_use]
    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    /// The mask the owner asked for, without the mandatory bits the
    /// session adds to keep its own mirror coherent. Used to decide
    /// whether an event is worth forwarding to the sink.
    #[must_use]
    pub fn requested_mask(&self) -> WatchMask {
        self.requested_mask
    }

    /// The maximum configured depth (`0` means unlimited).
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    #[must_use]
    pub fn roots(&self) -> &[RootEntry] {
        &self.roots
    }

    #[must_use]
    pub fn expansion(&self) -> &[ExpansionEntry] {
        &self.expansion
    }

    #[must_use]
    pub fn live_root_count(&self) -> usize {
        self.live_root_count
    }

    #[must_use]
    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    pub(crate) fn ignores_snapshot(&self) -> HashSet<String> {
        self.ignores.clone()
    }

    /// Attaches the kernel notification handle this session issues
    /// add/remove-watch calls through. Must be called before `build`.
    pub fn attach_watches(&mut self, watches: Watches) {
        self.watches = Some(watches);
    }

    pub(crate) fn path_for_wd(&self, wd: &WatchDescriptor) -> Option<&PathBuf> {
        self.expansion.iter().find(|e| &e.wd == wd).map(|e| &e.path)
    }

    pub(crate) fn remove_wd_entry(&mut self, wd: &WatchDescriptor) -> Option<ExpansionEntry> {
        let idx = self.expansion.iter().position(|e| &e.wd == wd)?;
        Some(self.expansion.remove(idx))
    }

    #[must_use]
    pub fn is_root_path(&self, path: &Path) -> bool {
        self.roots.iter().any(|r| r.path.as_deref() == Some(path))
    }

    fn nearest_root_for(&self, path: &Path) -> Option<&Path> {
        self.roots
            .iter()
            .filter_map(|r| r.path.as_deref())
            .filter(|r| is_prefix_dir(r, path))
            .max_by_key(|r| r.as_os_str().len())
    }

    fn validate_roots(&self) -> Result<(), Error> {
        let live: Vec<&RootEntry> = self.roots.iter().filter(|r| r.path.is_some()).collect();
        if live.is_empty() {
            return Err(Error::ConfigInvalid("no live root paths remain".into()));
        }
        for root in &live {
            let path = root.path.as_deref().unwrap();
            if !path.exists() {
                return Err(Error::ConfigInvalid(format!(
                    "root path does not exist: {}",
                    path.display()
                )));
            }
            if self.flags.only_directories && !path.is_dir() {
                return Err(Error::ConfigInvalid(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
        }
        let mut seen = HashSet::new();
        for root in &live {
            if !seen.insert(root.stat) {
                return Err(Error::ConfigInvalid(
                    "duplicate root paths (same filesystem object)".into(),
                ));
            }
        }
        Ok(())
    }

    /// Installs a single kernel watch for `path` if it is not already
    /// present. Resolves the Open Question in spec §9: a path already in
    /// `expansion` is a no-op, never a second descriptor.
    pub(crate) fn install_watch_for_path(&mut self, path: &Path) -> Result<InstallOutcome, Error> {
        if self.expansion.iter().any(|e| e.path == path) {
            tracing::debug!(path = %path.display(), "watch already present, skipping duplicate install");
            return Ok(InstallOutcome::AlreadyPresent);
        }

        let mut mask = self.events_mask;
        if self.flags.only_directories {
            mask |= WatchMask::ONLYDIR;
        }
        if self.is_root_path(path) {
            mask |= WatchMask::MOVE_SELF;
        }

        let watches = self
            .watches
            .as_ref()
            .ok_or_else(|| Error::other("session has no kernel handle attached"))?;

        match watches.add(path, mask) {
            Ok(wd) => {
                self.expansion.push(ExpansionEntry {
                    wd: wd.clone(),
                    path: path.to_path_buf(),
                });
                Ok(InstallOutcome::Installed(wd))
            }
            Err(err) => classify_add_error(&err, path),
        }
    }

    /// Validates configuration, then installs watches for every
    /// non-tombstoned root (recursively, if the session is recursive).
    /// On `ResourceExhausted`/`PermissionDenied` rolls back every watch it
    /// installed during this call — spec §7: "fail the build; no partial
    /// install".
    pub fn build(&mut self) -> Result<usize, Error> {
        self.validate_roots()?;
        let before = self.expansion.len();
        let roots: Vec<PathBuf> = self.roots.iter().filter_map(|r| r.path.clone()).collect();
        let depth_budget = if self.max_depth == 0 {
            None
        } else {
            Some(self.max_depth as usize)
        };

        for root in &roots {
            let result = if self.flags.recursive {
                walker::walk_and_install(self, root, depth_budget)
            } else {
                match self.install_watch_for_path(root) {
                    Ok(InstallOutcome::Installed(_)) => Ok(1),
                    Ok(_) => Ok(0),
                    Err(e) => Err(e),
                }
            };
            if let Err(err) = result {
                self.rollback_since(before);
                return Err(err);
            }
        }
        Ok(self.expansion.len() - before)
    }

    fn rollback_since(&mut self, before: usize) {
        if self.expansion.len() <= before {
            return;
        }
        let to_remove: Vec<ExpansionEntry> = self.expansion.split_off(before);
        if let Some(watches) = self.watches.as_ref() {
            for entry in to_remove {
                if let Err(err) = watches.remove(entry.wd) {
                    tracing::debug!(error = %err, path = %entry.path.display(), "rollback remove failed");
                }
            }
        }
    }

    fn teardown_all_watches(&mut self) {
        let entries = std::mem::take(&mut self.expansion);
        if let Some(watches) = self.watches.as_ref() {
            for entry in entries {
                if let Err(err) = watches.remove(entry.wd) {
                    tracing::debug!(error = %err, path = %entry.path.display(), "teardown remove failed");
                }
            }
        }
    }

    /// Tears down every kernel watch, clears the mirror, and rebuilds
    /// against the current (non-tombstoned) roots. Idempotent and safe to
    /// call at any point.
    pub fn rebuild(&mut self) -> Result<usize, Error> {
        tracing::info!(session = %self.id, "rebuilding watch tree");
        self.teardown_all_watches();
        self.build()
    }

    /// Walks `path` under the session's policy, installing a watch for
    /// each qualifying directory. Tolerates `ENOENT` (directory vanished
    /// mid-walk).
    pub fn add_subtree(&mut self, path: &Path) -> Result<usize, Error> {
        let path = path.to_path_buf();
        if !self.flags.recursive {
            return match self.install_watch_for_path(&path) {
                Ok(InstallOutcome::Installed(_)) => Ok(1),
                Ok(_) => Ok(0),
                Err(e) => Err(e),
            };
        }

        let remaining_depth = if self.max_depth == 0 {
            None
        } else {
            let consumed = self
                .nearest_root_for(&path)
                .and_then(|root| path.strip_prefix(root).ok())
                .map(|suffix| suffix.components().count())
                .unwrap_or(0);
            Some((self.max_depth as usize).saturating_sub(consumed))
        };

        walker::walk_and_install(self, &path, remaining_depth)
    }

    /// Removes every `expansion` entry whose path is prefix-bounded by
    /// `path`. Operates on a defensive copy of `path` since the caller's
    /// argument may alias an entry already stored in `expansion`.
    pub fn remove_subtree(&mut self, path: &Path) -> Result<usize, RemoveError> {
        let prefix = path.to_path_buf();
        let mut removed = 0usize;
        let mut i = 0;
        while i < self.expansion.len() {
            if is_prefix_dir(&prefix, &self.expansion[i].path) {
                let wd = self.expansion[i].wd.clone();
                let entry_path = self.expansion[i].path.clone();
                let watches = match self.watches.as_ref() {
                    Some(w) => w,
                    None => {
                        self.expansion.remove(i);
                        removed += 1;
                        continue;
                    }
                };
                match watches.remove(wd) {
                    Ok(()) => {
                        self.expansion.remove(i);
                        removed += 1;
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, path = %entry_path.display(), "inotify_rm_watch failed, forcing rebuild");
                        return Err(classify_remove_error(&err));
                    }
                }
            }
            i += 1;
        }
        Ok(removed)
    }

    /// Splices the `old_dir` prefix of every matching expansion path for
    /// `new_dir`; descriptors are unchanged.
    pub fn rewrite_paths(&mut self, old_dir: &Path, new_dir: &Path) {
        for entry in &mut self.expansion {
            if is_prefix_dir(old_dir, &entry.path) {
                if let Ok(suffix) = entry.path.strip_prefix(old_dir) {
                    entry.path = if suffix.as_os_str().is_empty() {
                        new_dir.to_path_buf()
                    } else {
                        new_dir.join(suffix)
                    };
                }
            }
        }
    }

    /// Tombstones the `RootEntry` matching `path`.
    pub fn remove_root(&mut self, path: &Path) {
        if let Some(root) = self
            .roots
            .iter_mut()
            .find(|r| r.path.as_deref() == Some(path))
        {
            root.path = None;
            self.live_root_count = self.live_root_count.saturating_sub(1);
        }
    }

    /// Attempts to relocate a root that was renamed away, by inode lookup
    /// under `/proc/<pid>/root`. Returns `Ok(true)` if found and updated,
    /// `Ok(false)` if not found (not an error — the caller may tombstone
    /// the root).
    pub fn recover_root(&mut self, old_path: &Path) -> Result<bool, Error> {
        let idx = match self
            .roots
            .iter()
            .position(|r| r.path.as_deref() == Some(old_path))
        {
            Some(idx) => idx,
            None => return Ok(false),
        };
        let stat = self.roots[idx].stat;
        match resolver::find_by_fs_id(self.pid, stat)? {
            Some(new_path) => {
                self.roots[idx].path = Some(new_path);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn classify_add_error(err: &std::io::Error, path: &Path) -> Result<InstallOutcome, Error> {
    match err.raw_os_error() {
        Some(libc::ENOENT) => {
            tracing::debug!(path = %path.display(), "path vanished before watch could be installed");
            Ok(InstallOutcome::Skipped)
        }
        Some(libc::ENOSPC) | Some(libc::EMFILE) | Some(libc::ENFILE) => {
            Err(Error::ResourceExhausted(format!(
                "inotify watch limit reached installing {}: {err}",
                path.display()
            )))
        }
        Some(libc::EACCES) | Some(libc::EPERM) => Err(Error::PermissionDenied(format!(
            "cannot watch {}: {err}",
            path.display()
        ))),
        _ => Err(Error::other(format!(
            "inotify_add_watch failed for {}: {err}",
            path.display()
        ))),
    }
}

fn classify_remove_error(err: &std::io::Error) -> RemoveError {
    match err.raw_os_error() {
        Some(libc::EBADF) => RemoveError::Fatal,
        _ => RemoveError::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn config(roots: Vec<PathBuf>) -> SessionConfig {
        SessionConfig {
            id: "test".into(),
            pid: std::process::id() as i32,
            roots,
            ignores: HashSet::new(),
            requested_mask: WatchMask::empty(),
            only_directories: false,
            recursive: false,
            follow_moves: false,
            max_depth: 0,
            tags: Vec::new(),
        }
    }

    #[test]
    fn rejects_empty_roots() {
        let err = WatchSession::new(config(vec![])).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_duplicate_roots() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        std::fs::create_dir(&a).unwrap();
        let b = a.join("..").join("a"); // same fs object, different string
        let err = WatchSession::new(config(vec![a, b])).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
    }

    #[test]
    fn rewrite_paths_splices_prefix_and_keeps_descriptor() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        let mut session = WatchSession::new(config(vec![dir.path().join("a")])).unwrap();
        // Fabricate expansion entries without a real kernel handle, since
        // this test only exercises path bookkeeping.
        session.expansion.push(ExpansionEntry {
            wd: fake_wd(),
            path: dir.path().join("a"),
        });
        session.expansion.push(ExpansionEntry {
            wd: fake_wd(),
            path: dir.path().join("a/b"),
        });
        session.rewrite_paths(&dir.path().join("a"), &dir.path().join("z"));
        assert_eq!(session.expansion[0].path, dir.path().join("z"));
        assert_eq!(session.expansion[1].path, dir.path().join("z/b"));
    }

    fn fake_wd() -> WatchDescriptor {
        // `inotify::Inotify::init` gives us a real handle without
        // requiring an existing watch target, which is all we need to
        // mint a WatchDescriptor for bookkeeping-only tests.
        let inotify = inotify::Inotify::init().expect("inotify available in test sandbox");
        let dir = tempfile::tempdir().unwrap();
        inotify
            .watches()
            .add(dir.path(), WatchMask::CREATE)
            .expect("add watch")
    }
}
