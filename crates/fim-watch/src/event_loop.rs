//! Drives a single kernel `inotify` handle: reads raw events, keeps the
//! owning session's expansion cache in sync, correlates rename pairs by
//! cookie, and forwards events the owner asked for to the event sink.
//!
//! One task per kernel handle (spec §5 concurrency model) — nothing in
//! here is `Send`-shared beyond the `WatchCache`, so there is no locking
//! finer than the cache's own slot mutex.

use crate::cache::WatchCache;
use crate::control::ControlReceiver;
use crate::session::{RemoveError, WatchSession};
use crate::sink::EventSink;
use fim_core::{Error, WatchEvent};
use futures::StreamExt;
use inotify::{Event, EventMask, EventStream, Inotify, WatchDescriptor};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// How long a `MOVED_FROM` waits for its `MOVED_TO` pair before being
/// treated as a plain delete. The source paired renames synchronously
/// within a single `read()` and had no such window; we read from an async
/// stream, so a bounded deadline is needed (spec §9 design note).
const RENAME_PAIR_DEADLINE: Duration = Duration::from_millis(50);

/// How often the loop checks for expired pending renames.
const SWEEP_INTERVAL: Duration = Duration::from_millis(25);

const EVENT_BUFFER_LEN: usize = 4096;

struct PendingRename {
    cookie: u32,
    directory: PathBuf,
    name: String,
    is_dir: bool,
    deadline: Instant,
}

/// Drives `inotify` on behalf of the session at `slot` in `cache` until
/// the control handle requests shutdown or the kernel handle errs out.
pub struct EventLoop {
    cache: Arc<WatchCache>,
    slot: usize,
    sink: Arc<dyn EventSink>,
    control: ControlReceiver,
    pending: Vec<PendingRename>,
}

impl EventLoop {
    #[must_use]
    pub fn new(
        cache: Arc<WatchCache>,
        slot: usize,
        sink: Arc<dyn EventSink>,
        control: ControlReceiver,
    ) -> Self {
        Self {
            cache,
            slot,
            sink,
            control,
            pending: Vec::new(),
        }
    }

    /// Consumes the kernel handle and runs until shutdown. Returns
    /// normally on a clean stop; propagates a read error from the kernel
    /// handle itself (not from individual event handling, which is best
    /// effort and never aborts the loop).
    pub async fn run(mut self, inotify: Inotify) -> Result<(), Error> {
        let mut stream: EventStream<[u8; EVENT_BUFFER_LEN]> = inotify
            .into_event_stream([0u8; EVENT_BUFFER_LEN])
            .map_err(|err| Error::other(format!("failed to start inotify event stream: {err}")))?;
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            tokio::select! {
                () = self.control.stopped() => {
                    tracing::info!("event loop received shutdown request");
                    self.drain_best_effort(&mut stream).await;
                    self.cache.mark_empty(self.slot);
                    return Ok(());
                }
                _ = sweep.tick() => {
                    self.sweep_expired_renames();
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(event)) => self.handle_event(event),
                        Some(Err(err)) => {
                            return Err(Error::other(format!("inotify read failed: {err}")));
                        }
                        None => {
                            tracing::warn!("inotify event stream ended");
                            self.cache.mark_empty(self.slot);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Drains whatever events are already queued on the kernel handle
    /// without blocking further, per spec §5: "the loop ... drains any
    /// remaining kernel events best-effort" before releasing the handle.
    /// Bounded by a short overall timeout rather than looping until the
    /// stream would truly block, since a pathological producer could
    /// otherwise keep shutdown from ever completing.
    async fn drain_best_effort(&mut self, stream: &mut EventStream<[u8; EVENT_BUFFER_LEN]>) {
        let deadline = Instant::now() + Duration::from_millis(50);
        loop {
            if Instant::now() >= deadline {
                return;
            }
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(Ok(event))) => self.handle_event(event),
                Ok(Some(Err(err))) => {
                    tracing::debug!(%err, "inotify read failed during drain, stopping");
                    return;
                }
                Ok(None) | Err(_) => return,
            }
        }
    }

    fn handle_event(&mut self, event: Event<OsString>) {
        if event.mask.contains(EventMask::Q_OVERFLOW) {
            tracing::warn!(session_slot = self.slot, "inotify queue overflowed, rebuilding");
            self.cache.with_session(self.slot, WatchSession::rebuild);
            return;
        }

        let wd = event.wd.clone();
        let Some(resolved) = self
            .cache
            .with_session(self.slot, |session| resolve(session, &wd))
            .flatten()
        else {
            tracing::debug!("event for unknown watch descriptor, dropping");
            return;
        };

        let name = event.name.map(|n| n.to_string_lossy().into_owned());
        self.forward_to_sink(&resolved, &name, event.mask);

        if event.mask.contains(EventMask::IGNORED) {
            self.cache
                .with_session(self.slot, |session| session.remove_wd_entry(&wd));
            return;
        }

        if event.mask.contains(EventMask::CREATE) {
            self.handle_create(&resolved.path, name.as_deref(), event.mask.contains(EventMask::ISDIR));
            return;
        }

        if event.mask.contains(EventMask::MOVED_FROM) {
            self.handle_moved_from(&resolved.path, name, event.cookie, event.mask.contains(EventMask::ISDIR));
            return;
        }

        if event.mask.contains(EventMask::MOVED_TO) {
            self.handle_moved_to(&resolved.path, name, event.cookie, event.mask.contains(EventMask::ISDIR));
            return;
        }

        if event.mask.contains(EventMask::DELETE_SELF) {
            self.handle_delete_self(&wd, &resolved.path);
            return;
        }

        if event.mask.contains(EventMask::MOVE_SELF) {
            self.handle_move_self(&resolved.path);
        }
    }

    fn forward_to_sink(&self, resolved: &ResolvedPath, name: &Option<String>, mask: EventMask) {
        let owner_interest = self
            .cache
            .with_session(self.slot, |session| {
                mask_intersects_requested(mask, session.requested_mask())
            })
            .unwrap_or(false);
        if !owner_interest {
            return;
        }
        let (session_id, tags) = self
            .cache
            .with_session(self.slot, |session| {
                (session.id().to_string(), session.tags().to_vec())
            })
            .unwrap_or_default();
        self.sink.emit(WatchEvent {
            session_id,
            directory_path: resolved.path.display().to_string(),
            file_name: name.clone(),
            event_mask: mask.bits(),
            is_dir: mask.contains(EventMask::ISDIR),
            tags,
        });
    }

    fn handle_create(&mut self, directory: &Path, name: Option<&str>, is_dir: bool) {
        let Some(name) = name else { return };
        if !is_dir {
            return;
        }
        let full_path = directory.join(name);
        self.cache.with_session(self.slot, |session| {
            if session.flags().recursive {
                if let Err(err) = session.add_subtree(&full_path) {
                    tracing::warn!(error = %err, path = %full_path.display(), "failed to extend watch tree");
                }
            }
        });
    }

    fn handle_moved_from(&mut self, directory: &Path, name: Option<String>, cookie: u32, is_dir: bool) {
        let Some(name) = name else { return };
        // Cookie 0 is never paired (spec §4 "rename correlation"): treat it
        // as an unpaired removal straight away rather than parking it in
        // `pending`, where an unrelated cookie-0 MOVED_TO could splice onto it.
        if cookie == 0 {
            let gone_path = directory.join(&name);
            self.remove_subtree_and_report(&gone_path);
            return;
        }
        self.pending.push(PendingRename {
            cookie,
            directory: directory.to_path_buf(),
            name,
            is_dir,
            deadline: Instant::now() + RENAME_PAIR_DEADLINE,
        });
    }

    fn handle_moved_to(&mut self, directory: &Path, name: Option<String>, cookie: u32, is_dir: bool) {
        let Some(name) = name else { return };
        let new_path = directory.join(&name);

        // Cookie 0 is never paired; fall straight through to the
        // unpaired/CREATE path instead of matching it against `pending`.
        if cookie != 0 {
            if let Some(idx) = self.pending.iter().position(|p| p.cookie == cookie) {
                let old = self.pending.remove(idx);
                let old_path = old.directory.join(&old.name);
                if old.is_dir {
                    self.cache
                        .with_session(self.slot, |session| session.rewrite_paths(&old_path, &new_path));
                }
                return;
            }
        }

        // No matching MOVED_FROM arrived in time: this entry moved in from
        // outside the watched tree, which is semantically a create.
        if is_dir {
            self.handle_create(directory, Some(&name), true);
        }
    }

    fn handle_delete_self(&mut self, wd: &WatchDescriptor, path: &Path) {
        let path = path.to_path_buf();
        let follow_moves = self
            .cache
            .with_session(self.slot, |session| session.flags().follow_moves)
            .unwrap_or(false);
        self.cache.with_session(self.slot, |session| {
            session.remove_wd_entry(wd);
            if !follow_moves && session.is_root_path(&path) {
                session.remove_root(&path);
            }
        });
    }

    /// Removes the subtree rooted at `path` and, per the `RemoveError`
    /// classification, either silently rebuilds (`Transient`) or reports a
    /// diagnostic to the sink before rebuilding (`Fatal`).
    fn remove_subtree_and_report(&mut self, path: &Path) {
        let outcome = self
            .cache
            .with_session(self.slot, |session| session.remove_subtree(path));
        match outcome {
            Some(Err(RemoveError::Fatal)) => {
                let session_id = self
                    .cache
                    .with_session(self.slot, |session| session.id().to_string())
                    .unwrap_or_default();
                self.sink.diagnostic(
                    &session_id,
                    &format!("watch removal for {} failed fatally, rebuilding watch tree", path.display()),
                );
                self.cache.with_session(self.slot, WatchSession::rebuild);
            }
            Some(Err(RemoveError::Transient)) => {
                self.cache.with_session(self.slot, WatchSession::rebuild);
            }
            Some(Ok(_)) | None => {}
        }
    }

    fn handle_move_self(&mut self, path: &Path) {
        let path = path.to_path_buf();
        let follow_moves = self
            .cache
            .with_session(self.slot, |session| session.flags().follow_moves)
            .unwrap_or(false);

        if !follow_moves {
            self.cache.with_session(self.slot, |session| session.remove_root(&path));
            self.remove_subtree_and_report(&path);
            return;
        }

        let recovered = self.cache.with_session(self.slot, |session| session.recover_root(&path));
        match recovered {
            Some(Ok(true)) => {
                tracing::info!(path = %path.display(), "recovered moved root");
            }
            Some(Ok(false)) | None => {
                tracing::warn!(path = %path.display(), "root could not be relocated, tombstoning");
                self.cache.with_session(self.slot, |session| session.remove_root(&path));
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, path = %path.display(), "root recovery failed");
                self.cache.with_session(self.slot, |session| session.remove_root(&path));
            }
        }
    }

    fn sweep_expired_renames(&mut self) {
        let now = Instant::now();
        let (expired, pending): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|p| p.deadline <= now);
        self.pending = pending;

        for entry in expired {
            let gone_path = entry.directory.join(&entry.name);
            tracing::debug!(path = %gone_path.display(), "rename pair deadline expired, treating as delete");
            self.remove_subtree_and_report(&gone_path);
        }
    }
}

struct ResolvedPath {
    path: PathBuf,
}

fn resolve(session: &mut WatchSession, wd: &WatchDescriptor) -> Option<ResolvedPath> {
    session
        .expansion()
        .iter()
        .find(|e| &e.wd == wd)
        .map(|e| ResolvedPath { path: e.path.clone() })
}

fn mask_intersects_requested(mask: EventMask, requested: inotify::WatchMask) -> bool {
    // `EventMask` and `WatchMask` share their non-administrative bit
    // positions (CREATE, DELETE, MODIFY, ...); the admin-only bits
    // (Q_OVERFLOW, IGNORED) never intersect a caller's requested mask.
    mask.bits() & requested.bits() != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::sink::EventSink;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<WatchEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: WatchEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn new_session(root: PathBuf, mask: inotify::WatchMask) -> (WatchSession, Inotify) {
        let inotify = Inotify::init().expect("inotify available in test sandbox");
        let watches = inotify.watches();
        let mut session = WatchSession::new(SessionConfig {
            id: "evtest".into(),
            pid: std::process::id() as i32,
            roots: vec![root],
            ignores: HashSet::new(),
            requested_mask: mask,
            only_directories: true,
            recursive: true,
            follow_moves: false,
            max_depth: 0,
            tags: Vec::new(),
        })
        .unwrap();
        session.attach_watches(watches);
        (session, inotify)
    }

    #[tokio::test]
    async fn create_event_extends_watch_tree_and_stops_on_control() {
        let dir = tempdir().unwrap();
        let (mut session, inotify) = new_session(dir.path().to_path_buf(), inotify::WatchMask::CREATE);
        session.build().unwrap();

        let cache = Arc::new(WatchCache::new());
        let slot = cache.install(session);
        let sink = Arc::new(RecordingSink::default());
        let (handle, rx) = crate::control::channel();
        let event_loop = EventLoop::new(cache.clone(), slot, sink.clone(), rx);

        let task = tokio::spawn(event_loop.run(inotify));
        std::fs::create_dir(dir.path().join("new_child")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let still_live = cache
            .with_session(slot, |s| {
                s.expansion().iter().any(|e| e.path == dir.path().join("new_child"))
            })
            .unwrap();
        assert!(still_live, "new directory should have been watched too");

        handle.stop();
        task.await.unwrap().unwrap();

        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|e| e.file_name.as_deref() == Some("new_child")));
        assert!(
            cache.with_session(slot, |_| ()).is_none(),
            "slot should be tombstoned after clean shutdown"
        );
    }
}
