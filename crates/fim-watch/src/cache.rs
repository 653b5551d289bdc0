//! Process-wide registry of active watch sessions.
//!
//! One `WatchCache` is shared by every event-loop task in the process. A
//! slot is stable for the lifetime of the session it holds; tearing a
//! session down tombstones its slot (sets it to `None`) rather than
//! shifting later slots down, so descriptor-to-session routing never needs
//! to account for slots moving underneath it (spec invariant I5).

use crate::session::WatchSession;
use inotify::WatchDescriptor;
use std::sync::Mutex;

#[derive(Default)]
pub struct WatchCache {
    slots: Mutex<Vec<Option<WatchSession>>>,
}

impl WatchCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Places `session` in the cache, reusing a tombstoned slot if one is
    /// available, and returns the slot index.
    pub fn install(&self, session: WatchSession) -> usize {
        let mut slots = self.slots.lock().unwrap();
        if let Some(idx) = slots.iter().position(Option::is_none) {
            slots[idx] = Some(session);
            idx
        } else {
            slots.push(Some(session));
            slots.len() - 1
        }
    }

    /// Runs `f` against the live session at `slot`, if any.
    pub fn with_session<R>(&self, slot: usize, f: impl FnOnce(&mut WatchSession) -> R) -> Option<R> {
        let mut slots = self.slots.lock().unwrap();
        slots.get_mut(slot)?.as_mut().map(f)
    }

    /// Linear scan across live sessions for the one that currently has a
    /// watch on `wd`. Acceptable because the event loop is single-threaded
    /// and descriptor counts are modest (spec §4.2).
    pub fn find_by_descriptor<R>(
        &self,
        wd: &WatchDescriptor,
        f: impl FnOnce(&mut WatchSession, usize) -> R,
    ) -> Option<R> {
        let mut slots = self.slots.lock().unwrap();
        for (idx, slot) in slots.iter_mut().enumerate() {
            if let Some(session) = slot {
                if session.path_for_wd(wd).is_some() {
                    return Some(f(session, idx));
                }
            }
        }
        None
    }

    /// Tombstones `slot`.
    pub fn mark_empty(&self, slot: usize) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(s) = slots.get_mut(slot) {
            *s = None;
        }
    }

    /// Number of slots, live or tombstoned. For tests and the optional
    /// read-only inspector accessor.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.lock().unwrap().iter().filter(|s| s.is_some()).count()
    }
}
