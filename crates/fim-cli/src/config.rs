//! Translates the CLI's flat flag surface into the typed configuration
//! the watch engine expects, rather than threading raw `clap` matches
//! through `fim-watch` (mirrors the teacher's `Config`/`Channel` split:
//! presentation concerns stop at the CLI boundary).

use inotify::WatchMask;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;

/// One of the event categories accepted by `-e`. Coarser than the raw
/// kernel mask bits so the reference front end stays readable; maps onto
/// one or more `WatchMask` bits in [`categories_to_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Access,
    Modify,
    Attrib,
    Open,
    Close,
    Move,
    Create,
    Delete,
    All,
}

impl FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(Self::Access),
            "modify" => Ok(Self::Modify),
            "attrib" => Ok(Self::Attrib),
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "move" => Ok(Self::Move),
            "create" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown event category '{other}' (expected one of: access, modify, attrib, open, close, move, create, delete, all)"
            )),
        }
    }
}

/// Default `-e` selection when the flag is omitted.
#[must_use]
pub fn default_event_categories() -> Vec<EventCategory> {
    vec![EventCategory::Open, EventCategory::Modify]
}

/// Folds the requested categories into the kernel mask the owner wants
/// forwarded to the sink. The session adds its own mandatory bits on top
/// of this for internal bookkeeping (`fim_watch::session::WatchSession`).
#[must_use]
pub fn categories_to_mask(categories: &[EventCategory]) -> WatchMask {
    let mut mask = WatchMask::empty();
    for category in categories {
        mask |= match category {
            EventCategory::Access => WatchMask::ACCESS,
            EventCategory::Modify => WatchMask::MODIFY,
            EventCategory::Attrib => WatchMask::ATTRIB,
            EventCategory::Open => WatchMask::OPEN,
            EventCategory::Close => WatchMask::CLOSE,
            EventCategory::Move => WatchMask::MOVE,
            EventCategory::Create => WatchMask::CREATE,
            EventCategory::Delete => WatchMask::DELETE | WatchMask::DELETE_SELF,
            EventCategory::All => WatchMask::ALL_EVENTS,
        };
    }
    mask
}

/// `-f` log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}' (expected 'text' or 'json')")),
        }
    }
}

/// Fully resolved run configuration, built from parsed CLI flags.
pub struct WatchConfig {
    pub pid: i32,
    pub namespace: fim_core::NamespaceKind,
    pub targets: Vec<PathBuf>,
    pub requested_mask: WatchMask,
    pub format: OutputFormat,
}

impl WatchConfig {
    #[must_use]
    pub fn session_config(&self, session_id: String) -> fim_watch::SessionConfig {
        fim_watch::SessionConfig {
            id: session_id,
            pid: self.pid,
            roots: self.targets.clone(),
            ignores: HashSet::new(),
            requested_mask: self.requested_mask,
            only_directories: true,
            recursive: true,
            follow_moves: true,
            max_depth: 0,
            tags: Vec::new(),
        }
    }
}
