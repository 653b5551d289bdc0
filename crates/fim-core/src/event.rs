use std::fmt;

/// Linux namespace kinds the namespace joiner can enter, per `setns(2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Ipc,
    Net,
    Mnt,
    Pid,
    User,
    Uts,
}

impl NamespaceKind {
    /// The name of the magic symlink under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Net => "net",
            Self::Mnt => "mnt",
            Self::Pid => "pid",
            Self::User => "user",
            Self::Uts => "uts",
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

impl std::str::FromStr for NamespaceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ipc" => Ok(Self::Ipc),
            "net" => Ok(Self::Net),
            "mnt" => Ok(Self::Mnt),
            "pid" => Ok(Self::Pid),
            "user" => Ok(Self::User),
            "uts" => Ok(Self::Uts),
            other => Err(format!("unknown namespace kind: {other}")),
        }
    }
}

/// A user-visible observation handed to the owner's event sink callback.
/// Fields mirror the original watcher's printed event line: the watch
/// directory, the changed entry's name within it, the raw kernel mask, and
/// whether the entry is a directory.
///
/// `tags` carries whatever static key/value labels the owner attached to
/// the session at build time (e.g. a future pod/container decoration layer
/// could populate these); this crate never populates them itself, and an
/// empty `tags` is the common case.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub session_id: String,
    pub directory_path: String,
    pub file_name: Option<String>,
    pub event_mask: u32,
    pub is_dir: bool,
    pub tags: Vec<(String, String)>,
}
