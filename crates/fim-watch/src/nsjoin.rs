//! Joins a target process's namespace so subsequent filesystem operations
//! in this process (path validation, watch installation, `/proc` scans)
//! resolve against the target's view rather than our own.

use fim_core::{Error, NamespaceKind};
use nix::sched::{setns, CloneFlags};
use std::fs::File;
use std::os::fd::AsFd;

/// External collaborator named in spec §1/§6: everything past `join`
/// operates against the joined namespace. Boxed trait object so the CLI
/// can swap in a fake for tests without touching real namespaces.
pub trait NamespaceJoiner {
    fn join(&self, pid: i32, kind: NamespaceKind) -> Result<(), Error>;
}

/// Real implementation: opens `/proc/<pid>/ns/<kind>` and calls `setns(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NixNamespaceJoiner;

impl NamespaceJoiner for NixNamespaceJoiner {
    fn join(&self, pid: i32, kind: NamespaceKind) -> Result<(), Error> {
        let path = format!("/proc/{pid}/ns/{}", kind.proc_name());
        let file = File::open(&path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::PermissionDenied {
                Error::PermissionDenied(format!("cannot open {path}: {err}"))
            } else {
                Error::ConfigInvalid(format!("cannot open {path}: {err}"))
            }
        })?;

        setns(file.as_fd(), clone_flags_for(kind)).map_err(|errno| {
            Error::PermissionDenied(format!("setns({kind}) failed: {errno}"))
        })
    }
}

const fn clone_flags_for(kind: NamespaceKind) -> CloneFlags {
    match kind {
        NamespaceKind::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceKind::Net => CloneFlags::CLONE_NEWNET,
        NamespaceKind::Mnt => CloneFlags::CLONE_NEWNS,
        NamespaceKind::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
        NamespaceKind::Uts => CloneFlags::CLONE_NEWUTS,
    }
}
