#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! Shared vocabulary for the filesystem integrity watcher: the error type,
//! path/filesystem-identity helpers, and the event/namespace types that
//! cross the boundary between the watch engine and its front ends.

pub mod error;
pub mod event;
pub mod pathutil;

pub use error::Error;
pub use event::{NamespaceKind, WatchEvent};
pub use pathutil::{basename, format_event_path, is_prefix_dir, join, same_fs_object, FsId};
