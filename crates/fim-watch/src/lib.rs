#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

//! The watch engine: a process-wide cache of live watch sessions, each
//! driven by its own single-threaded event-loop task over one kernel
//! `inotify` handle. Everything a front end needs to stand up a watch —
//! namespace joining, session construction, the event loop itself, and
//! the sink/control seams it talks through — lives here; presentation
//! (CLI parsing, log formatting) is left to the embedder.

pub mod cache;
pub mod control;
pub mod event_loop;
pub mod nsjoin;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod walker;

pub use cache::WatchCache;
pub use control::{channel as control_channel, ControlHandle, ControlReceiver};
pub use event_loop::EventLoop;
pub use nsjoin::{NamespaceJoiner, NixNamespaceJoiner};
pub use session::{RemoveError, RootEntry, SessionConfig, SessionFlags, WatchSession};
pub use sink::{EventSink, TracingEventSink};
