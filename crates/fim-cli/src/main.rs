#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod config;
mod logging;

use clap::Parser;
use config::{categories_to_mask, default_event_categories, EventCategory, OutputFormat, WatchConfig};
use fim_core::NamespaceKind;
use fim_watch::{EventLoop, NamespaceJoiner, NixNamespaceJoiner, TracingEventSink, WatchCache, WatchSession};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Watches one or more directories inside a target process's mount
/// namespace and logs structured filesystem events.
#[derive(Parser, Debug)]
#[command(name = "fim")]
#[command(author, version, about = "Filesystem integrity watcher", long_about = None)]
struct Cli {
    /// Target process id whose mount namespace holds the watched paths.
    #[arg(short = 'p', long = "pid")]
    pid: i32,

    /// Namespace kind to join: ipc, net, mnt, pid, user, uts.
    #[arg(short = 'n', long = "namespace")]
    namespace: NamespaceKind,

    /// Root path to watch. Repeatable; at least one is required.
    #[arg(short = 't', long = "target", required = true)]
    targets: Vec<PathBuf>,

    /// Event category to forward to the sink: access, modify, attrib,
    /// open, close, move, create, delete, all. Repeatable; defaults to
    /// {open, modify}.
    #[arg(short = 'e', long = "event")]
    events: Vec<EventCategory>,

    /// Log output format.
    #[arg(short = 'f', long = "format", default_value = "text")]
    format: OutputFormat,

    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let events = if cli.events.is_empty() {
        default_event_categories()
    } else {
        cli.events
    };

    let config = WatchConfig {
        pid: cli.pid,
        namespace: cli.namespace,
        targets: cli.targets,
        requested_mask: categories_to_mask(&events),
        format: cli.format,
    };

    logging::init(cli.verbose, config.format == OutputFormat::Json);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fim: {err}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

fn exit_code_for(err: &fim_core::Error) -> u8 {
    match err {
        fim_core::Error::PermissionDenied(_) => 3,
        fim_core::Error::ResourceExhausted(_) => 4,
        fim_core::Error::ConfigInvalid(_) => 2,
        fim_core::Error::Io(_) | fim_core::Error::Other(_) => 1,
    }
}

fn run(config: WatchConfig) -> Result<(), fim_core::Error> {
    let joiner = NixNamespaceJoiner;
    joiner.join(config.pid, config.namespace)?;

    let session_id = format!("{}:{}", config.pid, config.namespace.proc_name());
    let mut session = WatchSession::new(config.session_config(session_id))?;

    let inotify = inotify::Inotify::init().map_err(|err| {
        fim_core::Error::other(format!("failed to initialize inotify: {err}"))
    })?;
    session.attach_watches(inotify.watches());

    let installed = session.build()?;
    tracing::info!(installed, "watch tree built");

    let cache = Arc::new(WatchCache::new());
    let slot = cache.install(session);
    let sink = Arc::new(TracingEventSink);
    let (control, control_rx) = fim_watch::control_channel();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| fim_core::Error::other(format!("failed to start async runtime: {err}")))?;

    runtime.block_on(async move {
        let _ctrl_c_watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                control.stop();
            }
        });

        let event_loop = EventLoop::new(cache, slot, sink, control_rx);
        event_loop.run(inotify).await
    })
}
