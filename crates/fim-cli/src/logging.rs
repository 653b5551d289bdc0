//! Logging initialization for the CLI.
//!
//! Logging is owned by the CLI crate to keep `fim-watch` free of any
//! opinion about output format. Uses `tracing` with an optional JSON
//! layer for machine-readable deployments.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global subscriber.
///
/// * `verbosity` - 0 = INFO, 1 = DEBUG, 2+ = TRACE
/// * `json` - if true, emit JSON lines to stderr instead of the default
///   human-readable format
///
/// # Panics
/// Panics if a subscriber has already been installed.
pub fn init(verbosity: u8, json: bool) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"))
        .add_directive(format!("fim={level}").parse().unwrap())
        .add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
