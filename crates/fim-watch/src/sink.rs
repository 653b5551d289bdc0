//! Destination for the events the event loop emits. Left abstract so the
//! CLI (or any other embedder) can route events to `tracing`, a channel, a
//! webhook — whatever the caller needs — without the event loop knowing or
//! caring (spec §6: "event sink" external collaborator).

use fim_core::WatchEvent;

/// Must be `Send + Sync` since a single sink may be shared across the
/// per-session tasks spawned by the CLI's multi-session front end.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: WatchEvent);

    /// Out-of-band notice for a condition the owner should know about but
    /// that isn't a filesystem event itself (e.g. a fatal watch-removal
    /// error). Default is a no-op so existing sinks don't have to grow a
    /// second method to keep compiling.
    fn diagnostic(&self, session_id: &str, message: &str) {
        let _ = (session_id, message);
    }
}

/// Emits every event through `tracing` at `info` level. Useful as a
/// default sink and for tests that only need to confirm an event fired.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: WatchEvent) {
        let tags = event
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        tracing::info!(
            session = %event.session_id,
            directory = %event.directory_path,
            file = event.file_name.as_deref().unwrap_or(""),
            mask = event.event_mask,
            is_dir = event.is_dir,
            tags = %tags,
            "fs event",
        );
    }

    fn diagnostic(&self, session_id: &str, message: &str) {
        tracing::error!(session = %session_id, "{message}");
    }
}
