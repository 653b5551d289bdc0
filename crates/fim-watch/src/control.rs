//! Shutdown signalling for a running event loop. A thin wrapper over
//! `tokio::sync::watch` since the control surface here is a single
//! latched boolean, not a general message channel.

use tokio::sync::watch;

/// Held by the owner (typically the CLI's signal handler). Dropping it
/// also requests shutdown, since the paired `ControlReceiver` observes
/// the channel closing as well as an explicit `true`.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    tx: watch::Sender<bool>,
}

/// Held by the event loop task.
#[derive(Debug, Clone)]
pub struct ControlReceiver {
    rx: watch::Receiver<bool>,
}

#[must_use]
pub fn channel() -> (ControlHandle, ControlReceiver) {
    let (tx, rx) = watch::channel(false);
    (ControlHandle { tx }, ControlReceiver { rx })
}

impl ControlHandle {
    /// Requests shutdown. Idempotent.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

impl ControlReceiver {
    /// Resolves once shutdown has been requested (or the handle was
    /// dropped). Safe to call repeatedly; never resolves twice with stale
    /// state since `watch` always yields the latest value.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_wakes_the_receiver() {
        let (handle, mut rx) = channel();
        handle.stop();
        rx.stopped().await;
    }

    #[tokio::test]
    async fn dropping_handle_wakes_the_receiver() {
        let (handle, mut rx) = channel();
        drop(handle);
        rx.stopped().await;
    }
}
