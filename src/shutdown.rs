//! Cooperative shutdown signal shared by all background loops

use std::time::Duration;
use tokio::sync::watch;

/// Receiving side; loops check it between iterations
pub type ShutdownRx = watch::Receiver<bool>;

/// Owner of the shutdown flag
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

pub fn is_shutdown(rx: &ShutdownRx) -> bool {
    *rx.borrow()
}

/// Sleep for `duration` unless shutdown fires first.
///
/// Returns `true` if shutdown was requested.
pub async fn sleep_or_shutdown(rx: &mut ShutdownRx, duration: Duration) -> bool {
    if is_shutdown(rx) {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => is_shutdown(rx),
        changed = rx.changed() => {
            // Sender dropped counts as shutdown
            changed.is_err() || is_shutdown(rx)
        }
    }
}
