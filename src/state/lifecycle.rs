//! Connection lifecycle phases and the disconnect request channel.

use super::ConnId;
use tokio::sync::{broadcast, mpsc};

/// Where a connection is in its life.
///
/// `Connecting -> Authenticated -> Active -> Disconnected`. Authentication
/// failure jumps straight to `Disconnected`; `Disconnected` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Authenticated,
    Active,
    Disconnected,
}

impl ConnectionPhase {
    pub fn can_advance_to(self, next: ConnectionPhase) -> bool {
        use ConnectionPhase::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Authenticated, Active)
                | (Connecting | Authenticated | Active, Disconnected)
        )
    }

    /// Move to `next`, returning `false` (and staying put) on an illegal step.
    pub fn advance(&mut self, next: ConnectionPhase) -> bool {
        if self.can_advance_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Lifecycle signalling shared by the whole server.
pub struct LifecycleManager {
    /// Fires once when the server shuts down.
    pub shutdown_tx: broadcast::Sender<()>,

    /// Disconnects requested from places that must not block (fan-out,
    /// actors). Drained by the disconnect worker.
    pub disconnect_tx: mpsc::Sender<(ConnId, String)>,
}

impl LifecycleManager {
    pub fn new(disconnect_tx: mpsc::Sender<(ConnId, String)>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            disconnect_tx,
        }
    }

    /// Queue a disconnect. Dropped if the worker is saturated; the
    /// connection's own queue pressure will trigger it again.
    pub fn request_disconnect(&self, conn: ConnId, reason: &str) {
        let _ = self.disconnect_tx.try_send((conn, reason.to_string()));
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
