//! Connection registry: live handles and their outbound queues.

use super::ConnId;
use dashmap::DashMap;
use huddle_proto::ServerEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// Outbound queue element. One serialized event is shared by every recipient.
pub type Outbound = Arc<ServerEvent>;

/// Registry entry for one live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub conn: ConnId,
    pub user_id: String,
    pub user_name: String,
    tx: mpsc::Sender<Outbound>,
    closer: Mutex<Option<oneshot::Sender<String>>>,
}

impl ConnectionHandle {
    pub fn new(
        conn: ConnId,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        tx: mpsc::Sender<Outbound>,
        closer: oneshot::Sender<String>,
    ) -> Self {
        Self {
            conn,
            user_id: user_id.into(),
            user_name: user_name.into(),
            tx,
            closer: Mutex::new(Some(closer)),
        }
    }

    /// Non-blocking enqueue.
    pub fn try_deliver(&self, event: Outbound) -> Result<(), TrySendError<Outbound>> {
        self.tx.try_send(event)
    }

    /// Ask the connection task to close. Only the first call has an effect.
    pub fn close(&self, reason: &str) -> bool {
        match self.closer.lock().take() {
            Some(tx) => tx.send(reason.to_string()).is_ok(),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    handles: DashMap<ConnId, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<ConnectionHandle>) {
        self.handles.insert(handle.conn, handle);
    }

    /// Removes the handle. Exactly one caller gets `Some` for a given handle.
    pub fn remove(&self, conn: ConnId) -> Option<Arc<ConnectionHandle>> {
        self.handles.remove(&conn).map(|(_, h)| h)
    }

    pub fn get(&self, conn: ConnId) -> Option<Arc<ConnectionHandle>> {
        self.handles.get(&conn).map(|h| Arc::clone(h.value()))
    }

    pub fn all(&self) -> Vec<ConnId> {
        self.handles.iter().map(|h| *h.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
