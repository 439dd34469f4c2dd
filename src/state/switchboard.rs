//! The Switchboard - process-wide realtime state.
//!
//! Holds the presence table, room memberships, the connection registry and
//! the conversation actors, next to the storage handle they are reconciled
//! against. Lock order, where two are held at once, is rooms then presence.

use super::{
    ConnId, ConnIdGenerator, ConnectionHandle, ConnectionRegistry, LifecycleManager,
    PresenceTable, RoomId, RoomManager,
};
use crate::config::{Config, LimitsConfig, PresenceConfig};
use crate::db::{Database, UserRecord, now_millis};
use crate::error::ChatResult;
use crate::fanout::ConversationManager;
use crate::metrics;
use crate::security::RateLimitManager;
use huddle_proto::ServerEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows marked offline because the user had no presence entry.
    pub cleared: u64,
    /// Rows marked online because a present user was stored as offline.
    pub reasserted: u64,
}

pub struct Switchboard {
    pub db: Database,
    pub presence: PresenceTable,
    pub rooms: RoomManager,
    pub connections: ConnectionRegistry,
    pub conn_ids: ConnIdGenerator,
    pub lifecycle: LifecycleManager,
    pub rate_limiter: RateLimitManager,
    pub conversations: ConversationManager,
    pub limits: LimitsConfig,
    pub presence_config: PresenceConfig,
}

impl Switchboard {
    pub fn new(config: &Config, db: Database, disconnect_tx: mpsc::Sender<(ConnId, String)>) -> Self {
        Self {
            db,
            presence: PresenceTable::new(),
            rooms: RoomManager::new(),
            connections: ConnectionRegistry::new(),
            conn_ids: ConnIdGenerator::from_boot_time(now_millis()),
            lifecycle: LifecycleManager::new(disconnect_tx),
            rate_limiter: RateLimitManager::new(config.security.rate_limits.clone()),
            conversations: ConversationManager::new(
                config.limits.actor_mailbox_capacity.max(1),
                Duration::from_secs(config.limits.actor_idle_secs.max(1)),
            ),
            limits: config.limits.clone(),
            presence_config: config.presence.clone(),
        }
    }

    /// Move an authenticated connection to the active phase.
    ///
    /// A user that already has a live handle is evicted from it first.
    pub async fn activate(&self, handle: Arc<ConnectionHandle>, user: &UserRecord) -> ChatResult<()> {
        let conn = handle.conn;
        let now = now_millis();

        self.db.users().mark_online(&user.id, &conn.to_string(), now).await?;
        let chat_ids = self.db.chats().active_chat_ids_for(&user.id).await?;

        let mut profile = user.profile();
        profile.is_online = true;
        profile.last_seen = now;

        self.connections.insert(handle);
        metrics::connection_opened();

        if let Some(old) = self.presence.upsert(&user.id, conn, profile.clone(), now) {
            self.evict(old, "Connected from another location");
        }

        self.rooms.join_personal_room(conn, &user.id);
        for chat_id in &chat_ids {
            self.rooms.join_conversation_room(conn, chat_id);
        }

        info!(%conn, user = %user.id, chats = chat_ids.len(), "Connection active");

        self.broadcast_all(
            ServerEvent::UserOnline {
                user_id: user.id.clone(),
                user: profile,
            },
            Some(conn),
        );
        self.send_to_conn(conn, ServerEvent::OnlineUsers(self.presence.snapshot()));
        Ok(())
    }

    /// Drop a superseded handle without announcing the user as offline.
    fn evict(&self, old: ConnId, reason: &str) {
        let Some(handle) = self.connections.remove(old) else {
            return;
        };
        self.rooms.release(old);
        self.rate_limiter.remove_client(old);
        metrics::connection_closed();
        handle.close(reason);
        info!(conn = %old, user = %handle.user_id, reason, "Evicted connection");
    }

    /// Remove the presence entry (if it still names `conn`) and every room
    /// membership of `conn` in one critical section.
    pub fn detach(&self, conn: ConnId, user_id: &str) -> bool {
        let (_, was_present) = self
            .rooms
            .release_with(conn, || self.presence.remove_if(user_id, conn));
        was_present
    }

    /// Move a connection to the disconnected phase.
    ///
    /// Returns `false` when the connection was already gone.
    pub async fn deactivate(&self, conn: ConnId) -> bool {
        let Some(handle) = self.connections.remove(conn) else {
            return false;
        };
        self.rate_limiter.remove_client(conn);
        metrics::connection_closed();

        if !self.detach(conn, &handle.user_id) {
            debug!(%conn, user = %handle.user_id, "Connection was already superseded");
            return true;
        }

        let now = now_millis();
        if let Err(e) = self
            .db
            .users()
            .mark_offline(&handle.user_id, &conn.to_string(), now)
            .await
        {
            warn!(%conn, user = %handle.user_id, error = %e, "Failed to persist offline state");
        }

        // A reconnect may have landed while storage was being updated.
        if !self.presence.is_online(&handle.user_id) {
            self.broadcast_all(
                ServerEvent::UserOffline {
                    user_id: handle.user_id.clone(),
                    last_seen: now,
                },
                Some(conn),
            );
        }
        info!(%conn, user = %handle.user_id, "Connection closed");
        true
    }

    /// End a user's session from outside its connection task.
    ///
    /// A live connection is told to close and deactivated here, so the
    /// stored row is offline once this returns. Returns whether a live
    /// connection was closed.
    pub async fn sign_out(&self, user_id: &str) -> ChatResult<bool> {
        let Some(conn) = self.presence.handle(user_id) else {
            self.db.users().clear_online(user_id, now_millis()).await?;
            return Ok(false);
        };

        // Signal before deactivating: the handle leaves the registry there.
        self.close_connection(conn, "Logged out");
        self.deactivate(conn).await;
        // The task may have won the race to deactivate; this write is the
        // same guarded update and settles the row either way.
        self.db
            .users()
            .mark_offline(user_id, &conn.to_string(), now_millis())
            .await?;
        Ok(true)
    }

    /// Ask a connection's task to close. Used by the disconnect worker.
    pub fn close_connection(&self, conn: ConnId, reason: &str) -> bool {
        match self.connections.get(conn) {
            Some(handle) => handle.close(reason),
            None => false,
        }
    }

    pub fn request_disconnect(&self, conn: ConnId, reason: &str) {
        self.lifecycle.request_disconnect(conn, reason);
    }

    /// Enqueue one event for one connection. Never waits.
    fn deliver(&self, conn: ConnId, event: &Arc<ServerEvent>) -> bool {
        let Some(handle) = self.connections.get(conn) else {
            return false;
        };
        match handle.try_deliver(Arc::clone(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%conn, event = event.name(), "Send queue full, dropping delivery");
                metrics::delivery_dropped();
                self.request_disconnect(conn, "SendQ exceeded");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%conn, event = event.name(), "Connection queue closed");
                false
            }
        }
    }

    pub fn send_to_conn(&self, conn: ConnId, event: ServerEvent) -> bool {
        self.deliver(conn, &Arc::new(event))
    }

    /// Fan an event out to every member of `room` except `exclude`.
    pub fn broadcast_room(&self, room: &RoomId, event: ServerEvent, exclude: Option<ConnId>) -> usize {
        let targets = self.rooms.broadcast_targets(room);
        let event = Arc::new(event);
        let delivered = targets
            .iter()
            .filter(|conn| Some(**conn) != exclude)
            .filter(|conn| self.deliver(**conn, &event))
            .count();
        metrics::record_fanout(delivered);
        delivered
    }

    pub fn send_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        self.broadcast_room(&RoomId::user(user_id), event, None)
    }

    /// Fan an event out to every live connection except `exclude`.
    pub fn broadcast_all(&self, event: ServerEvent, exclude: Option<ConnId>) -> usize {
        let event = Arc::new(event);
        let delivered = self
            .connections
            .all()
            .into_iter()
            .filter(|conn| Some(*conn) != exclude)
            .filter(|conn| self.deliver(*conn, &event))
            .count();
        metrics::record_fanout(delivered);
        delivered
    }

    /// Join the user's live connection, if any, to a chat room.
    pub fn join_user_to_chat(&self, user_id: &str, chat_id: &str) -> bool {
        match self.presence.handle(user_id) {
            Some(conn) => self.rooms.join_conversation_room(conn, chat_id),
            None => false,
        }
    }

    /// Bring persisted online flags in line with the presence table.
    pub async fn reconcile(&self) -> ChatResult<ReconcileReport> {
        let present = self.presence.online_ids();
        let users = self.db.users();

        let cleared = users.clear_stale_online(&present, now_millis()).await?;
        let reasserted = if self.presence_config.reassert_online {
            users.reassert_online(&present).await?
        } else {
            0
        };

        let report = ReconcileReport { cleared, reasserted };
        if cleared + reasserted > 0 {
            metrics::presence_corrected(cleared + reasserted);
            info!(cleared, reasserted, online = present.len(), "Presence reconciled");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{memory_db, user};
    use crate::state::Outbound;
    use tokio::sync::oneshot;

    struct Conn {
        handle: Arc<ConnectionHandle>,
        rx: mpsc::Receiver<Outbound>,
        close_rx: oneshot::Receiver<String>,
    }

    impl Conn {
        fn drain(&mut self) -> Vec<&'static str> {
            let mut names = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                names.push(event.name());
            }
            names
        }
    }

    async fn switchboard() -> (Arc<Switchboard>, mpsc::Receiver<(ConnId, String)>) {
        let config = Config::parse(
            r#"
            [server]
            name = "test"
            [listen]
            address = "127.0.0.1:0"
            "#,
        )
        .unwrap();
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Switchboard::new(&config, memory_db().await, tx)), rx)
    }

    fn conn(sb: &Switchboard, user: &UserRecord, queue: usize) -> Conn {
        let (tx, rx) = mpsc::channel(queue);
        let (close_tx, close_rx) = oneshot::channel();
        let handle = Arc::new(ConnectionHandle::new(
            sb.conn_ids.next(),
            &user.id,
            &user.name,
            tx,
            close_tx,
        ));
        Conn { handle, rx, close_rx }
    }

    #[tokio::test]
    async fn presence_follows_connection_lifecycle() {
        let (sb, _rx) = switchboard().await;
        let alice = user(&sb.db, "alice").await;
        assert!(!sb.presence.is_online(&alice.id));

        let mut c = conn(&sb, &alice, 8);
        sb.activate(Arc::clone(&c.handle), &alice).await.unwrap();
        assert!(sb.presence.is_online(&alice.id));
        assert_eq!(c.drain(), vec!["online_users"]);
        let stored = sb.db.users().find_by_id(&alice.id).await.unwrap().unwrap();
        assert!(stored.is_online);
        assert_eq!(stored.socket_id, c.handle.conn.to_string());

        assert!(sb.deactivate(c.handle.conn).await);
        assert!(!sb.presence.is_online(&alice.id));
        assert!(sb.rooms.rooms_of(c.handle.conn).is_empty());
        let stored = sb.db.users().find_by_id(&alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);
        assert!(stored.socket_id.is_empty());
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let (sb, _rx) = switchboard().await;
        let alice = user(&sb.db, "alice").await;
        let bob = user(&sb.db, "bob").await;
        let a = conn(&sb, &alice, 8);
        let mut b = conn(&sb, &bob, 8);
        sb.activate(Arc::clone(&b.handle), &bob).await.unwrap();
        sb.activate(Arc::clone(&a.handle), &alice).await.unwrap();
        b.drain();

        assert!(sb.deactivate(a.handle.conn).await);
        assert!(!sb.deactivate(a.handle.conn).await);
        assert_eq!(b.drain(), vec!["user_offline"]);
    }

    #[tokio::test]
    async fn activation_joins_existing_chats_and_announces() {
        let (sb, _rx) = switchboard().await;
        let alice = user(&sb.db, "alice").await;
        let bob = user(&sb.db, "bob").await;
        let chat = sb.db.chats().find_or_create_private(&alice.id, &bob.id).await.unwrap();

        let mut b = conn(&sb, &bob, 8);
        sb.activate(Arc::clone(&b.handle), &bob).await.unwrap();
        b.drain();

        let mut a = conn(&sb, &alice, 8);
        sb.activate(Arc::clone(&a.handle), &alice).await.unwrap();

        assert!(sb.rooms.is_member(a.handle.conn, &RoomId::chat(&chat.id)));
        assert!(sb.rooms.is_member(a.handle.conn, &RoomId::user(&alice.id)));
        assert_eq!(b.drain(), vec!["user_online"]);

        let snapshot = match a.rx.try_recv().unwrap().as_ref() {
            ServerEvent::OnlineUsers(list) => list.clone(),
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn second_connection_evicts_first() {
        let (sb, _rx) = switchboard().await;
        let alice = user(&sb.db, "alice").await;
        let first = conn(&sb, &alice, 8);
        let second = conn(&sb, &alice, 8);

        sb.activate(Arc::clone(&first.handle), &alice).await.unwrap();
        sb.activate(Arc::clone(&second.handle), &alice).await.unwrap();

        assert_eq!(first.close_rx.await.unwrap(), "Connected from another location");
        assert_eq!(sb.presence.handle(&alice.id), Some(second.handle.conn));
        assert_eq!(
            sb.rooms.broadcast_targets(&RoomId::user(&alice.id)).len(),
            1
        );

        // The evicted task's own teardown must not take the user offline.
        assert!(!sb.deactivate(first.handle.conn).await);
        assert!(sb.presence.is_online(&alice.id));
        let stored = sb.db.users().find_by_id(&alice.id).await.unwrap().unwrap();
        assert!(stored.is_online);
    }

    #[tokio::test]
    async fn sign_out_closes_the_live_connection() {
        let (sb, _rx) = switchboard().await;
        let alice = user(&sb.db, "alice").await;
        let bob = user(&sb.db, "bob").await;
        let a = conn(&sb, &alice, 8);
        let mut b = conn(&sb, &bob, 8);
        sb.activate(Arc::clone(&b.handle), &bob).await.unwrap();
        sb.activate(Arc::clone(&a.handle), &alice).await.unwrap();
        b.drain();

        assert!(sb.sign_out(&alice.id).await.unwrap());
        assert_eq!(a.close_rx.await.unwrap(), "Logged out");
        assert!(!sb.presence.is_online(&alice.id));
        assert_eq!(b.drain(), vec!["user_offline"]);
        let stored = sb.db.users().find_by_id(&alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);

        // Without a live connection only the stored flag is touched.
        sb.db.users().mark_online(&alice.id, "c-stale", now_millis()).await.unwrap();
        assert!(!sb.sign_out(&alice.id).await.unwrap());
        let stored = sb.db.users().find_by_id(&alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);
    }

    #[tokio::test]
    async fn full_queue_requests_disconnect() {
        let (sb, mut disconnects) = switchboard().await;
        let alice = user(&sb.db, "alice").await;
        let c = conn(&sb, &alice, 1);
        // The online_users snapshot fills the single slot.
        sb.activate(Arc::clone(&c.handle), &alice).await.unwrap();

        assert!(!sb.send_to_conn(c.handle.conn, ServerEvent::error("overflow")));
        let (conn, reason) = disconnects.recv().await.unwrap();
        assert_eq!(conn, c.handle.conn);
        assert_eq!(reason, "SendQ exceeded");
    }

    #[tokio::test]
    async fn reconcile_clears_stale_flags() {
        let (sb, _rx) = switchboard().await;
        let alice = user(&sb.db, "alice").await;
        let bob = user(&sb.db, "bob").await;

        // Alice's row says online but she has no presence entry.
        sb.db.users().mark_online(&alice.id, "c999", now_millis()).await.unwrap();
        let b = conn(&sb, &bob, 8);
        sb.activate(Arc::clone(&b.handle), &bob).await.unwrap();

        let report = sb.reconcile().await.unwrap();
        assert_eq!(report.cleared, 1);
        let stored = sb.db.users().find_by_id(&alice.id).await.unwrap().unwrap();
        assert!(!stored.is_online);
        let stored = sb.db.users().find_by_id(&bob.id).await.unwrap().unwrap();
        assert!(stored.is_online);

        assert_eq!(sb.reconcile().await.unwrap(), ReconcileReport::default());
    }
}
