//! Room membership: the many-to-many relation between connection handles and
//! broadcast rooms.
//!
//! Both directions live behind one `RwLock` so a release is a single critical
//! section. Member sets are `im::HashSet`s, which makes the snapshot handed
//! to a broadcast a cheap structural clone taken under the read lock.

use super::ConnId;
use im::HashSet as ImHashSet;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Personal delivery to every connection of one user.
    User(String),
    /// One conversation.
    Chat(String),
}

impl RoomId {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    pub fn chat(id: impl Into<String>) -> Self {
        Self::Chat(id.into())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Chat(id) => write!(f, "chat:{id}"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<RoomId, ImHashSet<ConnId>>,
    by_conn: HashMap<ConnId, HashSet<RoomId>>,
}

impl Inner {
    fn join(&mut self, conn: ConnId, room: RoomId) -> bool {
        let joined = self.by_conn.entry(conn).or_default().insert(room.clone());
        if joined {
            self.rooms.entry(room).or_default().insert(conn);
        }
        joined
    }

    fn leave(&mut self, conn: ConnId, room: &RoomId) -> bool {
        let Some(rooms) = self.by_conn.get_mut(&conn) else {
            return false;
        };
        if !rooms.remove(room) {
            return false;
        }
        if rooms.is_empty() {
            self.by_conn.remove(&conn);
        }
        self.drop_member(room, conn);
        true
    }

    fn drop_member(&mut self, room: &RoomId, conn: ConnId) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(&conn);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn release(&mut self, conn: ConnId) -> usize {
        let Some(rooms) = self.by_conn.remove(&conn) else {
            return 0;
        };
        for room in &rooms {
            self.drop_member(room, conn);
        }
        rooms.len()
    }
}

#[derive(Debug, Default)]
pub struct RoomManager {
    inner: RwLock<Inner>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join_personal_room(&self, conn: ConnId, user_id: &str) -> bool {
        self.inner.write().join(conn, RoomId::user(user_id))
    }

    /// Returns `false` when the connection was already a member.
    pub fn join_conversation_room(&self, conn: ConnId, chat_id: &str) -> bool {
        self.inner.write().join(conn, RoomId::chat(chat_id))
    }

    /// Returns `false` when the connection was not a member.
    pub fn leave_conversation_room(&self, conn: ConnId, chat_id: &str) -> bool {
        self.inner.write().leave(conn, &RoomId::chat(chat_id))
    }

    /// Connections currently joined to `room`.
    pub fn broadcast_targets(&self, room: &RoomId) -> ImHashSet<ConnId> {
        self.inner.read().rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn is_member(&self, conn: ConnId, room: &RoomId) -> bool {
        self.inner
            .read()
            .by_conn
            .get(&conn)
            .is_some_and(|rooms| rooms.contains(room))
    }

    pub fn rooms_of(&self, conn: ConnId) -> Vec<RoomId> {
        self.inner
            .read()
            .by_conn
            .get(&conn)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every membership of `conn`. Returns how many rooms it left.
    pub fn release(&self, conn: ConnId) -> usize {
        self.release_with(conn, || ()).0
    }

    /// Drop every membership of `conn` and run `f` before the write lock is
    /// released. Readers observe either the state before both changes or
    /// the state after both.
    pub fn release_with<R>(&self, conn: ConnId, f: impl FnOnce() -> R) -> (usize, R) {
        let mut inner = self.inner.write();
        let released = inner.release(conn);
        let out = f();
        (released, out)
    }

    #[cfg(test)]
    pub fn room_count(&self) -> usize {
        self.inner.read().rooms.len()
    }
}
