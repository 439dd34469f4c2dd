//! Presence table: which users are reachable right now, and on which handle.
//!
//! Keyed by user id. `DashMap` shard locks serialize writers for the same
//! user; the later write wins. A missing entry simply means offline.

use super::ConnId;
use dashmap::DashMap;
use huddle_proto::PublicProfile;

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub conn: ConnId,
    pub profile: PublicProfile,
    /// Unix millis.
    pub connected_at: i64,
}

#[derive(Debug, Default)]
pub struct PresenceTable {
    entries: DashMap<String, PresenceEntry>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `conn` as the user's live handle.
    ///
    /// Returns the handle that was displaced, if it differs from `conn`.
    pub fn upsert(&self, user_id: &str, conn: ConnId, profile: PublicProfile, now: i64) -> Option<ConnId> {
        let mut profile = profile;
        profile.is_online = true;
        let previous = self.entries.insert(
            user_id.to_string(),
            PresenceEntry {
                conn,
                profile,
                connected_at: now,
            },
        );
        previous.map(|p| p.conn).filter(|old| *old != conn)
    }

    pub fn remove(&self, user_id: &str) -> Option<PresenceEntry> {
        self.entries.remove(user_id).map(|(_, e)| e)
    }

    /// Remove the entry only while it still names `conn`.
    pub fn remove_if(&self, user_id: &str, conn: ConnId) -> bool {
        self.entries
            .remove_if(user_id, |_, entry| entry.conn == conn)
            .is_some()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.entries.contains_key(user_id)
    }

    pub fn handle(&self, user_id: &str) -> Option<ConnId> {
        self.entries.get(user_id).map(|e| e.conn)
    }

    /// Profiles of every online user.
    pub fn snapshot(&self) -> Vec<PublicProfile> {
        let mut profiles: Vec<PublicProfile> =
            self.entries.iter().map(|e| e.profile.clone()).collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        profiles
    }

    pub fn online_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
