//! Connection handle allocation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Server-side handle for one live WebSocket connection.
///
/// Displayed as `c<n>`; that form is what gets persisted as a user's
/// `socket_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Hands out unique connection handles.
///
/// Seeded from the boot time so that handles left in storage by a previous
/// process never collide with fresh ones.
pub struct ConnIdGenerator {
    counter: AtomicU64,
}

impl ConnIdGenerator {
    pub fn starting_at(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start.max(1)),
        }
    }

    pub fn from_boot_time(now_millis: i64) -> Self {
        Self::starting_at((now_millis.max(0) as u64) << 16)
    }

    pub fn next(&self) -> ConnId {
        ConnId(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}
