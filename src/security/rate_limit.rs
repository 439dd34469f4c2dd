//! Rate limiting for flood protection.
//!
//! Uses the `governor` crate's token bucket algorithm. Each live connection
//! gets its own limiter for inbound realtime events.

use crate::config::RateLimitConfig;
use crate::state::ConnId;
use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use tracing::debug;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Thread-safe rate limit manager using governor.
#[derive(Debug)]
pub struct RateLimitManager {
    /// Per-connection event rate limiters.
    message_limiters: DashMap<ConnId, DirectRateLimiter>,
    config: RateLimitConfig,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            message_limiters: DashMap::new(),
            config,
        }
    }

    fn quota(&self) -> Quota {
        let rate =
            NonZeroU32::new(self.config.message_rate_per_second).unwrap_or(nonzero!(10u32));
        let burst = NonZeroU32::new(self.config.message_burst).unwrap_or(rate);
        Quota::per_second(rate).allow_burst(burst)
    }

    /// Check if a connection may send another event.
    ///
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn check_message_rate(&self, conn: ConnId) -> bool {
        let limiter = self
            .message_limiters
            .entry(conn)
            .or_insert_with(|| GovRateLimiter::direct(self.quota()));

        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(%conn, "message rate limit exceeded");
        }
        allowed
    }

    /// Consecutive violations tolerated before disconnect.
    pub fn max_violations(&self) -> u8 {
        self.config.max_flood_violations.max(1)
    }

    /// Remove a connection's limiter (on disconnect).
    pub fn remove_client(&self, conn: ConnId) {
        self.message_limiters.remove(&conn);
    }

    pub fn tracked(&self) -> usize {
        self.message_limiters.len()
    }
}
