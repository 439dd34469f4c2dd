//! Security configuration: bearer tokens and flood protection.

use super::defaults::{
    DEFAULT_JWT_SECRET, default_jwt_secret, default_max_flood_violations, default_message_burst,
    default_message_rate, default_token_issuer, default_token_ttl,
};
use serde::Deserialize;

/// Minimum accepted secret length.
const MIN_SECRET_LEN: usize = 16;

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// HMAC secret for HS256 bearer tokens.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Expected `iss` claim.
    #[serde(default = "default_token_issuer")]
    pub token_issuer: String,
    /// Lifetime of issued tokens in seconds (default: 7 days).
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Realtime flood protection.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_issuer: default_token_issuer(),
            token_ttl_secs: default_token_ttl(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

/// Per-connection event rate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained events per second per connection (default: 10).
    #[serde(default = "default_message_rate")]
    pub message_rate_per_second: u32,
    /// Burst allowance on top of the sustained rate (default: 20).
    #[serde(default = "default_message_burst")]
    pub message_burst: u32,
    /// Consecutive rate-limited events before disconnect (default: 3).
    #[serde(default = "default_max_flood_violations")]
    pub max_flood_violations: u8,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message_rate_per_second: default_message_rate(),
            message_burst: default_message_burst(),
            max_flood_violations: default_max_flood_violations(),
        }
    }
}

/// Whether a secret is the shipped placeholder or too short to trust.
pub fn is_default_secret(secret: &str) -> bool {
    secret == DEFAULT_JWT_SECRET || secret.len() < MIN_SECRET_LEN
}
