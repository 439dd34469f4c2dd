//! Size, paging, presence and upload limits.

use super::defaults::{
    default_actor_idle_secs, default_actor_mailbox_capacity, default_chat_page_size,
    default_history_page_size, default_max_frame_bytes, default_max_message_length,
    default_max_page_size, default_reconcile_interval, default_send_queue, default_true,
    default_upload_dir, default_upload_extensions, default_upload_max_bytes,
};
use serde::Deserialize;

/// Message and queue limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message content length in characters (default: 10000).
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Maximum inbound WebSocket frame size in bytes (default: 64 KiB).
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Outbound queue per connection (default: 256).
    /// A connection whose queue fills up is disconnected.
    #[serde(default = "default_send_queue")]
    pub send_queue: usize,
    /// Default page size for chat lists (default: 20).
    #[serde(default = "default_chat_page_size")]
    pub chat_page_size: u32,
    /// Default page size for message history (default: 50).
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,
    /// Upper bound on any requested page size (default: 100).
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Conversation actor mailbox capacity (default: 256).
    #[serde(default = "default_actor_mailbox_capacity")]
    pub actor_mailbox_capacity: usize,
    /// Seconds an idle conversation actor lingers before retiring (default: 300).
    #[serde(default = "default_actor_idle_secs")]
    pub actor_idle_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            max_frame_bytes: default_max_frame_bytes(),
            send_queue: default_send_queue(),
            chat_page_size: default_chat_page_size(),
            history_page_size: default_history_page_size(),
            max_page_size: default_max_page_size(),
            actor_mailbox_capacity: default_actor_mailbox_capacity(),
            actor_idle_secs: default_actor_idle_secs(),
        }
    }
}

impl LimitsConfig {
    /// Clamp a requested page size, falling back to `default` when absent or zero.
    pub fn page_size(&self, requested: Option<u32>, default: u32) -> u32 {
        match requested {
            Some(0) | None => default,
            Some(n) => n.min(self.max_page_size),
        }
    }
}

/// Presence reconciliation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Seconds between reconciliation sweeps (default: 60).
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Also set the stored online flag for connected users whose row says
    /// offline (default: true).
    #[serde(default = "default_true")]
    pub reassert_online: bool,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
            reassert_online: true,
        }
    }
}

/// File upload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadsConfig {
    /// Directory uploaded files are written to.
    #[serde(default = "default_upload_dir")]
    pub dir: String,
    /// Maximum upload size in bytes (default: 50 MiB).
    #[serde(default = "default_upload_max_bytes")]
    pub max_bytes: u64,
    /// Accepted file extensions, `|`-separated.
    #[serde(default = "default_upload_extensions")]
    pub allowed_extensions: String,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_upload_dir(),
            max_bytes: default_upload_max_bytes(),
            allowed_extensions: default_upload_extensions(),
        }
    }
}
