//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Idle Timeout Defaults
// =============================================================================

pub fn default_ping_interval() -> u64 {
    90
}

pub fn default_ping_timeout() -> u64 {
    120
}

// =============================================================================
// Database Defaults
// =============================================================================

pub fn default_database_path() -> String {
    "huddle.db".to_string()
}

// =============================================================================
// Security Defaults
// =============================================================================

/// Placeholder secret shipped in sample configs. Startup refuses it.
pub const DEFAULT_JWT_SECRET: &str = "huddle-dev-secret-change-me";

pub fn default_jwt_secret() -> String {
    DEFAULT_JWT_SECRET.to_string()
}

pub fn default_token_issuer() -> String {
    "huddle".to_string()
}

pub fn default_token_ttl() -> u64 {
    7 * 24 * 60 * 60
}

pub fn default_message_rate() -> u32 {
    10
}

pub fn default_message_burst() -> u32 {
    20
}

pub fn default_max_flood_violations() -> u8 {
    3
}

// =============================================================================
// Presence Defaults
// =============================================================================

pub fn default_reconcile_interval() -> u64 {
    60
}

// =============================================================================
// Limits Defaults
// =============================================================================

pub fn default_max_message_length() -> usize {
    10_000
}

pub fn default_max_frame_bytes() -> usize {
    64 * 1024
}

pub fn default_send_queue() -> usize {
    256
}

pub fn default_chat_page_size() -> u32 {
    20
}

pub fn default_history_page_size() -> u32 {
    50
}

pub fn default_max_page_size() -> u32 {
    100
}

pub fn default_actor_mailbox_capacity() -> usize {
    256
}

pub fn default_actor_idle_secs() -> u64 {
    300
}

// =============================================================================
// Upload Defaults
// =============================================================================

pub fn default_upload_dir() -> String {
    "uploads".to_string()
}

pub fn default_upload_max_bytes() -> u64 {
    50 * 1024 * 1024
}

pub fn default_upload_extensions() -> String {
    "jpeg|jpg|png|gif|pdf|doc|docx|txt|mp3|wav|ogg|mp4|webm|mkv|mov".to_string()
}
