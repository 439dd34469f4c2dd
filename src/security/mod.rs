//! Security module for huddle.
//!
//! Provides:
//! - **Rate Limiting**: Governor-based flood protection for realtime events
//! - **Upload Policy**: Extension allow-list and size cap for attachments

pub mod rate_limit;
pub mod uploads;

pub use rate_limit::RateLimitManager;
pub use uploads::UploadPolicy;
