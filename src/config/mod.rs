//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, DatabaseConfig)
//! - [`listen`]: Listener configuration (ListenConfig, TlsConfig, HttpConfig)
//! - [`security`]: Token and flood settings (SecurityConfig, RateLimitConfig)
//! - [`limits`]: Size, paging and presence limits (LimitsConfig, PresenceConfig, UploadsConfig)

mod defaults;
mod limits;
mod listen;
mod security;
mod types;
pub mod validation;

pub use limits::{LimitsConfig, PresenceConfig, UploadsConfig};
pub use listen::{HttpConfig, ListenConfig, TlsConfig};
pub use security::{RateLimitConfig, SecurityConfig, is_default_secret};
pub use types::{Config, ConfigError, DatabaseConfig, IdleTimeoutsConfig, ServerConfig};
