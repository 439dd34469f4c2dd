//! huddle - real-time chat core.
//!
//! Authenticated WebSocket connections, a live presence table, room
//! membership and per-conversation fan-out, backed by SQLite and fronted by
//! an HTTP API for non-realtime clients.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod http;
pub mod metrics;
pub mod network;
pub mod security;
pub mod server;
pub mod state;
pub mod telemetry;

pub use error::{ChatError, ChatResult};
pub use server::Server;
