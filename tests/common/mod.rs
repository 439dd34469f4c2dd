//! Common test utilities for integration testing.
//!
//! Provides an in-process server bound to ephemeral ports and a WebSocket
//! client that speaks the event protocol.

#![allow(dead_code)]

pub mod client;
pub mod server;

pub use client::TestClient;
pub use server::TestServer;
