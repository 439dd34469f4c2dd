//! Telemetry utilities for command timing and tracing spans.

use std::time::Instant;

/// Guard for timing command execution and recording metrics.
///
/// Records command latency when dropped.
pub struct EventTimer {
    event: &'static str,
    start: Instant,
}

impl EventTimer {
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            start: Instant::now(),
        }
    }
}

impl Drop for EventTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_event(self.event, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for a command executed on behalf of a user.
    pub fn command(name: &str, user: &str, chat: Option<&str>) -> Span {
        if let Some(chat) = chat {
            info_span!("command", name = %name, user = %user, chat = %chat)
        } else {
            info_span!("command", name = %name, user = %user)
        }
    }
}
