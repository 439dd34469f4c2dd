//! Prometheus metrics collection for huddle.
//!
//! Tracks connection counts, event throughput and latency, fan-out width,
//! dropped deliveries and presence reconciliation.
//!
//! - `huddle_event_total{event}` - Realtime and HTTP commands processed by type
//! - `huddle_event_duration_seconds{event}` - Command latency histogram
//! - `huddle_event_errors_total{event,error}` - Failed commands by error kind
//! - `huddle_message_fanout` - Recipients per broadcast (histogram)

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters (monotonic increasing)
// ========================================================================

/// Messages persisted by the fan-out engine.
pub static MESSAGES_SENT: OnceLock<IntCounter> = OnceLock::new();

/// Inbound events rejected by flood protection.
pub static RATE_LIMITED: OnceLock<IntCounter> = OnceLock::new();

/// Handshakes refused for a bad or missing credential.
pub static AUTH_FAILURES: OnceLock<IntCounter> = OnceLock::new();

/// Deliveries dropped because a connection's queue was full.
pub static MESSAGES_DROPPED: OnceLock<IntCounter> = OnceLock::new();

/// Stored online flags corrected by the reconciliation sweep.
pub static PRESENCE_CORRECTIONS: OnceLock<IntCounter> = OnceLock::new();

// ========================================================================
// Gauges (can increase/decrease)
// ========================================================================

/// Currently active connections.
pub static CONNECTED_USERS: OnceLock<IntGauge> = OnceLock::new();

/// Conversation actors currently running.
pub static ACTIVE_CONVERSATIONS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Per-event metrics
// ========================================================================

pub static EVENT_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

pub static EVENT_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

pub static EVENT_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Recipients per broadcast.
pub static MESSAGE_FANOUT: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(register_all);
}

fn register_all() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            match $init {
                Ok(m) => {
                    if let Err(e) = r.register(Box::new(m.clone())) {
                        tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                    }
                    let _ = $metric.set(m);
                }
                Err(e) => {
                    tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                }
            }
        };
    }

    register!(MESSAGES_SENT, IntCounter::new("huddle_messages_sent_total", "Messages persisted"));
    register!(RATE_LIMITED, IntCounter::new("huddle_rate_limited_total", "Rate limit hits"));
    register!(AUTH_FAILURES, IntCounter::new("huddle_auth_failures_total", "Refused handshakes"));
    register!(MESSAGES_DROPPED, IntCounter::new("huddle_messages_dropped_total", "Deliveries dropped due to backpressure"));
    register!(PRESENCE_CORRECTIONS, IntCounter::new("huddle_presence_corrections_total", "Online flags corrected by reconciliation"));
    register!(CONNECTED_USERS, IntGauge::new("huddle_connected_users", "Currently connected users"));
    register!(ACTIVE_CONVERSATIONS, IntGauge::new("huddle_active_conversations", "Running conversation actors"));

    register!(EVENT_COUNTER, IntCounterVec::new(Opts::new("huddle_event_total", "Commands processed by type"), &["event"]));
    register!(EVENT_LATENCY, HistogramVec::new(
        HistogramOpts::new("huddle_event_duration_seconds", "Command latency by type")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["event"]));
    register!(EVENT_ERRORS, IntCounterVec::new(Opts::new("huddle_event_errors_total", "Command errors by type"), &["event", "error"]));
    register!(MESSAGE_FANOUT, Histogram::with_opts(
        HistogramOpts::new("huddle_message_fanout", "Recipients per broadcast")
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helper functions for metric updates
// ============================================================================

#[inline]
fn inc(metric: &OnceLock<IntCounter>) {
    if let Some(c) = metric.get() {
        c.inc();
    }
}

#[inline]
fn inc_by(metric: &OnceLock<IntCounter>, n: u64) {
    if let Some(c) = metric.get() {
        c.inc_by(n);
    }
}

#[inline]
fn gauge_add(metric: &OnceLock<IntGauge>, delta: i64) {
    if let Some(g) = metric.get() {
        g.add(delta);
    }
}

/// Record a command execution with latency.
#[inline]
pub fn record_event(event: &str, duration_secs: f64) {
    if let Some(c) = EVENT_COUNTER.get() {
        c.with_label_values(&[event]).inc();
    }
    if let Some(h) = EVENT_LATENCY.get() {
        h.with_label_values(&[event]).observe(duration_secs);
    }
}

#[inline]
pub fn record_event_error(event: &str, error: &str) {
    if let Some(c) = EVENT_ERRORS.get() {
        c.with_label_values(&[event, error]).inc();
    }
}

#[inline]
pub fn record_fanout(recipients: usize) {
    if let Some(h) = MESSAGE_FANOUT.get() {
        h.observe(recipients as f64);
    }
}

pub fn message_sent() {
    inc(&MESSAGES_SENT);
}

pub fn rate_limited() {
    inc(&RATE_LIMITED);
}

pub fn auth_failed() {
    inc(&AUTH_FAILURES);
}

pub fn delivery_dropped() {
    inc(&MESSAGES_DROPPED);
}

pub fn presence_corrected(n: u64) {
    inc_by(&PRESENCE_CORRECTIONS, n);
}

pub fn connection_opened() {
    gauge_add(&CONNECTED_USERS, 1);
}

pub fn connection_closed() {
    gauge_add(&CONNECTED_USERS, -1);
}

pub fn conversation_started() {
    gauge_add(&ACTIVE_CONVERSATIONS, 1);
}

pub fn conversation_retired() {
    gauge_add(&ACTIVE_CONVERSATIONS, -1);
}
