//! Prometheus metrics collection for presenced.
//!
//! Provides production-ready observability via Prometheus metrics exposed on
//! an HTTP endpoint. Tracks connection counts, fan-out volume, and the drops
//! the Privacy Filter and rate limiter perform.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for all metrics.
    pub static ref REGISTRY: Registry = Registry::new();

    // ========================================================================
    // Counters (monotonic increasing)
    // ========================================================================

    /// Total presence deltas (`u`) published to `presence:{username}` topics.
    pub static ref DELTAS_PUBLISHED: IntCounter = IntCounter::new(
        "presenced_deltas_published_total",
        "Total presence deltas published"
    ).unwrap();

    /// Total messages (of any server-message type) delivered to connections.
    pub static ref MESSAGES_SENT: IntCounter = IntCounter::new(
        "presenced_messages_sent_total",
        "Total server messages written to connections"
    ).unwrap();

    /// Total updates dropped by the Privacy Filter before reaching a viewer.
    pub static ref PRIVACY_DROPS: IntCounter = IntCounter::new(
        "presenced_privacy_drops_total",
        "Updates dropped by the privacy filter"
    ).unwrap();

    /// Total inbound frames rejected by the per-connection rate limiter.
    pub static ref RATE_LIMITED: IntCounter = IntCounter::new(
        "presenced_rate_limited_total",
        "Inbound frames rejected by the rate limiter"
    ).unwrap();

    /// Total login attempts that failed (bad token, taken username, failed resume).
    pub static ref LOGIN_FAILURES: IntCounter = IntCounter::new(
        "presenced_login_failures_total",
        "Failed login attempts"
    ).unwrap();

    /// Total connections terminated by the Liveness Monitor.
    pub static ref LIVENESS_TERMINATIONS: IntCounter = IntCounter::new(
        "presenced_liveness_terminations_total",
        "Connections closed for failing liveness"
    ).unwrap();

    // ========================================================================
    // Gauges (can increase/decrease)
    // ========================================================================

    /// Currently open Connections on this process.
    pub static ref CONNECTED_SESSIONS: IntGauge = IntGauge::new(
        "presenced_connected_sessions",
        "Currently open connections"
    ).unwrap();

    /// Distinct usernames with a non-empty Window Set on this process.
    pub static ref ONLINE_USERS: IntGauge = IntGauge::new(
        "presenced_online_users",
        "Distinct usernames currently online on this process"
    ).unwrap();

    /// Active channels known to this process.
    pub static ref ACTIVE_CHANNELS: IntGauge = IntGauge::new(
        "presenced_active_channels",
        "Active channels"
    ).unwrap();
}

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    REGISTRY.register(Box::new(DELTAS_PUBLISHED.clone())).unwrap();
    REGISTRY.register(Box::new(MESSAGES_SENT.clone())).unwrap();
    REGISTRY.register(Box::new(PRIVACY_DROPS.clone())).unwrap();
    REGISTRY.register(Box::new(RATE_LIMITED.clone())).unwrap();
    REGISTRY.register(Box::new(LOGIN_FAILURES.clone())).unwrap();
    REGISTRY
        .register(Box::new(LIVENESS_TERMINATIONS.clone()))
        .unwrap();
    REGISTRY.register(Box::new(CONNECTED_SESSIONS.clone())).unwrap();
    REGISTRY.register(Box::new(ONLINE_USERS.clone())).unwrap();
    REGISTRY.register(Box::new(ACTIVE_CHANNELS.clone())).unwrap();
}

/// Gather all metrics and encode them in Prometheus text format.
///
/// Returns a string suitable for HTTP response on `/metrics` endpoint.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
