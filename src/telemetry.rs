//! Presence-aware telemetry.
//!
//! Structured tracing spans carrying presence-specific context (username,
//! channel-id, connection-id), so logs can be correlated across the ingress
//! dispatch loop, the Presence Engine, and the Channel Engine.

#![allow(dead_code)]

use std::time::Instant;
use tracing::{Level, Span, span};

/// Trace context for a single inbound frame or outbound fan-out event.
#[derive(Debug, Clone, Default)]
pub struct PresenceTraceContext {
    /// The client-message or server-message tag (e.g. "statusUpdate", "u").
    pub message_type: Option<String>,
    /// The username the event concerns.
    pub username: Option<String>,
    /// Target channel, if applicable.
    pub channel_id: Option<String>,
    /// Connection identifier (opaque, process-local).
    pub connection_id: Option<String>,
    /// Number of subscribers a published event fanned out to.
    pub fanout: Option<usize>,
}

impl PresenceTraceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn with_connection_id(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn into_span(self) -> Span {
        let message_type = self.message_type.as_deref().unwrap_or("unknown");
        span!(
            Level::DEBUG,
            "presence.message",
            message_type = message_type,
            username = self.username.as_deref(),
            channel_id = self.channel_id.as_deref(),
            connection_id = self.connection_id.as_deref(),
            fanout = self.fanout,
        )
    }
}

/// Guard that records a fan-out span and timing when dropped.
pub struct FanoutTimer {
    topic: String,
    start: Instant,
}

impl FanoutTimer {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for FanoutTimer {
    fn drop(&mut self) {
        tracing::trace!(topic = %self.topic, elapsed_ms = self.start.elapsed().as_millis(), "fan-out complete");
    }
}

/// Create a span for a single publish-and-fan-out event, also recording the
/// delta-published metric (S8 I1: "exactly once" per update).
pub fn create_fanout_span(topic: &str, recipients: usize) -> Span {
    crate::metrics::DELTAS_PUBLISHED.inc();
    span!(
        Level::DEBUG,
        "presence.fanout",
        topic = topic,
        recipients = recipients,
    )
}

/// Create a span for a single connection's dispatch loop.
pub fn create_connection_span(connection_id: &str, username: Option<&str>) -> Span {
    span!(
        Level::INFO,
        "presence.connection",
        connection_id = connection_id,
        username = username,
    )
}
