//! Flood/connection guard configuration (SPEC_FULL.md S2a: "governor-based
//! per-connection message-rate and per-IP connection-rate limiters").
//!
//! This is the "coarse per-connection debouncing" the spec's Non-goals permit,
//! not a business-level quota feature.

use serde::Deserialize;

use super::defaults::{
    default_connection_burst_per_ip, default_max_connections_per_ip,
    default_message_rate_per_second,
};

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Inbound frames allowed per connection per second.
    #[serde(default = "default_message_rate_per_second")]
    pub message_rate_per_second: u32,
    /// Connection attempts allowed per IP in a 10-second window.
    #[serde(default = "default_connection_burst_per_ip")]
    pub connection_burst_per_ip: u32,
    /// Maximum concurrent connections allowed per IP.
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message_rate_per_second: default_message_rate_per_second(),
            connection_burst_per_ip: default_connection_burst_per_ip(),
            max_connections_per_ip: default_max_connections_per_ip(),
        }
    }
}

/// Security configuration block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}
