//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Server Defaults
// =============================================================================

pub fn default_metrics_port() -> u16 {
    9090
}

// =============================================================================
// Session Defaults
// =============================================================================

pub fn default_heartbeat_interval_secs() -> u64 {
    30
}

pub fn default_resume_ttl_secs() -> u64 {
    60
}

pub fn default_status_cache_ttl_secs() -> u64 {
    3600
}

pub fn default_away_timeout_secs() -> u64 {
    300
}

// =============================================================================
// Channel Defaults
// =============================================================================

pub fn default_max_channel_members() -> usize {
    50
}

pub fn default_custom_status_max_chars() -> usize {
    128
}

pub fn default_invite_code_ttl_days() -> Option<u64> {
    None
}

// =============================================================================
// Rate Limit Defaults
// =============================================================================

pub fn default_message_rate_per_second() -> u32 {
    5
}

pub fn default_connection_burst_per_ip() -> u32 {
    10
}

pub fn default_max_connections_per_ip() -> u32 {
    20
}

// =============================================================================
// State Store Defaults
// =============================================================================

pub fn default_store_pool_size() -> u32 {
    20
}
