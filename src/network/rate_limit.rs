//! Flood protection for the WebSocket gateway.
//!
//! Governor-based token buckets: per-connection message rate and per-IP
//! connection rate, plus a simple concurrent-connection cap per IP. This is
//! the spec's "coarse per-connection debouncing" baseline, not a
//! business-level quota feature.

use crate::config::RateLimitConfig;
use crate::session::ConnectionId;
use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Thread-safe rate-limit manager backed by `governor`.
pub struct RateLimitManager {
    message_limiters: DashMap<ConnectionId, DirectRateLimiter>,
    connection_limiters: DashMap<IpAddr, DirectRateLimiter>,
    active_per_ip: DashMap<IpAddr, AtomicU32>,
    config: Arc<RateLimitConfig>,
}

impl RateLimitManager {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            message_limiters: DashMap::new(),
            connection_limiters: DashMap::new(),
            active_per_ip: DashMap::new(),
            config: Arc::new(config),
        }
    }

    /// Check whether a connection may process another inbound frame.
    pub fn check_message_rate(&self, connection_id: ConnectionId) -> bool {
        let limiter = self.message_limiters.entry(connection_id).or_insert_with(|| {
            let rate = NonZeroU32::new(self.config.message_rate_per_second)
                .unwrap_or(NonZeroU32::new(1).unwrap());
            GovRateLimiter::direct(Quota::per_second(rate))
        });

        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(connection_id, "message rate limit exceeded");
            crate::metrics::RATE_LIMITED.inc();
        }
        allowed
    }

    /// Check whether a new connection attempt from `ip` may proceed, given a
    /// burst quota and the configured concurrent-connection cap.
    pub fn check_connection_rate(&self, ip: IpAddr) -> bool {
        let limiter = self.connection_limiters.entry(ip).or_insert_with(|| {
            let burst = NonZeroU32::new(self.config.connection_burst_per_ip)
                .unwrap_or(NonZeroU32::new(1).unwrap());
            GovRateLimiter::direct(Quota::per_second(NonZeroU32::new(1).unwrap()).allow_burst(burst))
        });

        if limiter.check().is_err() {
            debug!(%ip, "connection rate limit exceeded");
            return false;
        }

        let active = self.active_per_ip.entry(ip).or_insert_with(|| AtomicU32::new(0));
        if active.load(Ordering::Relaxed) >= self.config.max_connections_per_ip {
            debug!(%ip, "max connections per ip exceeded");
            return false;
        }
        active.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Release a connection slot for `ip` on transport close.
    pub fn release_connection(&self, ip: IpAddr) {
        if let Some(active) = self.active_per_ip.get(&ip) {
            active.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1))).ok();
        }
    }

    /// Drop a connection's message-rate bookkeeping on disconnect.
    pub fn remove_connection(&self, connection_id: ConnectionId) {
        self.message_limiters.remove(&connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig {
            message_rate_per_second: 2,
            connection_burst_per_ip: 3,
            max_connections_per_ip: 2,
        }
    }

    #[test]
    fn message_rate_limits_after_quota() {
        let manager = RateLimitManager::new(test_config());
        assert!(manager.check_message_rate(1));
        assert!(manager.check_message_rate(1));
        assert!(!manager.check_message_rate(1));
    }

    #[test]
    fn connection_burst_then_cap() {
        let manager = RateLimitManager::new(test_config());
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(manager.check_connection_rate(ip));
        assert!(manager.check_connection_rate(ip));
        // max_connections_per_ip=2 trips before the burst quota of 3 would.
        assert!(!manager.check_connection_rate(ip));
    }

    #[test]
    fn released_connection_frees_a_slot() {
        let manager = RateLimitManager::new(test_config());
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(manager.check_connection_rate(ip));
        assert!(manager.check_connection_rate(ip));
        manager.release_connection(ip);
        assert!(manager.check_connection_rate(ip));
    }

    #[test]
    fn independent_connections_have_independent_quotas() {
        let manager = RateLimitManager::new(test_config());
        manager.check_message_rate(1);
        manager.check_message_rate(1);
        assert!(!manager.check_message_rate(1));
        assert!(manager.check_message_rate(2));
    }
}
