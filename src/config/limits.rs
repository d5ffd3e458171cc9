//! Output and request-budget limits.

use serde::Deserialize;

/// Bounded per-request budgets (S5: "Identity-adapter calls have bounded
/// per-request budgets; exceeding them fails the login attempt gracefully").
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Milliseconds allowed for an identity-adapter `resolve` call during login.
    #[serde(default = "default_identity_timeout_ms")]
    pub identity_timeout_ms: u64,
    /// Maximum friend-set size resolved per login, as a sanity ceiling on the
    /// number of `presence:{username}` subscriptions a single connection installs.
    #[serde(default = "default_max_friend_subscriptions")]
    pub max_friend_subscriptions: usize,
}

fn default_identity_timeout_ms() -> u64 {
    2000
}

fn default_max_friend_subscriptions() -> usize {
    20_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            identity_timeout_ms: default_identity_timeout_ms(),
            max_friend_subscriptions: default_max_friend_subscriptions(),
        }
    }
}
