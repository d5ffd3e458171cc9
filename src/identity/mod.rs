//! Identity adapter boundary interface (S4.7).
//!
//! Out of scope for this repo: the real identity-provider integration that
//! mints access tokens and enumerates social-graph edges. The Session
//! Manager depends only on the [`IdentityAdapter`] trait, so production
//! deployments wire a real adapter while tests and local runs use
//! [`mock::MockIdentityAdapter`] without the Session Manager special-casing
//! either one.

pub mod mock;

use crate::error::IdentityError;
use async_trait::async_trait;

/// Profile and social-graph snapshot returned by a successful token resolve.
#[derive(Debug, Clone)]
pub struct IdentityProfile {
    pub identity_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub followers: Vec<i64>,
    pub following: Vec<i64>,
    pub close_friends: Vec<i64>,
}

/// Resolves a third-party access token to an identity and its graph edges.
///
/// Calls are bounded by `limits.identity_timeout_ms` (S5: "Identity-adapter
/// calls have bounded per-request budgets").
#[async_trait]
pub trait IdentityAdapter: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<IdentityProfile, IdentityError>;
}
