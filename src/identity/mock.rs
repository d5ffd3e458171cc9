//! Deterministic in-memory identity adapter for tests and local/dev runs
//! (S4.7).

use super::{IdentityAdapter, IdentityProfile};
use crate::error::IdentityError;
use async_trait::async_trait;
use dashmap::DashMap;

/// A fixed, hand-seeded identity graph. Tokens are looked up verbatim;
/// unknown tokens fail with [`IdentityError::InvalidToken`].
pub struct MockIdentityAdapter {
    profiles: DashMap<String, IdentityProfile>,
}

impl MockIdentityAdapter {
    pub fn new() -> Self {
        Self { profiles: DashMap::new() }
    }

    /// Register a token -> profile mapping. Used by tests and by local/dev
    /// runs seeding a handful of fixture identities.
    pub fn seed(&self, token: impl Into<String>, profile: IdentityProfile) {
        self.profiles.insert(token.into(), profile);
    }
}

impl Default for MockIdentityAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityAdapter for MockIdentityAdapter {
    async fn resolve(&self, token: &str) -> Result<IdentityProfile, IdentityError> {
        self.profiles
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(IdentityError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_a_seeded_token() {
        let adapter = MockIdentityAdapter::new();
        adapter.seed(
            "tok-alice",
            IdentityProfile {
                identity_id: 1,
                username: "alice".into(),
                avatar_url: None,
                followers: vec![2, 3],
                following: vec![2],
                close_friends: vec![2],
            },
        );

        let profile = adapter.resolve("tok-alice").await.unwrap();
        assert_eq!(profile.username, "alice");
        assert_eq!(profile.followers, vec![2, 3]);
    }

    #[tokio::test]
    async fn unknown_token_fails() {
        let adapter = MockIdentityAdapter::new();
        let err = adapter.resolve("nope").await.unwrap_err();
        assert!(matches!(err, IdentityError::InvalidToken));
    }
}
