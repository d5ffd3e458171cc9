//! Channel Engine: creation, invite-based join, membership checks, and the
//! per-channel fan-out topic (S4.3). Roster construction requires the live
//! Window Set and Status Cache, which the Session Manager owns, so this
//! engine covers persistence and membership rules; the Session Manager
//! composes the roster and drives the channel topic fan-out.

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::store::{ChannelRecord, MemberRole, Store};
use rand::Rng;

/// Confusable-free alphabet for invite codes: uppercase alphanumerics with
/// 0/O/I/1 omitted (S3 Channel: "confusable-free alphabet").
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const INVITE_CODE_LEN: usize = 6;
const MAX_INVITE_RETRIES: usize = 10;

pub fn topic_for(channel_id: &str) -> String {
    format!("channel:{channel_id}")
}

fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

fn validate_name(name: &str) -> Result<(), ChannelError> {
    let len = name.chars().count();
    if !(3..=30).contains(&len) {
        return Err(ChannelError::InvalidName(len));
    }
    Ok(())
}

/// Channel Engine handle, cloneable like [`Store`].
#[derive(Clone)]
pub struct ChannelEngine {
    store: Store,
    config: ChannelConfig,
}

impl ChannelEngine {
    pub fn new(store: Store, config: ChannelConfig) -> Self {
        Self { store, config }
    }

    /// Create a channel with `owner` as its sole admin member (S4.3 Create).
    pub async fn create(
        &self,
        owner_identity_id: i64,
        owner_username: &str,
        name: &str,
    ) -> Result<ChannelRecord, ChannelError> {
        validate_name(name)?;

        let mut code = generate_invite_code();
        for _ in 0..MAX_INVITE_RETRIES {
            if !self.store.invite_code_exists(&code).await? {
                break;
            }
            code = generate_invite_code();
        }

        let id = uuid::Uuid::new_v4().to_string();
        let channel = self
            .store
            .create_channel(&id, name, owner_identity_id, owner_username, &code)
            .await?;
        Ok(channel)
    }

    /// Resolve an invite code and admit `identity_id` as a member (S4.3 Join).
    pub async fn join(&self, identity_id: i64, invite_code: &str) -> Result<ChannelRecord, ChannelError> {
        let channel = self
            .store
            .get_channel_by_invite(invite_code)
            .await?
            .ok_or(ChannelError::InviteNotFound)?;

        if self.store.is_member(&channel.id, identity_id).await? {
            return Err(ChannelError::AlreadyMember);
        }
        let count = self.store.member_count(&channel.id).await?;
        if count as usize >= self.config.max_members {
            return Err(ChannelError::Full);
        }
        Ok(channel)
    }

    /// Persist the membership row for a join already validated by [`join`].
    pub async fn add_member(&self, channel_id: &str, identity_id: i64, username: &str) -> Result<(), ChannelError> {
        self.store.add_member(channel_id, identity_id, username, MemberRole::Member).await?;
        Ok(())
    }

    pub async fn leave(&self, channel_id: &str, identity_id: i64) -> Result<(), ChannelError> {
        if !self.store.is_member(channel_id, identity_id).await? {
            return Err(ChannelError::NotMember);
        }
        self.store.remove_member(channel_id, identity_id).await?;
        Ok(())
    }

    pub async fn assert_member(&self, channel_id: &str, identity_id: i64) -> Result<(), ChannelError> {
        if self.store.is_member(channel_id, identity_id).await? {
            Ok(())
        } else {
            Err(ChannelError::NotMember)
        }
    }

    pub fn propagates_status_updates(&self) -> bool {
        self.config.propagate_status_to_channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invite_codes_are_six_chars_from_the_confusable_free_alphabet() {
        for _ in 0..100 {
            let code = generate_invite_code();
            assert_eq!(code.chars().count(), 6);
            assert!(code.chars().all(|c| INVITE_ALPHABET.contains(&(c as u8))));
            assert!(!code.contains(['0', 'O', 'I', '1']));
        }
    }

    #[test]
    fn name_length_boundaries() {
        assert!(validate_name("abc").is_ok());
        assert!(validate_name(&"a".repeat(30)).is_ok());
        assert!(validate_name("ab").is_err());
        assert!(validate_name(&"a".repeat(31)).is_err());
    }

    async fn memory_engine() -> ChannelEngine {
        let store = Store::connect("sqlite::memory:", 5).await.unwrap();
        ChannelEngine::new(store, ChannelConfig::default())
    }

    #[tokio::test]
    async fn create_then_join_then_capacity_limit() {
        let mut cfg = ChannelConfig::default();
        cfg.max_members = 2;
        let store = Store::connect("sqlite::memory:", 5).await.unwrap();
        store.upsert_user(1, "alice", None, &[], &[], &[]).await.unwrap();
        store.upsert_user(2, "bob", None, &[], &[], &[]).await.unwrap();
        store.upsert_user(3, "carol", None, &[], &[], &[]).await.unwrap();
        let engine = ChannelEngine::new(store, cfg);

        let chan = engine.create(1, "alice", "DevTeam").await.unwrap();
        assert_eq!(chan.owner_identity_id, 1);

        let joined = engine.join(2, &chan.invite_code).await.unwrap();
        engine.add_member(&joined.id, 2, "bob").await.unwrap();

        let err = engine.join(3, &chan.invite_code).await.unwrap_err();
        assert!(matches!(err, ChannelError::Full));
    }

    #[tokio::test]
    async fn joining_twice_is_rejected() {
        let engine = memory_engine().await;
        // ensure identity exists for FK-free sqlite schema usage elsewhere
        let chan = engine.create(1, "alice", "DevTeam").await.unwrap();
        engine.join(1, &chan.invite_code).await.unwrap_err();
    }

    #[tokio::test]
    async fn unknown_invite_code_is_not_found() {
        let engine = memory_engine().await;
        let err = engine.join(1, "ZZZZZZ").await.unwrap_err();
        assert!(matches!(err, ChannelError::InviteNotFound));
    }
}
