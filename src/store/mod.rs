//! State Store: durable users, social-graph edges, preferences, guest
//! registrations, channels, and channel memberships (S3/S6).
//!
//! Backed by SQLite via `sqlx`. Transactional reads/writes; indexed by
//! identity-id, username, and invite-code per the S6 logical schema.

mod models;

pub use models::{ChannelMember, ChannelRecord, MemberRole, PreferencesRecord, UserRecord};

use crate::codec::{PreferencesUpdate, VisibilityMode};
use crate::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// State Store handle, cloneable, wrapping a bounded connection pool (S5:
/// "connection pooling bounded per process (e.g. 20 connections)").
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url, "State Store connected");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                identity_id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                avatar_url TEXT,
                followers TEXT NOT NULL DEFAULT '[]',
                following TEXT NOT NULL DEFAULT '[]',
                close_friends TEXT NOT NULL DEFAULT '[]',
                last_seen_ms INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS preferences (
                identity_id INTEGER PRIMARY KEY REFERENCES users(identity_id),
                visibility TEXT NOT NULL DEFAULT 'everyone',
                share_project_name INTEGER NOT NULL DEFAULT 1,
                share_language INTEGER NOT NULL DEFAULT 1,
                share_activity INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS guest_users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS channels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner_identity_id INTEGER NOT NULL,
                invite_code TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS channel_members (
                channel_id TEXT NOT NULL,
                identity_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                role TEXT NOT NULL,
                joined_at INTEGER NOT NULL,
                PRIMARY KEY (channel_id, identity_id)
            );

            CREATE INDEX IF NOT EXISTS idx_channels_invite_code ON channels(invite_code);
            CREATE INDEX IF NOT EXISTS idx_channel_members_channel ON channel_members(channel_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Users & preferences
    // ------------------------------------------------------------------

    /// Upsert a User on fresh login, refreshing the social-graph snapshot
    /// (S4.1: "upsert User and refresh followers/following").
    pub async fn upsert_user(
        &self,
        identity_id: i64,
        username: &str,
        avatar_url: Option<&str>,
        followers: &[i64],
        following: &[i64],
        close_friends: &[i64],
    ) -> Result<UserRecord, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let followers_json = serde_json::to_string(followers).unwrap_or_else(|_| "[]".into());
        let following_json = serde_json::to_string(following).unwrap_or_else(|_| "[]".into());
        let close_friends_json =
            serde_json::to_string(close_friends).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO users (identity_id, username, avatar_url, followers, following, close_friends, last_seen_ms, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity_id) DO UPDATE SET
                username = excluded.username,
                avatar_url = excluded.avatar_url,
                followers = excluded.followers,
                following = excluded.following,
                close_friends = excluded.close_friends,
                last_seen_ms = excluded.last_seen_ms
            "#,
        )
        .bind(identity_id)
        .bind(username)
        .bind(avatar_url)
        .bind(&followers_json)
        .bind(&following_json)
        .bind(&close_friends_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"INSERT INTO preferences (identity_id) VALUES (?)
               ON CONFLICT(identity_id) DO NOTHING"#,
        )
        .bind(identity_id)
        .execute(&self.pool)
        .await?;

        Ok(UserRecord {
            identity_id,
            username: username.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            followers: followers.to_vec(),
            following: following.to_vec(),
            close_friends: close_friends.to_vec(),
            last_seen_ms: now,
            created_at: now,
        })
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    pub async fn get_user_by_identity(&self, identity_id: i64) -> Result<Option<UserRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE identity_id = ?")
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_user(&r)))
    }

    pub async fn get_preferences(&self, identity_id: i64) -> Result<PreferencesRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM preferences WHERE identity_id = ?")
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => row_to_preferences(&r),
            None => PreferencesRecord {
                identity_id,
                ..Default::default()
            },
        })
    }

    /// Apply a partial preferences update (S6: `prefsUpdate` {prefs: partial preferences}).
    pub async fn update_preferences(
        &self,
        identity_id: i64,
        update: &PreferencesUpdate,
    ) -> Result<PreferencesRecord, StoreError> {
        let mut current = self.get_preferences(identity_id).await?;
        if let Some(v) = update.visibility {
            current.visibility = v;
        }
        if let Some(v) = update.share_project_name {
            current.share_project_name = v;
        }
        if let Some(v) = update.share_language {
            current.share_language = v;
        }
        if let Some(v) = update.share_activity {
            current.share_activity = v;
        }

        sqlx::query(
            r#"
            INSERT INTO preferences (identity_id, visibility, share_project_name, share_language, share_activity)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(identity_id) DO UPDATE SET
                visibility = excluded.visibility,
                share_project_name = excluded.share_project_name,
                share_language = excluded.share_language,
                share_activity = excluded.share_activity
            "#,
        )
        .bind(identity_id)
        .bind(visibility_to_str(current.visibility))
        .bind(current.share_project_name)
        .bind(current.share_language)
        .bind(current.share_activity)
        .execute(&self.pool)
        .await?;

        Ok(current)
    }

    pub async fn update_last_seen(&self, identity_id: i64, ts_ms: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_seen_ms = ? WHERE identity_id = ?")
            .bind(ts_ms)
            .bind(identity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Register a guest username (S4.1 guest login: storage-level
    /// registration; live-connection collision is checked by the Session
    /// Manager, not here).
    pub async fn register_guest(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO guest_users (username) VALUES (?) ON CONFLICT(username) DO NOTHING")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channels & memberships
    // ------------------------------------------------------------------

    /// Persist a new Channel with the given pre-generated unique id and
    /// invite code, and seed the owner's admin Membership (S4.3 Create).
    pub async fn create_channel(
        &self,
        id: &str,
        name: &str,
        owner_identity_id: i64,
        owner_username: &str,
        invite_code: &str,
    ) -> Result<ChannelRecord, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO channels (id, name, owner_identity_id, invite_code, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(owner_identity_id)
        .bind(invite_code)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO channel_members (channel_id, identity_id, username, role, joined_at) VALUES (?, ?, ?, 'admin', ?)",
        )
        .bind(id)
        .bind(owner_identity_id)
        .bind(owner_username)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ChannelRecord {
            id: id.to_string(),
            name: name.to_string(),
            owner_identity_id,
            invite_code: invite_code.to_string(),
            created_at: now,
        })
    }

    /// Returns `true` if the invite code already exists among active channels
    /// (used by the Channel Engine's collision-retry loop, I7).
    pub async fn invite_code_exists(&self, invite_code: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM channels WHERE invite_code = ?")
            .bind(invite_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get_channel(&self, id: &str) -> Result<Option<ChannelRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_channel(&r)))
    }

    pub async fn get_channel_by_invite(&self, invite_code: &str) -> Result<Option<ChannelRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM channels WHERE invite_code = ?")
            .bind(invite_code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_channel(&r)))
    }

    pub async fn member_count(&self, channel_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM channel_members WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    pub async fn is_member(&self, channel_id: &str, identity_id: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM channel_members WHERE channel_id = ? AND identity_id = ?")
            .bind(channel_id)
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn add_member(
        &self,
        channel_id: &str,
        identity_id: i64,
        username: &str,
        role: MemberRole,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO channel_members (channel_id, identity_id, username, role, joined_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(channel_id)
        .bind(identity_id)
        .bind(username)
        .bind(role.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, channel_id: &str, identity_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM channel_members WHERE channel_id = ? AND identity_id = ?")
            .bind(channel_id)
            .bind(identity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_members(&self, channel_id: &str) -> Result<Vec<ChannelMember>, StoreError> {
        let rows = sqlx::query("SELECT * FROM channel_members WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_member).collect())
    }

    /// Channels a given identity belongs to, used at login time to install
    /// `channel:{id}` subscriptions (S4.1).
    pub async fn list_member_channel_ids(&self, identity_id: i64) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT channel_id FROM channel_members WHERE identity_id = ?")
            .bind(identity_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<String, _>("channel_id").unwrap_or_default())
            .collect())
    }
}

fn visibility_to_str(mode: VisibilityMode) -> &'static str {
    match mode {
        VisibilityMode::Everyone => "everyone",
        VisibilityMode::Followers => "followers",
        VisibilityMode::Following => "following",
        VisibilityMode::CloseFriends => "close-friends",
        VisibilityMode::Invisible => "invisible",
    }
}

fn visibility_from_str(s: &str) -> VisibilityMode {
    match s {
        "followers" => VisibilityMode::Followers,
        "following" => VisibilityMode::Following,
        "close-friends" => VisibilityMode::CloseFriends,
        "invisible" => VisibilityMode::Invisible,
        _ => VisibilityMode::Everyone,
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> UserRecord {
    let followers: String = row.try_get("followers").unwrap_or_else(|_| "[]".into());
    let following: String = row.try_get("following").unwrap_or_else(|_| "[]".into());
    let close_friends: String = row.try_get("close_friends").unwrap_or_else(|_| "[]".into());
    UserRecord {
        identity_id: row.try_get("identity_id").unwrap_or_default(),
        username: row.try_get("username").unwrap_or_default(),
        avatar_url: row.try_get("avatar_url").ok(),
        followers: serde_json::from_str(&followers).unwrap_or_default(),
        following: serde_json::from_str(&following).unwrap_or_default(),
        close_friends: serde_json::from_str(&close_friends).unwrap_or_default(),
        last_seen_ms: row.try_get("last_seen_ms").unwrap_or_default(),
        created_at: row.try_get("created_at").unwrap_or_default(),
    }
}

fn row_to_preferences(row: &sqlx::sqlite::SqliteRow) -> PreferencesRecord {
    let visibility: String = row.try_get("visibility").unwrap_or_else(|_| "everyone".into());
    PreferencesRecord {
        identity_id: row.try_get("identity_id").unwrap_or_default(),
        visibility: visibility_from_str(&visibility),
        share_project_name: row.try_get("share_project_name").unwrap_or(true),
        share_language: row.try_get("share_language").unwrap_or(true),
        share_activity: row.try_get("share_activity").unwrap_or(true),
    }
}

fn row_to_channel(row: &sqlx::sqlite::SqliteRow) -> ChannelRecord {
    ChannelRecord {
        id: row.try_get("id").unwrap_or_default(),
        name: row.try_get("name").unwrap_or_default(),
        owner_identity_id: row.try_get("owner_identity_id").unwrap_or_default(),
        invite_code: row.try_get("invite_code").unwrap_or_default(),
        created_at: row.try_get("created_at").unwrap_or_default(),
    }
}

fn row_to_member(row: &sqlx::sqlite::SqliteRow) -> ChannelMember {
    let role: String = row.try_get("role").unwrap_or_else(|_| "member".into());
    ChannelMember {
        channel_id: row.try_get("channel_id").unwrap_or_default(),
        identity_id: row.try_get("identity_id").unwrap_or_default(),
        username: row.try_get("username").unwrap_or_default(),
        role: MemberRole::from_str(&role),
        joined_at: row.try_get("joined_at").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PreferencesUpdate;

    async fn memory_store() -> Store {
        Store::connect("sqlite::memory:", 5).await.expect("connect")
    }

    #[tokio::test]
    async fn upsert_and_fetch_user_roundtrips_graph() {
        let store = memory_store().await;
        store
            .upsert_user(1, "alice", Some("avatar.png"), &[2, 3], &[2], &[2])
            .await
            .unwrap();

        let fetched = store.get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(fetched.identity_id, 1);
        assert_eq!(fetched.followers, vec![2, 3]);
        assert_eq!(fetched.close_friends, vec![2]);
    }

    #[tokio::test]
    async fn default_preferences_are_everyone_and_all_shared() {
        let store = memory_store().await;
        store.upsert_user(1, "alice", None, &[], &[], &[]).await.unwrap();
        let prefs = store.get_preferences(1).await.unwrap();
        assert_eq!(prefs.visibility, VisibilityMode::Everyone);
        assert!(prefs.share_project_name && prefs.share_language && prefs.share_activity);
    }

    #[tokio::test]
    async fn update_preferences_applies_partial_fields() {
        let store = memory_store().await;
        store.upsert_user(1, "alice", None, &[], &[], &[]).await.unwrap();
        let update = PreferencesUpdate {
            visibility: Some(VisibilityMode::Followers),
            share_project_name: Some(false),
            share_language: None,
            share_activity: None,
        };
        let prefs = store.update_preferences(1, &update).await.unwrap();
        assert_eq!(prefs.visibility, VisibilityMode::Followers);
        assert!(!prefs.share_project_name);
        assert!(prefs.share_language);
    }

    #[tokio::test]
    async fn channel_lifecycle_create_join_leave() {
        let store = memory_store().await;
        store.upsert_user(1, "alice", None, &[], &[], &[]).await.unwrap();
        store.upsert_user(2, "bob", None, &[], &[], &[]).await.unwrap();

        let chan = store
            .create_channel("chan-1", "DevTeam", 1, "alice", "ABC234")
            .await
            .unwrap();
        assert_eq!(store.member_count(&chan.id).await.unwrap(), 1);

        store.add_member(&chan.id, 2, "bob", MemberRole::Member).await.unwrap();
        assert_eq!(store.member_count(&chan.id).await.unwrap(), 2);
        assert!(store.is_member(&chan.id, 2).await.unwrap());

        store.remove_member(&chan.id, 2).await.unwrap();
        assert_eq!(store.member_count(&chan.id).await.unwrap(), 1);
        assert!(!store.is_member(&chan.id, 2).await.unwrap());
    }

    #[tokio::test]
    async fn invite_code_lookup_round_trips() {
        let store = memory_store().await;
        store.upsert_user(1, "alice", None, &[], &[], &[]).await.unwrap();
        store
            .create_channel("chan-1", "DevTeam", 1, "alice", "ABC234")
            .await
            .unwrap();

        assert!(store.invite_code_exists("ABC234").await.unwrap());
        assert!(!store.invite_code_exists("ZZZ999").await.unwrap());

        let found = store.get_channel_by_invite("ABC234").await.unwrap().unwrap();
        assert_eq!(found.name, "DevTeam");
    }
}
