//! Row types for the State Store (S3/S6).

use crate::codec::VisibilityMode;

/// A User record (S3: "Identified by an external identity-id ... for
/// authenticated users or by a self-chosen username for guests").
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub identity_id: i64,
    pub username: String,
    pub avatar_url: Option<String>,
    pub followers: Vec<i64>,
    pub following: Vec<i64>,
    pub close_friends: Vec<i64>,
    pub last_seen_ms: i64,
    pub created_at: i64,
}

/// Sharing/visibility preferences, one per authenticated user (S3).
#[derive(Debug, Clone)]
pub struct PreferencesRecord {
    pub identity_id: i64,
    pub visibility: VisibilityMode,
    pub share_project_name: bool,
    pub share_language: bool,
    pub share_activity: bool,
}

impl Default for PreferencesRecord {
    fn default() -> Self {
        Self {
            identity_id: 0,
            visibility: VisibilityMode::Everyone,
            share_project_name: true,
            share_language: true,
            share_activity: true,
        }
    }
}

/// Membership role within a channel (S3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => MemberRole::Admin,
            _ => MemberRole::Member,
        }
    }
}

/// A Channel record (S3).
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub id: String,
    pub name: String,
    pub owner_identity_id: i64,
    pub invite_code: String,
    pub created_at: i64,
}

/// A Channel Membership row, denormalised with the member's username so
/// roster construction doesn't need a join against `users` (S6: "username
/// denormalised").
#[derive(Debug, Clone)]
pub struct ChannelMember {
    pub channel_id: String,
    pub identity_id: i64,
    pub username: String,
    pub role: MemberRole,
    pub joined_at: i64,
}
