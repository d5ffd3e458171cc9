//! Wire codec: JSON message taxonomy exchanged between clients and the server.
//!
//! Messages are tagged JSON objects keyed by a short discriminator `t`. Keys are kept
//! compact to minimise bandwidth for the high-frequency presence deltas.

mod message;

pub use message::{ClientMessage, ServerMessage};

use serde::{Deserialize, Serialize};

/// Coarse presence status, independent of the finer-grained [`Activity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Online,
    Away,
    Offline,
    Invisible,
}

/// What a user is currently doing inside their editor.
///
/// Ranked for multi-window aggregation: `Debugging` > `Coding` > `Reading` > `Idle` > `Hidden`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activity {
    Debugging,
    Coding,
    Reading,
    Idle,
    Hidden,
}

impl Activity {
    /// Priority used by multi-window aggregation; higher wins.
    pub fn priority(self) -> u8 {
        match self {
            Activity::Debugging => 4,
            Activity::Coding => 3,
            Activity::Reading => 2,
            Activity::Idle => 1,
            Activity::Hidden => 0,
        }
    }
}

/// Per-user policy deciding which viewers the privacy filter admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisibilityMode {
    Everyone,
    Followers,
    Following,
    CloseFriends,
    Invisible,
}

impl Default for VisibilityMode {
    fn default() -> Self {
        VisibilityMode::Everyone
    }
}

/// A user's custom status line: free text plus an optional emoji prefix and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomStatus {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// Maximum length, in Unicode scalar values, of a custom status' text field.
pub const CUSTOM_STATUS_MAX_CHARS: usize = 128;

/// The compact user record sent in `sync` and channel roster responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a: Option<String>,
    pub s: Status,
    pub act: Activity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub l: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ls: Option<i64>,
}

/// Partial update to a user's sharing preferences, as received over `prefsUpdate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferencesUpdate {
    pub visibility: Option<VisibilityMode>,
    #[serde(rename = "shareProjectName")]
    pub share_project_name: Option<bool>,
    #[serde(rename = "shareLanguage")]
    pub share_language: Option<bool>,
    #[serde(rename = "shareActivity")]
    pub share_activity: Option<bool>,
}
