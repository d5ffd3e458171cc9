//! Tagged client/server message unions.
//!
//! `serde`'s internally-tagged enum support gives us an exhaustive decoder for free:
//! any `t` value that doesn't match a known variant fails to deserialize, which the
//! connection's dispatch loop turns into `ErrorKind::InvalidFrame` without tearing
//! down the transport.

use super::{Activity, CompactUser, CustomStatus, PreferencesUpdate, Status};
use serde::{Deserialize, Deserializer, Serialize};

/// Double-`Option` helper distinguishing "field absent" from "field present but null".
///
/// Used for the custom-status field of [`ClientMessage::StatusUpdate`] and
/// [`ServerMessage::Update`]: absence means "unchanged", `null` means "clear it".
fn deserialize_some<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Messages a client may send to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t")]
pub enum ClientMessage {
    #[serde(rename = "login")]
    Login {
        username: String,
        token: Option<String>,
        #[serde(rename = "resumeToken")]
        resume_token: Option<String>,
    },
    #[serde(rename = "statusUpdate")]
    StatusUpdate {
        #[serde(default)]
        s: Option<Status>,
        #[serde(default)]
        a: Option<Activity>,
        #[serde(default, deserialize_with = "deserialize_some")]
        p: Option<Option<String>>,
        #[serde(default, deserialize_with = "deserialize_some")]
        l: Option<Option<String>>,
    },
    #[serde(rename = "prefsUpdate")]
    PrefsUpdate { prefs: PreferencesUpdate },
    #[serde(rename = "hb")]
    Heartbeat,
    #[serde(rename = "cc")]
    CreateChannel { name: String },
    #[serde(rename = "jc")]
    JoinChannel {
        #[serde(rename = "inviteCode")]
        invite_code: String,
    },
    #[serde(rename = "lc")]
    LeaveChannel {
        #[serde(rename = "channelId")]
        channel_id: String,
    },
    #[serde(rename = "cm")]
    ChannelMessage {
        #[serde(rename = "channelId")]
        channel_id: String,
        content: String,
    },
    #[serde(rename = "ss")]
    SetCustomStatus {
        text: String,
        emoji: Option<String>,
        #[serde(rename = "expiresIn")]
        expires_in: Option<u64>,
    },
    #[serde(rename = "clr")]
    ClearCustomStatus,
}

/// Messages the server may send to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t")]
pub enum ServerMessage {
    #[serde(rename = "loginSuccess")]
    LoginSuccess {
        token: String,
        #[serde(rename = "githubId", skip_serializing_if = "Option::is_none")]
        identity_id: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        followers: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        following: Option<Vec<String>>,
    },
    #[serde(rename = "loginError")]
    LoginError { error: String },
    #[serde(rename = "sync")]
    Sync { users: Vec<CompactUser> },
    /// Delta update: only fields that changed relative to the prior published state.
    #[serde(rename = "u")]
    Update {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        s: Option<Status>,
        #[serde(skip_serializing_if = "Option::is_none")]
        a: Option<Activity>,
        #[serde(skip_serializing_if = "Option::is_none")]
        p: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        l: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cs: Option<Option<CustomStatus>>,
    },
    /// Full snapshot, published on fresh login.
    #[serde(rename = "o")]
    Online {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        a: Option<String>,
        s: Status,
        act: Activity,
        #[serde(skip_serializing_if = "Option::is_none")]
        p: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        l: Option<String>,
    },
    #[serde(rename = "x")]
    Offline { id: String, ts: i64 },
    #[serde(rename = "token")]
    Token { token: String },
    #[serde(rename = "hb")]
    Heartbeat,
    #[serde(rename = "error")]
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
    },
    #[serde(rename = "ccOk")]
    CreateChannelOk {
        #[serde(rename = "channelId")]
        channel_id: String,
        name: String,
        #[serde(rename = "inviteCode")]
        invite_code: String,
    },
    #[serde(rename = "jcOk")]
    JoinChannelOk {
        #[serde(rename = "channelId")]
        channel_id: String,
        name: String,
    },
    #[serde(rename = "cs")]
    ChannelSync {
        #[serde(rename = "channelId")]
        channel_id: String,
        name: String,
        members: Vec<CompactUser>,
    },
    #[serde(rename = "cu")]
    ChannelUpdate {
        #[serde(rename = "channelId")]
        channel_id: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        s: Option<Status>,
        #[serde(skip_serializing_if = "Option::is_none")]
        a: Option<Activity>,
        #[serde(skip_serializing_if = "Option::is_none")]
        p: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        l: Option<String>,
    },
    #[serde(rename = "cj")]
    ChannelJoined {
        #[serde(rename = "channelId")]
        channel_id: String,
        member: CompactUser,
    },
    #[serde(rename = "cl")]
    ChannelLeft {
        #[serde(rename = "channelId")]
        channel_id: String,
        id: String,
    },
    #[serde(rename = "cm")]
    ChannelChat {
        #[serde(rename = "channelId")]
        channel_id: String,
        id: String,
        content: String,
        ts: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_login() {
        let json = r#"{"t":"login","username":"alice","token":null,"resumeToken":null}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Login { username, .. } if username == "alice"));
    }

    #[test]
    fn unknown_tag_fails_without_panicking() {
        let json = r#"{"t":"bogus"}"#;
        let result: Result<ClientMessage, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn status_update_distinguishes_absent_from_null_project() {
        // project omitted entirely: unchanged
        let json = r#"{"t":"statusUpdate","a":"Coding"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::StatusUpdate { p, .. } => assert_eq!(p, None),
            _ => panic!("wrong variant"),
        }

        // project explicitly cleared
        let json = r#"{"t":"statusUpdate","p":null}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::StatusUpdate { p, .. } => assert_eq!(p, Some(None)),
            _ => panic!("wrong variant"),
        }

        // project set to a value
        let json = r#"{"t":"statusUpdate","p":"presenced"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::StatusUpdate { p, .. } => {
                assert_eq!(p, Some(Some("presenced".to_string())))
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn update_delta_omits_unchanged_fields() {
        let msg = ServerMessage::Update {
            id: "alice".into(),
            s: None,
            a: Some(Activity::Coding),
            p: None,
            l: None,
            cs: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"t":"u","id":"alice","a":"Coding"}"#);
    }
}
