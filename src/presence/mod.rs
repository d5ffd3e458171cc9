//! Presence Engine: status diffing, delta construction, multi-window
//! aggregation, custom-status expiry, and the Away timer (S4.2).

mod aggregate;
mod expiry;
mod offline;

pub use aggregate::{aggregate_windows, WindowSnapshot};
pub use expiry::{CustomStatusExpiryQueue, ExpiredCustomStatus};
pub use offline::{DueOffline, PendingOfflineQueue};

use crate::broker::CachedStatus;
use crate::codec::{Activity, CustomStatus, ServerMessage, Status, CUSTOM_STATUS_MAX_CHARS};
use crate::session::ConnectionState;

/// Fields a client may supply in a `statusUpdate` frame. `Option<Option<T>>`
/// distinguishes "omitted" (unchanged) from "present but null" (clear),
/// mirroring the codec's `deserialize_some` convention.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdateInput {
    pub status: Option<Status>,
    pub activity: Option<Activity>,
    pub project: Option<Option<String>>,
    pub language: Option<Option<String>>,
}

/// Outcome of applying a status update to a Connection's in-place state.
pub struct AppliedUpdate {
    /// `None` when no field actually changed (I9: idempotent no-op).
    pub delta: Option<ServerMessage>,
    pub cached: CachedStatus,
}

/// Diff `input` against `state` (already locked by the caller), write the
/// changed fields in place, and build the minimal delta message (I2).
pub fn apply_status_update(username: &str, state: &mut ConnectionState, input: StatusUpdateInput) -> AppliedUpdate {
    let mut s = None;
    let mut a = None;
    let mut p = None;
    let mut l = None;

    match input.status {
        Some(new_status) if new_status != state.status => {
            state.status = new_status;
            s = Some(new_status);
        }
        // Away -> Online recovery (S4.2): the away transition is server-
        // driven (the liveness sweep's inactivity timer), and "recovery to
        // Online occurs on the next reported activity event" — any
        // statusUpdate the client sends while away, even one that only
        // touches activity/project/language, counts as that event.
        None if state.status == Status::Away => {
            state.status = Status::Online;
            s = Some(Status::Online);
        }
        _ => {}
    }
    if let Some(new_activity) = input.activity {
        if new_activity != state.activity {
            state.activity = new_activity;
            a = Some(new_activity);
        }
    }
    if let Some(new_project) = input.project {
        if new_project != state.project {
            state.project = new_project.clone();
            p = Some(new_project.unwrap_or_default());
        }
    }
    if let Some(new_language) = input.language {
        if new_language != state.language {
            state.language = new_language.clone();
            l = Some(new_language.unwrap_or_default());
        }
    }

    let cached = CachedStatus {
        status: status_label(state.status).to_string(),
        activity: activity_label(state.activity).to_string(),
        project: state.project.clone(),
        language: state.language.clone(),
    };

    let changed = s.is_some() || a.is_some() || p.is_some() || l.is_some();
    let delta = changed.then(|| ServerMessage::Update {
        id: username.to_string(),
        s,
        a,
        p,
        l,
        cs: None,
    });

    AppliedUpdate { delta, cached }
}

/// Apply (or clear) a custom status, returning the delta to publish. The
/// null sentinel (S4.2 "explicit clear emits a delta with the custom-status
/// field set to the null sentinel") is modeled as `Some(None)`.
pub fn set_custom_status(username: &str, state: &mut ConnectionState, mut status: CustomStatus) -> ServerMessage {
    status.text = status.text.chars().take(CUSTOM_STATUS_MAX_CHARS).collect();
    state.custom_status = Some(status.clone());
    ServerMessage::Update {
        id: username.to_string(),
        s: None,
        a: None,
        p: None,
        l: None,
        cs: Some(Some(status)),
    }
}

pub fn clear_custom_status(username: &str, state: &mut ConnectionState) -> ServerMessage {
    state.custom_status = None;
    ServerMessage::Update {
        id: username.to_string(),
        s: None,
        a: None,
        p: None,
        l: None,
        cs: Some(None),
    }
}

/// Transition a window to Away (S4.2 Away transition): status -> Away,
/// activity -> Idle. A no-op if the window is already Away.
pub fn apply_away_transition(username: &str, state: &mut ConnectionState) -> Option<ServerMessage> {
    if state.status == Status::Away {
        return None;
    }
    state.status = Status::Away;
    state.activity = Activity::Idle;
    Some(ServerMessage::Update {
        id: username.to_string(),
        s: Some(Status::Away),
        a: Some(Activity::Idle),
        p: None,
        l: None,
        cs: None,
    })
}

pub fn status_label(status: Status) -> &'static str {
    match status {
        Status::Online => "Online",
        Status::Away => "Away",
        Status::Offline => "Offline",
        Status::Invisible => "Invisible",
    }
}

pub fn activity_label(activity: Activity) -> &'static str {
    match activity {
        Activity::Debugging => "Debugging",
        Activity::Coding => "Coding",
        Activity::Reading => "Reading",
        Activity::Idle => "Idle",
        Activity::Hidden => "Hidden",
    }
}

/// Inverse of [`status_label`], used to reconstruct a [`Status`] from a
/// [`CachedStatus`] entry fetched from the Broker. Unrecognised labels (a
/// cache entry from a future server version) fall back to `Offline`.
pub fn parse_status(label: &str) -> Status {
    match label {
        "Online" => Status::Online,
        "Away" => Status::Away,
        "Invisible" => Status::Invisible,
        _ => Status::Offline,
    }
}

/// Inverse of [`activity_label`]; unrecognised labels fall back to `Idle`.
pub fn parse_activity(label: &str) -> Activity {
    match label {
        "Debugging" => Activity::Debugging,
        "Coding" => Activity::Coding,
        "Reading" => Activity::Reading,
        "Hidden" => Activity::Hidden,
        _ => Activity::Idle,
    }
}

/// `presence:{username}` topic a Connection subscribes to for a friend's
/// deltas (S6 keyspace).
pub fn presence_topic(username: &str) -> String {
    format!("presence:{username}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_update_produces_no_delta() {
        let mut state = ConnectionState::default();
        let applied = apply_status_update("alice", &mut state, StatusUpdateInput::default());
        assert!(applied.delta.is_none());
    }

    #[test]
    fn delta_carries_only_changed_fields() {
        let mut state = ConnectionState::default();
        let input = StatusUpdateInput {
            activity: Some(Activity::Coding),
            ..Default::default()
        };
        let applied = apply_status_update("alice", &mut state, input);
        match applied.delta.unwrap() {
            ServerMessage::Update { id, s, a, p, l, cs } => {
                assert_eq!(id, "alice");
                assert!(s.is_none());
                assert_eq!(a, Some(Activity::Coding));
                assert!(p.is_none());
                assert!(l.is_none());
                assert!(cs.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn activity_event_recovers_an_away_window_to_online() {
        let mut state = ConnectionState::default();
        state.status = Status::Away;
        state.activity = Activity::Idle;

        let input = StatusUpdateInput {
            activity: Some(Activity::Coding),
            ..Default::default()
        };
        let applied = apply_status_update("alice", &mut state, input);
        assert_eq!(state.status, Status::Online);
        match applied.delta.unwrap() {
            ServerMessage::Update { s, a, .. } => {
                assert_eq!(s, Some(Status::Online));
                assert_eq!(a, Some(Activity::Coding));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn explicit_status_while_away_is_not_overridden_by_recovery() {
        let mut state = ConnectionState::default();
        state.status = Status::Away;

        let input = StatusUpdateInput {
            status: Some(Status::Offline),
            ..Default::default()
        };
        let applied = apply_status_update("alice", &mut state, input);
        assert_eq!(state.status, Status::Offline);
        match applied.delta.unwrap() {
            ServerMessage::Update { s, .. } => assert_eq!(s, Some(Status::Offline)),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn repeating_the_same_value_is_a_no_op() {
        let mut state = ConnectionState::default();
        state.activity = Activity::Coding;
        let input = StatusUpdateInput {
            activity: Some(Activity::Coding),
            ..Default::default()
        };
        let applied = apply_status_update("alice", &mut state, input);
        assert!(applied.delta.is_none());
    }

    #[test]
    fn custom_status_text_truncates_at_max_chars() {
        let mut state = ConnectionState::default();
        let long = "x".repeat(CUSTOM_STATUS_MAX_CHARS + 50);
        let msg = set_custom_status(
            "alice",
            &mut state,
            CustomStatus { text: long, emoji: None },
        );
        match msg {
            ServerMessage::Update { cs: Some(Some(cs)), .. } => {
                assert_eq!(cs.text.chars().count(), CUSTOM_STATUS_MAX_CHARS);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn status_and_activity_labels_round_trip() {
        for status in [Status::Online, Status::Away, Status::Offline, Status::Invisible] {
            assert_eq!(parse_status(status_label(status)), status);
        }
        for activity in [Activity::Debugging, Activity::Coding, Activity::Reading, Activity::Idle, Activity::Hidden] {
            assert_eq!(parse_activity(activity_label(activity)), activity);
        }
    }

    #[test]
    fn presence_topic_is_namespaced_by_username() {
        assert_eq!(presence_topic("alice"), "presence:alice");
    }

    #[test]
    fn clear_emits_null_sentinel() {
        let mut state = ConnectionState::default();
        state.custom_status = Some(CustomStatus { text: "brb".into(), emoji: None });
        let msg = clear_custom_status("alice", &mut state);
        assert!(matches!(msg, ServerMessage::Update { cs: Some(None), .. }));
        assert!(state.custom_status.is_none());
    }
}
