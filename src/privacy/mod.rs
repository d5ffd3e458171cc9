//! Privacy Filter: per-viewer visibility and share-preference redaction (S4.4).
//!
//! Stateless by design — every decision is a pure function of the viewer's
//! identity, the target's current preferences, and the target's graph edges.
//! Applied on the egress path, once per (viewer, message) pair, after the
//! delta has already been computed so that field-absence in a delta survives
//! redaction untouched.

use crate::codec::{Activity, CompactUser, ServerMessage};
use crate::store::{PreferencesRecord, UserRecord};

/// Evaluate whether viewer `V` may receive a message originated by target `T`
/// (S4.4 Rules). Guests (`viewer_identity = None`) may only see targets in
/// `everyone` mode.
pub fn admits(viewer_identity: Option<i64>, target: &UserRecord, prefs: &PreferencesRecord) -> bool {
    use crate::codec::VisibilityMode::*;
    match prefs.visibility {
        Invisible => false,
        Everyone => true,
        Followers => viewer_identity.is_some_and(|v| target.followers.contains(&v)),
        Following => viewer_identity.is_some_and(|v| target.following.contains(&v)),
        CloseFriends => viewer_identity.is_some_and(|v| target.close_friends.contains(&v)),
    }
}

/// Clear fields per `T`'s share flags, after an `admits` allow decision
/// (S4.4 Share-preference redaction). `None` fields (already absent from a
/// delta) are left untouched, so redaction never turns an omitted field into
/// a present-but-empty one.
pub fn redact_project(project: Option<String>, prefs: &PreferencesRecord) -> Option<String> {
    if prefs.share_project_name {
        project
    } else {
        project.map(|_| String::new())
    }
}

pub fn redact_language(language: Option<String>, prefs: &PreferencesRecord) -> Option<String> {
    if prefs.share_language {
        language
    } else {
        language.map(|_| String::new())
    }
}

/// `shareActivity=false` maps any present activity to `Hidden`, not absence.
pub fn redact_activity(activity: Option<Activity>, prefs: &PreferencesRecord) -> Option<Activity> {
    if prefs.share_activity {
        activity
    } else {
        activity.map(|_| Activity::Hidden)
    }
}

/// Apply redaction in place to a compact user record, as used when building
/// channel rosters and initial-sync snapshots (full records, not deltas).
pub fn redact_compact_user(mut user: CompactUser, prefs: &PreferencesRecord) -> CompactUser {
    user.p = redact_project(user.p, prefs);
    user.l = redact_language(user.l, prefs);
    user.act = if prefs.share_activity { user.act } else { Activity::Hidden };
    user
}

/// Apply share-preference redaction directly to an egress `Update`/`Online`
/// message, after an `admits` allow decision. Other variants pass through
/// unchanged — they carry no per-target shareable fields.
pub fn redact_outbound(msg: ServerMessage, prefs: &PreferencesRecord) -> ServerMessage {
    match msg {
        ServerMessage::Update { id, s, a, p, l, cs } => ServerMessage::Update {
            id,
            s,
            a: redact_activity(a, prefs),
            p: redact_project(p, prefs),
            l: redact_language(l, prefs),
            cs,
        },
        ServerMessage::Online { id, a, s, act, p, l } => ServerMessage::Online {
            id,
            a,
            s,
            act: if prefs.share_activity { act } else { Activity::Hidden },
            p: redact_project(p, prefs),
            l: redact_language(l, prefs),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::VisibilityMode;

    fn user(followers: &[i64], following: &[i64], close_friends: &[i64]) -> UserRecord {
        UserRecord {
            identity_id: 1,
            username: "alice".into(),
            avatar_url: None,
            followers: followers.to_vec(),
            following: following.to_vec(),
            close_friends: close_friends.to_vec(),
            last_seen_ms: 0,
            created_at: 0,
        }
    }

    fn prefs(mode: VisibilityMode) -> PreferencesRecord {
        PreferencesRecord {
            identity_id: 1,
            visibility: mode,
            share_project_name: true,
            share_language: true,
            share_activity: true,
        }
    }

    #[test]
    fn invisible_denies_everyone() {
        assert!(!admits(Some(2), &user(&[2], &[], &[]), &prefs(VisibilityMode::Invisible)));
    }

    #[test]
    fn everyone_allows_guests() {
        assert!(admits(None, &user(&[], &[], &[]), &prefs(VisibilityMode::Everyone)));
    }

    #[test]
    fn followers_mode_checks_membership() {
        let t = user(&[2, 3], &[], &[]);
        assert!(admits(Some(2), &t, &prefs(VisibilityMode::Followers)));
        assert!(!admits(Some(4), &t, &prefs(VisibilityMode::Followers)));
        assert!(!admits(None, &t, &prefs(VisibilityMode::Followers)));
    }

    #[test]
    fn close_friends_mode_is_independent_of_followers() {
        let t = user(&[2, 3], &[], &[2]);
        assert!(admits(Some(2), &t, &prefs(VisibilityMode::CloseFriends)));
        assert!(!admits(Some(3), &t, &prefs(VisibilityMode::CloseFriends)));
    }

    #[test]
    fn share_activity_false_maps_present_value_to_hidden_not_absence() {
        let mut p = prefs(VisibilityMode::Everyone);
        p.share_activity = false;
        assert_eq!(redact_activity(Some(Activity::Coding), &p), Some(Activity::Hidden));
        assert_eq!(redact_activity(None, &p), None);
    }

    #[test]
    fn share_project_false_empties_present_value_not_absence() {
        let mut p = prefs(VisibilityMode::Everyone);
        p.share_project_name = false;
        assert_eq!(redact_project(Some("presenced".into()), &p), Some(String::new()));
        assert_eq!(redact_project(None, &p), None);
    }

    #[test]
    fn redact_outbound_hides_activity_on_update() {
        let mut p = prefs(VisibilityMode::Everyone);
        p.share_activity = false;
        let msg = ServerMessage::Update {
            id: "alice".into(),
            s: None,
            a: Some(Activity::Coding),
            p: None,
            l: None,
            cs: None,
        };
        match redact_outbound(msg, &p) {
            ServerMessage::Update { a, .. } => assert_eq!(a, Some(Activity::Hidden)),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn redact_outbound_leaves_other_variants_untouched() {
        let p = prefs(VisibilityMode::Everyone);
        let msg = ServerMessage::Heartbeat;
        assert!(matches!(redact_outbound(msg, &p), ServerMessage::Heartbeat));
    }
}
