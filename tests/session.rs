//! Session lifecycle: resume suppresses the online/offline flap (I3), and a
//! Window Set only emits `x` on its last-window disconnect (I4).

mod support;

use presenced::codec::{Activity, ClientMessage, ServerMessage, Status};
use presenced::config::{ChannelConfig, LimitsConfig, PresenceConfig};
use std::time::Duration;
use support::Harness;

#[tokio::test]
async fn resume_within_ttl_reconnects_without_a_fresh_online_event() {
    let harness = Harness::new().await;
    harness.seed_identity("tok-alice", 1, "alice", vec![], vec![], vec![]);
    harness.seed_identity("tok-bob", 2, "bob", vec![], vec![1], vec![]);

    let mut bob = harness.login("bob", "tok-bob").await;

    // Drive alice's first login manually so we can capture her resume token
    // (the shared harness helper discards it).
    let (alice_conn, mut alice_outbound) = harness.sessions.accept();
    harness
        .sessions
        .login(&alice_conn, "alice".to_string(), Some("tok-alice".to_string()), None)
        .await
        .expect("fresh login should succeed");
    let resume_token = match alice_outbound.recv().await.unwrap() {
        ServerMessage::LoginSuccess { token, .. } => token,
        other => panic!("expected loginSuccess, got {other:?}"),
    };
    let _ = alice_outbound.recv().await.unwrap(); // sync

    // bob observes alice's fresh-login online event.
    match bob.recv().await {
        ServerMessage::Online { id, .. } => assert_eq!(id, "alice"),
        other => panic!("expected online, got {other:?}"),
    }

    // Transport drops: alice's only window empties. The offline is deferred
    // by the resume grace period rather than published on the spot, so bob
    // observes nothing yet.
    harness.sessions.disconnect(&alice_conn).await;
    bob.assert_silent().await;

    // Reconnect within the grace window presenting the resume token: this
    // bumps alice's offline epoch, invalidating the deferred `x` before any
    // sweep drains it. No `x` and no `o` reach bob (I3, §8 scenario 3).
    let (resumed_conn, mut resumed_outbound) = harness.sessions.accept();
    harness
        .sessions
        .login(&resumed_conn, "alice".to_string(), None, Some(resume_token))
        .await
        .expect("resume should succeed");
    let _ = resumed_outbound.recv().await.unwrap(); // loginSuccess
    let _ = resumed_outbound.recv().await.unwrap(); // sync

    bob.assert_silent().await;

    // A later sweep must not resurrect the invalidated entry either.
    harness.sessions.liveness_sweep(Duration::from_secs(30)).await;
    bob.assert_silent().await;
}

#[tokio::test]
async fn offline_fires_only_once_all_windows_close() {
    // A short resume grace lets the test observe the deferred offline
    // actually fire via a `liveness_sweep`, instead of waiting out a real
    // 60-second TTL.
    let harness = Harness::with_resume_grace(
        LimitsConfig::default(),
        PresenceConfig::default(),
        ChannelConfig::default(),
        Duration::from_millis(20),
    )
    .await;
    harness.seed_identity("tok-alice", 1, "alice", vec![], vec![], vec![]);
    harness.seed_identity("tok-bob", 2, "bob", vec![], vec![1], vec![]);

    let mut bob = harness.login("bob", "tok-bob").await;

    let (w1, mut w1_out) = harness.sessions.accept();
    harness
        .sessions
        .login(&w1, "alice".to_string(), Some("tok-alice".to_string()), None)
        .await
        .unwrap();
    let _ = w1_out.recv().await.unwrap(); // loginSuccess
    let _ = w1_out.recv().await.unwrap(); // sync
    match bob.recv().await {
        ServerMessage::Online { id, .. } => assert_eq!(id, "alice"),
        other => panic!("expected online, got {other:?}"),
    }

    // Second window for the same username: a resume-less, token-less path
    // isn't available twice, but a second authenticated login for the same
    // username opens a second window without tearing down the first one.
    let (w2, mut w2_out) = harness.sessions.accept();
    harness
        .sessions
        .login(&w2, "alice".to_string(), Some("tok-alice".to_string()), None)
        .await
        .unwrap();
    let _ = w2_out.recv().await.unwrap(); // loginSuccess
    let _ = w2_out.recv().await.unwrap(); // sync
    // Second window is a fresh login too (no resume token supplied), so it
    // republishes online; bob just sees it again.
    match bob.recv().await {
        ServerMessage::Online { id, .. } => assert_eq!(id, "alice"),
        other => panic!("expected online, got {other:?}"),
    }

    // Closing the first window must not emit `x`: the second window keeps
    // alice's Window Set non-empty (I4).
    harness.sessions.disconnect(&w1).await;
    bob.assert_silent().await;

    // Closing the second (last) window empties the Window Set and schedules
    // a deferred offline; nothing publishes until the grace period elapses
    // and a sweep drains it.
    harness.sessions.disconnect(&w2).await;
    bob.assert_silent().await;

    tokio::time::sleep(Duration::from_millis(40)).await;
    harness.sessions.liveness_sweep(Duration::from_secs(30)).await;
    match bob.recv().await {
        ServerMessage::Offline { id, .. } => assert_eq!(id, "alice"),
        other => panic!("expected offline, got {other:?}"),
    }
}

#[tokio::test]
async fn aggregated_initial_sync_reports_the_highest_priority_window() {
    let harness = Harness::new().await;
    harness.seed_identity("tok-alice", 1, "alice", vec![], vec![], vec![]);
    harness.seed_identity("tok-bob", 2, "bob", vec![], vec![1], vec![]);

    let (w1, mut w1_out) = harness.sessions.accept();
    harness
        .sessions
        .login(&w1, "alice".to_string(), Some("tok-alice".to_string()), None)
        .await
        .unwrap();
    let _ = w1_out.recv().await.unwrap();
    let _ = w1_out.recv().await.unwrap();

    let (w2, mut w2_out) = harness.sessions.accept();
    harness
        .sessions
        .login(&w2, "alice".to_string(), Some("tok-alice".to_string()), None)
        .await
        .unwrap();
    let _ = w2_out.recv().await.unwrap();
    let _ = w2_out.recv().await.unwrap();

    harness
        .sessions
        .handle_message(
            &w2,
            ClientMessage::StatusUpdate {
                s: Some(Status::Online),
                a: Some(Activity::Coding),
                p: None,
                l: None,
            },
        )
        .await;

    // Bob logs in after both windows exist: his initial sync should reflect
    // the aggregated (highest-priority-activity) window, i.e. Coding.
    let (bob, mut bob_out) = harness.sessions.accept();
    harness
        .sessions
        .login(&bob, "bob".to_string(), Some("tok-bob".to_string()), None)
        .await
        .unwrap();
    let _ = bob_out.recv().await.unwrap(); // loginSuccess
    match bob_out.recv().await.unwrap() {
        ServerMessage::Sync { users } => {
            let alice = users.iter().find(|u| u.id == "alice").expect("alice in sync");
            assert_eq!(alice.act, Activity::Coding);
        }
        other => panic!("expected sync, got {other:?}"),
    }
}
