use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use presenced::codec::{Activity, ClientMessage, CompactUser, ServerMessage, Status};
use presenced::presence::{aggregate_windows, WindowSnapshot};
use presenced::privacy::{admits, redact_compact_user, redact_outbound};
use presenced::store::{PreferencesRecord, UserRecord};

// Baseline costs on the hot egress path: one `statusUpdate` decoded off the
// wire, one `u` delta re-encoded for a subscriber, and the privacy/aggregate
// checks the Session Manager runs per (viewer, target) pair on every publish.

fn status_update_decode_benchmark(c: &mut Criterion) {
    let raw = br#"{"t":"statusUpdate","s":"Online","a":"Coding","p":"presenced","l":"rust"}"#;
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(raw.len() as u64));

    group.bench_function("decode_status_update", |b| {
        b.iter(|| serde_json::from_slice::<ClientMessage>(raw).unwrap())
    });

    group.finish();
}

fn update_encode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(1));

    group.bench_function("encode_update", |b| {
        b.iter(|| {
            let msg = ServerMessage::Update {
                id: "alice".to_string(),
                s: Some(Status::Online),
                a: Some(Activity::Coding),
                p: Some("presenced".to_string()),
                l: Some("rust".to_string()),
                cs: None,
            };
            serde_json::to_vec(&msg).unwrap()
        })
    });

    group.finish();
}

fn privacy_filter_benchmark(c: &mut Criterion) {
    let target = UserRecord {
        identity_id: 1,
        username: "alice".to_string(),
        avatar_url: None,
        followers: vec![2, 3, 4],
        following: vec![],
        close_friends: vec![2],
        last_seen_ms: 0,
        created_at: 0,
    };
    let prefs = PreferencesRecord {
        identity_id: 1,
        visibility: presenced::codec::VisibilityMode::Followers,
        share_project_name: true,
        share_language: false,
        share_activity: true,
    };

    let mut group = c.benchmark_group("privacy");
    group.throughput(Throughput::Elements(1));

    group.bench_function("admits_followers_mode", |b| {
        b.iter(|| admits(Some(2), &target, &prefs))
    });

    group.bench_function("redact_outbound_update", |b| {
        b.iter(|| {
            let msg = ServerMessage::Update {
                id: "alice".to_string(),
                s: Some(Status::Online),
                a: Some(Activity::Coding),
                p: Some("presenced".to_string()),
                l: Some("rust".to_string()),
                cs: None,
            };
            redact_outbound(msg, &prefs)
        })
    });

    group.bench_function("redact_compact_user", |b| {
        b.iter(|| {
            let user = CompactUser {
                id: "alice".to_string(),
                a: None,
                s: Status::Online,
                act: Activity::Coding,
                p: Some("presenced".to_string()),
                l: Some("rust".to_string()),
                ls: None,
            };
            redact_compact_user(user, &prefs)
        })
    });

    group.finish();
}

fn window_aggregation_benchmark(c: &mut Criterion) {
    let windows = [
        WindowSnapshot { connection_id: 1, status: Status::Online, activity: Activity::Idle },
        WindowSnapshot { connection_id: 2, status: Status::Away, activity: Activity::Reading },
        WindowSnapshot { connection_id: 3, status: Status::Online, activity: Activity::Debugging },
    ];

    let mut group = c.benchmark_group("presence");
    group.throughput(Throughput::Elements(windows.len() as u64));

    group.bench_function("aggregate_three_windows", |b| {
        b.iter(|| aggregate_windows(&windows))
    });

    group.finish();
}

criterion_group!(
    benches,
    status_update_decode_benchmark,
    update_encode_benchmark,
    privacy_filter_benchmark,
    window_aggregation_benchmark,
);
criterion_main!(benches);
