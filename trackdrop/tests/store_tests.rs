//! Concurrency behavior of the state store.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use trackdrop::store::StateStore;
use trackdrop_common::model::{DownloadOutcome, DownloadRecord, TrackKey};
use uuid::Uuid;

fn record(n: usize) -> DownloadRecord {
    let title = format!("Track {n}");
    DownloadRecord {
        key: TrackKey::new("Artist", &title, "Album"),
        artist: "Artist".to_string(),
        title,
        album: Some("Album".to_string()),
        timestamp: trackdrop_common::time::now(),
        outcome: DownloadOutcome::Downloaded,
        source_job_id: Uuid::new_v4(),
        source: "test".to_string(),
        file_path: None,
    }
}

#[test]
fn concurrent_same_user_mutations_all_apply() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());

    let n = 16;
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .mutate("alice", move |state| state.history.push(record(i)))
                    .unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let state = store.read_user("alice").unwrap();
    assert_eq!(state.history.len(), n, "every mutation must land exactly once");
}

#[test]
fn different_users_do_not_share_a_lock() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());

    // Seed both documents so neither path hits migration.
    store.mutate("alice", |_| {}).unwrap();
    store.mutate("bob", |_| {}).unwrap();

    let slow_store = Arc::clone(&store);
    let slow = thread::spawn(move || {
        slow_store
            .mutate("alice", |state| {
                thread::sleep(Duration::from_secs(2));
                state.history.push(record(0));
            })
            .unwrap();
    });

    // Give the slow mutation time to take alice's lock.
    thread::sleep(Duration::from_millis(200));
    let start = Instant::now();
    store.mutate("bob", |state| state.history.push(record(1))).unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "bob's write must not wait on alice's lock"
    );

    slow.join().unwrap();
    assert_eq!(store.read_user("alice").unwrap().history.len(), 1);
    assert_eq!(store.read_user("bob").unwrap().history.len(), 1);
}

#[test]
fn legacy_migration_runs_exactly_once() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("user_settings.json"),
        r#"{"alice": {"cron_hour": 7}}"#,
    )
    .unwrap();

    let store = StateStore::open(dir.path()).unwrap();
    assert_eq!(store.read_user("alice").unwrap().settings.cron_hour, 7);

    // The unified document now exists; later edits to the legacy file
    // must not be picked up.
    std::fs::write(
        dir.path().join("user_settings.json"),
        r#"{"alice": {"cron_hour": 11}}"#,
    )
    .unwrap();
    assert_eq!(store.read_user("alice").unwrap().settings.cron_hour, 7);
}

#[test]
fn writes_to_one_user_are_totally_ordered() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StateStore::open(dir.path()).unwrap());

    for i in 0..10 {
        store.mutate("alice", move |state| state.history.push(record(i))).unwrap();
    }

    let state = store.read_user("alice").unwrap();
    let titles: Vec<_> = state.history.iter().map(|r| r.title.clone()).collect();
    let expected: Vec<_> = (0..10).map(|i| format!("Track {i}")).collect();
    assert_eq!(titles, expected);
}
