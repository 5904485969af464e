mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use release_watchbot::config::RunMode;
use release_watchbot::poller::{PollState, Poller};
use release_watchbot::settings::{Settings, MAX_INTERVAL_MINUTES};

fn every(minutes: u64) -> Settings {
    Settings {
        refresh_interval: minutes,
        ..Settings::default()
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn only_production_schedules() {
    let store = MemoryStore::with(Vec::new(), every(1));
    let w = watcher(&store, &RecordingApi::new(), Vec::new());

    for mode in [RunMode::Development, RunMode::Test, RunMode::Build] {
        let poller = Poller::new();
        assert!(poller.start(w.clone(), mode).is_none());
        assert_eq!(poller.state(), PollState::Idle);
    }

    advance(600).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn schedules_once_per_poller() {
    let store = MemoryStore::with(Vec::new(), every(1));
    let w = watcher(&store, &RecordingApi::new(), Vec::new());
    let poller = Poller::new();

    let handle = poller.start(w.clone(), RunMode::Production);
    assert!(handle.is_some());
    assert_eq!(poller.state(), PollState::Scheduled);
    assert!(poller.start(w, RunMode::Production).is_none());

    advance(61).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn first_tick_waits_one_interval_and_interval_is_reread() {
    let store = MemoryStore::with(Vec::new(), every(2));
    let w = watcher(&store, &RecordingApi::new(), Vec::new());
    let _handle = Poller::new().start(w, RunMode::Production);

    advance(119).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 0);
    advance(2).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);

    // Takes effect for the tick after the one already armed.
    store.settings.lock().await.refresh_interval = 5;
    advance(120).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    advance(290).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    advance(20).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn interval_has_one_minute_floor() {
    let store = MemoryStore::with(Vec::new(), every(0));
    let w = watcher(&store, &RecordingApi::new(), Vec::new());
    let _handle = Poller::new().start(w, RunMode::Production);

    advance(59).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 0);
    advance(2).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failing_cycles_keep_the_loop_alive() {
    let store = MemoryStore::with(vec![github("o/r")], every(1));
    store.fail_loads.store(true, Ordering::SeqCst);
    let w = watcher(&store, &RecordingApi::new(), Vec::new());
    let handle = Poller::new()
        .start(w, RunMode::Production)
        .expect("production schedules");

    advance(61).await;
    advance(60).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 2);
    assert!(!handle.is_finished());

    store.fail_loads.store(false, Ordering::SeqCst);
    advance(60).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 3);
    assert!(store.repo("o/r").await.unwrap().last_checked.is_some());
}

#[tokio::test(start_paused = true)]
async fn unreadable_settings_fall_back_to_default_interval() {
    let store = MemoryStore::with(Vec::new(), every(1));
    store.fail_settings.store(true, Ordering::SeqCst);
    let w = watcher(&store, &RecordingApi::new(), Vec::new());
    let _handle = Poller::new().start(w, RunMode::Production);

    advance(9 * 60).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 0);
    store.fail_settings.store(false, Ordering::SeqCst);
    advance(30).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 0);
    advance(40).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    // Readable again, so the configured interval applies.
    advance(60).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn oversized_interval_is_capped_and_loop_survives() {
    let store = MemoryStore::with(Vec::new(), every(u64::MAX));
    let w = watcher(&store, &RecordingApi::new(), Vec::new());
    let handle = Poller::new()
        .start(w, RunMode::Production)
        .expect("production schedules");

    advance(61).await;
    assert!(!handle.is_finished());
    assert_eq!(store.loads.load(Ordering::SeqCst), 0);

    store.settings.lock().await.refresh_interval = 1;
    advance(MAX_INTERVAL_MINUTES * 60 - 60).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 1);
    advance(60).await;
    assert_eq!(store.loads.load(Ordering::SeqCst), 2);
}
