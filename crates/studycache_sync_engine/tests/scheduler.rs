//! Background scheduling and restart behaviour.

use std::sync::Arc;
use std::time::Duration;
use studycache_core::{
    ActionState, ArtifactType, Clock, ManualClock, NewArtifact, SyncState, Timestamp,
};
use studycache_storage::{FileStore, MemoryStore, PersistentStore};
use studycache_sync_engine::{
    BackoffPolicy, ConnectivitySignal, CycleOutcome, MockBackend, SyncConfig, SyncEngine,
    SyncEngineBuilder,
};
use tempfile::tempdir;

fn build_engine(
    store: Arc<dyn PersistentStore>,
    backend: Arc<MockBackend>,
    signal: Arc<ConnectivitySignal>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
) -> SyncEngine {
    SyncEngineBuilder::new(store, backend, signal)
        .with_clock(clock)
        .with_sync_config(config.with_backoff(BackoffPolicy::none()))
        .build()
        .unwrap()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..100 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn reconnect_triggers_sync_for_queued_owners() {
    let backend = Arc::new(MockBackend::new());
    let signal = Arc::new(ConnectivitySignal::new(false));
    let engine = build_engine(
        Arc::new(MemoryStore::new()),
        backend.clone(),
        signal.clone(),
        Arc::new(ManualClock::new(Timestamp::from_millis(1))),
        SyncConfig::default()
            .with_sync_interval(None)
            .with_sweep_interval(None),
    );
    let a = engine.enqueue_action("u1", "submit_answer", vec![1]).unwrap();
    let b = engine.enqueue_action("u2", "submit_answer", vec![2]).unwrap();

    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend.attempts().is_empty());

    signal.set_online(true);
    wait_until(|| backend.acknowledged().len() == 2).await;
    let mut acknowledged = backend.acknowledged();
    acknowledged.sort();
    assert_eq!(acknowledged, vec![a, b]);

    handle.shutdown().await;
    wait_until(|| engine.status("u1").state == SyncState::Idle).await;
    assert!(engine.status("u1").initial_sync_complete);
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_and_sweep() {
    let backend = Arc::new(MockBackend::new());
    let signal = Arc::new(ConnectivitySignal::new(true));
    let clock = Arc::new(ManualClock::new(Timestamp::from_millis(1)));
    let engine = build_engine(
        Arc::new(MemoryStore::new()),
        backend.clone(),
        signal,
        clock.clone(),
        SyncConfig::default()
            .with_artifact_types([ArtifactType::Quiz])
            .with_sync_interval(Some(Duration::from_secs(15 * 60)))
            .with_sweep_interval(Some(Duration::from_secs(60 * 60))),
    );
    engine
        .cache()
        .put(NewArtifact::new("u1", ArtifactType::Analytics, "weekly", vec![]))
        .unwrap();
    // Gives u1 a status row so the scheduler knows the owner
    engine.sync_now("u1").await.unwrap();
    assert_eq!(backend.fetch_count(), 1);

    let handle = engine.start();
    // Analytics expire after 12 hours
    clock.advance(Duration::from_secs(13 * 60 * 60));
    tokio::time::sleep(Duration::from_secs(61 * 60)).await;

    assert!(backend.fetch_count() >= 4);
    assert_eq!(engine.cache().count("u1", ArtifactType::Analytics).unwrap(), 0);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn queued_actions_survive_restart() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let signal = Arc::new(ConnectivitySignal::new(true));
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Timestamp::from_millis(1)));
    let config = SyncConfig::default()
        .with_sync_interval(None)
        .with_sweep_interval(None);

    let (first, second) = {
        let store: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let engine = build_engine(store, backend.clone(), signal.clone(), clock.clone(), config.clone());
        engine.sync_now("u1").await.unwrap();

        signal.set_online(false);
        let first = engine.enqueue_action("u1", "submit_answer", vec![1]).unwrap();
        let second = engine.enqueue_action("u1", "complete_session", vec![2]).unwrap();
        engine.queue().mark_in_flight(&first).unwrap();
        (first, second)
    };

    let store: Arc<dyn PersistentStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let engine = build_engine(store, backend.clone(), signal.clone(), clock, config);
    let recovered = engine.queue().get(&first).unwrap().unwrap();
    assert_eq!(recovered.state, ActionState::Pending);
    assert_eq!(engine.status("u1").pending_count, 2);
    assert!(engine.status("u1").initial_sync_complete);

    signal.set_online(true);
    let outcome = engine.sync_now("u1").await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Completed(_)));
    assert_eq!(backend.acknowledged(), vec![first, second]);
}
