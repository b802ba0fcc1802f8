//! Cross-crate scenarios: cache, queue, resolver and engine together.

use crate::fixtures::{TestEngine, TestStore};
use crate::generators::{
    delivery_outcome_strategy, new_artifact_strategy, snapshot_strategy, DeliveryOutcome,
};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;
use studycache_core::{resolve, ActionState, ArtifactType, SyncState};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

/// First non-transient outcome decides; an exhausted script falls back to
/// the backend default, which acknowledges.
fn settles_as_ack(script: &[DeliveryOutcome]) -> bool {
    script
        .iter()
        .find(|o| **o != DeliveryOutcome::Transient)
        .map_or(true, |o| *o == DeliveryOutcome::Ack)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn applying_a_snapshot_twice_changes_nothing(
        snapshot in snapshot_strategy(ArtifactType::Solution)
    ) {
        let store = TestStore::memory();
        let cache = store.cache();

        let first = resolve("u1", &snapshot, &cache.list("u1", ArtifactType::Solution).unwrap(), &[]);
        for artifact in first.artifacts {
            cache.put(artifact).unwrap();
        }
        let cached = cache.list("u1", ArtifactType::Solution).unwrap();

        let second = resolve("u1", &snapshot, &cached, &[]);
        let distinct: BTreeSet<&str> =
            snapshot.items.iter().map(|i| i.artifact_id.as_str()).collect();
        prop_assert_eq!(second.unchanged, distinct.len());
        prop_assert_eq!(cached.len(), distinct.len());
    }

    #[test]
    fn cache_stats_account_for_every_row(
        artifacts in prop::collection::vec(new_artifact_strategy("u1".to_string()), 0..30)
    ) {
        let store = TestStore::memory();
        let cache = store.cache();
        for artifact in artifacts {
            cache.put(artifact).unwrap();
        }
        let stats = cache.stats().unwrap();
        prop_assert_eq!(stats.per_type.values().sum::<usize>(), stats.total);
        prop_assert!(stats.not_materialized <= stats.total);
        prop_assert_eq!(stats.expired, 0);
    }

    #[test]
    fn delivery_stops_at_the_first_dead_letter(
        scripts in prop::collection::vec(
            prop::collection::vec(delivery_outcome_strategy(), 0..4),
            1..6,
        )
    ) {
        let rt = paused_runtime();
        let harness = TestEngine::online();

        let mut ids = Vec::new();
        for (i, script) in scripts.iter().enumerate() {
            let id = harness.enqueue_action("u1", "submit_answer", vec![i as u8]).unwrap();
            harness.backend.script_submit(
                id.clone(),
                script.iter().cloned().map(DeliveryOutcome::into_result),
            );
            ids.push(id);
        }

        // Blocked cycles end in an error; only the queue state matters here
        let _ = rt.block_on(harness.sync_now("u1"));

        let delivered = scripts.iter().take_while(|s| settles_as_ack(s)).count();
        prop_assert_eq!(harness.backend.acknowledged(), ids[..delivered].to_vec());

        let remaining = harness.queue().actions("u1").unwrap();
        prop_assert_eq!(remaining.len(), ids.len() - delivered);
        if let Some(head) = remaining.first() {
            prop_assert_eq!(head.state, ActionState::Failed);
            prop_assert!(remaining[1..].iter().all(|a| a.state == ActionState::Pending));
            prop_assert_eq!(harness.status("u1").state, SyncState::Idle);
            prop_assert!(harness.status("u1").last_error.is_some());
        }
        prop_assert_eq!(harness.status("u1").pending_count, remaining.len());
    }
}

#[tokio::test(start_paused = true)]
async fn offline_work_survives_restart_and_syncs() {
    let harness = TestEngine::over(TestStore::file(), false, TestEngine::quiet_config());
    let id = harness
        .enqueue_action_for("u1", "submit_answer", ArtifactType::Quiz, vec![1])
        .unwrap();
    harness.store.clock.advance(Duration::from_secs(60));

    let store = harness.into_store().reopen();
    let harness = TestEngine::over(store, true, TestEngine::quiet_config());
    harness.backend.set_snapshot(
        "u1",
        ArtifactType::Quiz,
        vec![studycache_core::SnapshotItem::new("q1", vec![9])],
    );
    assert_eq!(harness.status("u1").pending_count, 1);

    harness.sync_now("u1").await.unwrap();

    assert_eq!(harness.backend.acknowledged(), vec![id]);
    assert_eq!(harness.queue().depth("u1").unwrap(), 0);
    let quiz = harness.read("u1", ArtifactType::Quiz, "q1").unwrap();
    assert_eq!(quiz.payload, vec![9]);
    let status = harness.status("u1");
    assert!(status.initial_sync_complete);
    assert_eq!(status.pending_count, 0);
}
