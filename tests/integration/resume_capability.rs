//! Checkpoint, pause and resume behavior

use crate::support::{fast_policy, load_state, paged_target, sweep_target, FakeRegistry};
use registry_harvester::collector::{CollectError, Orchestrator, RunOutcome};
use registry_harvester::resume::{CheckpointStore, CollectionState, Cursor, ResumeError};
use registry_harvester::shutdown::ShutdownCoordinator;
use registry_harvester::transport::RawResponse;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const TOTAL: u64 = 1000;
const PAGE_SIZE: u32 = 50;

async fn uninterrupted(dir: &Path) -> CollectionState {
    let registry = FakeRegistry::paged(TOTAL).shared();
    let target = paged_target("resumable", PAGE_SIZE, 3);
    let report = Orchestrator::with_transport(&target, registry, ShutdownCoordinator::shared())
        .with_state_dir(dir)
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    load_state(dir, "resumable")
}

#[tokio::test]
async fn test_pause_then_resume_matches_uninterrupted_run() {
    let reference_dir = TempDir::new().unwrap();
    let reference = uninterrupted(reference_dir.path()).await;

    let dir = TempDir::new().unwrap();
    let target = paged_target("resumable", PAGE_SIZE, 3);

    // First run is interrupted on its 7th request
    let shutdown = ShutdownCoordinator::shared();
    let trip = shutdown.clone();
    let registry = FakeRegistry::paged(TOTAL)
        .with_latency(Duration::from_millis(10))
        .on_request(move |count| {
            if count == 7 {
                trip.request_shutdown();
            }
        })
        .shared();
    let paused = Orchestrator::with_transport(&target, registry.clone(), shutdown)
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(paused.outcome, RunOutcome::Paused);
    assert_eq!(paused.outcome.exit_code(), 2);
    assert_eq!(registry.ordinals().len(), 7, "no request after the interrupt");
    assert!(paused.collected < TOTAL as usize);

    let checkpoint = load_state(dir.path(), "resumable");
    assert_eq!(checkpoint.collected_count(), paused.collected);

    // Second run resumes from the checkpoint
    let resumed = Orchestrator::with_transport(&target, FakeRegistry::paged(TOTAL).shared(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(true)
        .await
        .unwrap();
    assert_eq!(resumed.outcome, RunOutcome::Completed);
    assert_eq!(resumed.collected, TOTAL as usize);

    let finished = load_state(dir.path(), "resumable");
    assert_eq!(finished.cursor(), reference.cursor());
    assert_eq!(finished.run_count(), 2);
    assert!(finished.collected_ids().eq(reference.collected_ids()));
    for id in reference.collected_ids() {
        assert_eq!(finished.digest_of(id), reference.digest_of(id));
    }
}

#[tokio::test]
async fn test_existing_checkpoint_requires_resume() {
    let dir = TempDir::new().unwrap();
    uninterrupted(dir.path()).await;

    let target = paged_target("resumable", PAGE_SIZE, 3);
    let result = Orchestrator::with_transport(&target, FakeRegistry::paged(TOTAL).shared(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .run(false)
        .await;

    assert!(matches!(result, Err(CollectError::CheckpointExists { .. })));
}

#[tokio::test]
async fn test_resume_of_completed_run_issues_no_requests() {
    let dir = TempDir::new().unwrap();
    let before = uninterrupted(dir.path()).await;

    let registry = FakeRegistry::paged(TOTAL).shared();
    let target = paged_target("resumable", PAGE_SIZE, 3);
    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .run(true)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(registry.recorded().is_empty());
    assert_eq!(report.collected, before.collected_count());
}

#[tokio::test]
async fn test_resume_without_checkpoint_starts_fresh() {
    let dir = TempDir::new().unwrap();
    let target = paged_target("fresh", 100, 2);
    let report = Orchestrator::with_transport(&target, FakeRegistry::paged(120).shared(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(true)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 120);
}

#[tokio::test]
async fn test_locked_checkpoint_is_refused() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path(), "busy");
    let _held = store.lock().unwrap();

    let target = paged_target("busy", 100, 2);
    let registry = FakeRegistry::paged(100).shared();
    let result = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .run(false)
        .await;

    assert!(matches!(
        result,
        Err(CollectError::Resume(ResumeError::Locked { .. }))
    ));
    assert!(registry.recorded().is_empty());
}

#[tokio::test]
async fn test_checkpoint_of_other_strategy_is_rejected() {
    let dir = TempDir::new().unwrap();
    let sweep = sweep_target("switched", 3, 1);
    CheckpointStore::new(dir.path(), "switched")
        .save(&CollectionState::new("switched", &sweep.strategy))
        .unwrap();

    let paged = paged_target("switched", 100, 1);
    let result = Orchestrator::with_transport(&paged, FakeRegistry::paged(10).shared(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .run(true)
        .await;

    assert!(matches!(
        result,
        Err(CollectError::Resume(ResumeError::TargetMismatch(_)))
    ));
}

#[tokio::test]
async fn test_item_threshold_triggers_intermediate_checkpoints() {
    let dir = TempDir::new().unwrap();
    let mut target = paged_target("chatty", 50, 1);
    target.settings.checkpoint_every_items = 100;

    let report = Orchestrator::with_transport(&target, FakeRegistry::paged(500).shared(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    // 10 pages of 50 items: a checkpoint every second page plus the final one
    assert_eq!(report.stats.checkpoints, 6);
    assert!(load_state(dir.path(), "chatty").last_checkpoint_at().is_some());
}

#[tokio::test]
async fn test_watermark_cursor_survives_out_of_order_completion() {
    let dir = TempDir::new().unwrap();
    let target = paged_target("ordered", 10, 4);
    let shutdown = ShutdownCoordinator::shared();
    let trip = shutdown.clone();
    let registry = FakeRegistry::paged(200)
        .with_latency(Duration::from_millis(5))
        .on_request(move |count| {
            if count == 6 {
                trip.request_shutdown();
            }
        })
        .shared();

    Orchestrator::with_transport(&target, registry, shutdown)
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    let state = load_state(dir.path(), "ordered");
    let Cursor::Page { next_page } = state.cursor() else {
        panic!("paged target keeps a page cursor");
    };
    // Every page below the cursor has been absorbed
    for id in 1..=(next_page * 10) {
        assert!(state.contains(&id.into()), "item {id} below cursor page {next_page}");
    }
}

#[tokio::test]
async fn test_interval_checkpoint_fires_during_long_backoff() {
    let dir = TempDir::new().unwrap();
    let mut target = paged_target("backoff", 100, 1);
    target.settings.checkpoint_interval_secs = 1;
    target.settings.checkpoint_every_items = 1_000_000;
    let registry = FakeRegistry::paged(300)
        .script(1, vec![RawResponse::new(429, "").with_header("Retry-After", "4")])
        .shared();

    let orchestrator = Orchestrator::with_transport(&target, registry, ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy());
    let run = tokio::spawn(orchestrator.run(false));

    // Page 0 is absorbed, page 1 waits out its Retry-After
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!run.is_finished());
    let mid_backoff = load_state(dir.path(), "backoff");
    assert_eq!(mid_backoff.collected_count(), 100);
    assert!(mid_backoff.last_checkpoint_at().is_some());

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 300);
}

#[tokio::test]
async fn test_resume_after_crash_matches_uninterrupted_run() {
    let reference_dir = TempDir::new().unwrap();
    let reference = uninterrupted(reference_dir.path()).await;

    for crash_at in [2usize, 5, 9] {
        let dir = TempDir::new().unwrap();
        let mut target = paged_target("resumable", PAGE_SIZE, 3);
        target.settings.checkpoint_every_items = 50;

        // The task is aborted mid-flight: no final checkpoint, no stats file
        let reached = Arc::new(Notify::new());
        let signal = reached.clone();
        let registry = FakeRegistry::paged(TOTAL)
            .with_latency(Duration::from_millis(5))
            .on_request(move |count| {
                if count == crash_at {
                    signal.notify_one();
                }
            })
            .shared();
        let orchestrator = Orchestrator::with_transport(&target, registry, ShutdownCoordinator::shared())
            .with_state_dir(dir.path())
            .with_policy(fast_policy());
        let run = tokio::spawn(orchestrator.run(false));
        reached.notified().await;
        run.abort();
        assert!(run.await.unwrap_err().is_cancelled());

        let store = CheckpointStore::new(dir.path(), "resumable");
        assert!(!store.stats_path().exists(), "crash at request {crash_at} skipped the summary");
        let survived = store.load().unwrap().map_or(0, |state| state.collected_count());
        assert!(survived < TOTAL as usize);

        let resumed = Orchestrator::with_transport(&target, FakeRegistry::paged(TOTAL).shared(), ShutdownCoordinator::shared())
            .with_state_dir(dir.path())
            .with_policy(fast_policy())
            .run(true)
            .await
            .unwrap();
        assert_eq!(resumed.outcome, RunOutcome::Completed);
        assert_eq!(resumed.collected, TOTAL as usize);

        let finished = load_state(dir.path(), "resumable");
        assert_eq!(finished.cursor(), reference.cursor());
        assert!(finished.collected_ids().eq(reference.collected_ids()));
        for id in reference.collected_ids() {
            assert_eq!(finished.digest_of(id), reference.digest_of(id));
        }
    }
}
