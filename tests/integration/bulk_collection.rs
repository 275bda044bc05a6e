//! End-to-end paged collection against the in-memory registry

use crate::support::{fast_policy, load_state, paged_target, FakeRegistry, COUNT_PATH};
use registry_harvester::collector::{Orchestrator, RunOutcome, RunPhase};
use registry_harvester::output::{ColumnConfig, ExportConfig};
use registry_harvester::registry::CountConfig;
use registry_harvester::resume::Cursor;
use registry_harvester::retry::FailureKind;
use registry_harvester::shutdown::ShutdownCoordinator;
use registry_harvester::transport::RawResponse;
use tempfile::TempDir;

#[tokio::test]
async fn test_250_items_page_size_100_concurrency_4() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(250).shared();
    let target = paged_target("companies", 100, 4);

    let orchestrator = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy());
    let progress = orchestrator.progress_handle();
    let report = orchestrator.run(false).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.outcome.exit_code(), 0);
    assert_eq!(report.collected, 250);
    assert_eq!(report.stats.issued, 3);
    assert_eq!(registry.ordinals().len(), 3);

    let state = load_state(dir.path(), "companies");
    assert_eq!(state.collected_count(), 250);
    assert_eq!(state.cursor(), Cursor::Page { next_page: 3 });
    assert_eq!(state.total_target(), Some(250));

    let snapshot = progress.snapshot();
    assert_eq!(snapshot.phase, RunPhase::Completed);
    assert_eq!(snapshot.collected, 250);
    assert_eq!(snapshot.in_flight, 0);
}

#[tokio::test]
async fn test_bounded_run_issues_ceil_total_over_page_size() {
    for (total, page_size) in [(1u64, 10u32), (10, 10), (11, 10), (999, 100), (1000, 100)] {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::paged(total).shared();
        let target = paged_target("bounded", page_size, 3);

        let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
            .with_state_dir(dir.path())
            .with_policy(fast_policy())
            .run(false)
            .await
            .unwrap();

        let expected = total.div_ceil(u64::from(page_size));
        assert_eq!(report.stats.issued, expected, "total={total} page_size={page_size}");
        assert_eq!(registry.ordinals().len() as u64, expected);
        assert_eq!(report.collected as u64, total);
    }
}

#[tokio::test]
async fn test_count_query_seeds_total_before_sweep() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(250).shared();
    let mut target = paged_target("counted", 100, 4);
    target.count = Some(CountConfig {
        path: Some(COUNT_PATH.to_string()),
        ..Default::default()
    });

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    let recorded = registry.recorded();
    assert!(recorded[0].ordinal.is_none(), "count query goes first");
    assert_eq!(report.stats.issued, 3);
    assert_eq!(report.total_target, Some(250));
    assert_eq!(report.collected, 250);
}

#[tokio::test]
async fn test_empty_collection_completes_after_one_request() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(0).shared();
    let target = paged_target("empty", 50, 4);

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.issued, 1);
    assert_eq!(report.collected, 0);
}

#[tokio::test]
async fn test_transient_errors_are_retried_and_counted() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(250)
        .script(1, vec![RawResponse::new(503, "busy"), RawResponse::new(502, "bad gateway")])
        .shared();
    let target = paged_target("flaky", 100, 2);

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 250);
    assert_eq!(report.stats.issued, 3);
    assert_eq!(report.stats.retried_then_succeeded, 1);
    assert_eq!(report.stats.retries_by_kind.get(&FailureKind::RetryableServer), Some(&2));
    assert_eq!(registry.arrivals(1).len(), 3);
}

#[tokio::test]
async fn test_schema_mismatch_is_a_failure_not_an_empty_page() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(250)
        .script(1, vec![RawResponse::new(200, r#"{"error": "maintenance"}"#)])
        .shared();
    let target = paged_target("mismatch", 100, 1);

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.failed_by_kind.get(&FailureKind::SchemaMismatch), Some(&1));
    assert_eq!(report.collected, 150);
    assert_eq!(report.failed_ordinals, 1);

    let state = load_state(dir.path(), "mismatch");
    assert!(state.failed().contains(&1));
}

#[tokio::test]
async fn test_failure_rate_ceiling_aborts_run() {
    let dir = TempDir::new().unwrap();
    let mut registry = FakeRegistry::paged(1000);
    for page in 1..10 {
        registry = registry.script(page, vec![RawResponse::new(400, "bad request")]);
    }
    let registry = registry.shared();
    let mut target = paged_target("failing", 100, 1);
    target.settings.failure_rate_min_requests = 4;
    target.settings.failure_rate_threshold = 0.5;

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert!(matches!(report.outcome, RunOutcome::Aborted(_)));
    assert_eq!(report.outcome.exit_code(), 1);
    // 1 success then failures: 2/3 > 0.5 is only checked from the 4th request
    assert_eq!(report.stats.issued, 4);
    assert_eq!(registry.ordinals().len(), 4);
    assert_eq!(report.stats.failed_by_kind.get(&FailureKind::TerminalOther), Some(&3));
}

#[tokio::test]
async fn test_changed_payloads_are_updated_not_duplicated() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(30).shared();
    let target = paged_target("revisions", 10, 2);

    let first = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();
    assert_eq!(first.stats.items.added, 30);
    let before = load_state(dir.path(), "revisions");

    // Rewind the cursor so the resumed run re-reads everything
    let mut rewound = before.clone();
    rewound.set_cursor(Cursor::Page { next_page: 0 });
    registry_harvester::resume::CheckpointStore::new(dir.path(), "revisions")
        .save(&rewound)
        .unwrap();
    registry.bump_revision();

    let second = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(true)
        .await
        .unwrap();

    assert_eq!(second.stats.items.added, 0);
    assert_eq!(second.stats.items.updated, 30);
    assert_eq!(second.collected, 30);

    let after = load_state(dir.path(), "revisions");
    let id = before.collected_ids().next().unwrap().clone();
    assert_ne!(before.digest_of(&id), after.digest_of(&id));
}

#[tokio::test]
async fn test_xlsx_export_holds_every_item() {
    let dir = TempDir::new().unwrap();
    let workbook = dir.path().join("out").join("items.xlsx");
    let mut target = paged_target("spreadsheet", 100, 2);
    target.settings.checkpoint_every_items = 100;
    target.export = Some(ExportConfig::Xlsx {
        path: workbook.clone(),
        columns: vec![ColumnConfig::new("id", "/id"), ColumnConfig::new("name", "/name")],
        missing: String::new(),
    });

    let report = Orchestrator::with_transport(&target, FakeRegistry::paged(250).shared(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(std::fs::read(&workbook).unwrap().starts_with(b"PK"));
    let staged = std::fs::read_to_string(dir.path().join("out").join("items.xlsx.rows.jsonl")).unwrap();
    let rows: Vec<Vec<String>> = staged.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(rows.len(), 250);
    assert!(rows.contains(&vec!["7".to_string(), "item-7".to_string()]));
}
