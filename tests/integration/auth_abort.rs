//! Authentication failures abort the run without further requests

use crate::support::{fast_policy, load_state, paged_target, FakeRegistry};
use registry_harvester::collector::{Orchestrator, RunOutcome, RunPhase};
use registry_harvester::credentials::CredentialConfig;
use registry_harvester::retry::FailureKind;
use registry_harvester::shutdown::{ShutdownCoordinator, ShutdownReason};
use registry_harvester::transport::RawResponse;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_401_stops_issuing_immediately() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(1000)
        .script(2, vec![RawResponse::new(401, r#"{"error":"token expired"}"#)])
        .shared();
    let target = paged_target("secured", 100, 1);
    let shutdown = ShutdownCoordinator::shared();

    let orchestrator = Orchestrator::with_transport(&target, registry.clone(), shutdown.clone())
        .with_state_dir(dir.path())
        .with_policy(fast_policy());
    let progress = orchestrator.progress_handle();
    let report = orchestrator.run(false).await.unwrap();

    assert!(matches!(report.outcome, RunOutcome::Aborted(_)));
    assert_eq!(report.outcome.exit_code(), 1);
    assert_eq!(progress.snapshot().phase, RunPhase::Aborted);
    assert!(matches!(shutdown.reason(), Some(ShutdownReason::Abort(_))));

    // pages 0 and 1 succeeded, page 2 was rejected, nothing after that
    assert_eq!(registry.ordinals(), vec![0, 1, 2]);
    assert_eq!(registry.arrivals(2).len(), 1, "auth failures are never retried");
    assert_eq!(report.stats.failed_by_kind.get(&FailureKind::TerminalAuth), Some(&1));

    let state = load_state(dir.path(), "secured");
    assert_eq!(state.collected_count(), 200);
    assert_eq!(state.cursor().position(), 2, "rejected page is fetched again on resume");
}

#[tokio::test]
async fn test_403_with_concurrency_drops_in_flight_work() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(5000)
        .with_latency(Duration::from_millis(5))
        .script(3, vec![RawResponse::new(403, "forbidden")])
        .shared();
    let target = paged_target("forbidden", 100, 4);

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert!(matches!(report.outcome, RunOutcome::Aborted(_)));
    // 50 pages exist; only the first few windows are ever requested
    let ordinals = registry.ordinals();
    assert!(ordinals.len() <= 12, "issued {ordinals:?}");
    assert!(ordinals.iter().all(|&page| page < 12));
    assert_eq!(report.stats.failed_by_kind.get(&FailureKind::TerminalAuth), Some(&1));
}

#[tokio::test]
async fn test_missing_credentials_abort_before_any_request() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(100).shared();
    let mut target = paged_target("tokenless", 10, 2);
    target.credential = CredentialConfig::Env {
        var: "HARVESTER_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
    };

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert!(matches!(report.outcome, RunOutcome::Aborted(_)));
    assert!(registry.recorded().is_empty());
    assert_eq!(report.collected, 0);
}

#[tokio::test]
async fn test_bearer_token_is_attached() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(5).shared();
    let mut target = paged_target("bearer", 10, 1);
    target.credential = CredentialConfig::Static {
        token: "abc123".to_string(),
    };

    Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    let recorded = registry.recorded();
    let authorization = recorded[0]
        .request
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
        .map(|(_, value)| value.as_str());
    assert_eq!(authorization, Some("Bearer abc123"));
}
