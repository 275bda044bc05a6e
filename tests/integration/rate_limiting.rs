//! 429 handling and request pacing

use crate::support::{fast_policy, load_state, paged_target, FakeRegistry};
use registry_harvester::collector::{Orchestrator, RunOutcome};
use registry_harvester::retry::FailureKind;
use registry_harvester::shutdown::ShutdownCoordinator;
use registry_harvester::transport::{RateLimiter, RawResponse};
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[tokio::test]
async fn test_429_with_retry_after_hint_is_honoured() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(250)
        .script(2, vec![RawResponse::new(429, "slow down").with_header("Retry-After", "2")])
        .shared();
    let target = paged_target("throttled", 100, 4);

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 250);
    assert_eq!(load_state(dir.path(), "throttled").collected_count(), 250);

    let arrivals = registry.arrivals(2);
    assert_eq!(arrivals.len(), 2, "page 2 succeeds on its second attempt");
    assert!(arrivals[1].duration_since(arrivals[0]) >= Duration::from_secs(2));

    assert_eq!(report.stats.issued, 3);
    assert_eq!(report.stats.retried_then_succeeded, 1);
    assert_eq!(report.stats.retries_by_kind.get(&FailureKind::RateLimited), Some(&1));
    assert_eq!(report.stats.failed, 0);
}

#[tokio::test]
async fn test_429_without_hint_uses_computed_backoff() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(20)
        .script(0, vec![RawResponse::new(429, ""), RawResponse::new(429, "")])
        .shared();
    let target = paged_target("unhinted", 10, 1);

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.collected, 20);
    let arrivals = registry.arrivals(0);
    assert_eq!(arrivals.len(), 3);
    // 5ms then 10ms
    assert!(arrivals[1].duration_since(arrivals[0]) >= Duration::from_millis(5));
    assert!(arrivals[2].duration_since(arrivals[1]) >= Duration::from_millis(10));
}

#[tokio::test]
async fn test_unrepresentable_retry_after_falls_back_to_backoff() {
    let dir = TempDir::new().unwrap();
    let registry = FakeRegistry::paged(30)
        .script(1, vec![
            RawResponse::new(429, "").with_header("Retry-After", "1e30"),
            RawResponse::new(429, "").with_header("Retry-After", "18446744073709551616"),
        ])
        .shared();
    let target = paged_target("oversized-hint", 10, 1);

    let started = Instant::now();
    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.collected, 30);
    assert_eq!(registry.arrivals(1).len(), 3);
    assert_eq!(report.stats.retries_by_kind.get(&FailureKind::RateLimited), Some(&2));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_exhausted_429_counts_as_rate_limited_failure() {
    let dir = TempDir::new().unwrap();
    let throttled = vec![RawResponse::new(429, ""); 3];
    let registry = FakeRegistry::paged(30).script(1, throttled).shared();
    let target = paged_target("exhausted", 10, 1);

    let report = Orchestrator::with_transport(&target, registry.clone(), ShutdownCoordinator::shared())
        .with_state_dir(dir.path())
        .with_policy(fast_policy())
        .run(false)
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.stats.failed_by_kind.get(&FailureKind::RateLimited), Some(&1));
    assert_eq!(report.collected, 20);
    assert!(report.stats.format_summary().contains("rate_limited=1"));
}

#[tokio::test]
async fn test_rate_limiter_paces_window() {
    let limiter = RateLimiter::per_window(2, Duration::from_millis(200));
    let started = Instant::now();
    for _ in 0..3 {
        limiter.acquire().await.unwrap();
    }
    assert!(started.elapsed() >= Duration::from_millis(150));
}
