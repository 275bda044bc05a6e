//! Backoff schedule and failure classification

use rand::Rng;
use registry_harvester::retry::{classify_status, parse_retry_after, Classification, FailureKind, RetryPolicy};
use std::time::Duration;

#[test]
fn test_backoff_is_monotonic_for_any_jitter() {
    let mut rng = rand::rng();
    for _ in 0..200 {
        let base = Duration::from_millis(rng.random_range(1..=2_000));
        let policy = RetryPolicy::new(12, base)
            .with_max_delay(Duration::from_secs(rng.random_range(1..=120)))
            .with_jitter(rng.random_range(0.0..=1.0));

        let mut previous = Duration::ZERO;
        for attempt in 0..policy.max_attempts() {
            let jitter = Duration::from_nanos(rng.random_range(0..=base.as_nanos() as u64));
            let delay = policy.backoff_for(attempt, jitter);
            assert!(
                delay >= previous,
                "attempt {attempt}: {delay:?} < {previous:?} (base {base:?})"
            );
            previous = delay;
        }
    }
}

#[test]
fn test_sampled_delays_are_monotonic() {
    let policy = RetryPolicy::new(10, Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(30))
        .with_jitter(1.0);

    for _ in 0..100 {
        let delays: Vec<_> = (0..policy.max_attempts())
            .map(|attempt| policy.delay_for(attempt, FailureKind::RetryableServer, None))
            .collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]), "{delays:?}");
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(30)));
    }
}

#[test]
fn test_hint_only_applies_to_rate_limiting() {
    let policy = RetryPolicy::new(3, Duration::from_millis(10)).with_jitter(0.0);
    let hint = Some(Duration::from_secs(2));

    assert_eq!(
        policy.delay_for(0, FailureKind::RateLimited, hint),
        Duration::from_secs(2)
    );
    assert_eq!(
        policy.delay_for(0, FailureKind::RetryableServer, hint),
        Duration::from_millis(10)
    );
}

#[test]
fn test_hint_is_not_capped_by_max_delay() {
    let policy = RetryPolicy::new(3, Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(50))
        .with_jitter(0.0);
    assert_eq!(
        policy.delay_for(2, FailureKind::RateLimited, Some(Duration::from_secs(5))),
        Duration::from_secs(5)
    );
}

#[test]
fn test_status_taxonomy() {
    let cases = [
        (200, None),
        (204, None),
        (401, Some(FailureKind::TerminalAuth)),
        (403, Some(FailureKind::TerminalAuth)),
        (404, Some(FailureKind::TerminalNotFound)),
        (429, Some(FailureKind::RateLimited)),
        (400, Some(FailureKind::TerminalOther)),
        (422, Some(FailureKind::TerminalOther)),
        (500, Some(FailureKind::RetryableServer)),
        (503, Some(FailureKind::RetryableServer)),
        (302, Some(FailureKind::UnknownError)),
    ];

    for (status, expected) in cases {
        let classification = classify_status(status);
        match expected {
            None => assert_eq!(classification, Classification::Success, "status {status}"),
            Some(kind) => assert_eq!(classification, Classification::Failure(kind), "status {status}"),
        }
    }
}

#[test]
fn test_only_transient_kinds_are_retried() {
    let retried: Vec<_> = FailureKind::REPORTED
        .into_iter()
        .filter(FailureKind::is_retryable)
        .collect();
    assert_eq!(
        retried,
        vec![
            FailureKind::Timeout,
            FailureKind::RetryableServer,
            FailureKind::RateLimited
        ]
    );
    assert!(!FailureKind::TerminalNotFound.counts_as_failure());
    assert!(FailureKind::SchemaMismatch.counts_as_failure());
}

#[test]
fn test_retry_after_seconds() {
    assert_eq!(parse_retry_after(" 2 "), Some(Duration::from_secs(2)));
    assert_eq!(parse_retry_after("0.5"), Some(Duration::from_millis(500)));
    assert_eq!(parse_retry_after("-1"), None);
    assert_eq!(parse_retry_after("soon"), None);
}
