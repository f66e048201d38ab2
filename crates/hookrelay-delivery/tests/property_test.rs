//! Property-based tests for delivery invariants.
//!
//! Uses randomly generated inputs to verify that backoff bounds, retry
//! limits and classification determinism hold regardless of input data.

use std::time::Duration;

use hookrelay_delivery::{RetryPolicy, RuleEngine};
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

/// Creates property test configuration based on environment.
///
/// Uses environment variables:
/// - `PROPTEST_CASES`: Number of test cases (default: 32 for dev, 64 for CI)
/// - `CI`: If set to "true", uses CI configuration
fn proptest_config() -> ProptestConfig {
    let is_ci = std::env::var("CI").unwrap_or_default() == "true";
    let default_cases = if is_ci { 64 } else { 32 };

    let cases =
        std::env::var("PROPTEST_CASES").ok().and_then(|s| s.parse().ok()).unwrap_or(default_cases);

    ProptestConfig::with_cases(cases)
}

proptest! {
    #![proptest_config(proptest_config())]

    /// Backoff delays always lie in `[cap, 2·cap]` where
    /// `cap = min(base · 2^n, max)`.
    #[test]
    fn backoff_delay_within_bounds(
        retry_count in 0u32..40,
        base_ms in 1u64..5_000,
        max_ms in 5_000u64..600_000,
    ) {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
            max_retries: 5,
        };

        let cap_ms = if retry_count >= 63 {
            max_ms
        } else {
            base_ms.saturating_mul(1u64 << retry_count).min(max_ms)
        };

        let delay_ms = policy.delay(retry_count).as_millis() as u64;
        prop_assert!(delay_ms >= cap_ms, "delay {delay_ms}ms below cap {cap_ms}ms");
        prop_assert!(delay_ms <= 2 * cap_ms, "delay {delay_ms}ms above twice cap {cap_ms}ms");
    }

    /// `should_retry` admits exactly the retry counts below the maximum.
    #[test]
    fn retry_limit_is_exact(
        max_retries in 0u32..30,
        retry_count in 0u32..60,
    ) {
        let policy = RetryPolicy {
            max_retries,
            ..Default::default()
        };

        prop_assert_eq!(policy.should_retry(retry_count), retry_count < max_retries);
    }

    /// A positive `Retry-After` hint is always honoured and never undercuts
    /// the base delay.
    #[test]
    fn retry_after_hint_is_floor_and_honoured(
        retry_count in 0u32..10,
        base_ms in 1u64..10_000,
        hint_secs in 1u32..600,
    ) {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(3600),
            max_retries: 5,
        };

        let delay = policy.delay_with_hint(retry_count, Some(hint_secs));
        prop_assert!(delay >= Duration::from_secs(u64::from(hint_secs)));
        prop_assert!(delay >= policy.base_delay);
    }

    /// The rule engine is a pure function: equal inputs yield equal outputs.
    #[test]
    fn classification_is_deterministic(
        status in -1i32..620,
        message in prop::option::of("[ a-z]{0,40}"),
    ) {
        let engine = RuleEngine::with_defaults();
        let first = engine.classify(status, message.as_deref());

        for _ in 0..5 {
            let again = engine.classify(status, message.as_deref());
            prop_assert_eq!(&again, &first);
        }
    }

    /// Default rules never choose ESCALATE and retry everything retryable:
    /// 5xx, 429, 408 and transport failures map to RETRY.
    #[test]
    fn retryable_statuses_map_to_retry(status in prop::sample::select(vec![429i32, 408, 500, 502, 503, 599, 0, -1])) {
        let engine = RuleEngine::with_defaults();
        let matched = engine.classify(status, None);
        prop_assert_eq!(matched.decision, hookrelay_core::ErrorDecision::Retry);
    }
}
