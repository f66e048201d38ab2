//! Exponential backoff retry policy with jitter.
//!
//! Delays grow as `base · 2^n` capped at a maximum, with additive uniform
//! jitter to spread retries from many events apart. `Retry-After` hints from
//! the endpoint take precedence over the computed delay.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for failed webhook deliveries.
///
/// Example delays (base 1s, max 60s): retry 0 lands in 1–2s, retry 1 in
/// 2–4s, retry 2 in 4–8s, and from retry 6 onward in 60–120s. Jitter is
/// additive to the capped delay, so the worst case is twice the maximum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay for the exponential curve.
    pub base_delay: Duration,

    /// Cap on the pre-jitter delay.
    pub max_delay: Duration,

    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Whether another retry may be scheduled at the given retry count.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Jittered exponential delay for the given retry count.
    ///
    /// Returns `cap + U[0, cap]` where `cap = min(base · 2^n, max)`.
    /// Non-deterministic by design; callers and tests must treat the result
    /// as bounded, not exact.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let cap = self.capped_delay(retry_count);
        let jitter_ms = rand::rng().random_range(0..=cap.as_millis() as u64);
        cap + Duration::from_millis(jitter_ms)
    }

    /// Delay honouring an endpoint-supplied `Retry-After` hint.
    ///
    /// A positive hint yields `max(hint, base_delay)` so the server's wish is
    /// respected without retrying faster than the floor. Absent or zero hints
    /// fall back to the jittered exponential delay.
    pub fn delay_with_hint(&self, retry_count: u32, retry_after_seconds: Option<u32>) -> Duration {
        match retry_after_seconds {
            Some(seconds) if seconds > 0 => {
                let hinted = Duration::from_secs(u64::from(seconds));
                hinted.max(self.base_delay)
            },
            _ => self.delay(retry_count),
        }
    }

    /// Pre-jitter delay: `min(base · 2^n, max)`.
    fn capped_delay(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        // Shifts past 63 bits would overflow; the cap applies long before.
        let exponential_ms = if retry_count >= 63 {
            u64::MAX
        } else {
            base_ms.saturating_mul(1u64 << retry_count)
        };
        Duration::from_millis(exponential_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_retry_respects_maximum() {
        let policy = RetryPolicy { max_retries: 3, ..Default::default() };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(10));
    }

    #[test]
    fn delay_stays_within_jitter_bounds() {
        let policy = RetryPolicy::default();

        for retry_count in 0..8 {
            let cap_ms =
                (1000u64 << retry_count).min(policy.max_delay.as_millis() as u64);
            for _ in 0..20 {
                let delay_ms = policy.delay(retry_count).as_millis() as u64;
                assert!(delay_ms >= cap_ms, "delay {delay_ms}ms below cap {cap_ms}ms");
                assert!(delay_ms <= 2 * cap_ms, "delay {delay_ms}ms above 2x cap {cap_ms}ms");
            }
        }
    }

    #[test]
    fn delay_caps_at_twice_max() {
        let policy = RetryPolicy::default();

        // Far past the cap point; worst case is 2 * max_delay.
        let delay = policy.delay(30);
        assert!(delay >= policy.max_delay);
        assert!(delay <= policy.max_delay * 2);
    }

    #[test]
    fn retry_after_hint_overrides_backoff() {
        let policy = RetryPolicy::default();

        let delay = policy.delay_with_hint(0, Some(7));
        assert_eq!(delay, Duration::from_secs(7));
    }

    #[test]
    fn retry_after_hint_floors_at_base_delay() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(2),
            ..Default::default()
        };

        // A 1s hint would retry faster than the floor allows.
        let delay = policy.delay_with_hint(0, Some(1));
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[test]
    fn absent_or_zero_hint_falls_back_to_backoff() {
        let policy = RetryPolicy::default();

        for hint in [None, Some(0)] {
            let delay_ms = policy.delay_with_hint(2, hint).as_millis() as u64;
            assert!((4000..=8000).contains(&delay_ms), "unexpected delay {delay_ms}ms");
        }
    }

    #[test]
    fn huge_retry_counts_do_not_overflow() {
        let policy = RetryPolicy::default();
        let delay = policy.delay(u32::MAX);
        assert!(delay <= policy.max_delay * 2);
    }
}
