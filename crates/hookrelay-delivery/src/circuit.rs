//! Per-webhook circuit breaker for endpoint failure protection.
//!
//! Fails fast during outages and gradually tests recovery, preventing retry
//! storms against broken endpoints.
//!
//! # State Machine
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │         CLOSED          │
//!                    │   (normal operation)    │
//!                    └─────────────────────────┘
//!                     │                       ▲
//!        threshold    │                       │ probe
//!        consecutive  │                       │ success
//!        failures     ▼                       │
//!   ┌─────────────────────────┐        ┌───────────────────────┐
//!   │          OPEN           │        │       HALF_OPEN       │
//!   │       (fail fast)       │───────▶│  (testing recovery)   │
//!   └─────────────────────────┘ cool-  └───────────────────────┘
//!                 ▲             down               │
//!                 │                                │ probe failure
//!                 └────────────────────────────────┘
//! ```
//!
//! The breaker exposes pure transitions over a [`CircuitSnapshot`] extracted
//! from the webhook's persisted health fields. Persisting the mutated
//! snapshot is the caller's responsibility, which keeps this module free of
//! storage concerns and trivially testable.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookrelay_core::{CircuitState, Webhook};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker configuration shared by all webhooks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,

    /// Time to wait in OPEN before admitting a recovery probe.
    pub cooldown: Duration,

    /// Probes admitted while HALF_OPEN before further requests are blocked.
    pub half_open_test_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_test_limit: 3,
        }
    }
}

/// Mutable view of one webhook's breaker fields.
///
/// Derived from the persisted webhook row before a transition and written
/// back afterwards; not independently stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    /// Current breaker state.
    pub state: CircuitState,
    /// Consecutive failures in the current window.
    pub consecutive_failures: u32,
    /// Probes admitted since entering HALF_OPEN.
    pub half_open_probes: u32,
    /// When the circuit last opened. Set while OPEN or HALF_OPEN.
    pub opened_at: Option<DateTime<Utc>>,
}

impl CircuitSnapshot {
    /// Extracts the breaker view from a webhook row.
    pub fn of(webhook: &Webhook) -> Self {
        Self {
            state: webhook.circuit_state,
            consecutive_failures: webhook.consecutive_failures,
            half_open_probes: webhook.half_open_probes,
            opened_at: webhook.circuit_opened_at,
        }
    }

    /// Writes the breaker view back onto a webhook row.
    pub fn store(self, webhook: &mut Webhook) {
        webhook.circuit_state = self.state;
        webhook.consecutive_failures = self.consecutive_failures;
        webhook.half_open_probes = self.half_open_probes;
        webhook.circuit_opened_at = self.opened_at;
    }
}

/// Pure state-machine driver for per-webhook circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Creates a breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    /// Decides whether a request may proceed, advancing OPEN to HALF_OPEN
    /// once the cooldown has elapsed.
    ///
    /// Admitted HALF_OPEN requests consume one probe slot, so at most
    /// `half_open_test_limit` probes are ever in flight. A snapshot mutated
    /// by this call must be persisted even when the request is denied.
    pub fn allow_request(&self, snapshot: &mut CircuitSnapshot, now: DateTime<Utc>) -> bool {
        match snapshot.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = snapshot
                    .opened_at
                    .is_some_and(|opened_at| now >= opened_at + self.cooldown_chrono());

                if cooled_down {
                    info!("circuit cooldown elapsed, transitioning to half-open");
                    snapshot.state = CircuitState::HalfOpen;
                    snapshot.half_open_probes = 1;
                    true
                } else {
                    false
                }
            },
            CircuitState::HalfOpen => {
                if snapshot.half_open_probes < self.config.half_open_test_limit {
                    snapshot.half_open_probes += 1;
                    true
                } else {
                    false
                }
            },
        }
    }

    /// Records a successful delivery.
    ///
    /// HALF_OPEN success closes the circuit and clears all counters. Success
    /// while OPEN cannot happen through the gate and is a no-op.
    pub fn record_success(&self, snapshot: &mut CircuitSnapshot) {
        match snapshot.state {
            CircuitState::Closed => {
                snapshot.consecutive_failures = 0;
            },
            CircuitState::Open => {
                warn!("success recorded while circuit open; ignoring");
            },
            CircuitState::HalfOpen => {
                info!("probe succeeded, closing circuit");
                snapshot.state = CircuitState::Closed;
                snapshot.consecutive_failures = 0;
                snapshot.half_open_probes = 0;
                snapshot.opened_at = None;
            },
        }
    }

    /// Records a failed delivery.
    ///
    /// CLOSED failures count toward the threshold and open the circuit when
    /// it is reached. A HALF_OPEN probe failure re-opens the circuit and
    /// restarts the cooldown. Failures while OPEN are a no-op.
    pub fn record_failure(&self, snapshot: &mut CircuitSnapshot, now: DateTime<Utc>) {
        match snapshot.state {
            CircuitState::Closed => {
                snapshot.consecutive_failures += 1;
                if snapshot.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        consecutive_failures = snapshot.consecutive_failures,
                        "failure threshold reached, opening circuit"
                    );
                    snapshot.state = CircuitState::Open;
                    snapshot.opened_at = Some(now);
                }
            },
            CircuitState::Open => {},
            CircuitState::HalfOpen => {
                warn!("probe failed, reopening circuit");
                snapshot.state = CircuitState::Open;
                snapshot.opened_at = Some(now);
                snapshot.half_open_probes = 0;
            },
        }
    }

    /// Returns the breaker to CLOSED and clears all counters.
    ///
    /// Operator intervention; not used by the delivery path.
    pub fn reset(&self, snapshot: &mut CircuitSnapshot) {
        info!("circuit manually reset to closed");
        snapshot.state = CircuitState::Closed;
        snapshot.consecutive_failures = 0;
        snapshot.half_open_probes = 0;
        snapshot.opened_at = None;
    }

    /// Earliest instant a blocked request should be retried.
    pub fn retry_at(&self, snapshot: &CircuitSnapshot) -> Option<DateTime<Utc>> {
        snapshot.opened_at.map(|opened_at| opened_at + self.cooldown_chrono())
    }

    fn cooldown_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }
}
