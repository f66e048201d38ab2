//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhooks, events, error classifications and newtype ID wrappers
//! for compile-time type safety, plus the status enums driving the delivery
//! state machine.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed webhook identifier.
///
/// Wraps a UUID to prevent mixing with other ID types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed event identifier.
///
/// Events are immutable once created; this ID follows them through their
/// entire delivery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Event lifecycle status.
///
/// Events progress through these states during processing. State transitions
/// are owned exclusively by the delivery worker:
///
/// ```text
/// Pending -> Processing -> Success
///                       -> Failure
///                       -> RetryPending -> Pending (re-enqueue)
///                       -> Paused -> Pending (external resume)
/// ```
///
/// `Success` and `Failure` are terminal; the worker never leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Queued and waiting for a worker.
    Pending,

    /// A worker is actively delivering this event.
    Processing,

    /// Delivery failed with a retryable error; waiting for backoff to elapse.
    RetryPending,

    /// Successfully delivered to the endpoint. Terminal.
    Success,

    /// Permanently failed. Terminal.
    Failure,

    /// Suspended because the webhook is paused or disabled.
    ///
    /// Re-entrable: an external resume operation flips the event back to
    /// `Pending` and re-enqueues it.
    Paused,
}

impl EventStatus {
    /// Whether this status is terminal for the delivery core.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::RetryPending => write!(f, "retry_pending"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "retry_pending" => Ok(Self::RetryPending),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("invalid event status: {s}")),
        }
    }
}

/// Circuit breaker state machine.
///
/// Prevents hammering failing endpoints by temporarily blocking deliveries.
/// State transitions:
///
/// ```text
/// Closed -> Open (after threshold consecutive failures)
/// Open -> HalfOpen (after cooldown period)
/// HalfOpen -> Closed (on probe success)
/// HalfOpen -> Open (on probe failure)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,

    /// Endpoint is failing, requests blocked until cooldown elapses.
    Open,

    /// Testing recovery with a limited number of probe requests.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            _ => Err(format!("invalid circuit state: {s}")),
        }
    }
}

/// Action chosen by the error classifier for a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorDecision {
    /// Retry the delivery with backoff.
    Retry,

    /// Permanently fail the event; no more retries.
    FailPermanent,

    /// Suspend all deliveries for this webhook until resumed.
    PauseWebhook,

    /// Requires manual intervention or alerting.
    Escalate,
}

impl fmt::Display for ErrorDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "RETRY"),
            Self::FailPermanent => write!(f, "FAIL_PERMANENT"),
            Self::PauseWebhook => write!(f, "PAUSE_WEBHOOK"),
            Self::Escalate => write!(f, "ESCALATE"),
        }
    }
}

impl std::str::FromStr for ErrorDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RETRY" => Ok(Self::Retry),
            "FAIL_PERMANENT" => Ok(Self::FailPermanent),
            "PAUSE_WEBHOOK" => Ok(Self::PauseWebhook),
            "ESCALATE" => Ok(Self::Escalate),
            _ => Err(format!("invalid error decision: {s}")),
        }
    }
}

/// Derived error category used in explanations and advisor requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// HTTP 429.
    RateLimit,
    /// HTTP 5xx.
    ServerError,
    /// HTTP 401 or 403.
    AuthError,
    /// Any other HTTP 4xx.
    ClientError,
    /// Transport failure whose message mentions a timeout.
    TimeoutError,
    /// Transport failure whose message mentions DNS resolution.
    DnsError,
    /// Any other transport failure.
    NetworkError,
    /// Anything else.
    UnknownError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::ServerError => write!(f, "SERVER_ERROR"),
            Self::AuthError => write!(f, "AUTH_ERROR"),
            Self::ClientError => write!(f, "CLIENT_ERROR"),
            Self::TimeoutError => write!(f, "TIMEOUT_ERROR"),
            Self::DnsError => write!(f, "DNS_ERROR"),
            Self::NetworkError => write!(f, "NETWORK_ERROR"),
            Self::UnknownError => write!(f, "UNKNOWN_ERROR"),
        }
    }
}

/// Subscriber endpoint registered for webhook delivery.
///
/// The registration surface creates webhooks; the endpoint-health fields are
/// mutated only by the delivery worker after each attempt. Webhooks are never
/// destroyed by the delivery core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique identifier for this webhook.
    pub id: WebhookId,

    /// Target URL for delivery. Must be http or https.
    pub url: String,

    /// Opaque subscriber-supplied metadata.
    pub metadata: Option<serde_json::Value>,

    /// Circuit breaker state for this endpoint.
    pub circuit_state: CircuitState,

    /// Consecutive failures in the current window. Reset on success.
    pub consecutive_failures: u32,

    /// Probes admitted since entering half-open.
    pub half_open_probes: u32,

    /// When the circuit last opened. Set iff the circuit has opened and not
    /// yet closed.
    pub circuit_opened_at: Option<DateTime<Utc>>,

    /// When the most recent delivery failure occurred.
    pub last_failure_at: Option<DateTime<Utc>>,

    /// Lifetime successful deliveries. Monotonic.
    pub total_successes: u64,

    /// Lifetime failed delivery attempts. Monotonic.
    pub total_failures: u64,

    /// Deliveries are suspended until this instant passes.
    pub paused_until: Option<DateTime<Utc>>,

    /// Operator kill-switch; disabled webhooks receive no deliveries.
    pub is_disabled: bool,

    /// When this webhook was registered.
    pub created_at: DateTime<Utc>,

    /// When this webhook was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Creates a webhook with health fields at their initial values.
    pub fn new(url: String, metadata: Option<serde_json::Value>, now: DateTime<Utc>) -> Self {
        Self {
            id: WebhookId::new(),
            url,
            metadata,
            circuit_state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_probes: 0,
            circuit_opened_at: None,
            last_failure_at: None,
            total_successes: 0,
            total_failures: 0,
            paused_until: None,
            is_disabled: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether deliveries are currently suspended for this webhook.
    pub fn is_suspended(&self, now: DateTime<Utc>) -> bool {
        self.is_disabled || self.paused_until.is_some_and(|until| until > now)
    }

    /// Fraction of lifetime attempts that failed, in `[0.0, 1.0]`.
    #[allow(clippy::cast_precision_loss)]
    pub fn failure_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            0.0
        } else {
            self.total_failures as f64 / total as f64
        }
    }
}

/// A single delivery job: one payload bound to one webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Webhook this event is delivered to.
    pub webhook_id: WebhookId,

    /// Raw payload, sent verbatim. Normally JSON.
    pub payload: Vec<u8>,

    /// Current processing status.
    pub status: EventStatus,

    /// Number of retries scheduled so far.
    ///
    /// Incremented when a retry is scheduled; never exceeds the policy's
    /// maximum while the event is still live.
    pub retry_count: u32,

    /// Explanation of the most recent failure, if any.
    pub last_error: Option<String>,

    /// When the event was accepted.
    pub created_at: DateTime<Utc>,

    /// When the event was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Creates a pending event for the given webhook.
    pub fn new(webhook_id: WebhookId, payload: Vec<u8>, now: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            webhook_id,
            payload,
            status: EventStatus::Pending,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Payload as `Bytes` for cheap cloning into HTTP bodies.
    pub fn payload_bytes(&self) -> Bytes {
        Bytes::from(self.payload.clone())
    }
}

/// Append-only audit record written for every failed delivery attempt.
///
/// Immutable once created; never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Unique identifier for this record.
    pub id: Uuid,

    /// Event whose delivery failed.
    pub event_id: EventId,

    /// Webhook the delivery targeted.
    pub webhook_id: WebhookId,

    /// HTTP status of the failed attempt. Zero encodes a transport failure.
    pub http_status: i32,

    /// Raw error message from the attempt, if any.
    pub error_message: Option<String>,

    /// Decision chosen by the classifier.
    pub decision: ErrorDecision,

    /// Human-readable explanation for end-user surfacing.
    pub explanation: String,

    /// Derived error category.
    pub error_kind: ErrorKind,

    /// `Retry-After` hint from the response, in seconds.
    pub retry_after_seconds: Option<u32>,

    /// When the classification was made.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_status_display_round_trips() {
        for status in [
            EventStatus::Pending,
            EventStatus::Processing,
            EventStatus::RetryPending,
            EventStatus::Success,
            EventStatus::Failure,
            EventStatus::Paused,
        ] {
            let parsed: EventStatus = status.to_string().parse().expect("status should parse");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn terminal_statuses_identified() {
        assert!(EventStatus::Success.is_terminal());
        assert!(EventStatus::Failure.is_terminal());
        assert!(!EventStatus::Pending.is_terminal());
        assert!(!EventStatus::RetryPending.is_terminal());
        assert!(!EventStatus::Paused.is_terminal());
    }

    #[test]
    fn decision_parses_wire_format() {
        assert_eq!("RETRY".parse::<ErrorDecision>(), Ok(ErrorDecision::Retry));
        assert_eq!("FAIL_PERMANENT".parse::<ErrorDecision>(), Ok(ErrorDecision::FailPermanent));
        assert_eq!("PAUSE_WEBHOOK".parse::<ErrorDecision>(), Ok(ErrorDecision::PauseWebhook));
        assert_eq!("ESCALATE".parse::<ErrorDecision>(), Ok(ErrorDecision::Escalate));
        assert!("retry".parse::<ErrorDecision>().is_err());
    }

    #[test]
    fn new_webhook_starts_healthy() {
        let now = Utc::now();
        let webhook = Webhook::new("https://example.com/hook".into(), None, now);

        assert_eq!(webhook.circuit_state, CircuitState::Closed);
        assert_eq!(webhook.consecutive_failures, 0);
        assert!(webhook.circuit_opened_at.is_none());
        assert!(!webhook.is_suspended(now));
        assert!((webhook.failure_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn suspension_respects_pause_window() {
        let now = Utc::now();
        let mut webhook = Webhook::new("https://example.com/hook".into(), None, now);

        webhook.paused_until = Some(now + chrono::Duration::hours(1));
        assert!(webhook.is_suspended(now));
        assert!(!webhook.is_suspended(now + chrono::Duration::hours(2)));

        webhook.paused_until = None;
        webhook.is_disabled = true;
        assert!(webhook.is_suspended(now));
    }

    #[test]
    fn failure_rate_reflects_counters() {
        let now = Utc::now();
        let mut webhook = Webhook::new("https://example.com/hook".into(), None, now);
        webhook.total_successes = 3;
        webhook.total_failures = 1;

        assert!((webhook.failure_rate() - 0.25).abs() < f64::EPSILON);
    }
}
