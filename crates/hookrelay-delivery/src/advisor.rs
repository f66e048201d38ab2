//! Client for the remote learning-based classification advisor.
//!
//! The advisor is consulted opportunistically and is strictly fail-open:
//! transport failures, parse failures, unknown decision strings and answers
//! below the confidence threshold all yield `None`, and the caller falls
//! back to the local rule engine.

use std::time::Duration;

use hookrelay_core::{ErrorDecision, ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    classifier::ErrorContext,
    error::{DeliveryError, Result},
};

/// Configuration for the advisor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Base URL of the advisor service.
    pub url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Minimum confidence score required to adopt an advisor decision.
    pub confidence_threshold: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8001".to_string(),
            timeout: Duration::from_millis(5000),
            confidence_threshold: 0.6,
        }
    }
}

/// Error signature sent to the advisor.
#[derive(Debug, Serialize)]
struct ErrorSignature<'a> {
    http_status_code: i32,
    error_type: String,
    error_message_pattern: Option<&'a str>,
}

/// Webhook health block sent to the advisor.
#[derive(Debug, Serialize)]
struct WebhookHealth {
    webhook_id: String,
    total_failures: u64,
    total_successes: u64,
    consecutive_failures: u32,
    circuit_breaker_state: String,
}

/// Advisor request payload.
#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    error_signature: ErrorSignature<'a>,
    retry_count: u32,
    recent_failure_rate: f64,
    webhook_health: WebhookHealth,
}

/// Supporting evidence returned by the advisor.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)] // Deserialized for logging; not all fields are read.
pub struct AdvisorEvidence {
    /// Number of historical samples backing the decision.
    #[serde(default)]
    pub sample_size: u64,
    /// Observed success rate among the samples.
    #[serde(default)]
    pub success_rate: f64,
    /// How the advisor arrived at the decision.
    #[serde(default)]
    pub decision_type: String,
    /// Similarity score for nearest-neighbour decisions.
    #[serde(default)]
    pub similarity_score: Option<f64>,
    /// Advisor-internal confidence.
    #[serde(default)]
    pub confidence_score: f64,
}

/// Raw advisor response.
#[derive(Debug, Clone, Deserialize)]
struct ClassifyResponse {
    decision: String,
    confidence_score: f64,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    fallback_used: bool,
    #[serde(default)]
    evidence: Option<AdvisorEvidence>,
}

/// An advisor answer that passed confidence and parse checks.
#[derive(Debug, Clone)]
pub struct AdvisorVerdict {
    /// Parsed decision.
    pub decision: ErrorDecision,
    /// Advisor confidence in `[0.0, 1.0]`.
    pub confidence_score: f64,
    /// Advisor-provided explanation.
    pub explanation: String,
}

/// HTTP client for the advisor service.
#[derive(Debug, Clone)]
pub struct AdvisorClient {
    client: reqwest::Client,
    config: AdvisorConfig,
}

impl AdvisorClient {
    /// Creates an advisor client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    pub fn new(config: AdvisorConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build().map_err(|e| {
            DeliveryError::configuration(format!("failed to build advisor client: {e}"))
        })?;

        Ok(Self { client, config })
    }

    /// Asks the advisor to classify a failed delivery.
    ///
    /// Returns `None` whenever the answer cannot be trusted: the request
    /// failed, the response did not parse, the decision string is unknown,
    /// or the confidence is below the configured threshold.
    pub async fn classify(
        &self,
        status_code: i32,
        error_kind: ErrorKind,
        error_message: Option<&str>,
        context: &ErrorContext,
    ) -> Option<AdvisorVerdict> {
        let request = ClassifyRequest {
            error_signature: ErrorSignature {
                http_status_code: status_code,
                error_type: error_kind.to_string(),
                error_message_pattern: error_message,
            },
            retry_count: context.retry_count,
            recent_failure_rate: context.recent_failure_rate,
            webhook_health: WebhookHealth {
                webhook_id: context.webhook_id.to_string(),
                total_failures: context.total_failures,
                total_successes: context.total_successes,
                consecutive_failures: context.consecutive_failures,
                circuit_breaker_state: context.circuit_state.to_string().to_uppercase(),
            },
        };

        let url = format!("{}/api/v1/classify/error", self.config.url.trim_end_matches('/'));

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "advisor unavailable, falling back to rules");
                return None;
            },
        };

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "advisor returned an error status");
            return None;
        }

        let parsed: ClassifyResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "advisor response did not parse");
                return None;
            },
        };

        debug!(
            decision = %parsed.decision,
            confidence = parsed.confidence_score,
            fallback_used = parsed.fallback_used,
            sample_size = parsed.evidence.as_ref().map_or(0, |e| e.sample_size),
            "advisor response received"
        );

        if parsed.confidence_score < self.config.confidence_threshold {
            debug!(
                confidence = parsed.confidence_score,
                threshold = self.config.confidence_threshold,
                "advisor confidence below threshold"
            );
            return None;
        }

        let decision: ErrorDecision = match parsed.decision.parse() {
            Ok(decision) => decision,
            Err(e) => {
                warn!(error = %e, "advisor returned unknown decision");
                return None;
            },
        };

        Some(AdvisorVerdict {
            decision,
            confidence_score: parsed.confidence_score,
            explanation: parsed.explanation,
        })
    }
}
