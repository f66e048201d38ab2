//! Failure classification: rule engine plus optional remote advisor.
//!
//! Maps a failed delivery outcome to one of RETRY, FAIL_PERMANENT,
//! PAUSE_WEBHOOK or ESCALATE. The advisor is consulted first when enabled
//! and trusted only above a confidence threshold; the prioritised rule list
//! is the always-available fallback. The rule engine never errors: unmatched
//! failures default to RETRY.

use hookrelay_core::{CircuitState, ErrorDecision, ErrorKind, WebhookId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{advisor::AdvisorClient, client::DeliveryOutcome};

/// Derives the error category from a failed attempt's status and message.
pub fn derive_error_kind(status_code: i32, error_message: Option<&str>) -> ErrorKind {
    if status_code == 429 {
        return ErrorKind::RateLimit;
    }
    if status_code >= 500 {
        return ErrorKind::ServerError;
    }
    if status_code == 401 || status_code == 403 {
        return ErrorKind::AuthError;
    }
    if (400..500).contains(&status_code) {
        return ErrorKind::ClientError;
    }
    if status_code <= 0 {
        let lowered = error_message.map(str::to_lowercase).unwrap_or_default();
        if lowered.contains("timeout") {
            return ErrorKind::TimeoutError;
        }
        if lowered.contains("dns") {
            return ErrorKind::DnsError;
        }
        return ErrorKind::NetworkError;
    }
    ErrorKind::UnknownError
}

/// A single classification rule.
///
/// A rule may constrain any subset of status code (exact or range), error
/// kind (case-insensitive equality) and error message (regex). All specified
/// constraints must hold for the rule to match. Rules are evaluated in
/// descending priority, ties broken by list order; the first matching
/// enabled rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Rule name, for logs and audit.
    pub name: String,

    /// Exact status code constraint.
    #[serde(default)]
    pub exact_status_code: Option<i32>,

    /// Inclusive lower bound on the status code.
    #[serde(default)]
    pub status_code_min: Option<i32>,

    /// Inclusive upper bound on the status code.
    #[serde(default)]
    pub status_code_max: Option<i32>,

    /// Error kind constraint, compared case-insensitively.
    #[serde(default)]
    pub error_type_pattern: Option<String>,

    /// Regex constraint on the error message.
    #[serde(default)]
    pub error_message_pattern: Option<String>,

    /// Decision applied when the rule matches.
    pub decision: ErrorDecision,

    /// Explanation template with `{statusCode}`, `{errorMessage}` and
    /// `{errorType}` placeholders.
    #[serde(default)]
    pub explanation_template: Option<String>,

    /// Evaluation priority; higher evaluates first.
    #[serde(default)]
    pub priority: i32,

    /// Disabled rules never match.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ClassificationRule {
    /// Renders the explanation template for a concrete failure.
    fn explanation(&self, status_code: i32, error_message: Option<&str>, kind: ErrorKind) -> String {
        match &self.explanation_template {
            Some(template) => template
                .replace("{statusCode}", &status_code.to_string())
                .replace("{errorMessage}", error_message.unwrap_or(""))
                .replace("{errorType}", &kind.to_string()),
            None => format!("Delivery failed with status {status_code}."),
        }
    }
}

/// A compiled rule ready for evaluation.
#[derive(Debug)]
struct CompiledRule {
    rule: ClassificationRule,
    message_pattern: Option<Regex>,
}

impl CompiledRule {
    fn matches(&self, status_code: i32, error_message: Option<&str>, kind: ErrorKind) -> bool {
        let rule = &self.rule;
        if !rule.enabled {
            return false;
        }
        if rule.exact_status_code.is_some_and(|exact| status_code != exact) {
            return false;
        }
        if rule.status_code_min.is_some_and(|min| status_code < min) {
            return false;
        }
        if rule.status_code_max.is_some_and(|max| status_code > max) {
            return false;
        }
        if let Some(pattern) = &rule.error_type_pattern {
            if !pattern.eq_ignore_ascii_case(&kind.to_string()) {
                return false;
            }
        }
        if let Some(regex) = &self.message_pattern {
            match error_message {
                Some(message) if regex.is_match(message) => {},
                _ => return false,
            }
        }
        true
    }
}

/// Result of a rule-engine evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    /// Chosen decision.
    pub decision: ErrorDecision,
    /// Rendered explanation for end-user surfacing.
    pub explanation: String,
    /// Name of the matched rule, or `None` for the default.
    pub rule_name: Option<String>,
}

/// Prioritised, configurable rule engine.
///
/// Deterministic: equal inputs always yield equal outputs.
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Builds an engine from a rule list, sorting by descending priority.
    ///
    /// Rules with invalid regex patterns are kept but can never match on
    /// their message constraint; the engine itself never fails.
    pub fn new(mut rules: Vec<ClassificationRule>) -> Self {
        // Stable sort keeps list order for equal priorities.
        rules.sort_by_key(|rule| std::cmp::Reverse(rule.priority));

        let rules = rules
            .into_iter()
            .map(|mut rule| {
                let message_pattern = match rule.error_message_pattern.as_deref() {
                    Some(pattern) => match Regex::new(pattern) {
                        Ok(regex) => Some(regex),
                        Err(e) => {
                            warn!(
                                rule = %rule.name,
                                error = %e,
                                "invalid message pattern, rule disabled"
                            );
                            rule.enabled = false;
                            None
                        },
                    },
                    None => None,
                };
                CompiledRule { rule, message_pattern }
            })
            .collect();

        Self { rules }
    }

    /// Builds an engine with the default rule table.
    pub fn with_defaults() -> Self {
        Self::new(default_rules())
    }

    /// Evaluates the rule list for a failed attempt.
    ///
    /// Unmatched failures default to RETRY, the conservative choice.
    pub fn classify(&self, status_code: i32, error_message: Option<&str>) -> RuleMatch {
        let kind = derive_error_kind(status_code, error_message);

        for compiled in &self.rules {
            if compiled.matches(status_code, error_message, kind) {
                debug!(rule = %compiled.rule.name, status_code, "classification rule matched");
                return RuleMatch {
                    decision: compiled.rule.decision,
                    explanation: compiled.rule.explanation(status_code, error_message, kind),
                    rule_name: Some(compiled.rule.name.clone()),
                };
            }
        }

        RuleMatch {
            decision: ErrorDecision::Retry,
            explanation: format!(
                "Delivery failed with status {status_code}. We'll retry automatically."
            ),
            rule_name: None,
        }
    }
}

/// Built-in rule table, overridable through configuration.
pub fn default_rules() -> Vec<ClassificationRule> {
    let rule = |name: &str, decision, template: &str, priority| ClassificationRule {
        name: name.to_string(),
        exact_status_code: None,
        status_code_min: None,
        status_code_max: None,
        error_type_pattern: None,
        error_message_pattern: None,
        decision,
        explanation_template: Some(template.to_string()),
        priority,
        enabled: true,
    };

    vec![
        ClassificationRule {
            exact_status_code: Some(429),
            ..rule(
                "rate-limit",
                ErrorDecision::Retry,
                "Your endpoint is rate-limiting requests. We'll retry after the rate limit window expires.",
                100,
            )
        },
        ClassificationRule {
            exact_status_code: Some(401),
            ..rule(
                "unauthorized",
                ErrorDecision::FailPermanent,
                "Your endpoint returned 401 - authentication credentials may be invalid. Please check your webhook authentication settings.",
                90,
            )
        },
        ClassificationRule {
            exact_status_code: Some(403),
            ..rule(
                "forbidden",
                ErrorDecision::FailPermanent,
                "Your endpoint returned 403 - access denied. Please verify that your webhook endpoint accepts requests from our service.",
                90,
            )
        },
        ClassificationRule {
            exact_status_code: Some(404),
            ..rule(
                "not-found",
                ErrorDecision::FailPermanent,
                "Your endpoint returned 404 - endpoint not found. Please verify that the webhook URL is correct and the endpoint exists.",
                90,
            )
        },
        ClassificationRule {
            exact_status_code: Some(400),
            ..rule(
                "bad-request",
                ErrorDecision::FailPermanent,
                "Your endpoint returned 400 - bad request. The request format may be incorrect. Please check your webhook endpoint's expected payload format.",
                90,
            )
        },
        ClassificationRule {
            exact_status_code: Some(451),
            ..rule(
                "legal-hold",
                ErrorDecision::PauseWebhook,
                "Your endpoint returned 451 - unavailable for legal reasons. Deliveries to this webhook are paused.",
                85,
            )
        },
        ClassificationRule {
            exact_status_code: Some(408),
            ..rule(
                "request-timeout",
                ErrorDecision::Retry,
                "Request timeout - your endpoint did not respond in time. We'll retry automatically.",
                80,
            )
        },
        ClassificationRule {
            status_code_max: Some(0),
            ..rule(
                "network-error",
                ErrorDecision::Retry,
                "Network error - connection failed. This may be temporary, and we'll retry automatically.",
                70,
            )
        },
        ClassificationRule {
            status_code_min: Some(500),
            status_code_max: Some(599),
            ..rule(
                "server-error",
                ErrorDecision::Retry,
                "Your endpoint returned {statusCode} - server error. This is likely temporary, and we'll retry automatically.",
                50,
            )
        },
        ClassificationRule {
            status_code_min: Some(400),
            status_code_max: Some(499),
            ..rule(
                "client-error",
                ErrorDecision::FailPermanent,
                "Your endpoint returned {statusCode} - client error. This error is not retryable. Please check your webhook configuration.",
                10,
            )
        },
    ]
}

/// Webhook-health context accompanying a classification request.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Retries scheduled so far for the failing event.
    pub retry_count: u32,
    /// Recent failure rate for the webhook, in `[0.0, 1.0]`.
    pub recent_failure_rate: f64,
    /// The failing webhook.
    pub webhook_id: WebhookId,
    /// Lifetime failed attempts.
    pub total_failures: u64,
    /// Lifetime successful deliveries.
    pub total_successes: u64,
    /// Consecutive failures in the current window.
    pub consecutive_failures: u32,
    /// Breaker state at classification time.
    pub circuit_state: CircuitState,
}

/// Final classification for a failed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Chosen decision.
    pub decision: ErrorDecision,
    /// Human-readable explanation for end-user surfacing.
    pub explanation: String,
    /// Derived error category.
    pub error_kind: ErrorKind,
    /// Whether the remote advisor supplied the decision.
    pub advisor_used: bool,
}

/// Two-tier classifier: remote advisor first, rule engine as fallback.
#[derive(Debug)]
pub struct ErrorClassifier {
    engine: RuleEngine,
    advisor: Option<AdvisorClient>,
    fallback_enabled: bool,
}

impl ErrorClassifier {
    /// Creates a classifier with the given rule engine and optional advisor.
    pub fn new(engine: RuleEngine, advisor: Option<AdvisorClient>, fallback_enabled: bool) -> Self {
        Self { engine, advisor, fallback_enabled }
    }

    /// Creates a rules-only classifier with the default rule table.
    pub fn rules_only() -> Self {
        Self::new(RuleEngine::with_defaults(), None, true)
    }

    /// Classifies a failed delivery outcome.
    ///
    /// The advisor is fail-open: transport errors, parse errors and
    /// low-confidence answers all silently fall back to the rule engine.
    pub async fn classify(
        &self,
        outcome: &DeliveryOutcome,
        context: &ErrorContext,
    ) -> Classification {
        let status_code = outcome.status_code();
        let error_message = outcome.error_message();
        let error_kind = derive_error_kind(status_code, error_message);

        if let Some(advisor) = &self.advisor {
            if let Some(verdict) =
                advisor.classify(status_code, error_kind, error_message, context).await
            {
                debug!(
                    decision = %verdict.decision,
                    confidence = verdict.confidence_score,
                    "adopting advisor decision"
                );
                return Classification {
                    decision: verdict.decision,
                    explanation: verdict.explanation,
                    error_kind,
                    advisor_used: true,
                };
            }
        }

        if self.fallback_enabled || self.advisor.is_none() {
            let matched = self.engine.classify(status_code, error_message);
            return Classification {
                decision: matched.decision,
                explanation: matched.explanation,
                error_kind,
                advisor_used: false,
            };
        }

        // Advisor unusable and rule fallback disabled: stay conservative.
        Classification {
            decision: ErrorDecision::Retry,
            explanation: format!(
                "Delivery failed with status {status_code}. We'll retry automatically."
            ),
            error_kind,
            advisor_used: false,
        }
    }
}
