//! Human-readable explanations and endpoint health summaries.
//!
//! Pure functions over classifier output, webhook counters and recent
//! classification records; no storage access and no side effects.

use chrono::{DateTime, Utc};
use hookrelay_core::{CircuitState, ErrorClassification, ErrorDecision, ErrorKind, Webhook};

/// Number of recent classifications the recommendation analysis considers.
const ANALYSIS_WINDOW: usize = 10;

/// Recent error lines included in a health summary.
const SUMMARY_ERROR_LINES: usize = 5;

/// Generates a human-readable explanation for a delivery failure.
///
/// Keyed primarily on the HTTP status; the decision supplies the trailing
/// action text for statuses without a dedicated message.
pub fn failure_explanation(
    status_code: i32,
    error_message: Option<&str>,
    decision: ErrorDecision,
) -> String {
    if status_code == 429 {
        return "Your endpoint is rate-limiting requests. We'll retry after the rate limit window expires.".to_string();
    }

    if (500..600).contains(&status_code) {
        return format!(
            "Your endpoint returned {status_code} - server error. This is likely temporary, and we'll retry automatically."
        );
    }

    match status_code {
        401 => return "Your endpoint returned 401 - authentication credentials may be invalid. Please check your webhook authentication settings.".to_string(),
        403 => return "Your endpoint returned 403 - access denied. Please verify that your webhook endpoint accepts requests from our service.".to_string(),
        404 => return "Your endpoint returned 404 - endpoint not found. Please verify that the webhook URL is correct and the endpoint exists.".to_string(),
        400 => return "Your endpoint returned 400 - bad request. The request format may be incorrect. Please check your webhook endpoint's expected payload format.".to_string(),
        _ => {},
    }

    if status_code <= 0 {
        let lowered = error_message.map(str::to_lowercase).unwrap_or_default();
        if lowered.contains("timeout") {
            return "Connection timeout - your endpoint did not respond in time. We'll retry automatically.".to_string();
        }
        if lowered.contains("dns") {
            return "DNS resolution failed - the webhook URL cannot be resolved. Please verify the URL is correct.".to_string();
        }
        return "Network error - connection failed. This may be temporary, and we'll retry automatically.".to_string();
    }

    format!("Delivery failed with status {status_code}. {}", decision_explanation(decision))
}

/// Action text for a classification decision.
fn decision_explanation(decision: ErrorDecision) -> &'static str {
    match decision {
        ErrorDecision::Retry => "We'll retry the delivery automatically.",
        ErrorDecision::FailPermanent => {
            "This error is not retryable. Please check your webhook configuration."
        },
        ErrorDecision::PauseWebhook => {
            "Webhook has been temporarily paused due to repeated failures. Please review and resume when ready."
        },
        ErrorDecision::Escalate => "This issue requires attention. Our team has been notified.",
    }
}

/// Renders a per-webhook health summary.
///
/// Includes lifetime counters, success rate, breaker state and up to the
/// last five error lines from `recent` (expected newest first).
pub fn health_summary(
    webhook: &Webhook,
    recent: &[ErrorClassification],
    now: DateTime<Utc>,
) -> String {
    let mut summary = String::new();

    summary.push_str(&format!("Webhook health summary for {}:\n", webhook.url));
    summary.push_str(&format!("  Total successes: {}\n", webhook.total_successes));
    summary.push_str(&format!("  Total failures: {}\n", webhook.total_failures));

    let attempts = webhook.total_successes + webhook.total_failures;
    if attempts > 0 {
        let success_rate = (1.0 - webhook.failure_rate()) * 100.0;
        summary.push_str(&format!("  Success rate: {success_rate:.1}%\n"));
    }

    summary.push_str(&format!("  Circuit breaker state: {}\n", webhook.circuit_state));
    summary.push_str(&format!("  Consecutive failures: {}\n", webhook.consecutive_failures));

    if let Some(paused_until) = webhook.paused_until {
        if paused_until > now {
            summary.push_str(&format!("  Paused until: {paused_until}\n"));
        }
    }
    if webhook.is_disabled {
        summary.push_str("  Disabled by operator\n");
    }

    if !recent.is_empty() {
        summary.push_str("\nRecent errors:\n");
        for classification in recent.iter().take(SUMMARY_ERROR_LINES) {
            summary.push_str(&format!(
                "  - [{}] {}: {}\n",
                classification.created_at, classification.error_kind, classification.explanation
            ));
        }
    }

    summary
}

/// Analyses recent error patterns and produces recommendations.
///
/// Simple counts over the last ten classifications: repeated auth errors
/// suggest a credential review, repeated rate limits suggest subscriber-side
/// backoff, a burst of server errors suggests a subscriber health check, and
/// an open breaker gets a temporary-disable note.
pub fn recommendations(webhook: &Webhook, recent: &[ErrorClassification]) -> String {
    if recent.is_empty() {
        return "No recent errors to analyze.".to_string();
    }

    let window = &recent[..recent.len().min(ANALYSIS_WINDOW)];

    let auth_errors = window.iter().filter(|c| c.error_kind == ErrorKind::AuthError).count();
    let rate_limits = window.iter().filter(|c| c.error_kind == ErrorKind::RateLimit).count();
    let server_errors = window.iter().filter(|c| c.http_status >= 500).count();

    let mut lines = Vec::new();

    if auth_errors >= 3 {
        lines.push(
            "  - Multiple authentication errors detected. Please verify your webhook credentials.",
        );
    }
    if rate_limits >= 2 {
        lines.push(
            "  - Frequent rate limiting. Consider implementing backoff on your endpoint.",
        );
    }
    if server_errors >= 5 {
        lines.push(
            "  - High number of server errors. Your endpoint may be experiencing issues.",
        );
    }
    if webhook.circuit_state == CircuitState::Open {
        lines.push(
            "  - Circuit breaker is OPEN. Deliveries are temporarily disabled due to repeated failures.",
        );
    }

    if lines.is_empty() {
        lines.push("  - No specific recommendations at this time.");
    }

    let mut out = String::from("Recommendations:\n");
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use hookrelay_core::{EventId, WebhookId};
    use uuid::Uuid;

    use super::*;

    fn classification(kind: ErrorKind, status: i32) -> ErrorClassification {
        ErrorClassification {
            id: Uuid::new_v4(),
            event_id: EventId::new(),
            webhook_id: WebhookId::new(),
            http_status: status,
            error_message: None,
            decision: ErrorDecision::Retry,
            explanation: "explanation".to_string(),
            error_kind: kind,
            retry_after_seconds: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_specific_explanations() {
        let text = failure_explanation(429, None, ErrorDecision::Retry);
        assert!(text.contains("rate-limiting"));

        let text = failure_explanation(503, None, ErrorDecision::Retry);
        assert!(text.contains("503"));
        assert!(text.contains("server error"));

        let text = failure_explanation(404, None, ErrorDecision::FailPermanent);
        assert!(text.contains("endpoint not found"));

        let text = failure_explanation(0, Some("timeout after 10s"), ErrorDecision::Retry);
        assert!(text.contains("Connection timeout"));

        let text = failure_explanation(0, Some("dns lookup failed"), ErrorDecision::Retry);
        assert!(text.contains("DNS resolution failed"));
    }

    #[test]
    fn unknown_status_uses_decision_text() {
        let text = failure_explanation(302, None, ErrorDecision::Escalate);
        assert!(text.contains("302"));
        assert!(text.contains("requires attention"));
    }

    #[test]
    fn summary_includes_counters_and_recent_errors() {
        let now = Utc::now();
        let mut webhook = Webhook::new("https://example.com/hook".into(), None, now);
        webhook.total_successes = 9;
        webhook.total_failures = 1;

        let recent = vec![classification(ErrorKind::ServerError, 500)];
        let summary = health_summary(&webhook, &recent, now);

        assert!(summary.contains("https://example.com/hook"));
        assert!(summary.contains("Success rate: 90.0%"));
        assert!(summary.contains("Recent errors:"));
        assert!(summary.contains("SERVER_ERROR"));
    }

    #[test]
    fn auth_error_pattern_suggests_credential_review() {
        let webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());
        let recent: Vec<_> = (0..3).map(|_| classification(ErrorKind::AuthError, 401)).collect();

        let text = recommendations(&webhook, &recent);
        assert!(text.contains("verify your webhook credentials"));
    }

    #[test]
    fn rate_limit_pattern_suggests_backoff() {
        let webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());
        let recent: Vec<_> = (0..2).map(|_| classification(ErrorKind::RateLimit, 429)).collect();

        let text = recommendations(&webhook, &recent);
        assert!(text.contains("Frequent rate limiting"));
    }

    #[test]
    fn server_error_burst_suggests_health_check() {
        let webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());
        let recent: Vec<_> = (0..5).map(|_| classification(ErrorKind::ServerError, 502)).collect();

        let text = recommendations(&webhook, &recent);
        assert!(text.contains("experiencing issues"));
    }

    #[test]
    fn open_breaker_is_reported() {
        let mut webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());
        webhook.circuit_state = CircuitState::Open;
        let recent = vec![classification(ErrorKind::ServerError, 500)];

        let text = recommendations(&webhook, &recent);
        assert!(text.contains("Circuit breaker is OPEN"));
    }

    #[test]
    fn analysis_only_considers_the_last_ten() {
        let webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());

        // Ten benign entries first (newest first), auth errors beyond the
        // window must not trigger the credential recommendation.
        let mut recent: Vec<_> =
            (0..10).map(|_| classification(ErrorKind::NetworkError, 0)).collect();
        recent.extend((0..3).map(|_| classification(ErrorKind::AuthError, 401)));

        let text = recommendations(&webhook, &recent);
        assert!(!text.contains("credentials"));
        assert!(text.contains("No specific recommendations"));
    }

    #[test]
    fn no_errors_no_analysis() {
        let webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());
        assert_eq!(recommendations(&webhook, &[]), "No recent errors to analyze.");
    }
}
