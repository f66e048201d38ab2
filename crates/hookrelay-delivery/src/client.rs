//! HTTP client for webhook delivery with configurable timeouts.
//!
//! Performs one POST attempt per call and normalises every outcome, including
//! transport failures, into a [`DeliveryOutcome`] the worker can branch on.
//! This module never mutates webhook or event state.

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{DeliveryError, Result};

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Total request timeout covering response read.
    pub read_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            user_agent: "Hookrelay-Delivery/1.0".to_string(),
        }
    }
}

/// Outcome of a single delivery attempt.
///
/// A sum type rather than a status-code grab bag: the worker branches on the
/// variant, and the classifier consumes the flattened accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Endpoint accepted the delivery (2xx).
    Success {
        /// HTTP status code
        status_code: u16,
        /// Response body, truncated for storage
        body: String,
    },

    /// Endpoint rejected the delivery with a retryable status (5xx or 429).
    RetryableFailure {
        /// HTTP status code
        status_code: u16,
        /// Response body, truncated for storage
        body: String,
        /// Parsed `Retry-After` header, integer seconds only
        retry_after_seconds: Option<u32>,
    },

    /// Endpoint rejected the delivery with a non-retryable status (other 4xx).
    PermanentFailure {
        /// HTTP status code
        status_code: u16,
        /// Response body, truncated for storage
        body: String,
    },

    /// Request never produced an HTTP response: timeout, connection refused,
    /// DNS failure. Always retryable.
    TransportFailure {
        /// Cause description
        message: String,
    },
}

impl DeliveryOutcome {
    /// Whether the delivery was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether a failed delivery may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableFailure { .. } | Self::TransportFailure { .. })
    }

    /// HTTP status of the attempt. Zero encodes a transport failure.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Success { status_code, .. }
            | Self::RetryableFailure { status_code, .. }
            | Self::PermanentFailure { status_code, .. } => i32::from(*status_code),
            Self::TransportFailure { .. } => 0,
        }
    }

    /// Error message for failed attempts: response body for HTTP failures,
    /// cause string for transport failures.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::RetryableFailure { body, .. } | Self::PermanentFailure { body, .. } => {
                if body.is_empty() {
                    None
                } else {
                    Some(body)
                }
            },
            Self::TransportFailure { message } => Some(message),
        }
    }

    /// `Retry-After` hint, when the endpoint supplied one.
    pub fn retry_after_seconds(&self) -> Option<u32> {
        match self {
            Self::RetryableFailure { retry_after_seconds, .. } => *retry_after_seconds,
            _ => None,
        }
    }
}

/// HTTP client optimised for webhook delivery.
///
/// Uses connection pooling and configurable timeouts to deliver to many
/// endpoints concurrently.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// Delivers a payload to the given URL with a single POST.
    ///
    /// The payload is sent verbatim with `Content-Type: application/json`.
    /// Every outcome, including transport failures, is normalised into a
    /// [`DeliveryOutcome`]; this method does not return errors.
    pub async fn deliver(&self, url: &str, payload: Bytes) -> DeliveryOutcome {
        let span = info_span!("webhook_delivery", url = %url, bytes = payload.len());

        async move {
            debug!("starting delivery attempt");

            let response = match self
                .client
                .post(url)
                .header("content-type", "application/json")
                .body(payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let message = describe_transport_error(&e, self.config.read_timeout);
                    warn!(error = %message, "delivery attempt failed before a response");
                    return DeliveryOutcome::TransportFailure { message };
                },
            };

            let status_code = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            let body = read_body(response).await;

            debug!(status = status_code, "received response");

            match status_code {
                200..=299 => DeliveryOutcome::Success { status_code, body },
                429 | 500..=599 => DeliveryOutcome::RetryableFailure {
                    status_code,
                    body,
                    retry_after_seconds: retry_after,
                },
                _ => DeliveryOutcome::PermanentFailure { status_code, body },
            }
        }
        .instrument(span)
        .await
    }
}

/// Reads and truncates a response body for storage.
async fn read_body(response: reqwest::Response) -> String {
    const MAX_STORED_BODY: usize = 4 * 1024;

    match response.bytes().await {
        Ok(bytes) => {
            if bytes.len() > MAX_STORED_BODY {
                let truncated = String::from_utf8_lossy(&bytes[..MAX_STORED_BODY]);
                format!("{truncated}... (truncated)")
            } else {
                String::from_utf8_lossy(&bytes).into_owned()
            }
        },
        Err(e) => {
            warn!(error = %e, "failed to read response body");
            String::new()
        },
    }
}

/// Parses the `Retry-After` header as integer seconds.
///
/// HTTP-date values are treated as absent.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u32>().ok())
}

/// Builds a transport error description including the cause chain.
///
/// Keeping the chain matters: the classifier keys on substrings like
/// "timeout" and "dns" which only appear in nested sources.
fn describe_transport_error(error: &reqwest::Error, read_timeout: Duration) -> String {
    if error.is_timeout() {
        return format!("timeout after {}s waiting for endpoint", read_timeout.as_secs());
    }

    let mut parts = vec![error.to_string()];
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}
