//! Producer-facing operations: registration, submission and resume.
//!
//! The in-process surface a REST layer would call. Events are persisted
//! before they are handed to the queue, so an accepted event survives a
//! crash between submission and delivery.

use std::sync::Arc;

use hookrelay_core::{
    ClassificationRepository, Clock, CoreError, Event, EventId, EventQueue, EventRepository,
    EventStatus, Result, Webhook, WebhookId, WebhookRepository,
};
use tracing::info;

use crate::diagnostics;

/// Registration, submission and operator controls over webhooks and events.
pub struct IngestService {
    webhooks: Arc<dyn WebhookRepository>,
    events: Arc<dyn EventRepository>,
    classifications: Arc<dyn ClassificationRepository>,
    queue: Arc<dyn EventQueue>,
    clock: Arc<dyn Clock>,
}

impl IngestService {
    /// Creates the service over the given collaborators.
    pub fn new(
        webhooks: Arc<dyn WebhookRepository>,
        events: Arc<dyn EventRepository>,
        classifications: Arc<dyn ClassificationRepository>,
        queue: Arc<dyn EventQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { webhooks, events, classifications, queue, clock }
    }

    /// Registers a webhook for a target URL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` unless the URL uses http or https.
    pub async fn register_webhook(
        &self,
        url: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Webhook> {
        validate_url(url)?;

        let webhook = Webhook::new(url.to_string(), metadata, self.clock.now());
        self.webhooks.save(webhook.clone()).await?;

        info!(webhook_id = %webhook.id, url = %webhook.url, "webhook registered");
        Ok(webhook)
    }

    /// Accepts an event for delivery: persists it, then enqueues it.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the webhook does not exist.
    pub async fn submit_event(&self, webhook_id: WebhookId, payload: Vec<u8>) -> Result<Event> {
        if self.webhooks.find_by_id(webhook_id).await?.is_none() {
            return Err(CoreError::not_found(format!("webhook {webhook_id}")));
        }

        let event = Event::new(webhook_id, payload, self.clock.now());
        self.events.save(event.clone()).await?;
        self.queue.enqueue(event.clone());

        info!(event_id = %event.id, webhook_id = %webhook_id, "event accepted");
        Ok(event)
    }

    /// Resumes a paused event: back to pending and onto the queue.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown events and
    /// `CoreError::InvalidState` when the event is not paused.
    pub async fn resume_event(&self, event_id: EventId) -> Result<Event> {
        let Some(mut event) = self.events.find_by_id(event_id).await? else {
            return Err(CoreError::not_found(format!("event {event_id}")));
        };

        if event.status != EventStatus::Paused {
            return Err(CoreError::invalid_state(format!(
                "event {event_id} is not paused (status: {})",
                event.status
            )));
        }

        event.status = EventStatus::Pending;
        event.updated_at = self.clock.now();
        self.events.save(event.clone()).await?;
        self.queue.enqueue(event.clone());

        info!(event_id = %event_id, "event resumed");
        Ok(event)
    }

    /// Lifts a webhook's pause window and resumes all of its paused events.
    ///
    /// Returns the number of events resumed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the webhook does not exist.
    pub async fn resume_webhook(&self, webhook_id: WebhookId) -> Result<usize> {
        let Some(mut webhook) = self.webhooks.find_by_id(webhook_id).await? else {
            return Err(CoreError::not_found(format!("webhook {webhook_id}")));
        };

        webhook.paused_until = None;
        webhook.updated_at = self.clock.now();
        self.webhooks.save(webhook).await?;

        let mut resumed = 0;
        for mut event in self.events.find_by_webhook(webhook_id).await? {
            if event.status == EventStatus::Paused {
                event.status = EventStatus::Pending;
                event.updated_at = self.clock.now();
                self.events.save(event.clone()).await?;
                self.queue.enqueue(event);
                resumed += 1;
            }
        }

        info!(webhook_id = %webhook_id, resumed, "webhook resumed");
        Ok(resumed)
    }

    /// Sets the operator kill-switch for a webhook.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the webhook does not exist.
    pub async fn set_disabled(&self, webhook_id: WebhookId, disabled: bool) -> Result<Webhook> {
        let Some(mut webhook) = self.webhooks.find_by_id(webhook_id).await? else {
            return Err(CoreError::not_found(format!("webhook {webhook_id}")));
        };

        webhook.is_disabled = disabled;
        webhook.updated_at = self.clock.now();
        self.webhooks.save(webhook.clone()).await?;

        info!(webhook_id = %webhook_id, disabled, "webhook disable flag updated");
        Ok(webhook)
    }

    /// Lists all events bound to a webhook.
    ///
    /// # Errors
    ///
    /// Propagates repository failures.
    pub async fn events_for(&self, webhook_id: WebhookId) -> Result<Vec<Event>> {
        self.events.find_by_webhook(webhook_id).await
    }

    /// Renders the health summary and recommendations for a webhook.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if the webhook does not exist.
    pub async fn health_report(&self, webhook_id: WebhookId) -> Result<String> {
        let Some(webhook) = self.webhooks.find_by_id(webhook_id).await? else {
            return Err(CoreError::not_found(format!("webhook {webhook_id}")));
        };

        let recent = self.classifications.find_by_webhook_desc(webhook_id).await?;
        let summary = diagnostics::health_summary(&webhook, &recent, self.clock.now());
        let advice = diagnostics::recommendations(&webhook, &recent);
        Ok(format!("{summary}\n{advice}"))
    }
}

/// Accepts only http and https URLs with a host part.
fn validate_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| CoreError::invalid_input("webhook URL must use http or https"))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(CoreError::invalid_input("webhook URL is missing a host"));
    }
    Ok(())
}
