//! Persistence contracts for webhooks, events and classification records.
//!
//! The delivery core consumes these traits; it never talks to a database
//! directly. The in-memory implementations back tests and single-process
//! deployments, and define the semantics a durable backend must preserve:
//! `save` is an upsert keyed by id, and classification records are
//! append-only.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::Result,
    models::{ErrorClassification, Event, EventId, EventStatus, Webhook, WebhookId},
};

/// Persistence contract for webhooks.
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    /// Looks up a webhook by id.
    async fn find_by_id(&self, id: WebhookId) -> Result<Option<Webhook>>;

    /// Inserts or replaces a webhook row.
    async fn save(&self, webhook: Webhook) -> Result<()>;

    /// Returns all registered webhooks.
    async fn find_all(&self) -> Result<Vec<Webhook>>;

    /// Looks up webhooks registered for a target URL.
    async fn find_by_url(&self, url: &str) -> Result<Vec<Webhook>>;
}

/// Persistence contract for events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Looks up an event by id.
    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>>;

    /// Inserts or replaces an event row.
    async fn save(&self, event: Event) -> Result<()>;

    /// Returns all events bound to a webhook.
    async fn find_by_webhook(&self, webhook_id: WebhookId) -> Result<Vec<Event>>;

    /// Returns all events currently in the given status.
    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>>;
}

/// Append-only persistence contract for error classification records.
#[async_trait]
pub trait ClassificationRepository: Send + Sync {
    /// Appends a classification record. Records are never updated.
    async fn save(&self, classification: ErrorClassification) -> Result<()>;

    /// Returns a webhook's classification records, newest first.
    async fn find_by_webhook_desc(&self, webhook_id: WebhookId)
        -> Result<Vec<ErrorClassification>>;
}

/// In-memory webhook store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryWebhookRepository {
    rows: Mutex<HashMap<WebhookId, Webhook>>,
}

impl InMemoryWebhookRepository {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRepository for InMemoryWebhookRepository {
    async fn find_by_id(&self, id: WebhookId) -> Result<Option<Webhook>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn save(&self, webhook: Webhook) -> Result<()> {
        self.rows.lock().await.insert(webhook.id, webhook);
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<Webhook>> {
        let mut all: Vec<Webhook> = self.rows.lock().await.values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }

    async fn find_by_url(&self, url: &str) -> Result<Vec<Webhook>> {
        let mut matching: Vec<Webhook> =
            self.rows.lock().await.values().filter(|w| w.url == url).cloned().collect();
        matching.sort_by_key(|w| w.created_at);
        Ok(matching)
    }
}

/// In-memory event store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    rows: Mutex<HashMap<EventId, Event>>,
}

impl InMemoryEventRepository {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.rows.lock().await.get(&id).cloned())
    }

    async fn save(&self, event: Event) -> Result<()> {
        self.rows.lock().await.insert(event.id, event);
        Ok(())
    }

    async fn find_by_webhook(&self, webhook_id: WebhookId) -> Result<Vec<Event>> {
        let mut matching: Vec<Event> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|e| e.webhook_id == webhook_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(matching)
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>> {
        let mut matching: Vec<Event> =
            self.rows.lock().await.values().filter(|e| e.status == status).cloned().collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(matching)
    }
}

/// In-memory append-only classification log.
#[derive(Debug, Default)]
pub struct InMemoryClassificationRepository {
    rows: Mutex<Vec<ErrorClassification>>,
}

impl InMemoryClassificationRepository {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records written, across all webhooks.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    /// Whether any record has been written.
    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl ClassificationRepository for InMemoryClassificationRepository {
    async fn save(&self, classification: ErrorClassification) -> Result<()> {
        self.rows.lock().await.push(classification);
        Ok(())
    }

    async fn find_by_webhook_desc(
        &self,
        webhook_id: WebhookId,
    ) -> Result<Vec<ErrorClassification>> {
        let rows = self.rows.lock().await;
        // Insertion order is chronological, so newest-first is a reverse scan.
        Ok(rows.iter().rev().filter(|c| c.webhook_id == webhook_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::{ErrorDecision, ErrorKind};

    #[tokio::test]
    async fn webhook_save_and_find_round_trip() {
        let repo = InMemoryWebhookRepository::new();
        let webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());
        let id = webhook.id;

        repo.save(webhook).await.expect("save should succeed");

        let found = repo.find_by_id(id).await.expect("lookup should succeed");
        assert_eq!(found.map(|w| w.id), Some(id));
        assert!(repo.find_by_id(WebhookId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn webhook_save_replaces_existing_row() {
        let repo = InMemoryWebhookRepository::new();
        let mut webhook = Webhook::new("https://example.com/hook".into(), None, Utc::now());
        let id = webhook.id;
        repo.save(webhook.clone()).await.unwrap();

        webhook.total_successes = 7;
        repo.save(webhook).await.unwrap();

        let found = repo.find_by_id(id).await.unwrap().expect("webhook should exist");
        assert_eq!(found.total_successes, 7);
        assert_eq!(repo.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn events_filtered_by_status_and_webhook() {
        let repo = InMemoryEventRepository::new();
        let webhook_id = WebhookId::new();
        let now = Utc::now();

        let mut pending = Event::new(webhook_id, b"{}".to_vec(), now);
        let mut failed = Event::new(webhook_id, b"{}".to_vec(), now);
        failed.status = EventStatus::Failure;
        let other = Event::new(WebhookId::new(), b"{}".to_vec(), now);

        repo.save(pending.clone()).await.unwrap();
        repo.save(failed.clone()).await.unwrap();
        repo.save(other).await.unwrap();

        assert_eq!(repo.find_by_webhook(webhook_id).await.unwrap().len(), 2);
        let pending_rows = repo.find_by_status(EventStatus::Pending).await.unwrap();
        assert_eq!(pending_rows.len(), 2); // pending + other

        pending.status = EventStatus::Success;
        repo.save(pending).await.unwrap();
        failed.status = EventStatus::Failure;
        repo.save(failed).await.unwrap();
        assert_eq!(repo.find_by_status(EventStatus::Pending).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn classifications_returned_newest_first() {
        let repo = InMemoryClassificationRepository::new();
        let webhook_id = WebhookId::new();
        let base = Utc::now();

        for (i, status) in [500, 502, 503].iter().enumerate() {
            repo.save(ErrorClassification {
                id: Uuid::new_v4(),
                event_id: EventId::new(),
                webhook_id,
                http_status: *status,
                error_message: None,
                decision: ErrorDecision::Retry,
                explanation: format!("attempt {i}"),
                error_kind: ErrorKind::ServerError,
                retry_after_seconds: None,
                created_at: base + chrono::Duration::seconds(i as i64),
            })
            .await
            .unwrap();
        }

        let rows = repo.find_by_webhook_desc(webhook_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].http_status, 503);
        assert_eq!(rows[2].http_status, 500);

        assert!(repo.find_by_webhook_desc(WebhookId::new()).await.unwrap().is_empty());
    }
}
