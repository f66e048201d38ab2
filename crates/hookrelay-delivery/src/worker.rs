//! Delivery engine: dispatcher, worker lanes and the per-event state machine.
//!
//! A single dispatcher polls the event queue and hands each event to one of
//! `worker_threads` lanes. A lane drives the event through the full
//! procedure: gate on webhook suspension and the circuit breaker, persist
//! PROCESSING before the attempt, deliver, then record the outcome through
//! the classifier, breaker and retry policy. Retry sleeps run on the lane
//! that scheduled them.

use std::{collections::HashMap, sync::Arc, time::Duration};

use hookrelay_core::{
    ClassificationRepository, Clock, ErrorClassification, ErrorDecision, Event, EventQueue,
    EventRepository, EventStatus, WebhookId, WebhookRepository,
};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot},
    classifier::{Classification, ErrorClassifier, ErrorContext},
    client::{ClientConfig, DeliveryClient, DeliveryOutcome},
    error::{DeliveryError, Result},
    retry::RetryPolicy,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery lanes.
    pub worker_threads: usize,

    /// How long the dispatcher sleeps when the queue is empty.
    pub poll_interval: Duration,

    /// How long a PAUSE_WEBHOOK decision suspends deliveries.
    pub pause_window: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Retry policy for retryable failures.
    pub retry_policy: RetryPolicy,

    /// Circuit breaker configuration.
    pub circuit_config: CircuitBreakerConfig,

    /// Maximum time to wait for in-flight deliveries on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_threads: 5,
            poll_interval: Duration::from_millis(100),
            pause_window: Duration::from_secs(3600),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            circuit_config: CircuitBreakerConfig::default(),
            shutdown_timeout: Duration::from_secs(15),
        }
    }
}

/// Counters for delivery engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of configured delivery lanes while running.
    pub active_workers: usize,
    /// Events taken off the queue since startup.
    pub events_processed: u64,
    /// Successful deliveries.
    pub successful_deliveries: u64,
    /// Retries scheduled after retryable failures.
    pub retries_scheduled: u64,
    /// Events that ended in permanent failure.
    pub permanent_failures: u64,
    /// Events parked in the paused state.
    pub paused_events: u64,
    /// Events currently inside a delivery lane.
    pub in_flight: u64,
}

/// Registry of per-webhook locks.
///
/// Webhook rows are a contention point: several lanes may update breaker
/// fields and counters of the same webhook concurrently. Every
/// load-modify-persist sequence on a webhook row runs under its lock, which
/// makes those updates serialisable without serialising the HTTP attempts
/// themselves.
#[derive(Debug, Default)]
struct WebhookLocks {
    locks: Mutex<HashMap<WebhookId, Arc<Mutex<()>>>>,
}

impl WebhookLocks {
    async fn for_webhook(&self, id: WebhookId) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(id).or_default().clone()
    }
}

/// Worker shared by all delivery lanes.
pub struct DeliveryWorker {
    webhooks: Arc<dyn WebhookRepository>,
    events: Arc<dyn EventRepository>,
    classifications: Arc<dyn ClassificationRepository>,
    queue: Arc<dyn EventQueue>,
    client: DeliveryClient,
    classifier: Arc<ErrorClassifier>,
    breaker: CircuitBreaker,
    config: DeliveryConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation: CancellationToken,
    clock: Arc<dyn Clock>,
    webhook_locks: WebhookLocks,
}

impl DeliveryWorker {
    /// Creates a worker over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built from the
    /// configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        webhooks: Arc<dyn WebhookRepository>,
        events: Arc<dyn EventRepository>,
        classifications: Arc<dyn ClassificationRepository>,
        queue: Arc<dyn EventQueue>,
        classifier: Arc<ErrorClassifier>,
        config: DeliveryConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.client_config.clone())?;
        let breaker = CircuitBreaker::new(config.circuit_config.clone());

        Ok(Self {
            webhooks,
            events,
            classifications,
            queue,
            client,
            classifier,
            breaker,
            config,
            stats,
            cancellation,
            clock,
            webhook_locks: WebhookLocks::default(),
        })
    }

    /// Processes one dequeued event, converting unexpected errors into a
    /// terminal failure.
    pub async fn process(&self, queued: Event) {
        let event_id = queued.id;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight += 1;
            stats.events_processed += 1;
        }

        let result = self.run_event(queued).await;

        self.stats.write().await.in_flight -= 1;

        if let Err(ref err) = result {
            error!(event_id = %event_id, error = %err, "event processing failed");
            if let Ok(Some(mut event)) = self.events.find_by_id(event_id).await {
                if !event.status.is_terminal() {
                    event.status = EventStatus::Failure;
                    event.last_error = Some(format!("Unexpected error: {err}"));
                    event.updated_at = self.clock.now();
                    if let Err(save_err) = self.events.save(event).await {
                        error!(event_id = %event_id, error = %save_err, "failed to record failure");
                    } else {
                        self.stats.write().await.permanent_failures += 1;
                    }
                }
            }
        }
    }

    /// Drives a single event through the delivery state machine.
    async fn run_event(&self, queued: Event) -> Result<()> {
        // Re-read from the repository: the queued copy may be stale after a
        // crash-requeue, and terminal events must never be reprocessed.
        let Some(mut event) = self.events.find_by_id(queued.id).await? else {
            warn!(event_id = %queued.id, "dequeued event no longer exists");
            return Ok(());
        };
        if event.status.is_terminal() {
            debug!(event_id = %event.id, status = %event.status, "skipping terminal event");
            return Ok(());
        }

        let lock = self.webhook_locks.for_webhook(event.webhook_id).await;

        // Gate and mark PROCESSING under the webhook lock.
        let url = {
            let _guard = lock.lock().await;
            let now = self.clock.now();

            let Some(mut webhook) = self.webhooks.find_by_id(event.webhook_id).await? else {
                drop(_guard);
                self.fail_event(&mut event, "Webhook not found".to_string()).await?;
                return Ok(());
            };

            if webhook.is_suspended(now) {
                drop(_guard);
                self.pause_event(&mut event, "Webhook is paused or disabled".to_string()).await?;
                return Ok(());
            }

            let mut snapshot = CircuitSnapshot::of(&webhook);
            let allowed = self.breaker.allow_request(&mut snapshot, now);

            // An OPEN -> HALF_OPEN transition (or a consumed probe slot) must
            // be durable even when the request is denied.
            if snapshot != CircuitSnapshot::of(&webhook) {
                snapshot.store(&mut webhook);
                webhook.updated_at = now;
                self.webhooks.save(webhook.clone()).await?;
            }

            if !allowed {
                debug!(
                    event_id = %event.id,
                    webhook_id = %webhook.id,
                    "circuit breaker denied delivery"
                );
                event.status = EventStatus::RetryPending;
                event.updated_at = now;
                self.events.save(event.clone()).await?;

                let delay = self
                    .breaker
                    .retry_at(&snapshot)
                    .and_then(|at| (at - now).to_std().ok())
                    .unwrap_or(self.config.poll_interval);

                drop(_guard);
                self.requeue_after(event, delay).await;
                return Ok(());
            }

            // Persist PROCESSING before any bytes go out on the wire.
            event.status = EventStatus::Processing;
            event.updated_at = now;
            self.events.save(event.clone()).await?;

            webhook.url
        };

        let outcome = self.client.deliver(&url, event.payload_bytes()).await;

        if outcome.is_success() {
            self.record_success(&lock, &mut event).await?;
            return Ok(());
        }

        self.record_failure(&lock, &mut event, &outcome).await
    }

    /// Success path: breaker bookkeeping, counters, terminal SUCCESS.
    async fn record_success(&self, lock: &Arc<Mutex<()>>, event: &mut Event) -> Result<()> {
        {
            let _guard = lock.lock().await;
            let now = self.clock.now();
            if let Some(mut webhook) = self.webhooks.find_by_id(event.webhook_id).await? {
                let mut snapshot = CircuitSnapshot::of(&webhook);
                self.breaker.record_success(&mut snapshot);
                snapshot.store(&mut webhook);
                webhook.total_successes += 1;
                webhook.updated_at = now;
                self.webhooks.save(webhook).await?;
            }
        }

        self.stats.write().await.successful_deliveries += 1;
        event.status = EventStatus::Success;
        event.last_error = None;
        event.updated_at = self.clock.now();
        self.events.save(event.clone()).await?;

        info!(
            event_id = %event.id,
            webhook_id = %event.webhook_id,
            retry_count = event.retry_count,
            "webhook delivered"
        );
        Ok(())
    }

    /// Failure path: classify, audit, breaker bookkeeping, apply decision.
    async fn record_failure(
        &self,
        lock: &Arc<Mutex<()>>,
        event: &mut Event,
        outcome: &DeliveryOutcome,
    ) -> Result<()> {
        // Health context is read under the lock; the advisor call happens
        // outside it so a slow advisor cannot stall other lanes.
        let context = {
            let _guard = lock.lock().await;
            let webhook = self.webhooks.find_by_id(event.webhook_id).await?;
            webhook.map(|w| ErrorContext {
                retry_count: event.retry_count,
                recent_failure_rate: w.failure_rate(),
                webhook_id: w.id,
                total_failures: w.total_failures,
                total_successes: w.total_successes,
                consecutive_failures: w.consecutive_failures,
                circuit_state: w.circuit_state,
            })
        };
        let Some(context) = context else {
            self.fail_event(event, "Webhook not found".to_string()).await?;
            return Ok(());
        };

        let classification = self.classifier.classify(outcome, &context).await;

        self.append_classification(event, outcome, &classification).await?;

        {
            let _guard = lock.lock().await;
            let now = self.clock.now();
            if let Some(mut webhook) = self.webhooks.find_by_id(event.webhook_id).await? {
                let mut snapshot = CircuitSnapshot::of(&webhook);
                self.breaker.record_failure(&mut snapshot, now);
                snapshot.store(&mut webhook);
                webhook.total_failures += 1;
                webhook.last_failure_at = Some(now);
                if classification.decision == ErrorDecision::PauseWebhook {
                    webhook.paused_until = Some(now + pause_window_chrono(self.config.pause_window));
                    warn!(
                        webhook_id = %webhook.id,
                        paused_until = ?webhook.paused_until,
                        "pausing webhook deliveries"
                    );
                }
                webhook.updated_at = now;
                self.webhooks.save(webhook).await?;
            }
        }

        self.apply_decision(event, outcome, classification).await
    }

    /// Applies the classifier's decision to the event.
    async fn apply_decision(
        &self,
        event: &mut Event,
        outcome: &DeliveryOutcome,
        classification: Classification,
    ) -> Result<()> {
        match classification.decision {
            ErrorDecision::Retry => {
                if self.config.retry_policy.should_retry(event.retry_count) {
                    let attempt = event.retry_count;
                    event.retry_count += 1;
                    event.status = EventStatus::RetryPending;
                    event.last_error = Some(classification.explanation.clone());
                    event.updated_at = self.clock.now();
                    self.events.save(event.clone()).await?;
                    self.stats.write().await.retries_scheduled += 1;

                    let delay = self
                        .config
                        .retry_policy
                        .delay_with_hint(attempt, outcome.retry_after_seconds());

                    warn!(
                        event_id = %event.id,
                        retry_count = event.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        status = outcome.status_code(),
                        "delivery failed, retry scheduled"
                    );
                    self.requeue_after(event.clone(), delay).await;
                    Ok(())
                } else {
                    self.fail_event(event, classification.explanation).await
                }
            },
            ErrorDecision::FailPermanent => self.fail_event(event, classification.explanation).await,
            ErrorDecision::PauseWebhook => {
                self.pause_event(event, classification.explanation).await
            },
            ErrorDecision::Escalate => {
                // Alerting integration lives outside the delivery core.
                error!(
                    event_id = %event.id,
                    webhook_id = %event.webhook_id,
                    status = outcome.status_code(),
                    "delivery failure escalated"
                );
                self.fail_event(event, format!("escalated: {}", classification.explanation)).await
            },
        }
    }

    /// Appends the audit row for a failed attempt.
    async fn append_classification(
        &self,
        event: &Event,
        outcome: &DeliveryOutcome,
        classification: &Classification,
    ) -> Result<()> {
        self.classifications
            .save(ErrorClassification {
                id: Uuid::new_v4(),
                event_id: event.id,
                webhook_id: event.webhook_id,
                http_status: outcome.status_code(),
                error_message: outcome.error_message().map(str::to_string),
                decision: classification.decision,
                explanation: classification.explanation.clone(),
                error_kind: classification.error_kind,
                retry_after_seconds: outcome.retry_after_seconds(),
                created_at: self.clock.now(),
            })
            .await?;
        Ok(())
    }

    /// Marks an event permanently failed.
    async fn fail_event(&self, event: &mut Event, explanation: String) -> Result<()> {
        event.status = EventStatus::Failure;
        event.last_error = Some(explanation);
        event.updated_at = self.clock.now();
        self.events.save(event.clone()).await?;
        self.stats.write().await.permanent_failures += 1;

        error!(
            event_id = %event.id,
            webhook_id = %event.webhook_id,
            retry_count = event.retry_count,
            error = event.last_error.as_deref().unwrap_or(""),
            "event permanently failed"
        );
        Ok(())
    }

    /// Parks an event in the paused state.
    async fn pause_event(&self, event: &mut Event, explanation: String) -> Result<()> {
        event.status = EventStatus::Paused;
        event.last_error = Some(explanation);
        event.updated_at = self.clock.now();
        self.events.save(event.clone()).await?;
        self.stats.write().await.paused_events += 1;

        info!(event_id = %event.id, webhook_id = %event.webhook_id, "event paused");
        Ok(())
    }

    /// Sleeps for the backoff delay, then re-enqueues the event.
    ///
    /// Runs on the lane that scheduled the retry, so the sleep consumes that
    /// lane for its whole duration. On shutdown the sleep is abandoned; the
    /// event stays RETRY_PENDING and is recovered at next startup.
    async fn requeue_after(&self, mut event: Event, delay: Duration) {
        tokio::select! {
            () = self.clock.sleep(delay) => {},
            () = self.cancellation.cancelled() => {
                debug!(event_id = %event.id, "retry sleep abandoned for shutdown");
                return;
            },
        }

        event.status = EventStatus::Pending;
        event.updated_at = self.clock.now();
        if let Err(err) = self.events.save(event.clone()).await {
            error!(event_id = %event.id, error = %err, "failed to persist re-enqueue");
            return;
        }
        self.queue.enqueue(event.clone());
        debug!(event_id = %event.id, retry_count = event.retry_count, "event re-enqueued");
    }

    /// Re-enqueues events interrupted by a previous shutdown or crash.
    async fn recover_inflight(&self) -> Result<usize> {
        let mut recovered = 0;
        for status in
            [EventStatus::Pending, EventStatus::RetryPending, EventStatus::Processing]
        {
            for mut event in self.events.find_by_status(status).await? {
                event.status = EventStatus::Pending;
                event.updated_at = self.clock.now();
                self.events.save(event.clone()).await?;
                self.queue.enqueue(event);
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "re-enqueued interrupted events");
        }
        Ok(recovered)
    }
}

fn pause_window_chrono(window: Duration) -> chrono::Duration {
    chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(1))
}

/// Supervisor owning the dispatcher and delivery lanes.
///
/// Construct after the repositories and queue, call [`DeliveryEngine::start`]
/// to begin processing and [`DeliveryEngine::shutdown`] for a deterministic
/// drain-then-cancel stop.
pub struct DeliveryEngine {
    worker: Arc<DeliveryWorker>,
    config: DeliveryConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation: CancellationToken,
    tracker: TaskTracker,
    dispatcher: Option<tokio::task::JoinHandle<()>>,
}

impl DeliveryEngine {
    /// Creates a delivery engine over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be initialised.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DeliveryConfig,
        webhooks: Arc<dyn WebhookRepository>,
        events: Arc<dyn EventRepository>,
        classifications: Arc<dyn ClassificationRepository>,
        queue: Arc<dyn EventQueue>,
        classifier: Arc<ErrorClassifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let stats = Arc::new(RwLock::new(EngineStats::default()));
        let cancellation = CancellationToken::new();

        let worker = Arc::new(DeliveryWorker::new(
            webhooks,
            events,
            classifications,
            queue,
            classifier,
            config.clone(),
            stats.clone(),
            cancellation.clone(),
            clock,
        )?);

        Ok(Self {
            worker,
            config,
            stats,
            cancellation,
            tracker: TaskTracker::new(),
            dispatcher: None,
        })
    }

    /// Recovers interrupted events and spawns the dispatcher.
    ///
    /// Returns immediately; use [`DeliveryEngine::shutdown`] to stop.
    ///
    /// # Errors
    ///
    /// Returns error if startup recovery fails against the repositories.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_threads = self.config.worker_threads,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "starting delivery engine"
        );

        self.worker.recover_inflight().await?;
        self.stats.write().await.active_workers = self.config.worker_threads;

        let worker = self.worker.clone();
        let tracker = self.tracker.clone();
        let token = self.cancellation.clone();
        let lanes = Arc::new(Semaphore::new(self.config.worker_threads));
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            info!("dispatcher started");
            loop {
                if token.is_cancelled() {
                    break;
                }

                match worker.queue.dequeue() {
                    Some(event) => {
                        let permit = tokio::select! {
                            permit = lanes.clone().acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break,
                            },
                            () = token.cancelled() => {
                                // Not picked up; recovery re-enqueues it.
                                break;
                            },
                        };

                        let worker = worker.clone();
                        tracker.spawn(async move {
                            let _lane = permit;
                            worker.process(event).await;
                        });
                    },
                    None => {
                        tokio::select! {
                            () = worker.clock.sleep(poll_interval) => {},
                            () = token.cancelled() => break,
                        }
                    },
                }
            }
            info!("dispatcher stopped");
        });

        self.dispatcher = Some(handle);
        info!("delivery engine started");
        Ok(())
    }

    /// Gracefully shuts down: stop dispatching, then wait for in-flight
    /// lanes up to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::ShutdownTimeout`] if lanes do not finish in
    /// time; their tasks are detached, and interrupted events are recovered
    /// on the next start.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");
        self.cancellation.cancel();

        if let Some(handle) = self.dispatcher.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "dispatcher task panicked");
            }
        }

        self.tracker.close();
        let drained =
            tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait()).await;

        self.stats.write().await.active_workers = 0;

        match drained {
            Ok(()) => {
                info!("delivery engine stopped");
                Ok(())
            },
            Err(_) => {
                error!(
                    timeout_secs = self.config.shutdown_timeout.as_secs(),
                    "delivery lanes did not finish before timeout"
                );
                Err(DeliveryError::ShutdownTimeout { timeout: self.config.shutdown_timeout })
            },
        }
    }

    /// Returns a copy of the current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Shared worker, for driving single events in tests.
    pub fn worker(&self) -> Arc<DeliveryWorker> {
        self.worker.clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use hookrelay_core::{
        InMemoryClassificationRepository, InMemoryEventQueue, InMemoryEventRepository,
        InMemoryWebhookRepository, RealClock, Webhook,
    };
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_webhook(url: &str, now: DateTime<Utc>) -> Webhook {
        Webhook::new(url.to_string(), None, now)
    }

    struct TestRig {
        webhooks: Arc<InMemoryWebhookRepository>,
        events: Arc<InMemoryEventRepository>,
        classifications: Arc<InMemoryClassificationRepository>,
        queue: Arc<InMemoryEventQueue>,
        worker: DeliveryWorker,
    }

    fn rig_with_config(config: DeliveryConfig) -> TestRig {
        let webhooks = Arc::new(InMemoryWebhookRepository::new());
        let events = Arc::new(InMemoryEventRepository::new());
        let classifications = Arc::new(InMemoryClassificationRepository::new());
        let queue = InMemoryEventQueue::shared();

        let worker = DeliveryWorker::new(
            webhooks.clone(),
            events.clone(),
            classifications.clone(),
            queue.clone(),
            Arc::new(ErrorClassifier::rules_only()),
            config,
            Arc::new(RwLock::new(EngineStats::default())),
            CancellationToken::new(),
            Arc::new(RealClock::new()),
        )
        .expect("worker should build");

        TestRig { webhooks, events, classifications, queue, worker }
    }

    fn fast_config() -> DeliveryConfig {
        DeliveryConfig {
            retry_policy: RetryPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                max_retries: 2,
            },
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn seed(rig: &TestRig, url: &str) -> (Webhook, Event) {
        let now = Utc::now();
        let webhook = test_webhook(url, now);
        let event = Event::new(webhook.id, b"{\"a\":1}".to_vec(), now);
        rig.webhooks.save(webhook.clone()).await.unwrap();
        rig.events.save(event.clone()).await.unwrap();
        (webhook, event)
    }

    #[tokio::test]
    async fn missing_webhook_fails_event() {
        let rig = rig_with_config(fast_config());
        let now = Utc::now();
        let event = Event::new(WebhookId::new(), b"{}".to_vec(), now);
        rig.events.save(event.clone()).await.unwrap();

        rig.worker.process(event.clone()).await;

        let stored = rig.events.find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Failure);
        assert_eq!(stored.last_error.as_deref(), Some("Webhook not found"));
        assert!(rig.classifications.is_empty().await);
    }

    #[tokio::test]
    async fn suspended_webhook_pauses_event_without_delivery() {
        let rig = rig_with_config(fast_config());
        let (mut webhook, event) = seed(&rig, "http://127.0.0.1:1/hook").await;
        webhook.paused_until = Some(Utc::now() + chrono::Duration::hours(1));
        rig.webhooks.save(webhook).await.unwrap();

        rig.worker.process(event.clone()).await;

        let stored = rig.events.find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Paused);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn terminal_events_are_not_reprocessed() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let rig = rig_with_config(fast_config());
        let (_, mut event) = seed(&rig, &format!("{}/hook", server.uri())).await;
        event.status = EventStatus::Success;
        rig.events.save(event.clone()).await.unwrap();

        rig.worker.process(event.clone()).await;

        let stored = rig.events.find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Success);
        server.verify().await;
    }

    #[tokio::test]
    async fn processing_is_persisted_before_delivery() {
        // The mock answers 500 and the retry budget is zero, so the event
        // goes straight to failure; the classification row proves the
        // attempt went out after the PROCESSING write.
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = fast_config();
        config.retry_policy.max_retries = 0;
        let rig = rig_with_config(config);
        let (_, event) = seed(&rig, &format!("{}/hook", server.uri())).await;

        rig.worker.process(event.clone()).await;

        let stored = rig.events.find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Failure);
        assert_eq!(rig.classifications.len().await, 1);
        server.verify().await;
    }

    #[tokio::test]
    async fn escalation_marks_failure_with_prefix() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        // Custom rule escalates teapots.
        let rules = vec![crate::classifier::ClassificationRule {
            name: "teapot".to_string(),
            exact_status_code: Some(418),
            status_code_min: None,
            status_code_max: None,
            error_type_pattern: None,
            error_message_pattern: None,
            decision: ErrorDecision::Escalate,
            explanation_template: Some("Endpoint identifies as a teapot.".to_string()),
            priority: 500,
            enabled: true,
        }];
        let classifier = ErrorClassifier::new(
            crate::classifier::RuleEngine::new(rules),
            None,
            true,
        );

        let webhooks = Arc::new(InMemoryWebhookRepository::new());
        let events = Arc::new(InMemoryEventRepository::new());
        let classifications = Arc::new(InMemoryClassificationRepository::new());
        let queue = InMemoryEventQueue::shared();
        let worker = DeliveryWorker::new(
            webhooks.clone(),
            events.clone(),
            classifications.clone(),
            queue,
            Arc::new(classifier),
            fast_config(),
            Arc::new(RwLock::new(EngineStats::default())),
            CancellationToken::new(),
            Arc::new(RealClock::new()),
        )
        .unwrap();

        let now = Utc::now();
        let webhook = test_webhook(&format!("{}/hook", server.uri()), now);
        let event = Event::new(webhook.id, b"{}".to_vec(), now);
        webhooks.save(webhook).await.unwrap();
        events.save(event.clone()).await.unwrap();

        worker.process(event.clone()).await;

        let stored = events.find_by_id(event.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Failure);
        assert!(stored.last_error.as_deref().unwrap_or("").starts_with("escalated: "));
    }
}
