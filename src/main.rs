//! Hookrelay webhook delivery service.
//!
//! Main entry point: initialises tracing, loads configuration, wires the
//! repositories, queue, classifier and delivery engine, and coordinates
//! graceful startup and shutdown.

use std::sync::Arc;

use anyhow::Result;
use hookrelay_core::{
    ClassificationRepository, EventQueue, EventRepository, InMemoryClassificationRepository,
    InMemoryEventQueue, InMemoryEventRepository, InMemoryWebhookRepository, RealClock,
    WebhookRepository,
};
use hookrelay_delivery::{AdvisorClient, DeliveryEngine, ErrorClassifier, RuleEngine};
use tracing::info;

mod config;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting hookrelay delivery service");

    let config = Config::load()?;
    info!(
        worker_threads = config.worker_threads,
        poll_interval_ms = config.poll_interval_ms,
        advisor_enabled = config.advisor_enabled,
        "configuration loaded"
    );

    // Composition root: repositories and queue first, then the engine.
    let webhooks: Arc<dyn WebhookRepository> = Arc::new(InMemoryWebhookRepository::new());
    let events: Arc<dyn EventRepository> = Arc::new(InMemoryEventRepository::new());
    let classifications: Arc<dyn ClassificationRepository> =
        Arc::new(InMemoryClassificationRepository::new());
    let queue: Arc<dyn EventQueue> = Arc::new(InMemoryEventQueue::new());

    let advisor = match config.to_advisor_config() {
        Some(advisor_config) => Some(AdvisorClient::new(advisor_config)?),
        None => None,
    };
    let classifier = Arc::new(ErrorClassifier::new(
        RuleEngine::new(config.classification_rules()),
        advisor,
        config.advisor_fallback_enabled,
    ));

    let mut engine = DeliveryEngine::new(
        config.to_delivery_config(),
        webhooks,
        events,
        classifications,
        queue,
        classifier,
        Arc::new(RealClock::new()),
    )?;

    engine.start().await?;
    info!("hookrelay is ready to deliver events");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    engine.shutdown().await?;
    info!("hookrelay shutdown complete");
    Ok(())
}

/// Initialises tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,hookrelay=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}
