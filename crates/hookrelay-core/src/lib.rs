//! Core domain models and contracts for the webhook delivery system.
//!
//! Provides strongly-typed domain primitives, the event queue contract, the
//! repository contracts the delivery core consumes, and the clock
//! abstraction. All other crates depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod queue;
pub mod repo;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    CircuitState, ErrorClassification, ErrorDecision, ErrorKind, Event, EventId, EventStatus,
    Webhook, WebhookId,
};
pub use queue::{EventQueue, InMemoryEventQueue};
pub use repo::{
    ClassificationRepository, EventRepository, InMemoryClassificationRepository,
    InMemoryEventRepository, InMemoryWebhookRepository, WebhookRepository,
};
pub use time::{Clock, RealClock};
