//! Error types for webhook delivery operations.
//!
//! Delivery outcomes themselves are data, not errors (see
//! [`crate::client::DeliveryOutcome`]); this module covers the failures of
//! the machinery around them.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions raised by the delivery engine and its collaborators.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Repository operation failed during delivery.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },

    /// Invalid client or engine configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Graceful shutdown did not finish within the allotted time.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// Time budget that was exceeded
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

impl From<hookrelay_core::CoreError> for DeliveryError {
    fn from(err: hookrelay_core::CoreError) -> Self {
        Self::Storage { message: err.to_string() }
    }
}
