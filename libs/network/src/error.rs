//! Transport Error Types
//!
//! Failures surfaced by the control socket and its in-memory stand-in.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Socket-level failure
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The far end went away or the transport was closed locally
    #[error("Transport closed: {message}")]
    Closed { message: String },

    /// Message rejected before it reached the socket
    #[error("Message of {size} bytes exceeds transport limit {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Kernel dropped inbound messages because the receive buffer filled
    #[error("Receive buffer overrun")]
    Overrun,

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    /// Whether the transport can no longer be used
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}
