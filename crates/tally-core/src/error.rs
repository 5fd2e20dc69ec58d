//! Unified error types for Tally

use thiserror::Error;

use crate::types::MetricKind;

/// Unified error type for all Tally operations
#[derive(Error, Debug)]
pub enum TallyError {
    // Sample errors
    #[error("Invalid metric: {0}")]
    Validation(String),

    #[error("Metric not found: {kind} {name}")]
    NotFound { kind: MetricKind, name: String },

    // Ingress errors
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // Storage errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Startup failed: {0}")]
    Startup(String),

    // Dispatch errors
    #[error("Cancelled before the job was claimed")]
    Cancelled,

    #[error("Delivery failed: {0}")]
    Delivery(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl TallyError {
    pub fn not_found(kind: MetricKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for errors caused by the caller's input rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Integrity(_) | Self::Transport(_) | Self::Serialization(_)
        )
    }
}

/// Result type alias using TallyError
pub type Result<T> = std::result::Result<T, TallyError>;
