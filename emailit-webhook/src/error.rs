//! Monitor error types

use thiserror::Error;

/// Errors that can occur while running webhook health checks
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The delivery log could not be queried
    #[error("Delivery log query failed: {0}")]
    Source(String),

    /// I/O error persisting alerts
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted alert list is not valid JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MonitorError>;
