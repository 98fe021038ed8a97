//! Common error types for the content-analysis services

use thiserror::Error;

/// Common result type for content-analysis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the orchestrator
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored JSON column could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No enabled backend holds the capabilities a task needs
    #[error("No capable backend: {0}")]
    NoCapableBackend(String),

    /// A backend reported on a task it was never assigned
    #[error("Backend {backend_id} is not assigned to task {task_id}")]
    UnexpectedBackend { task_id: i64, backend_id: i64 },

    /// Malformed or contradictory task or result content
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Submitted media object disagrees with the stored record
    #[error("Identity conflict: {0}")]
    IdentityConflict(String),

    /// Task delivery to a single backend failed
    #[error("Delivery to backend {backend_id} failed: {reason}")]
    DeliveryFailure { backend_id: i64, reason: String },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
