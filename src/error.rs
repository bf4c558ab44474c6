//! # Pipeline Error Types
//!
//! Structured error handling for the pipeline engine using thiserror.
//! Every fallible operation in the crate returns [`PipelineResult`], so handlers
//! can propagate failures with `?` and the orchestrator sees one error type.

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use thiserror::Error;

/// Comprehensive pipeline error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid state transition from {from} on {event}")]
    StateTransition { from: String, event: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create a database error
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a state transition error
    pub fn state_transition(from: impl ToString, event: impl Into<String>) -> Self {
        Self::StateTransition {
            from: from.to_string(),
            event: event.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an external provider error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a rendering error
    pub fn render(message: impl Into<String>) -> Self {
        Self::Render(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PipelineError::database("query", "No rows found"),
            sqlx::Error::Database(db_err) => PipelineError::database("database", db_err.to_string()),
            sqlx::Error::PoolTimedOut => PipelineError::database("pool", "Connection pool timed out"),
            sqlx::Error::PoolClosed => PipelineError::database("pool", "Connection pool is closed"),
            _ => PipelineError::database("connection", err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Csv(err.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        let provider = err
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        PipelineError::provider(provider, err.to_string())
    }
}

impl From<lopdf::Error> for PipelineError {
    fn from(err: lopdf::Error) -> Self {
        PipelineError::render(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
