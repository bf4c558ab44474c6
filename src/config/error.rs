//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating [`super::PipelineConfig`]
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration source error: {0}")]
    Source(String),

    #[error("Invalid configuration value for {field}: {value}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration file could not be read: {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("No configuration directory found, searched: {searched:?}")]
    DirectoryNotFound { searched: Vec<PathBuf> },
}

impl ConfigurationError {
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn file_read_error(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        ConfigurationError::Source(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
