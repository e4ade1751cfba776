//! Client error types

use std::time::Duration;

use thiserror::Error;

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced to the initiating user action
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] campus_core::Error),

    #[error("Feed error: {0}")]
    Feed(#[from] campus_net::Error),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Input problems the user can fix before retrying
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Core(campus_core::Error::Validation(_)))
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ClientError::Core(campus_core::Error::PermissionDenied(_)))
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(e: toml::de::Error) -> Self {
        ClientError::Config(e.to_string())
    }
}
