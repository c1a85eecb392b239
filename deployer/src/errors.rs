//! Error types for ezdeploy

use thiserror::Error;

use crate::models::deployment::DeploymentStatus;

/// Main error type for the deployment services
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Source fetch failed: {0}")]
    SourceFetch(String),

    #[error("Image build failed: {0}")]
    Build(String),

    #[error("Container launch failed: {0}")]
    RuntimeLaunch(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container unhealthy: {0}")]
    ContainerUnhealthy(String),

    #[error("Conflict on deployment {id}: expected status {expected}, found {actual}")]
    StoreConflict {
        id: u64,
        expected: DeploymentStatus,
        actual: DeploymentStatus,
    },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("No port available for deployment {0}")]
    PortExhausted(u64),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the failed step could succeed without any change
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            AppError::SourceFetch(_) | AppError::IoError(_) | AppError::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::StoreConflict { .. })
    }
}
