use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;
use crate::smoother::SmootherError;

/// Failure of an external perception collaborator.
///
/// Always recovered inside the pipeline (fallback values or stale cache).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("collaborator failed: {0}")]
    Failed(String),
    #[error("collaborator timed out after {0:?}")]
    TimedOut(Duration),
    #[error("collaborator panicked")]
    Panicked,
    #[error("worker pool unavailable")]
    Unavailable,
}

impl CollaboratorError {
    pub fn failed(message: impl Into<String>) -> Self {
        CollaboratorError::Failed(message.into())
    }
}

/// Construction-time errors for the fusion runtime
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("smoother error: {0}")]
    Smoother(#[from] SmootherError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
