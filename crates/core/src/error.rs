use thiserror::Error;

use crate::validation::ValidationError;

pub type PulseResult<T> = Result<T, PulseError>;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session storage error: {0}")]
    SessionStorage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
