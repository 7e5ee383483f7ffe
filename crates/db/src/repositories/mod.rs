use thiserror::Error;

use opsgate_engine::{SinkError, StoreError};

pub mod audit_log;
pub mod workflow;

pub use audit_log::SqlAuditLog;
pub use workflow::SqlWorkflowStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(inner) => StoreError::Backend(inner.to_string()),
            RepositoryError::Decode(detail) => StoreError::Decode(detail),
        }
    }
}

impl From<RepositoryError> for SinkError {
    fn from(error: RepositoryError) -> Self {
        SinkError(error.to_string())
    }
}
