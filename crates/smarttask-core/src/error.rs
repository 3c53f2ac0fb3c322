//! Error taxonomy for the task store and its persistence layer.

use thiserror::Error;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("task not found: {id}")]
    NotFound { id: Uuid },

    #[error("failed to write '{key}': {reason}")]
    Persistence { key: String, reason: String },

    #[error("stored data under '{key}' is unreadable")]
    CorruptData {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn persistence(key: &str, reason: impl ToString) -> Self {
        Self::Persistence {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
