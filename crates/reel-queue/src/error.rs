//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Duplicate job: {0}")]
    DuplicateJob(String),

    #[error("Queue entry not found: {0}")]
    EntryNotFound(String),

    #[error("Queue entry {0} is active and cannot be removed")]
    EntryActive(String),

    #[error("Queue entry {entry_id} is {state}, expected active")]
    NotActive { entry_id: String, state: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}
