use thiserror::Error;

use crate::ports::StoreError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("queue {queue} is already consuming")]
    AlreadyConsuming { queue: String },

    #[error("no matching unacked delivery in queue {queue}")]
    DeliveryNotFound { queue: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
