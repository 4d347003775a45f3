//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("receive error: {0}")]
    Receive(String),

    #[error("send error: {0}")]
    Send(String),

    #[error("delete error: {0}")]
    Delete(String),

    #[error("queue not found: {0}")]
    NotFound(String),
}
