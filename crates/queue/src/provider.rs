//! Queue provider trait and message type.

use async_trait::async_trait;

use crate::error::QueueError;

/// A raw message received from a scheduler queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Message identifier assigned by the queue provider.
    pub id: String,
    /// Raw message body (base64-wrapped envelope).
    pub body: String,
    /// Provider-specific handle used to delete the message.
    pub receipt_handle: String,
}

/// Interface implemented by queue providers registered with the scheduler.
///
/// Receives are single-message long polls; a `None` result means the poll
/// timed out with nothing to do. Messages must be explicitly deleted once
/// processed; an undeleted message reappears after its visibility timeout
/// (at-least-once delivery).
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Long-poll the scheduler input queue for one scheduling request.
    async fn receive_input(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Delete a processed (or poisoned) input-queue message.
    async fn delete_input(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Long-poll the dispatch queue for one fired task.
    async fn receive_dispatch(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Delete a processed (or poisoned) dispatch-queue message.
    async fn delete_dispatch(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Enqueue a fired task for delivery to the broker.
    async fn send_dispatch(&self, body: &str) -> Result<(), QueueError>;

    /// Send a device event to a registered service's outbound queue.
    /// `owner_account` scopes the queue-name lookup when the queue lives in
    /// another account.
    async fn send_service_message(
        &self,
        queue_topic: &str,
        owner_account: &str,
        body: &str,
    ) -> Result<(), QueueError>;

    /// Send a device-configuration event to the DCM input queue.
    async fn send_dcm(&self, body: &str) -> Result<(), QueueError>;
}
