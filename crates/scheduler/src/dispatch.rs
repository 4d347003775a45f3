//! The dispatch worker.
//!
//! Consumes the dispatch queue one message at a time and publishes each
//! fired task to the broker on its device (or broadcast) topic. The failure
//! ordering is deliberate: a failed publish leaves the message in the queue
//! for redelivery, while failures after a successful publish may cause
//! duplicate publishes, which devices tolerate duplicates (at-least-once).

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use fahrplan_funkturm::topic_for_device_task;
use fahrplan_queue::QueueMessage;

use crate::wire::{decode_envelope, unwrap_body, ServiceMessage};
use crate::SchedulerEngine;

/// Pause after a queue receive error before polling again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

impl SchedulerEngine {
    /// Watch the dispatch queue until shutdown is signalled.
    pub async fn run_dispatch_worker(&self, mut shutdown: watch::Receiver<bool>) {
        info!("watching the scheduler dispatch queue for requests");

        loop {
            if *shutdown.borrow() {
                info!("no longer watching the scheduler dispatch queue");
                return;
            }

            let received = tokio::select! {
                received = self.queues().receive_dispatch() => received,
                _ = shutdown.changed() => {
                    info!("no longer watching the scheduler dispatch queue");
                    return;
                }
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "failed to receive message from scheduler dispatch queue");
                    tokio::time::sleep(RECEIVE_ERROR_BACKOFF).await;
                    continue;
                }
            };

            self.process_dispatch_message(message).await;
        }
    }

    /// Decode, publish, mark dispatched, delete, in that order.
    async fn process_dispatch_message(&self, message: QueueMessage) {
        // Undecodable messages are poison pills: delete and move on.
        let envelope_bytes = match unwrap_body(&message.body) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to decode message from dispatch queue, dropping it");
                self.delete_dispatch_message(&message).await;
                return;
            }
        };
        let service_message: ServiceMessage = match decode_envelope(&envelope_bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "failed to unmarshal message from dispatch queue, dropping it");
                self.delete_dispatch_message(&message).await;
                return;
            }
        };

        let (task_id, device_id) = match (
            Uuid::parse_str(&service_message.task_id),
            Uuid::parse_str(&service_message.device_id),
        ) {
            (Ok(task_id), Ok(device_id)) => (task_id, device_id),
            _ => {
                warn!(
                    task_id = %service_message.task_id,
                    device_id = %service_message.device_id,
                    "dispatch message carries malformed identifiers, dropping it"
                );
                self.delete_dispatch_message(&message).await;
                return;
            }
        };

        // Publish the envelope bytes to the broker on the task's topic. On
        // failure the queue message stays for redelivery.
        let topic = topic_for_device_task(device_id, &service_message.service_id);
        if let Err(err) = self
            .publisher()
            .publish(&topic, &envelope_bytes, self.qos())
            .await
        {
            error!(
                task_id = %task_id,
                device_id = %device_id,
                topic = %topic,
                error = %err,
                "failed to publish task to the broker"
            );
            return;
        }

        match self.store().mark_task_dispatched(task_id, device_id).await {
            Ok(()) => {}
            // A removed or already-settled task cannot take the dispatched
            // status again; keeping the message would redeliver forever.
            Err(fahrplan_store::StoreError::NotFound)
            | Err(fahrplan_store::StoreError::NotAllowed) => {
                warn!(
                    task_id = %task_id,
                    device_id = %device_id,
                    "task no longer accepts dispatch status, dropping queue message"
                );
            }
            Err(err) => {
                // The publish already happened; leaving the message means a
                // duplicate publish on redelivery, which devices tolerate.
                error!(
                    task_id = %task_id,
                    device_id = %device_id,
                    error = %err,
                    "failed to update task status to dispatched"
                );
                return;
            }
        }

        self.delete_dispatch_message(&message).await;
    }

    async fn delete_dispatch_message(&self, message: &QueueMessage) {
        if let Err(err) = self.queues().delete_dispatch(&message.receipt_handle).await {
            error!(error = %err, "failed to remove message from scheduler dispatch queue");
        }
    }
}
