//! The response router.
//!
//! Consumes inbound broker messages, authenticates the sending device, and
//! forwards the payload to the originating service's queue. Task responses
//! additionally correlate to the stored task and drive its status
//! transition. Identity fields on outbound events always come from the
//! verified token, never from the message envelope.

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use fahrplan_funkturm::{BrokerMessage, InboundRoute};
use fahrplan_identity::TokenClaims;
use fahrplan_store::{Task, TaskStatus};

use crate::error::SchedulerError;
use crate::wire::{encode_wrapped, DcmEvent, DeviceEvent, DeviceMessage};
use crate::SchedulerEngine;

/// Message type of device-configuration events, which additionally fan out
/// to the DCM input queue.
const CONFIG_MESSAGE_TYPE: &str = "CFG.E";

/// Map a device-reported task status onto a stored status transition.
fn map_task_status(reported: &str) -> Option<TaskStatus> {
    match reported.to_ascii_lowercase().as_str() {
        "complete" | "success" => Some(TaskStatus::Completed),
        "failed" | "error" => Some(TaskStatus::Failed),
        _ => None,
    }
}

/// Envelope checks shared by both inbound handlers: a token must be
/// present, a task ID (when given) must parse, and the message type must be
/// set.
fn validate_device_message(message: &BrokerMessage) -> Result<DeviceMessage, SchedulerError> {
    let decoded: DeviceMessage = crate::wire::decode_envelope(&message.payload)?;

    if decoded.access_token.is_empty() {
        error!("invalid device access token in the device message");
        return Err(SchedulerError::InvalidRequest);
    }
    if !decoded.task_id.is_empty() && Uuid::parse_str(&decoded.task_id).is_err() {
        error!(task_id = %decoded.task_id, "invalid task ID in the device message");
        return Err(SchedulerError::InvalidRequest);
    }
    if decoded.message_type.is_empty() {
        error!("invalid message type in the device message");
        return Err(SchedulerError::InvalidRequest);
    }
    Ok(decoded)
}

impl SchedulerEngine {
    /// Consume routed inbound broker messages until the channel closes or
    /// shutdown is signalled.
    pub async fn run_response_router(
        &self,
        mut inbound_rx: mpsc::Receiver<(InboundRoute, BrokerMessage)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("response router started");

        loop {
            let received = tokio::select! {
                received = inbound_rx.recv() => received,
                _ = shutdown.changed() => {
                    info!("response router received shutdown signal");
                    return;
                }
            };

            let Some((route, message)) = received else {
                info!("broker channel closed, response router exiting");
                return;
            };

            let result = match route {
                InboundRoute::TaskResponse => self.handle_task_response(&message).await,
                InboundRoute::DeviceToService => self.handle_device_message(&message).await,
            };
            if let Err(err) = result {
                error!(topic = %message.topic, error = %err, "failed to process inbound device message");
            }
        }
    }

    /// Handle a response to a previously dispatched task.
    pub async fn handle_task_response(&self, message: &BrokerMessage) -> Result<(), SchedulerError> {
        let decoded = validate_device_message(message)?;
        let claims = self
            .verifier()
            .validate_device_token(&decoded.access_token)
            .await?;

        // The device's identity comes from the token subject.
        let device_id =
            Uuid::parse_str(&claims.sub).map_err(|_| SchedulerError::InvalidRequest)?;
        let task_id =
            Uuid::parse_str(&decoded.task_id).map_err(|_| SchedulerError::InvalidRequest)?;

        let task = self.store().get_task(task_id, device_id).await?;

        // Defence in depth: the token's service and tenant claims must match
        // the stored task.
        if task.service_id != claims.ms {
            error!(
                task_id = %task_id,
                claimed = %claims.ms,
                stored = %task.service_id,
                "mismatched service ID in task response message"
            );
            return Err(SchedulerError::InvalidServiceId);
        }
        if task.tenant_id != claims.tid {
            error!(
                claimed = %claims.tid,
                stored = %task.tenant_id,
                "mismatched tenant ID in task response message"
            );
            return Err(SchedulerError::InvalidTenantId);
        }

        let Some(status) = map_task_status(&decoded.task_status) else {
            error!(
                task_id = %task_id,
                device_id = %device_id,
                status = %decoded.task_status,
                "task response specified an invalid status"
            );
            return Err(SchedulerError::InvalidRequest);
        };
        let update = match status {
            TaskStatus::Completed => self.store().mark_task_complete(&task).await,
            _ => self.store().mark_task_failed(&task).await,
        };
        if let Err(err) = update {
            // The forward still happens; the status retry rides on the next
            // response redelivery.
            error!(
                task_id = %task_id,
                device_id = %device_id,
                error = %err,
                "failed to update task status from device response"
            );
        }

        self.forward_to_service(&message.topic, &claims, &decoded, Some(&task))
            .await
    }

    /// Handle an unsolicited device-to-service message.
    pub async fn handle_device_message(&self, message: &BrokerMessage) -> Result<(), SchedulerError> {
        let decoded = validate_device_message(message)?;
        let claims = self
            .verifier()
            .validate_device_token(&decoded.access_token)
            .await?;

        self.forward_to_service(&message.topic, &claims, &decoded, None)
            .await?;

        // Configuration events additionally fan out to the DCM input queue.
        if decoded.message_type == CONFIG_MESSAGE_TYPE {
            self.forward_config_event(&claims, &decoded).await?;
        }
        Ok(())
    }

    /// Re-encode the message as a `DeviceEvent` and send it to the queue
    /// topic registered for `(service, broker topic)`.
    async fn forward_to_service(
        &self,
        broker_topic: &str,
        claims: &TokenClaims,
        decoded: &DeviceMessage,
        task: Option<&Task>,
    ) -> Result<(), SchedulerError> {
        let Some(queue_topic) = self.directory().queue_topic_for(&claims.ms, broker_topic) else {
            error!(
                service_id = %claims.ms,
                broker_topic = %broker_topic,
                "cannot determine a service queue topic to dispatch the message"
            );
            return Err(SchedulerError::InvalidMessageType);
        };

        let event = DeviceEvent {
            version: 1,
            service_id: claims.ms.clone(),
            device_id: claims.sub.clone(),
            task_id: decoded.task_id.clone(),
            consignment_id: task.map(|t| t.consignment_id.clone()).unwrap_or_default(),
            tenant_id: claims.tid.clone(),
            task_status: decoded.task_status.clone(),
            message_id: decoded.message_id.clone(),
            message_type: decoded.message_type.clone(),
            payload: decoded.payload.clone(),
        };
        let body = encode_wrapped(&event)?;

        let owner_account = self
            .directory()
            .service_config(&claims.ms)
            .map(|cfg| cfg.owner_account.clone())
            .unwrap_or_default();

        self.queues()
            .send_service_message(queue_topic, &owner_account, &body)
            .await?;
        Ok(())
    }

    /// JSON-encode a device-configuration event and send it to the DCM
    /// input queue.
    async fn forward_config_event(
        &self,
        claims: &TokenClaims,
        decoded: &DeviceMessage,
    ) -> Result<(), SchedulerError> {
        let event = DcmEvent {
            tenant_id: claims.tid.clone(),
            device_id: claims.sub.clone(),
            ms: claims.ms.clone(),
            payload: String::from_utf8_lossy(&decoded.payload).into_owned(),
        };
        let json = serde_json::to_vec(&event).map_err(|e| SchedulerError::Codec(e.to_string()))?;

        use base64::Engine as _;
        let body = base64::engine::general_purpose::STANDARD.encode(json);
        if let Err(err) = self.queues().send_dcm(&body).await {
            warn!(
                tenant_id = %claims.tid,
                device_id = %claims.sub,
                error = %err,
                "failed to dispatch the config event to the DCM service"
            );
            return Err(err.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_status_mapping_is_case_insensitive() {
        assert_eq!(map_task_status("Complete"), Some(TaskStatus::Completed));
        assert_eq!(map_task_status("SUCCESS"), Some(TaskStatus::Completed));
        assert_eq!(map_task_status("failed"), Some(TaskStatus::Failed));
        assert_eq!(map_task_status("Error"), Some(TaskStatus::Failed));
        assert_eq!(map_task_status("running"), None);
        assert_eq!(map_task_status(""), None);
    }

    fn wrap(decoded: &DeviceMessage) -> BrokerMessage {
        let bytes = rmp_serde::to_vec_named(decoded).unwrap();
        BrokerMessage::new("v1/@cloud", bytes, 0)
    }

    #[test]
    fn envelope_validation_requires_token_and_message_type() {
        let valid = DeviceMessage {
            access_token: "tok".into(),
            task_id: Uuid::new_v4().to_string(),
            message_id: "m-1".into(),
            message_type: "TEL.E".into(),
            task_status: String::new(),
            payload: vec![1, 2],
        };
        assert!(validate_device_message(&wrap(&valid)).is_ok());

        let mut missing_token = valid.clone();
        missing_token.access_token = String::new();
        assert!(validate_device_message(&wrap(&missing_token)).is_err());

        let mut missing_type = valid.clone();
        missing_type.message_type = String::new();
        assert!(validate_device_message(&wrap(&missing_type)).is_err());

        let mut bad_task_id = valid.clone();
        bad_task_id.task_id = "not-a-uuid".into();
        assert!(validate_device_message(&wrap(&bad_task_id)).is_err());

        // Absent task IDs are fine: unsolicited messages have none.
        let mut no_task = valid;
        no_task.task_id = String::new();
        assert!(validate_device_message(&wrap(&no_task)).is_ok());
    }

    #[test]
    fn undecodable_envelopes_are_rejected() {
        let garbage = BrokerMessage::new("v1/@cloud", b"definitely not msgpack".to_vec(), 0);
        assert!(validate_device_message(&garbage).is_err());
    }
}
