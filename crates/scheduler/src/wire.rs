//! Wire messages exchanged over the queues and the broker.
//!
//! Envelopes are MessagePack, base64-wrapped for queue transport. Payload
//! bytes inside them are opaque between the requesting service and the
//! device.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use fahrplan_store::Task;

use crate::error::SchedulerError;

/// Request to schedule one message across a list of devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub version: u32,
    pub service_id: String,
    pub device_ids: Vec<String>,
    pub consignment_id: String,
    pub tenant_id: String,
    pub schedule: String,
    pub message_type: String,
    pub message_id: String,
    /// Opaque task payload. Requests without a payload are rejected.
    pub payload: Option<Vec<u8>>,
}

/// Outcome for one device in a scheduling request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTaskInfo {
    pub task_id: String,
    pub device_id: String,
    pub status: String,
}

/// Response to a scheduling request. Partial success is the normal case:
/// `error_count` counts the devices whose task could not be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub version: u32,
    pub task_count: u32,
    pub error_count: u32,
    pub consignment_id: String,
    pub tenant_id: String,
    /// Populated only for REST-sourced requests; event responses stay
    /// compact.
    pub tasks_scheduled: Vec<ScheduledTaskInfo>,
}

/// A fired task on its way to a device, carried over the dispatch queue and
/// published to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub version: u32,
    pub service_id: String,
    pub device_id: String,
    pub task_id: String,
    pub tenant_id: String,
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl ServiceMessage {
    pub fn from_task(task: &Task) -> Self {
        Self {
            version: 1,
            service_id: task.service_id.clone(),
            device_id: task.device_id.to_string(),
            task_id: task.task_id.to_string(),
            tenant_id: task.tenant_id.clone(),
            message_id: task.message_id.clone(),
            message_type: task.message_type.clone(),
            payload: task.task_details.clone(),
        }
    }
}

/// Message sent by a device toward the cloud: either a task response or an
/// unsolicited device-to-service message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceMessage {
    /// Device access token proving the sender's identity.
    pub access_token: String,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub task_status: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Event forwarded to a registered service's queue. Identity fields come
/// from the verified device token, never from the message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub version: u32,
    pub service_id: String,
    pub device_id: String,
    pub task_id: String,
    #[serde(default)]
    pub consignment_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub task_status: String,
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Device-configuration event forwarded on the DCM side channel, as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcmEvent {
    pub tenant_id: String,
    pub device_id: String,
    pub ms: String,
    pub payload: String,
}

// ── Codec helpers ─────────────────────────────────────────────

/// Encode an envelope to MessagePack and wrap it in base64 for queue
/// transport.
pub fn encode_wrapped<T: Serialize>(value: &T) -> Result<String, SchedulerError> {
    let bytes = rmp_serde::to_vec_named(value).map_err(|e| SchedulerError::Codec(e.to_string()))?;
    Ok(BASE64.encode(bytes))
}

/// Unwrap a base64 queue body back into envelope bytes.
pub fn unwrap_body(body: &str) -> Result<Vec<u8>, SchedulerError> {
    BASE64
        .decode(body.trim())
        .map_err(|e| SchedulerError::Codec(e.to_string()))
}

/// Decode a MessagePack envelope from raw bytes.
pub fn decode_envelope<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, SchedulerError> {
    rmp_serde::from_slice(bytes).map_err(|e| SchedulerError::Codec(e.to_string()))
}

/// Decode a base64-wrapped MessagePack envelope.
pub fn decode_wrapped<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, SchedulerError> {
    decode_envelope(&unwrap_body(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_message_round_trips_through_queue_encoding() {
        let msg = ServiceMessage {
            version: 1,
            service_id: "hpcem".into(),
            device_id: "6e9cf1f0-93ba-4a84-92b1-0b1f46a52c9a".into(),
            task_id: "0192f3a1-7b5a-7000-8000-7e2f8d7a0001".into(),
            tenant_id: "a2b4c6d8-0000-4000-8000-000000000001".into(),
            message_id: "m-1".into(),
            message_type: "PRN.C".into(),
            payload: b"do the thing".to_vec(),
        };

        let wrapped = encode_wrapped(&msg).unwrap();
        let decoded: ServiceMessage = decode_wrapped(&wrapped).unwrap();
        assert_eq!(decoded.device_id, msg.device_id);
        assert_eq!(decoded.payload, msg.payload);
        assert_eq!(decoded.message_type, "PRN.C");
    }

    #[test]
    fn garbage_bodies_are_rejected() {
        assert!(decode_wrapped::<ServiceMessage>("!!! not base64 !!!").is_err());
        let valid_b64_bad_envelope = BASE64.encode(b"not msgpack at all");
        assert!(decode_wrapped::<ServiceMessage>(&valid_b64_bad_envelope).is_err());
    }

    #[test]
    fn device_message_optional_fields_default() {
        let msg = DeviceMessage {
            access_token: "tok".into(),
            task_id: String::new(),
            message_id: String::new(),
            message_type: "CFG.E".into(),
            task_status: String::new(),
            payload: vec![],
        };
        let bytes = rmp_serde::to_vec_named(&msg).unwrap();
        let decoded: DeviceMessage = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded.message_type, "CFG.E");
        assert!(decoded.task_id.is_empty());
    }
}
