//! Wire-format envelope for messages crossing the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope carried on every broker topic.
///
/// Serialized with MessagePack. The `topic` field drives pub/sub routing;
/// `correlation_id` ties a device's reply back to the publish that caused
/// it in traces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    /// Routing topic (e.g. `v1/<device_id>/tasks`).
    pub topic: String,

    /// Opaque payload bytes. The scheduler never interprets these.
    #[serde(with = "raw_bytes")]
    pub payload: Vec<u8>,

    /// Delivery quality-of-service requested for this publish.
    pub qos: u8,

    pub timestamp: DateTime<Utc>,

    pub correlation_id: Uuid,

    /// Schema version for forward-compatible evolution.
    #[serde(default = "default_version")]
    pub version: u16,
}

fn default_version() -> u16 {
    1
}

impl BrokerMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, qos: u8) -> Self {
        Self {
            topic: topic.into(),
            payload,
            qos,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        }
    }

    /// Serialize the envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Serde helper keeping `Vec<u8>` as raw bytes in MessagePack.
mod raw_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let msg = BrokerMessage::new("v1/dev-1/tasks", b"payload".to_vec(), 1);
        let bytes = msg.to_bytes().unwrap();
        let decoded = BrokerMessage::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.topic, "v1/dev-1/tasks");
        assert_eq!(decoded.payload, b"payload");
        assert_eq!(decoded.qos, 1);
        assert_eq!(decoded.correlation_id, msg.correlation_id);
    }
}
