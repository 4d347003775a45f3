//! Broker adapter: a persistent pub/sub session toward managed devices.
//!
//! Outbound, fired tasks publish to per-device or broadcast topics. Inbound,
//! the adapter holds the two shared cloud subscriptions and routes messages
//! by a typed [`InboundRoute`] to the response router.

pub mod connection;
pub mod error;
pub mod message;
pub mod topics;
pub mod transport;

pub use connection::{BrokerEvent, ConnectionManager, CredentialSource, DisconnectReason, TaskPublisher};
pub use error::BrokerError;
pub use message::BrokerMessage;
pub use topics::{topic_for_device_task, InboundRoute, DEVICE_MESSAGES_TOPIC, TASK_RESPONSES_TOPIC};
pub use transport::{BrokerEndpoints, Transport};
