//! Topic scheme and typed inbound routing.

use uuid::Uuid;

use fahrplan_core::BROADCAST_DEVICE_UUID;

/// Topic carrying responses from devices to previously dispatched tasks.
pub const TASK_RESPONSES_TOPIC: &str = "v1/@cloud/task_responses";

/// Topic carrying unsolicited device-to-service messages.
pub const DEVICE_MESSAGES_TOPIC: &str = "v1/@cloud";

/// The two cloud-bound subscriptions the adapter re-establishes on every
/// successful connection.
pub const CLOUD_SUBSCRIPTIONS: [&str; 2] = [TASK_RESPONSES_TOPIC, DEVICE_MESSAGES_TOPIC];

/// Topic a device listens on for its own tasks.
fn device_tasks_topic(device_id: Uuid) -> String {
    format!("v1/{device_id}/tasks")
}

/// Topic devices of a service listen on for broadcast tasks.
fn broadcast_tasks_topic(service_id: &str) -> String {
    format!("v1/@devices/{service_id}")
}

/// Select the outbound topic for a task. Broadcast tasks (the reserved
/// broadcast UUID) route to the service's broadcast topic, everything else
/// to the per-device topic.
pub fn topic_for_device_task(device_id: Uuid, service_id: &str) -> String {
    if device_id == BROADCAST_DEVICE_UUID {
        return broadcast_tasks_topic(service_id);
    }
    device_tasks_topic(device_id)
}

/// Typed destination for an inbound broker message.
///
/// Routing is by exact subscription topic; anything else is unroutable and
/// dropped by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundRoute {
    /// A response to a previously dispatched task.
    TaskResponse,
    /// An unsolicited device-to-service message.
    DeviceToService,
}

impl InboundRoute {
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            TASK_RESPONSES_TOPIC => Some(Self::TaskResponse),
            DEVICE_MESSAGES_TOPIC => Some(Self::DeviceToService),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_tasks_use_the_device_topic() {
        let device = Uuid::new_v4();
        assert_eq!(
            topic_for_device_task(device, "hpcem"),
            format!("v1/{device}/tasks")
        );
    }

    #[test]
    fn broadcast_tasks_use_the_service_broadcast_topic() {
        assert_eq!(
            topic_for_device_task(BROADCAST_DEVICE_UUID, "hpcem"),
            "v1/@devices/hpcem"
        );
    }

    #[test]
    fn inbound_routing_is_by_exact_topic() {
        assert_eq!(
            InboundRoute::from_topic("v1/@cloud/task_responses"),
            Some(InboundRoute::TaskResponse)
        );
        assert_eq!(
            InboundRoute::from_topic("v1/@cloud"),
            Some(InboundRoute::DeviceToService)
        );
        assert_eq!(InboundRoute::from_topic("v1/@cloud/other"), None);
        assert_eq!(InboundRoute::from_topic("v1/dev/tasks"), None);
    }
}
