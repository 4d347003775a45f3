//! The scheduling engine: schedule grammar, request fan-out, the scheduler
//! daemon, the dispatch worker, and the response router.

pub mod daemon;
pub mod dispatch;
pub mod error;
pub mod recurrence;
pub mod request;
pub mod response;
pub mod schedule;
pub mod wire;

pub use error::{ScheduleError, SchedulerError};
pub use schedule::ScheduleSpec;

use std::sync::Arc;

use fahrplan_funkturm::TaskPublisher;
use fahrplan_identity::TokenVerifier;
use fahrplan_queue::QueueProvider;
use fahrplan_store::{ServiceDirectory, Store};

/// Wiring shared by the scheduling subsystems.
#[derive(Clone)]
pub struct SchedulerEngine {
    store: Store,
    directory: Arc<ServiceDirectory>,
    queues: Arc<dyn QueueProvider>,
    publisher: Arc<dyn TaskPublisher>,
    verifier: Arc<dyn TokenVerifier>,
    /// QoS applied to broker publishes.
    qos: u8,
}

impl SchedulerEngine {
    pub fn new(
        store: Store,
        directory: Arc<ServiceDirectory>,
        queues: Arc<dyn QueueProvider>,
        publisher: Arc<dyn TaskPublisher>,
        verifier: Arc<dyn TokenVerifier>,
        qos: u8,
    ) -> Self {
        Self {
            store,
            directory,
            queues,
            publisher,
            verifier,
            qos,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    pub(crate) fn queues(&self) -> &dyn QueueProvider {
        self.queues.as_ref()
    }

    pub(crate) fn publisher(&self) -> &dyn TaskPublisher {
        self.publisher.as_ref()
    }

    pub(crate) fn verifier(&self) -> &dyn TokenVerifier {
        self.verifier.as_ref()
    }

    pub(crate) fn qos(&self) -> u8 {
        self.qos
    }
}
