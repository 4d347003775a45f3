//! Persistence for tasks, scheduled runs, consignments, and registered
//! services, plus the in-memory service-registry projections.

pub mod consignments;
pub mod error;
pub mod model;
pub mod registry;
pub mod runs;
pub mod session;
pub mod tasks;

pub use error::StoreError;
pub use model::{
    run_partition, Consignment, RegisteredService, ScheduledRun, Task, TaskStatus,
};
pub use registry::ServiceDirectory;
pub use runs::{RunCursor, RUNS_PER_PAGE};
pub use session::StoreSession;

use std::sync::Arc;

/// Handle to the scheduler database.
///
/// Cheap to clone; all operations re-acquire the underlying session so the
/// credential refresher can swap it atomically.
#[derive(Clone)]
pub struct Store {
    pub(crate) session: Arc<StoreSession>,
}

impl Store {
    pub fn new(session: Arc<StoreSession>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<StoreSession> {
        &self.session
    }
}
