use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use fahrplan_identity::TokenVerifier;
use fahrplan_scheduler::SchedulerEngine;
use fahrplan_store::Store;

pub struct AppState {
    pub engine: SchedulerEngine,
    pub store: Store,
    /// Validates bearer app tokens on /api/v1 routes.
    pub verifier: Arc<dyn TokenVerifier>,
    pub api_authn_enabled: bool,
    pub metrics: ApiMetrics,
    pub started_at: Instant,
}

/// Lock-free REST counters, snapshotted by the /metrics endpoint.
///
/// All fields use relaxed ordering: monotonic counters where eventual
/// visibility is acceptable for scrape reads.
#[derive(Default)]
pub struct ApiMetrics {
    pub create_task_responses: AtomicU64,
    pub create_task_bad_requests: AtomicU64,
    pub create_task_internal_errors: AtomicU64,
    pub get_task_responses: AtomicU64,
    pub get_task_not_found: AtomicU64,
    pub list_tasks_responses: AtomicU64,
    pub remove_task_responses: AtomicU64,
    pub unauthorized_requests: AtomicU64,
}
