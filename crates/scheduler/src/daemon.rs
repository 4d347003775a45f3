//! The scheduler daemon.
//!
//! A single long-running loop with a one-minute execution quantum. Each
//! tick pages through today's run partition in `next_run` order, emits due
//! runs onto the dispatch queue, and advances each fired run to its next
//! firing.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use fahrplan_store::{run_partition, ScheduledRun, StoreError};

use crate::recurrence::next_run_after;
use crate::wire::{encode_wrapped, ServiceMessage};
use crate::SchedulerEngine;

/// The daemon's execution quantum.
pub const SCHEDULER_QUANTUM: Duration = Duration::from_secs(60);

impl SchedulerEngine {
    /// Run the scheduler daemon until shutdown is signalled.
    ///
    /// Database errors abort the current tick and are retried on the next
    /// one; individual item failures never stop the page.
    pub async fn run_scheduler_daemon(&self, mut shutdown: watch::Receiver<bool>) {
        info!("starting the scheduler daemon");

        loop {
            if *shutdown.borrow() {
                info!("stopping the scheduler daemon");
                return;
            }

            self.run_tick(&shutdown).await;

            tokio::select! {
                _ = tokio::time::sleep(SCHEDULER_QUANTUM) => {}
                _ = shutdown.changed() => {
                    info!("received signal to stop the scheduler daemon");
                    return;
                }
            }
        }
    }

    /// One pass over today's run partition.
    async fn run_tick(&self, shutdown: &watch::Receiver<bool>) {
        let partition = run_partition(Utc::now());
        let mut cursor = None;

        loop {
            let (runs, next_cursor) = match self.store().get_scheduled_runs(&partition, cursor).await
            {
                Ok(page) => page,
                Err(err) => {
                    error!(error = %err, "failed to query next run tasks from the scheduler database");
                    return;
                }
            };

            for run in &runs {
                if *shutdown.borrow() {
                    info!("stopping the scheduler daemon mid-page");
                    return;
                }

                let now = Utc::now();
                if run.next_run > now {
                    // The page is ordered by next_run; everything after this
                    // row belongs to a later quantum.
                    return;
                }

                debug!(
                    task_id = %run.task_id,
                    next_run = %run.next_run,
                    "retrieved a candidate task for execution"
                );
                self.fire_run(run).await;
            }

            cursor = next_cursor;
            if cursor.is_none() {
                return;
            }
        }
    }

    /// Emit one due run onto the dispatch queue and advance its schedule.
    async fn fire_run(&self, run: &ScheduledRun) {
        let task = match self.store().get_task(run.task_id, run.device_id).await {
            Ok(task) => task,
            Err(StoreError::NotFound) => {
                // The task was removed underneath its run row; drop the row
                // so it stops coming back every tick.
                warn!(task_id = %run.task_id, "scheduled run references a missing task");
                if let Err(err) = self.store().remove_scheduled_run(run).await {
                    error!(task_id = %run.task_id, error = %err, "failed to remove orphaned run");
                }
                return;
            }
            Err(err) => {
                error!(task_id = %run.task_id, error = %err, "failed to retrieve task information");
                return;
            }
        };

        let body = match encode_wrapped(&ServiceMessage::from_task(&task)) {
            Ok(body) => body,
            Err(err) => {
                error!(task_id = %task.task_id, error = %err, "failed to encode the message for delivery");
                return;
            }
        };

        if let Err(err) = self.queues().send_dispatch(&body).await {
            // Leave the run in place: the next tick retries it.
            error!(
                task_id = %task.task_id,
                device_id = %task.device_id,
                error = %err,
                "failed to dispatch the scheduled task"
            );
            return;
        }

        let fired_at = Utc::now();
        match next_run_after(&task, fired_at) {
            Some(next_run) => {
                if let Err(err) = self
                    .store()
                    .advance_scheduled_run(run, next_run, fired_at)
                    .await
                {
                    error!(task_id = %task.task_id, error = %err, "failed to advance scheduled run");
                }
            }
            None => {
                debug!(task_id = %task.task_id, "schedule exhausted, removing run");
                if let Err(err) = self.store().remove_scheduled_run(run).await {
                    error!(task_id = %task.task_id, error = %err, "failed to remove exhausted run");
                }
            }
        }
    }
}
