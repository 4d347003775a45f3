//! Scheduled-run table operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{run_partition, ScheduledRun};
use crate::Store;

/// Number of scheduled runs returned per page.
pub const RUNS_PER_PAGE: i64 = 100;

/// Keyset cursor into a run partition, ordered by `(next_run, task_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCursor {
    pub next_run: DateTime<Utc>,
    pub task_id: Uuid,
}

fn run_from_row(row: &PgRow) -> ScheduledRun {
    ScheduledRun {
        run_partition: row.get("run_partition"),
        next_run: row.get("next_run"),
        last_run: row.get("last_run"),
        task_id: row.get("task_id"),
        device_id: row.get("device_id"),
    }
}

impl Store {
    /// Insert a scheduled run. The partition key is always derived from
    /// `next_run`.
    pub async fn create_scheduled_run(&self, run: &mut ScheduledRun) -> Result<(), StoreError> {
        run.run_partition = run_partition(run.next_run);

        let pool = self.session.pool().await;
        sqlx::query(
            "INSERT INTO scheduled_runs (run_partition, next_run, last_run, task_id, device_id) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&run.run_partition)
        .bind(run.next_run)
        .bind(run.last_run)
        .bind(run.task_id)
        .bind(run.device_id)
        .execute(&pool)
        .await?;

        debug!(task_id = %run.task_id, partition = %run.run_partition, "added a new scheduled run");
        Ok(())
    }

    /// Get one page of scheduled runs within a partition, ordered by
    /// `next_run` ascending. Returns the page and the cursor for the next
    /// one, if the partition has more rows.
    pub async fn get_scheduled_runs(
        &self,
        partition: &str,
        cursor: Option<RunCursor>,
    ) -> Result<(Vec<ScheduledRun>, Option<RunCursor>), StoreError> {
        if partition.is_empty() {
            return Err(StoreError::InvalidRequest);
        }

        let pool = self.session.pool().await;
        let rows = match cursor {
            Some(after) => {
                sqlx::query(
                    "SELECT run_partition, next_run, last_run, task_id, device_id \
                     FROM scheduled_runs WHERE run_partition = $1 \
                     AND (next_run, task_id) > ($2, $3) \
                     ORDER BY next_run, task_id LIMIT $4",
                )
                .bind(partition)
                .bind(after.next_run)
                .bind(after.task_id)
                .bind(RUNS_PER_PAGE)
                .fetch_all(&pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT run_partition, next_run, last_run, task_id, device_id \
                     FROM scheduled_runs WHERE run_partition = $1 \
                     ORDER BY next_run, task_id LIMIT $2",
                )
                .bind(partition)
                .bind(RUNS_PER_PAGE)
                .fetch_all(&pool)
                .await?
            }
        };

        let runs: Vec<ScheduledRun> = rows.iter().map(run_from_row).collect();
        let next = if runs.len() as i64 == RUNS_PER_PAGE {
            runs.last().map(|r| RunCursor {
                next_run: r.next_run,
                task_id: r.task_id,
            })
        } else {
            None
        };
        Ok((runs, next))
    }

    /// Advance a fired run to its next firing: record `last_run` and re-key
    /// the row into the partition of the new `next_run`.
    pub async fn advance_scheduled_run(
        &self,
        run: &ScheduledRun,
        next_run: DateTime<Utc>,
        fired_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let new_partition = run_partition(next_run);
        let pool = self.session.pool().await;

        if new_partition == run.run_partition {
            sqlx::query(
                "UPDATE scheduled_runs SET next_run = $1, last_run = $2 \
                 WHERE run_partition = $3 AND task_id = $4",
            )
            .bind(next_run)
            .bind(fired_at)
            .bind(&run.run_partition)
            .bind(run.task_id)
            .execute(&pool)
            .await?;
        } else {
            // Partition is part of the key: re-key with a delete + insert.
            sqlx::query("DELETE FROM scheduled_runs WHERE run_partition = $1 AND task_id = $2")
                .bind(&run.run_partition)
                .bind(run.task_id)
                .execute(&pool)
                .await?;
            sqlx::query(
                "INSERT INTO scheduled_runs (run_partition, next_run, last_run, task_id, device_id) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&new_partition)
            .bind(next_run)
            .bind(fired_at)
            .bind(run.task_id)
            .bind(run.device_id)
            .execute(&pool)
            .await?;
        }

        debug!(
            task_id = %run.task_id,
            next_run = %next_run,
            partition = %new_partition,
            "advanced scheduled run"
        );
        Ok(())
    }

    /// Remove a scheduled run whose task has no further firings.
    pub async fn remove_scheduled_run(&self, run: &ScheduledRun) -> Result<(), StoreError> {
        let pool = self.session.pool().await;
        sqlx::query("DELETE FROM scheduled_runs WHERE run_partition = $1 AND task_id = $2")
            .bind(&run.run_partition)
            .bind(run.task_id)
            .execute(&pool)
            .await?;
        Ok(())
    }
}
