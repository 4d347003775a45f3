//! Task table operations.

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{debug, error};
use uuid::Uuid;

use fahrplan_core::SchedulingUnit;

use crate::error::StoreError;
use crate::model::{
    duration_from_ms, duration_to_ms, weekdays_from_columns, weekdays_to_columns, Consignment,
    Task, TaskStatus,
};
use crate::Store;

/// Cap applied to device-task listing pages.
pub const DEVICE_TASKS_PAGE_SIZE: i64 = 100;

const TASK_COLUMNS: &str = "task_id, device_id, tenant_id, service_id, consignment_id, status, \
     retry_count, create_time, start_time, end_time, unit, interval, duration_ms, run_at_ms, \
     week_days, month_days, cron_schedule, start_at, immediate, message_id, message_type, \
     task_details";

pub(crate) fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let unit_raw: i16 = row.get("unit");
    let unit = SchedulingUnit::from_i16(unit_raw).ok_or(StoreError::Internal)?;
    let status_raw: String = row.get("status");
    let duration_ms: Option<i64> = row.get("duration_ms");
    let run_at_ms: Vec<i64> = row.get("run_at_ms");
    let week_days: Vec<i16> = row.get("week_days");

    Ok(Task {
        task_id: row.get("task_id"),
        device_id: row.get("device_id"),
        tenant_id: row.get("tenant_id"),
        service_id: row.get("service_id"),
        consignment_id: row.get("consignment_id"),
        status: TaskStatus::parse(&status_raw),
        retry_count: row.get("retry_count"),
        create_time: row.get("create_time"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        unit,
        interval: row.get("interval"),
        duration: duration_ms.map(duration_from_ms),
        run_at: run_at_ms.into_iter().map(duration_from_ms).collect(),
        week_days: weekdays_from_columns(&week_days),
        month_days: row.get("month_days"),
        cron_schedule: row.get("cron_schedule"),
        start_at: row.get("start_at"),
        start_immediately: row.get("immediate"),
        message_id: row.get("message_id"),
        message_type: row.get("message_type"),
        task_details: row.get("task_details"),
    })
}

impl Store {
    /// Add a task to the scheduler database.
    ///
    /// Assigns a time-ordered task ID, sets `status = queued` and
    /// `retry_count = 0`, then inserts the task row and its consignment
    /// mapping row.
    pub async fn create_task(&self, task: &mut Task) -> Result<(), StoreError> {
        if Uuid::parse_str(&task.tenant_id).is_err() {
            error!(tenant_id = %task.tenant_id, "invalid tenant ID specified");
            return Err(StoreError::InvalidRequest);
        }

        task.task_id = Uuid::now_v7();
        task.create_time = Utc::now();
        task.status = TaskStatus::Queued;
        task.retry_count = 0;

        let pool = self.session.pool().await;
        sqlx::query(
            "INSERT INTO tasks (task_id, device_id, tenant_id, service_id, consignment_id, \
             status, retry_count, create_time, start_time, end_time, unit, interval, \
             duration_ms, run_at_ms, week_days, month_days, cron_schedule, start_at, immediate, \
             message_id, message_type, task_details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
             $17, $18, $19, $20, $21, $22)",
        )
        .bind(task.task_id)
        .bind(task.device_id)
        .bind(&task.tenant_id)
        .bind(&task.service_id)
        .bind(&task.consignment_id)
        .bind(task.status.as_str())
        .bind(task.retry_count)
        .bind(task.create_time)
        .bind(task.start_time)
        .bind(task.end_time)
        .bind(task.unit.as_i16())
        .bind(task.interval)
        .bind(task.duration.map(duration_to_ms))
        .bind(task.run_at.iter().copied().map(duration_to_ms).collect::<Vec<i64>>())
        .bind(weekdays_to_columns(&task.week_days))
        .bind(&task.month_days)
        .bind(&task.cron_schedule)
        .bind(task.start_at)
        .bind(task.start_immediately)
        .bind(&task.message_id)
        .bind(&task.message_type)
        .bind(&task.task_details)
        .execute(&pool)
        .await?;

        let consignment = Consignment::from_task(task);
        self.insert_consignment(&consignment).await?;

        debug!(
            task_id = %task.task_id,
            tenant_id = %task.tenant_id,
            device_id = %task.device_id,
            "added a new task to the scheduler database"
        );
        Ok(())
    }

    /// Get one task by its ID and device.
    pub async fn get_task(&self, task_id: Uuid, device_id: Uuid) -> Result<Task, StoreError> {
        let pool = self.session.pool().await;
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE device_id = $1 AND task_id = $2"
        ))
        .bind(device_id)
        .bind(task_id)
        .fetch_optional(&pool)
        .await?;

        match row {
            Some(row) => task_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    /// List tasks for a device in creation order (task IDs are
    /// time-ordered), one page at a time.
    ///
    /// `cursor` is the last task ID of the previous page. Returns the page
    /// and the cursor for the next one, if any.
    pub async fn get_tasks_for_device(
        &self,
        device_id: Uuid,
        cursor: Option<Uuid>,
    ) -> Result<(Vec<Task>, Option<Uuid>), StoreError> {
        let pool = self.session.pool().await;
        let rows = match cursor {
            Some(after) => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE device_id = $1 AND task_id > $2 ORDER BY task_id LIMIT $3"
                ))
                .bind(device_id)
                .bind(after)
                .bind(DEVICE_TASKS_PAGE_SIZE)
                .fetch_all(&pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE device_id = $1 ORDER BY task_id LIMIT $2"
                ))
                .bind(device_id)
                .bind(DEVICE_TASKS_PAGE_SIZE)
                .fetch_all(&pool)
                .await?
            }
        };

        let tasks = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let next = if tasks.len() as i64 == DEVICE_TASKS_PAGE_SIZE {
            tasks.last().map(|t| t.task_id)
        } else {
            None
        };
        Ok((tasks, next))
    }

    /// Remove a task. Deleting an absent task is not an error.
    ///
    /// Any pending scheduled run for the task is removed with it so the
    /// daemon stops firing it.
    pub async fn remove_task(&self, task_id: Uuid, device_id: Uuid) -> Result<(), StoreError> {
        let pool = self.session.pool().await;
        sqlx::query("DELETE FROM tasks WHERE device_id = $1 AND task_id = $2")
            .bind(device_id)
            .bind(task_id)
            .execute(&pool)
            .await?;
        sqlx::query("DELETE FROM scheduled_runs WHERE task_id = $1 AND device_id = $2")
            .bind(task_id)
            .bind(device_id)
            .execute(&pool)
            .await?;
        Ok(())
    }

    /// Update the status of a task and its consignment mirror row.
    ///
    /// Transitions must move forward along
    /// `queued → dispatched → {completed | failed}`. The two writes are
    /// sequential, not transactional; on failure the caller sees the error
    /// from whichever write failed.
    pub async fn update_task_status(
        &self,
        task_id: Uuid,
        device_id: Uuid,
        tenant_id: &str,
        consignment_id: &str,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        self.set_task_status(task_id, device_id, status).await?;

        if let Err(err) = self
            .update_consignment_status(tenant_id, consignment_id, task_id, status)
            .await
        {
            error!(
                task_id = %task_id,
                device_id = %device_id,
                error = %err,
                "failed to update the consignment status for the task"
            );
            return Err(err);
        }
        Ok(())
    }

    /// Mark a task dispatched. Updates the task row only, since the dispatch
    /// pipeline does not carry the consignment ID. Re-marking an already
    /// dispatched task (queue redelivery) is a no-op.
    pub async fn mark_task_dispatched(
        &self,
        task_id: Uuid,
        device_id: Uuid,
    ) -> Result<(), StoreError> {
        match self.set_task_status(task_id, device_id, TaskStatus::Dispatched).await {
            Err(StoreError::NotAllowed) => {
                let current = self.get_task(task_id, device_id).await?.status;
                if current == TaskStatus::Dispatched {
                    Ok(())
                } else {
                    Err(StoreError::NotAllowed)
                }
            }
            other => other,
        }
    }

    async fn set_task_status(
        &self,
        task_id: Uuid,
        device_id: Uuid,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let current = self.get_task(task_id, device_id).await?.status;
        if !current.can_transition_to(status) {
            return Err(StoreError::NotAllowed);
        }

        let pool = self.session.pool().await;
        let now = Utc::now();
        let result = match status {
            TaskStatus::Dispatched => {
                sqlx::query(
                    "UPDATE tasks SET status = $1, start_time = $2 \
                     WHERE device_id = $3 AND task_id = $4",
                )
                .bind(status.as_str())
                .bind(now)
                .bind(device_id)
                .bind(task_id)
                .execute(&pool)
                .await?
            }
            TaskStatus::Completed | TaskStatus::Failed => {
                sqlx::query(
                    "UPDATE tasks SET status = $1, end_time = $2 \
                     WHERE device_id = $3 AND task_id = $4",
                )
                .bind(status.as_str())
                .bind(now)
                .bind(device_id)
                .bind(task_id)
                .execute(&pool)
                .await?
            }
            _ => {
                sqlx::query("UPDATE tasks SET status = $1 WHERE device_id = $2 AND task_id = $3")
                    .bind(status.as_str())
                    .bind(device_id)
                    .bind(task_id)
                    .execute(&pool)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Mark a task complete, mirroring the status onto its consignment row.
    pub async fn mark_task_complete(&self, task: &Task) -> Result<(), StoreError> {
        self.update_task_status(
            task.task_id,
            task.device_id,
            &task.tenant_id,
            &task.consignment_id,
            TaskStatus::Completed,
        )
        .await
    }

    /// Mark a task failed, mirroring the status onto its consignment row.
    pub async fn mark_task_failed(&self, task: &Task) -> Result<(), StoreError> {
        self.update_task_status(
            task.task_id,
            task.device_id,
            &task.tenant_id,
            &task.consignment_id,
            TaskStatus::Failed,
        )
        .await
    }
}
