//! Consignment table operations.

use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Consignment, TaskStatus};
use crate::Store;

/// Default page size for consignment listings.
pub const CONSIGNMENTS_PER_PAGE: i64 = 100;

fn consignment_from_row(row: &PgRow) -> Consignment {
    let status_raw: String = row.get("status");
    Consignment {
        tenant_id: row.get("tenant_id"),
        consignment_id: row.get("consignment_id"),
        task_id: row.get("task_id"),
        device_id: row.get("device_id"),
        status: TaskStatus::parse(&status_raw),
        create_time: row.get("create_time"),
    }
}

impl Store {
    pub(crate) async fn insert_consignment(
        &self,
        consignment: &Consignment,
    ) -> Result<(), StoreError> {
        let pool = self.session.pool().await;
        sqlx::query(
            "INSERT INTO consignments (tenant_id, consignment_id, task_id, device_id, status, \
             create_time) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&consignment.tenant_id)
        .bind(&consignment.consignment_id)
        .bind(consignment.task_id)
        .bind(consignment.device_id)
        .bind(consignment.status.as_str())
        .bind(consignment.create_time)
        .execute(&pool)
        .await?;
        Ok(())
    }

    /// List the consignment rows fanned out from one scheduling request,
    /// one page at a time. `cursor` is the last task ID of the previous
    /// page; `page_size` falls back to the default when zero.
    pub async fn get_tasks_for_consignment(
        &self,
        tenant_id: &str,
        consignment_id: &str,
        cursor: Option<Uuid>,
        page_size: i64,
    ) -> Result<(Vec<Consignment>, Option<Uuid>), StoreError> {
        if consignment_id.is_empty() {
            return Err(StoreError::InvalidRequest);
        }
        let limit = if page_size <= 0 || page_size > CONSIGNMENTS_PER_PAGE {
            CONSIGNMENTS_PER_PAGE
        } else {
            page_size
        };

        let pool = self.session.pool().await;
        let rows = match cursor {
            Some(after) => {
                sqlx::query(
                    "SELECT tenant_id, consignment_id, task_id, device_id, status, create_time \
                     FROM consignments \
                     WHERE tenant_id = $1 AND consignment_id = $2 AND task_id > $3 \
                     ORDER BY task_id LIMIT $4",
                )
                .bind(tenant_id)
                .bind(consignment_id)
                .bind(after)
                .bind(limit)
                .fetch_all(&pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT tenant_id, consignment_id, task_id, device_id, status, create_time \
                     FROM consignments \
                     WHERE tenant_id = $1 AND consignment_id = $2 \
                     ORDER BY task_id LIMIT $3",
                )
                .bind(tenant_id)
                .bind(consignment_id)
                .bind(limit)
                .fetch_all(&pool)
                .await?
            }
        };

        let consignments: Vec<Consignment> = rows.iter().map(consignment_from_row).collect();
        let next = if consignments.len() as i64 == limit {
            consignments.last().map(|c| c.task_id)
        } else {
            None
        };
        Ok((consignments, next))
    }

    /// Mirror a task's status onto its consignment row.
    pub async fn update_consignment_status(
        &self,
        tenant_id: &str,
        consignment_id: &str,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let pool = self.session.pool().await;
        let result = sqlx::query(
            "UPDATE consignments SET status = $1 \
             WHERE tenant_id = $2 AND consignment_id = $3 AND task_id = $4",
        )
        .bind(status.as_str())
        .bind(tenant_id)
        .bind(consignment_id)
        .bind(task_id)
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
