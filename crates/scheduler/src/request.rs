//! Scheduling-request fan-out.
//!
//! One entry point serves both the REST endpoint and the input-queue
//! watcher. A request fans out across its device list; per-device failures
//! increment the response's error count and the loop keeps going; partial
//! success is the normal case.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fahrplan_core::{
    common::resolve_device_id, RequestSource, SchedulingUnit, BROADCAST_DEVICE_ID,
    BROADCAST_DEVICE_UUID,
};
use fahrplan_store::{ScheduledRun, Task};

use crate::error::SchedulerError;
use crate::schedule::ScheduleSpec;
use crate::wire::{
    decode_wrapped, encode_wrapped, CreateTaskRequest, CreateTaskResponse, ScheduledTaskInfo,
    ServiceMessage,
};
use crate::SchedulerEngine;

/// Pause after an input-queue receive error before polling again.
const INPUT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

impl SchedulerEngine {
    /// Watch the scheduler input queue for scheduling events until shutdown
    /// is signalled. Messages are deleted after processing whether it
    /// succeeded or not; a bad request is not worth redelivering.
    pub async fn run_input_watcher(&self, mut shutdown: watch::Receiver<bool>) {
        info!("watching the scheduler input queue for requests");

        loop {
            if *shutdown.borrow() {
                info!("no longer watching the scheduler input queue");
                return;
            }

            let received = tokio::select! {
                received = self.queues().receive_input() => received,
                _ = shutdown.changed() => {
                    info!("no longer watching the scheduler input queue");
                    return;
                }
            };

            let message = match received {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "failed to receive message from scheduler input queue");
                    tokio::time::sleep(INPUT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            match decode_wrapped::<CreateTaskRequest>(&message.body) {
                Ok(request) => {
                    if let Err(err) = self
                        .handle_schedule_request(request, RequestSource::Event)
                        .await
                    {
                        error!(error = %err, "failed to process message on scheduler input queue");
                    }
                }
                Err(err) => {
                    error!(error = %err, "failed to unmarshal request from scheduler input queue");
                }
            }

            if let Err(err) = self.queues().delete_input(&message.receipt_handle).await {
                error!(error = %err, "failed to delete message from scheduler input queue");
            }
        }
    }

    /// Process a request to schedule tasks, from either the REST endpoint or
    /// the scheduler input queue.
    pub async fn handle_schedule_request(
        &self,
        mut request: CreateTaskRequest,
        source: RequestSource,
    ) -> Result<CreateTaskResponse, SchedulerError> {
        // Reject requests from an un-registered service.
        if !self.directory().is_valid_service_id(&request.service_id) {
            error!(service_id = %request.service_id, "unsupported service ID in the request");
            return Err(SchedulerError::InvalidRequest);
        }

        if request.consignment_id.is_empty() {
            error!("no consignment ID was specified in the request");
            return Err(SchedulerError::InvalidRequest);
        }

        if request.device_ids.is_empty() {
            error!(consignment_id = %request.consignment_id, "no device IDs in the request");
            return Err(SchedulerError::InvalidRequest);
        }

        // A broadcast request must address the sentinel alone; its tenant is
        // inconsequential and is rewritten to the reserved broadcast value.
        if request.device_ids[0] == BROADCAST_DEVICE_ID {
            if request.device_ids.len() != 1 {
                error!(
                    consignment_id = %request.consignment_id,
                    "broadcast request specified along with other device IDs"
                );
                return Err(SchedulerError::InvalidRequest);
            }
            request.tenant_id = BROADCAST_DEVICE_UUID.to_string();
        } else if Uuid::parse_str(&request.tenant_id).is_err() {
            error!(
                consignment_id = %request.consignment_id,
                "invalid tenant ID was specified"
            );
            return Err(SchedulerError::InvalidRequest);
        }

        let Some(payload) = request.payload.clone() else {
            error!(consignment_id = %request.consignment_id, "no request payload specified");
            return Err(SchedulerError::InvalidRequest);
        };

        let mut response = CreateTaskResponse {
            version: request.version,
            task_count: 0,
            error_count: 0,
            consignment_id: request.consignment_id.clone(),
            tenant_id: request.tenant_id.clone(),
            tasks_scheduled: Vec::new(),
        };

        for (index, device_id) in request.device_ids.iter().enumerate() {
            // A broadcast sentinel anywhere but alone at the front mixes
            // broadcast and unicast in one request; skip it.
            if index != 0 && device_id == BROADCAST_DEVICE_ID {
                error!("request mixes a broadcast task with specific devices");
                response.error_count += 1;
                continue;
            }

            match self.schedule_one(&request, device_id, &payload).await {
                Ok(task) => {
                    response.task_count += 1;
                    if source == RequestSource::Rest {
                        response.tasks_scheduled.push(ScheduledTaskInfo {
                            task_id: task.task_id.to_string(),
                            device_id: device_id.clone(),
                            status: task.status.to_string(),
                        });
                    }
                    debug!(
                        consignment_id = %request.consignment_id,
                        device_id = %device_id,
                        task_id = %task.task_id,
                        "queued a scheduled task"
                    );
                }
                Err(err) => {
                    error!(
                        consignment_id = %request.consignment_id,
                        tenant_id = %request.tenant_id,
                        device_id = %device_id,
                        error = %err,
                        "failed to create a new scheduled task"
                    );
                    response.error_count += 1;
                }
            }
        }

        info!(
            consignment_id = %request.consignment_id,
            tenant_id = %request.tenant_id,
            tasks = response.task_count,
            failures = response.error_count,
            "processed request to schedule tasks"
        );
        Ok(response)
    }

    /// Build, parse, and persist one task, enqueueing one-shot tasks for
    /// dispatch right away.
    async fn schedule_one(
        &self,
        request: &CreateTaskRequest,
        device_id: &str,
        payload: &[u8],
    ) -> Result<Task, SchedulerError> {
        let device_uuid =
            resolve_device_id(device_id).map_err(|_| SchedulerError::InvalidRequest)?;

        let now = Utc::now();
        let spec = ScheduleSpec::parse(&request.schedule, now)?;

        let mut task = Task::new(
            request.tenant_id.clone(),
            device_uuid,
            request.consignment_id.clone(),
            payload.to_vec(),
        );
        task.service_id = request.service_id.clone();
        task.message_type = request.message_type.clone();
        task.message_id = request.message_id.clone();
        spec.apply_to(&mut task);

        self.store().create_task(&mut task).await?;

        if task.unit == SchedulingUnit::Once {
            // One-shot tasks skip the scheduled-runs index and go straight
            // to the dispatch queue.
            let body = encode_wrapped(&ServiceMessage::from_task(&task))?;
            if let Err(err) = self.queues().send_dispatch(&body).await {
                warn!(
                    task_id = %task.task_id,
                    device_id = %device_id,
                    error = %err,
                    "failed to dispatch the scheduled task"
                );
                return Err(err.into());
            }
        } else {
            let mut run = ScheduledRun::for_task(&task, now);
            self.store().create_scheduled_run(&mut run).await?;
        }

        Ok(task)
    }
}
