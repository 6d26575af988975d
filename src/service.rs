//! Task service: submission, inspection, retry and cancellation.
//!
//! Every caller-facing operation on tasks goes through [`TaskService`], which
//! validates requests before anything is written and announces each change on
//! the event bus.

use cf_core::events::EventPayload;
use cf_core::{Error, Operation, Result, TaskId, TaskStatus, TaskType, DEFAULT_PRIORITY};
use cf_db::models::{QueueStatus, Task, TaskFilter};
use cf_db::pool::get_conn;
use cf_db::queries::{cache, leases, tasks};
use cf_pipeline::PipelinePlan;
use serde::Deserialize;

use crate::context::AppContext;

/// A request to create a task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmitTask {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub input_files: Vec<String>,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    /// Steps of a combined task; must be empty for other types.
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl SubmitTask {
    pub fn new(task_type: TaskType, input_files: Vec<String>) -> Self {
        Self {
            task_type,
            input_files,
            config: empty_config(),
            operations: Vec::new(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TaskService {
    ctx: AppContext,
}

impl TaskService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Validate and persist a new `pending` task.
    ///
    /// Every step is validated against its processor first; an invalid
    /// request never creates a task.
    pub fn submit(&self, request: SubmitTask) -> Result<Task> {
        if request.task_type != TaskType::Combined && !request.operations.is_empty() {
            return Err(Error::Validation(format!(
                "operations are only accepted for combined tasks, not {}",
                request.task_type
            )));
        }
        let steps =
            PipelinePlan::steps_for(request.task_type, &request.config, &request.operations)?;
        self.ctx
            .executor()
            .validate_steps(&steps, &request.input_files)?;

        let conn = get_conn(&self.ctx.db)?;
        let task = tasks::create_task(
            &conn,
            request.task_type,
            &request.input_files,
            &request.config,
            &request.operations,
            request.priority,
        )?;

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            "Task queued"
        );
        self.ctx.event_bus.broadcast(EventPayload::TaskQueued {
            task_id: task.id,
            task_type: task.task_type,
        });
        Ok(task)
    }

    pub fn get(&self, id: TaskId) -> Result<Task> {
        let conn = get_conn(&self.ctx.db)?;
        tasks::require_task(&conn, id)
    }

    pub fn operations(&self, id: TaskId) -> Result<Vec<Operation>> {
        let conn = get_conn(&self.ctx.db)?;
        tasks::require_task(&conn, id)?;
        tasks::get_operations(&conn, id)
    }

    pub fn list(&self, filter: &TaskFilter, offset: i64, limit: i64) -> Result<Vec<Task>> {
        let conn = get_conn(&self.ctx.db)?;
        tasks::list_tasks(&conn, filter, offset, limit)
    }

    /// Put a `failed` task back in the queue.
    pub fn retry(&self, id: TaskId) -> Result<Task> {
        let conn = get_conn(&self.ctx.db)?;
        let task = tasks::retry_task(&conn, id, self.ctx.config.retry.max_retries)?;

        tracing::info!(task_id = %id, retry_count = task.retry_count, "Task retried");
        self.ctx.event_bus.broadcast(EventPayload::TaskRetried {
            task_id: id,
            retry_count: task.retry_count,
        });
        Ok(task)
    }

    /// Cancel a task.
    ///
    /// A `pending` task is cancelled at once. A `processing` task is flagged
    /// and stays `processing` until its worker reaches a step boundary.
    /// Cancelling an already cancelled task returns it unchanged.
    pub fn cancel(&self, id: TaskId) -> Result<Task> {
        let conn = get_conn(&self.ctx.db)?;
        let before = tasks::require_task(&conn, id)?;
        let task = tasks::cancel_task(&conn, id)?;

        match (before.status, task.status) {
            (TaskStatus::Cancelled, _) => {}
            (_, TaskStatus::Cancelled) => {
                tracing::info!(task_id = %id, "Task cancelled");
                self.ctx
                    .event_bus
                    .broadcast(EventPayload::TaskCancelled { task_id: id });
            }
            _ => {
                tracing::info!(task_id = %id, "Cancellation requested");
                self.ctx
                    .event_bus
                    .broadcast(EventPayload::TaskCancelRequested { task_id: id });
            }
        }
        Ok(task)
    }

    pub fn queue_status(&self) -> Result<QueueStatus> {
        let conn = get_conn(&self.ctx.db)?;
        leases::queue_status(&conn)
    }

    /// Drop expired result-cache entries.
    pub fn purge_cache(&self) -> Result<usize> {
        let conn = get_conn(&self.ctx.db)?;
        let removed = cache::purge_expired(&conn)?;
        tracing::info!(removed, "Purged expired cache entries");
        Ok(removed)
    }
}
