//! Task store operations.
//!
//! Status changes are compare-and-set: an `UPDATE ... WHERE status IN (...)`
//! that either moves the row or touches nothing. Only one of any number of
//! concurrent callers can win a given move.

use cf_core::{
    validate_operation_count, validate_priority, Error, Operation, Result, TaskId, TaskStatus,
    TaskType,
};
use rusqlite::types::ToSql;
use rusqlite::Connection;

use crate::models::{Task, TaskFilter};
use crate::queries::to_json;
use crate::timestamp;

pub(crate) const COLS: &str = "id, task_type, status, input_files, output_files, config,
    progress, error_message, result, retry_count, priority, cancel_requested,
    locked_by, locked_at, lease_expires_at, started_at, created_at, updated_at, completed_at";

/// Extra column updates applied atomically with a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionFields {
    pub progress: Option<f64>,
    pub output_files: Option<Vec<String>>,
    pub error_message: Option<String>,
    pub clear_error: bool,
    pub result: Option<serde_json::Value>,
    pub clear_result: bool,
    pub increment_retry: bool,
    /// Only apply the transition while this worker holds the lease.
    pub lease_owner: Option<String>,
}

/// Create a new `pending` task, together with its pipeline operations.
///
/// Combined tasks must carry 2–10 operations; other task types must carry
/// none. Nothing is written when validation fails.
pub fn create_task(
    conn: &Connection,
    task_type: TaskType,
    input_files: &[String],
    config: &serde_json::Value,
    operations: &[Operation],
    priority: i32,
) -> Result<Task> {
    validate_priority(priority)?;
    match task_type {
        TaskType::Combined => validate_operation_count(operations.len())?,
        _ if !operations.is_empty() => {
            return Err(Error::Validation(format!(
                "operations are only accepted for combined tasks, not {task_type}"
            )));
        }
        _ => {}
    }

    let id = TaskId::new();
    let now = timestamp::now();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        "INSERT INTO tasks
             (id, task_type, status, input_files, config, priority, created_at, updated_at)
         VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?6)",
        rusqlite::params![
            id.to_string(),
            task_type.as_str(),
            to_json(input_files)?,
            to_json(config)?,
            priority,
            &now
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    for (index, op) in operations.iter().enumerate() {
        tx.execute(
            "INSERT INTO task_operations (task_id, sequence_index, op_type, config)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                id.to_string(),
                index as i64,
                op.op_type.as_str(),
                to_json(&op.config)?
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    get_task(conn, id)?.ok_or_else(|| Error::not_found("task", id))
}

/// Get a task by ID.
pub fn get_task(conn: &Connection, id: TaskId) -> Result<Option<Task>> {
    let q = format!("SELECT {COLS} FROM tasks WHERE id = ?1");
    let result = conn.query_row(&q, [id.to_string()], Task::from_row);
    match result {
        Ok(t) => Ok(Some(t)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get a task by ID, failing with `NotFound` if it does not exist.
pub fn require_task(conn: &Connection, id: TaskId) -> Result<Task> {
    get_task(conn, id)?.ok_or_else(|| Error::not_found("task", id))
}

/// The ordered operations of a combined task (empty for other types).
pub fn get_operations(conn: &Connection, id: TaskId) -> Result<Vec<Operation>> {
    let mut stmt = conn
        .prepare(
            "SELECT op_type, config FROM task_operations
             WHERE task_id = ?1 ORDER BY sequence_index ASC",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map([id.to_string()], |row| {
            let op_type: String = row.get(0)?;
            let config: String = row.get(1)?;
            Ok((op_type, config))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    rows.into_iter()
        .map(|(op_type, config)| {
            let config = serde_json::from_str(&config)
                .map_err(|e| Error::Internal(format!("corrupt operation config: {e}")))?;
            Ok(Operation::new(op_type.parse()?, config))
        })
        .collect()
}

/// List tasks with optional filters and pagination, most urgent first.
pub fn list_tasks(
    conn: &Connection,
    filter: &TaskFilter,
    offset: i64,
    limit: i64,
) -> Result<Vec<Task>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("status = ?");
        params_vec.push(Box::new(status.as_str()));
    }
    if let Some(task_type) = filter.task_type {
        clauses.push("task_type = ?");
        params_vec.push(Box::new(task_type.as_str()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let q = format!(
        "SELECT {COLS} FROM tasks {where_clause}
         ORDER BY priority ASC, created_at ASC, rowid ASC LIMIT ? OFFSET ?"
    );
    params_vec.push(Box::new(limit));
    params_vec.push(Box::new(offset));

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), Task::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Atomically move a task from one of `from_allowed` to `to`.
///
/// Source states that cannot legally reach `to` are ignored; if none remain
/// the call fails with `InvalidTransition` without touching the row. When the
/// row is not in an allowed state (or, with `lease_owner` set, is leased by
/// someone else) nothing is written and the error names the observed state.
pub fn transition(
    conn: &Connection,
    id: TaskId,
    from_allowed: &[TaskStatus],
    to: TaskStatus,
    fields: &TransitionFields,
) -> Result<Task> {
    let legal: Vec<TaskStatus> = from_allowed
        .iter()
        .copied()
        .filter(|from| from.can_transition_to(to))
        .collect();

    if legal.is_empty() {
        let current = require_task(conn, id)?;
        return Err(Error::invalid_transition(id, current.status, to));
    }

    if to == TaskStatus::Completed
        && fields.output_files.as_ref().map_or(true, |o| o.is_empty())
    {
        return Err(Error::Validation(
            "a completed task must record at least one output file".into(),
        ));
    }

    let now = timestamp::now();
    let mut sets: Vec<&str> = vec!["status = ?", "updated_at = ?"];
    let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(to.as_str()), Box::new(now.clone())];

    if to.is_settled() {
        sets.push("completed_at = ?");
        values.push(Box::new(now));
    } else {
        sets.push("completed_at = NULL");
    }
    if to != TaskStatus::Processing {
        sets.push("cancel_requested = 0");
    }
    if to == TaskStatus::Pending {
        sets.push("locked_by = NULL, locked_at = NULL, lease_expires_at = NULL, started_at = NULL");
    }
    if let Some(progress) = fields.progress {
        sets.push("progress = ?");
        values.push(Box::new(progress.clamp(0.0, 100.0)));
    }
    if let Some(ref output_files) = fields.output_files {
        sets.push("output_files = ?");
        values.push(Box::new(to_json(output_files)?));
    }
    if let Some(ref message) = fields.error_message {
        sets.push("error_message = ?");
        values.push(Box::new(message.clone()));
    } else if fields.clear_error {
        sets.push("error_message = NULL");
    }
    if let Some(ref result) = fields.result {
        sets.push("result = ?");
        values.push(Box::new(to_json(result)?));
    } else if fields.clear_result {
        sets.push("result = NULL");
    }
    if fields.increment_retry {
        sets.push("retry_count = retry_count + 1");
    }

    let placeholders = vec!["?"; legal.len()].join(", ");
    let mut q = format!(
        "UPDATE tasks SET {} WHERE id = ? AND status IN ({placeholders})",
        sets.join(", ")
    );
    values.push(Box::new(id.to_string()));
    for status in &legal {
        values.push(Box::new(status.as_str()));
    }
    if let Some(ref owner) = fields.lease_owner {
        q.push_str(" AND locked_by = ?");
        values.push(Box::new(owner.clone()));
    }
    q.push_str(&format!(" RETURNING {COLS}"));

    let params_refs: Vec<&dyn ToSql> = values.iter().map(|b| b.as_ref()).collect();
    match conn.query_row(&q, params_refs.as_slice(), Task::from_row) {
        Ok(task) => Ok(task),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(explain_rejection(
            conn,
            id,
            &legal,
            to,
            fields.lease_owner.as_deref(),
        )?),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Work out why a compare-and-set touched no row.
fn explain_rejection(
    conn: &Connection,
    id: TaskId,
    legal: &[TaskStatus],
    to: TaskStatus,
    lease_owner: Option<&str>,
) -> Result<Error> {
    let current = require_task(conn, id)?;
    if let Some(owner) = lease_owner {
        if legal.contains(&current.status) && current.locked_by.as_deref() != Some(owner) {
            return Ok(Error::lease_lost(id, owner));
        }
    }
    Ok(Error::invalid_transition(id, current.status, to))
}

/// Record progress for a processing task.
///
/// Applied only while the task is `processing`, the value is not below the
/// stored progress, and (when `worker` is given) that worker holds the lease.
/// Returns `false` when the update was ignored.
pub fn update_progress(
    conn: &Connection,
    id: TaskId,
    progress: f64,
    worker: Option<&str>,
) -> Result<bool> {
    if !progress.is_finite() {
        return Ok(false);
    }
    let progress = progress.clamp(0.0, 100.0);

    let n = conn
        .execute(
            "UPDATE tasks SET progress = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing' AND progress <= ?1
               AND (?4 IS NULL OR locked_by = ?4)",
            rusqlite::params![progress, timestamp::now(), id.to_string(), worker],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Whether a user asked for this task to be cancelled.
pub fn cancel_requested(conn: &Connection, id: TaskId) -> Result<bool> {
    let result = conn.query_row(
        "SELECT cancel_requested FROM tasks WHERE id = ?1",
        [id.to_string()],
        |row| row.get(0),
    );
    match result {
        Ok(flag) => Ok(flag),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(Error::not_found("task", id)),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Re-queue a failed task (explicit retry).
///
/// Resets progress, clears the error and result, increments `retry_count`,
/// and moves the task back to `pending`. Any other status, or a task that
/// already used `max_retries` retries, is rejected with `NotRetryable`.
pub fn retry_task(conn: &Connection, id: TaskId, max_retries: Option<u32>) -> Result<Task> {
    let current = require_task(conn, id)?;
    let exhausted = max_retries.is_some_and(|max| current.retry_count >= max);
    if current.status != TaskStatus::Failed || exhausted {
        return Err(Error::NotRetryable {
            id: id.to_string(),
            status: current.status,
        });
    }

    let fields = TransitionFields {
        progress: Some(0.0),
        output_files: Some(Vec::new()),
        clear_error: true,
        clear_result: true,
        increment_retry: true,
        ..Default::default()
    };

    match transition(conn, id, &[TaskStatus::Failed], TaskStatus::Pending, &fields) {
        Err(Error::InvalidTransition { from, .. }) => Err(Error::NotRetryable {
            id: id.to_string(),
            status: from,
        }),
        other => other,
    }
}

/// Cancel a task.
///
/// A `pending` task moves straight to `cancelled`. A `processing` task gets
/// its `cancel_requested` flag set and stays `processing` until its worker
/// reaches a step boundary. Cancelling an already cancelled task returns it
/// unchanged; `completed` and `failed` tasks are rejected with `NotCancellable`.
pub fn cancel_task(conn: &Connection, id: TaskId) -> Result<Task> {
    match transition(
        conn,
        id,
        &[TaskStatus::Pending],
        TaskStatus::Cancelled,
        &TransitionFields::default(),
    ) {
        Ok(task) => return Ok(task),
        Err(Error::InvalidTransition { .. }) => {}
        Err(e) => return Err(e),
    }

    let q = format!(
        "UPDATE tasks SET cancel_requested = 1, updated_at = ?1
         WHERE id = ?2 AND status = 'processing'
         RETURNING {COLS}"
    );
    match conn.query_row(&q, rusqlite::params![timestamp::now(), id.to_string()], Task::from_row) {
        Ok(task) => Ok(task),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            let current = require_task(conn, id)?;
            if current.status == TaskStatus::Cancelled {
                Ok(current)
            } else {
                Err(Error::NotCancellable {
                    id: id.to_string(),
                    status: current.status,
                })
            }
        }
        Err(e) => Err(Error::database(e.to_string())),
    }
}
