//! Lease manager: priority queue selection and time-bounded task claims.
//!
//! A lease lives on the task row itself (`locked_by`, `locked_at`,
//! `lease_expires_at`). A `processing` task whose lease has expired is
//! eligible again, exactly like a `pending` one.

use std::time::Duration;

use cf_core::{Error, Result, TaskId, TaskStatus};
use rusqlite::Connection;

use crate::models::{Lease, LeaseRenewal, QueueStatus, Task};
use crate::queries::immediate;
use crate::queries::tasks::{require_task, COLS};
use crate::timestamp;

/// Claim the next eligible task for `worker_id`.
///
/// Selects the lowest priority value, then the oldest task, among `pending`
/// tasks and `processing` tasks with an expired lease. The claim and the move
/// to `processing` happen in one write transaction, so concurrent callers
/// never receive the same task. Returns `None` when the queue is empty.
pub fn acquire(
    conn: &Connection,
    worker_id: &str,
    visibility_timeout: Duration,
) -> Result<Option<Task>> {
    let expires_at = timestamp::after(visibility_timeout)?;

    immediate(conn, |conn| {
        let now = timestamp::now();
        let candidate = conn.query_row(
            "SELECT id FROM tasks
             WHERE status = 'pending'
                OR (status = 'processing'
                    AND (lease_expires_at IS NULL OR lease_expires_at <= ?1))
             ORDER BY priority ASC, created_at ASC, rowid ASC
             LIMIT 1",
            [&now],
            |row| row.get::<_, String>(0),
        );

        let id = match candidate {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(Error::database(e.to_string())),
        };

        let q = format!(
            "UPDATE tasks SET
                status = 'processing',
                locked_by = ?1,
                locked_at = ?2,
                lease_expires_at = ?3,
                started_at = NULL,
                completed_at = NULL,
                updated_at = ?2
             WHERE id = ?4
             RETURNING {COLS}"
        );
        conn.query_row(&q, rusqlite::params![worker_id, &now, &expires_at, id], Task::from_row)
            .map(Some)
            .map_err(|e| Error::database(e.to_string()))
    })
}

/// Extend the caller's lease on a task.
///
/// Fails with `LeaseLost` when the task is no longer `processing` under this
/// worker, which means another worker reclaimed it or it was settled. The
/// returned renewal carries the task's cancellation flag so the lease keeper
/// doubles as a cancellation poll.
pub fn renew(
    conn: &Connection,
    task_id: TaskId,
    worker_id: &str,
    visibility_timeout: Duration,
) -> Result<LeaseRenewal> {
    let expires_at = timestamp::after(visibility_timeout)?;

    let result = conn.query_row(
        "UPDATE tasks SET lease_expires_at = ?1
         WHERE id = ?2 AND status = 'processing' AND locked_by = ?3
         RETURNING lease_expires_at, cancel_requested",
        rusqlite::params![&expires_at, task_id.to_string(), worker_id],
        |row| {
            let expires: String = row.get(0)?;
            let cancel_requested: bool = row.get(1)?;
            Ok((expires, cancel_requested))
        },
    );

    match result {
        Ok((expires, cancel_requested)) => Ok(LeaseRenewal {
            expires_at: timestamp::parse(&expires)
                .map_err(|e| Error::database(format!("corrupt lease expiry: {e}")))?,
            cancel_requested,
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            require_task(conn, task_id)?;
            Err(Error::lease_lost(task_id, worker_id))
        }
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Record that the lease holder has begun executing a step.
///
/// Moves the claim from reserved to processing in the queue view. Returns
/// `false` if the caller no longer holds the lease or already started.
pub fn mark_started(conn: &Connection, task_id: TaskId, worker_id: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE tasks SET started_at = ?1, updated_at = ?1
             WHERE id = ?2 AND status = 'processing' AND locked_by = ?3 AND started_at IS NULL",
            rusqlite::params![timestamp::now(), task_id.to_string(), worker_id],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Drop the caller's lease without touching the task status.
///
/// Returns `false` if the caller did not hold it.
pub fn release(conn: &Connection, task_id: TaskId, worker_id: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE tasks SET locked_by = NULL, locked_at = NULL,
                lease_expires_at = NULL, started_at = NULL
             WHERE id = ?1 AND locked_by = ?2",
            rusqlite::params![task_id.to_string(), worker_id],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// The valid lease on a task, if any.
pub fn get_lease(conn: &Connection, task_id: TaskId) -> Result<Option<Lease>> {
    Ok(require_task(conn, task_id)?.lease())
}

/// Snapshot of the queue for operational collaborators.
///
/// Expired leases count as `pending`, since any worker may reclaim them.
/// `total` is the number of tasks waiting or in flight.
pub fn queue_status(conn: &Connection) -> Result<QueueStatus> {
    let now = timestamp::now();

    let (pending, processing, reserved): (i64, i64, i64) = conn
        .query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN status = 'pending'
                    OR (status = 'processing'
                        AND (lease_expires_at IS NULL OR lease_expires_at <= ?1))
                    THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'processing' AND lease_expires_at > ?1
                    AND started_at IS NOT NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'processing' AND lease_expires_at > ?1
                    AND started_at IS NULL THEN 1 ELSE 0 END), 0)
             FROM tasks",
            [&now],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT locked_by FROM tasks
             WHERE status = ?1 AND locked_by IS NOT NULL AND lease_expires_at > ?2
             ORDER BY locked_by ASC",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let workers = stmt
        .query_map(rusqlite::params![TaskStatus::Processing.as_str(), &now], |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let (pending, processing, reserved) = (pending as u64, processing as u64, reserved as u64);
    Ok(QueueStatus {
        pending,
        processing,
        reserved,
        total: pending + processing + reserved,
        workers,
    })
}
