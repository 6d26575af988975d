//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use cf_core::{OperationType, TaskId, TaskStatus, TaskType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::timestamp;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

/// Parse a UUID-based ID from a text column.
fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))?;
    Ok(T::from(uuid))
}

/// Parse a `snake_case` enum from a text column.
fn parse_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = cf_core::Error>,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_error(idx, e))
}

fn parse_opt_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| serde_json::from_str(&v).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    timestamp::parse(&s).map_err(|e| conversion_error(idx, e))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| timestamp::parse(&v).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task row. Serializes to the representation exchanged with calling
/// collaborators; lease bookkeeping columns are not part of it.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub input_files: Vec<String>,
    pub output_files: Vec<String>,
    pub config: serde_json::Value,
    pub error_message: Option<String>,
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    pub retry_count: u32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub cancel_requested: bool,
    #[serde(skip)]
    pub locked_by: Option<String>,
    #[serde(skip)]
    pub locked_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            task_type: parse_enum(row, 1)?,
            status: parse_enum(row, 2)?,
            input_files: parse_json(row, 3)?,
            output_files: parse_json(row, 4)?,
            config: parse_json(row, 5)?,
            progress: row.get(6)?,
            error_message: row.get(7)?,
            result: parse_opt_json(row, 8)?,
            retry_count: row.get(9)?,
            priority: row.get(10)?,
            cancel_requested: row.get(11)?,
            locked_by: row.get(12)?,
            locked_at: parse_opt_ts(row, 13)?,
            lease_expires_at: parse_opt_ts(row, 14)?,
            started_at: parse_opt_ts(row, 15)?,
            created_at: parse_ts(row, 16)?,
            updated_at: parse_ts(row, 17)?,
            completed_at: parse_opt_ts(row, 18)?,
        })
    }

    /// The lease currently recorded on this task, if it is still valid.
    pub fn lease(&self) -> Option<Lease> {
        let (worker_id, acquired_at, expires_at) =
            (self.locked_by.clone()?, self.locked_at?, self.lease_expires_at?);
        if self.status != TaskStatus::Processing || expires_at <= Utc::now() {
            return None;
        }
        Some(Lease {
            task_id: self.id,
            worker_id,
            acquired_at,
            expires_at,
        })
    }
}

/// Filter for task listings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<TaskType>,
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// A worker's time-bounded exclusive claim on a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lease {
    pub task_id: TaskId,
    pub worker_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a successful lease renewal.
#[derive(Debug, Clone, Copy)]
pub struct LeaseRenewal {
    pub expires_at: DateTime<Utc>,
    /// A user asked for the task to be cancelled.
    pub cancel_requested: bool,
}

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Queue introspection snapshot for operational collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Waiting tasks, including processing tasks whose lease lapsed.
    pub pending: u64,
    /// Leased tasks whose worker has begun executing a step.
    pub processing: u64,
    /// Leased tasks whose worker has not started a step yet.
    pub reserved: u64,
    pub total: u64,
    /// Workers holding at least one valid lease.
    pub workers: Vec<String>,
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub cache_key: String,
    pub op_type: OperationType,
    pub output_files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            cache_key: row.get(0)?,
            op_type: parse_enum(row, 1)?,
            output_files: parse_json(row, 2)?,
            created_at: parse_ts(row, 3)?,
            expires_at: parse_ts(row, 4)?,
        })
    }
}
