//! Unified error type for the clipforge task engine.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for an API collaborator to derive an HTTP status code via [`Error::http_status`].

use std::fmt;

use crate::task::TaskStatus;

/// Unified error type covering all failure modes in clipforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "task", "artifact").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An illegal state-machine move was attempted. State is unchanged.
    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {id} is not retryable (status: {status})")]
    NotRetryable { id: String, status: TaskStatus },

    #[error("Task {id} is not cancellable (status: {status})")]
    NotCancellable { id: String, status: TaskStatus },

    /// The worker's lease expired or was reclaimed by another worker.
    #[error("Lease lost on task {task_id} by worker {worker_id}")]
    LeaseLost { task_id: String, worker_id: String },

    /// A processor failed while executing a step.
    #[error("Execution error [{step}]: {message}")]
    Execution {
        /// The operation that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// An intermediate artifact could not be deleted during rollback.
    #[error("Rollback error [{artifact}]: {message}")]
    Rollback { artifact: String, message: String },

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::InvalidTransition { .. } => 409,
            Error::NotRetryable { .. } => 409,
            Error::NotCancellable { .. } => 409,
            Error::LeaseLost { .. } => 409,
            Error::Execution { .. } => 500,
            Error::Rollback { .. } => 500,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Execution`].
    pub fn execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Execution {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::InvalidTransition`].
    pub fn invalid_transition(id: impl fmt::Display, from: TaskStatus, to: TaskStatus) -> Self {
        Error::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        }
    }

    /// Convenience constructor for [`Error::LeaseLost`].
    pub fn lease_lost(task_id: impl fmt::Display, worker_id: impl Into<String>) -> Self {
        Error::LeaseLost {
            task_id: task_id.to_string(),
            worker_id: worker_id.into(),
        }
    }

    /// Whether this error is rejected before any side effect occurs.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
