//! Task-domain enums, pipeline operations, and the task state machine.
//!
//! All enums serialize to `snake_case` strings, which is also the form stored
//! in the database and exchanged with calling collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Minimum number of operations in a combined pipeline.
pub const MIN_PIPELINE_OPERATIONS: usize = 2;

/// Maximum number of operations in a combined pipeline.
pub const MAX_PIPELINE_OPERATIONS: usize = 10;

/// Most urgent task priority (lower value = more urgent).
pub const MIN_PRIORITY: i32 = 0;

/// Least urgent task priority.
pub const MAX_PRIORITY: i32 = 10;

/// Priority assigned when the submitter does not specify one.
pub const DEFAULT_PRIORITY: i32 = 5;

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Join,
    AudioOverlay,
    TextOverlay,
    Subtitles,
    VideoOverlay,
    /// An ordered chain of 2–10 operations.
    Combined,
}

impl TaskType {
    pub const ALL: [TaskType; 6] = [
        TaskType::Join,
        TaskType::AudioOverlay,
        TaskType::TextOverlay,
        TaskType::Subtitles,
        TaskType::VideoOverlay,
        TaskType::Combined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Join => "join",
            TaskType::AudioOverlay => "audio_overlay",
            TaskType::TextOverlay => "text_overlay",
            TaskType::Subtitles => "subtitles",
            TaskType::VideoOverlay => "video_overlay",
            TaskType::Combined => "combined",
        }
    }

    /// The single operation a non-combined task runs, or `None` for
    /// [`TaskType::Combined`].
    pub fn operation(&self) -> Option<OperationType> {
        match self {
            TaskType::Join => Some(OperationType::Join),
            TaskType::AudioOverlay => Some(OperationType::AudioOverlay),
            TaskType::TextOverlay => Some(OperationType::TextOverlay),
            TaskType::Subtitles => Some(OperationType::Subtitles),
            TaskType::VideoOverlay => Some(OperationType::VideoOverlay),
            TaskType::Combined => None,
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown task type: {s}")))
    }
}

// ---------------------------------------------------------------------------
// OperationType
// ---------------------------------------------------------------------------

/// A single transformation step. Every variant has a registered processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Join,
    AudioOverlay,
    TextOverlay,
    Subtitles,
    VideoOverlay,
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Join,
        OperationType::AudioOverlay,
        OperationType::TextOverlay,
        OperationType::Subtitles,
        OperationType::VideoOverlay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Join => "join",
            OperationType::AudioOverlay => "audio_overlay",
            OperationType::TextOverlay => "text_overlay",
            OperationType::Subtitles => "subtitles",
            OperationType::VideoOverlay => "video_overlay",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        OperationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown operation type: {s}")))
    }
}

impl From<OperationType> for TaskType {
    fn from(op: OperationType) -> Self {
        match op {
            OperationType::Join => TaskType::Join,
            OperationType::AudioOverlay => TaskType::AudioOverlay,
            OperationType::TextOverlay => TaskType::TextOverlay,
            OperationType::Subtitles => TaskType::Subtitles,
            OperationType::VideoOverlay => TaskType::VideoOverlay,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One step of a pipeline: the operation type and its processor-specific
/// configuration. Position in the owning sequence is the sequence index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Operation {
    pub fn new(op_type: OperationType, config: serde_json::Value) -> Self {
        Self { op_type, config }
    }
}

/// Reject combined pipelines outside the 2–10 operation range.
pub fn validate_operation_count(count: usize) -> Result<()> {
    if !(MIN_PIPELINE_OPERATIONS..=MAX_PIPELINE_OPERATIONS).contains(&count) {
        return Err(Error::Validation(format!(
            "combined task requires between {MIN_PIPELINE_OPERATIONS} and \
             {MAX_PIPELINE_OPERATIONS} operations, got {count}"
        )));
    }
    Ok(())
}

/// Reject priorities outside [`MIN_PRIORITY`]..=[`MAX_PRIORITY`].
pub fn validate_priority(priority: i32) -> Result<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(Error::Validation(format!(
            "priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}, got {priority}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// ```text
/// pending ──► processing ──► completed
///    │  ▲          │    └──► failed ──┐
///    │  └──────────┼──────────────────┘ (explicit retry)
///    └─────────────┴──► cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// `completed` and `cancelled` never leave their state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Whether entering this state stamps `completed_at`.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// The transition graph. Everything not listed here is illegal.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown task status: {s}")))
    }
}
