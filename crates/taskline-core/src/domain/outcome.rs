//! Outcome model: per-record results of a worker batch.
//!
//! The worker never lets one record's failure abort the batch. Instead each
//! record yields a `RecordReport`, and the caller (worker loop or the
//! batch-handler entry point) decides what to acknowledge.

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskStatus;
use crate::ports::Receipt;

/// Why a record failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The body could not be decoded into a task message.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The message refers to a task that no longer exists.
    #[error("task with id {0} not found")]
    TaskNotFound(TaskId),

    /// The processing routine failed (or timed out). The task row is FAILED.
    #[error("{0}")]
    Processing(String),

    /// The store could not be updated; the row may still say PROCESSING.
    #[error("storage error: {0}")]
    Storage(String),
}

impl FailureReason {
    /// Should the message stay on the queue for visibility-timeout redelivery?
    ///
    /// Only storage failures qualify: a malformed body or a missing task
    /// will never succeed, and a processing failure is already recorded on
    /// the row (reprocess is the manual retry path).
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::Storage(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Completed { result: String },

    /// Duplicate delivery of a task that already reached a terminal state.
    Skipped { status: TaskStatus },

    /// The row left PROCESSING while the routine ran (reset for reprocessing,
    /// or finished by another delivery). The result was discarded.
    Superseded { status: TaskStatus },

    Failed { reason: FailureReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    pub task_id: Option<TaskId>,
    pub receipt: Receipt,
    pub outcome: RecordOutcome,
}

impl RecordReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, RecordOutcome::Failed { .. })
    }

    /// Acknowledge everything except failures that redelivery could fix.
    pub fn should_acknowledge(&self) -> bool {
        match &self.outcome {
            RecordOutcome::Failed { reason } => !reason.is_retryable(),
            _ => true,
        }
    }
}

/// Aggregate of one batch, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub records: Vec<RecordReport>,
}

impl BatchSummary {
    pub fn push(&mut self, report: RecordReport) {
        self.records.push(report);
    }

    pub fn processed(&self) -> Vec<TaskId> {
        self.records
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.task_id)
            .collect()
    }

    pub fn failed(&self) -> Vec<&RecordReport> {
        self.records.iter().filter(|r| !r.is_success()).collect()
    }

    pub fn to_response(&self) -> BatchResponse {
        BatchResponse {
            message: "Processing complete".to_string(),
            processed: self.processed(),
            failed: self
                .failed()
                .into_iter()
                .map(|r| FailedRecord {
                    task_id: r.task_id.map_or(RecordRef::Unknown, RecordRef::Id),
                    error: match &r.outcome {
                        RecordOutcome::Failed { reason } => reason.to_string(),
                        _ => String::new(),
                    },
                })
                .collect(),
        }
    }
}

/// Serializable batch result, shaped like the queue-trigger handler response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResponse {
    pub message: String,
    pub processed: Vec<TaskId>,
    pub failed: Vec<FailedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRecord {
    pub task_id: RecordRef,
    pub error: String,
}

/// `task_id` of a failed record: the id, or the literal `"unknown"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef {
    Id(TaskId),
    Unknown,
}

impl Serialize for RecordRef {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            RecordRef::Id(id) => id.serialize(s),
            RecordRef::Unknown => s.serialize_str("unknown"),
        }
    }
}
