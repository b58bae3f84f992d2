//! Errors - エラー型と分類
//!
//! TaskService の呼び出し元に返るエラーはすべて `TaskError` です。
//! HTTP 層はこの分類をそのままステータスコードに写像します。
//!
//! | variant             | 意味                         | HTTP |
//! |---------------------|------------------------------|------|
//! | `Validation`        | 入力の形・長さが不正         | 422  |
//! | `InvalidTransition` | 許可されていない状態遷移     | 422  |
//! | `NotFound`          | ID が存在しない              | 404  |
//! | `Conflict`          | 並行して行が更新された       | 409  |
//! | `Dispatch`          | キューへの送信失敗           | 500  |
//! | `Storage`           | DB が使えない                | 500  |

use thiserror::Error;

use super::ids::TaskId;
use super::state::{TaskStatus, UnknownStatus};
use crate::ports::QueueError;

/// ErrorKind は運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 呼び出し側の入力が原因（再送しても同じ結果）
    Client,
    /// インフラ（DB / キュー）の障害
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task with id {0} not found")]
    NotFound(TaskId),

    /// A [`Precondition`](super::task::Precondition) did not hold; `status` is the current one.
    #[error("task {id} was modified concurrently (now {status})")]
    Conflict { id: TaskId, status: TaskStatus },

    /// `task_id` is set when the row was written but the notification was not.
    #[error("failed to dispatch task to queue: {source}")]
    Dispatch {
        task_id: Option<TaskId>,
        #[source]
        source: QueueError,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Validation(_)
            | TaskError::InvalidTransition { .. }
            | TaskError::NotFound(_)
            | TaskError::Conflict { .. } => ErrorKind::Client,
            TaskError::Dispatch { .. } | TaskError::Storage(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<rusqlite::Error> for TaskError {
    fn from(e: rusqlite::Error) -> Self {
        TaskError::Storage(e.to_string())
    }
}

impl From<UnknownStatus> for TaskError {
    fn from(e: UnknownStatus) -> Self {
        TaskError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for TaskError {
    fn from(e: tokio::task::JoinError) -> Self {
        TaskError::Storage(format!("storage task join error: {e}"))
    }
}
