//! Domain model (ids, status, task records, queue messages, outcomes, errors).
//!
//! ドメイン層は外部システム（DB / キュー / HTTP）を知りません。
//! 状態遷移のルールは `state` と `Task::apply` の一箇所に集約しています。

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod state;
pub mod task;

pub use self::envelope::{TaskMessage, peek_task_id};
pub use self::errors::{ErrorKind, TaskError};
pub use self::ids::TaskId;
pub use self::outcome::{
    BatchResponse, BatchSummary, FailedRecord, FailureReason, RecordOutcome, RecordRef,
    RecordReport,
};
pub use self::state::{TaskStatus, UnknownStatus};
pub use self::task::{
    NewTask, Page, Precondition, Task, TaskChanges, TaskPatch, TITLE_MAX_CHARS,
};
