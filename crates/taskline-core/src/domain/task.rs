//! Task record and the inputs that create or mutate it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::errors::TaskError;
use super::ids::TaskId;
use super::state::TaskStatus;

pub const TITLE_MAX_CHARS: usize = 255;

/// A persisted task row.
///
/// Design:
/// - `id` is assigned by the store and never changes.
/// - `result` stays empty until a worker completes or fails the task.
/// - `updated_at` strictly increases with every mutation (see [`Task::apply`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Apply a change set to this row.
    ///
    /// A [`Precondition`] is checked first, then status changes are checked
    /// against [`TaskStatus::can_transition_to`] unless the change set is a rollback.
    pub fn apply(&mut self, changes: &TaskChanges, now: DateTime<Utc>) -> Result<(), TaskError> {
        if let Some(precondition) = changes.precondition
            && !precondition.holds(self)
        {
            return Err(TaskError::Conflict {
                id: self.id,
                status: self.status,
            });
        }

        if let Some(next) = changes.status
            && !changes.rollback
            && !self.status.can_transition_to(next)
        {
            return Err(TaskError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }

        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        if let Some(description) = &changes.description {
            self.description = description.clone();
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(result) = &changes.result {
            self.result = result.clone();
        }
        self.updated_at = next_updated_at(self.updated_at, now);
        Ok(())
    }
}

/// Timestamps are stored with microsecond precision, so the minimum step is 1µs.
pub fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::microseconds(1);
    if now >= floor { truncate_micros(now) } else { floor }
}

pub fn truncate_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(t.timestamp_micros()).unwrap_or(t)
}

/// Validated input for creating a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    title: String,
    description: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, description: Option<String>) -> Result<Self, TaskError> {
        let title = title.into();
        validate_title(&title)?;
        Ok(Self { title, description })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

pub fn validate_title(title: &str) -> Result<(), TaskError> {
    if title.trim().is_empty() {
        return Err(TaskError::Validation("title must not be empty".to_string()));
    }
    let len = title.chars().count();
    if len > TITLE_MAX_CHARS {
        return Err(TaskError::Validation(format!(
            "title must be at most {TITLE_MAX_CHARS} characters (got {len})"
        )));
    }
    Ok(())
}

/// Partial update as sent by API clients.
///
/// `description` distinguishes "absent" (leave unchanged) from `null` (clear).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,

    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn into_changes(self) -> Result<TaskChanges, TaskError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        Ok(TaskChanges {
            title: self.title,
            description: self.description,
            status: self.status,
            result: None,
            ..TaskChanges::default()
        })
    }
}

fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// Compare-and-set guard evaluated against the current row, inside the
/// store's lock or transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The row must currently have this status.
    Status(TaskStatus),
    /// The row must not have been written since this `updated_at`.
    UnchangedSince(DateTime<Utc>),
}

impl Precondition {
    fn holds(self, task: &Task) -> bool {
        match self {
            Precondition::Status(status) => task.status == status,
            Precondition::UnchangedSince(at) => task.updated_at == at,
        }
    }
}

/// Store-level change set. `None` means "leave the column alone".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub result: Option<Option<String>>,
    precondition: Option<Precondition>,
    rollback: bool,
}

impl TaskChanges {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn finish(status: TaskStatus, result: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            result: Some(Some(result.into())),
            ..Self::default()
        }
    }

    /// Reset for manual reprocessing: back to PENDING with the old result cleared.
    pub fn reset() -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            result: Some(None),
            ..Self::default()
        }
    }

    /// Restore status and result from a snapshot, bypassing the transition table.
    pub fn rollback(snapshot: &Task) -> Self {
        Self {
            status: Some(snapshot.status),
            result: Some(snapshot.result.clone()),
            rollback: true,
            ..Self::default()
        }
    }

    /// Fail with [`TaskError::Conflict`] unless `precondition` holds.
    pub fn expecting(mut self, precondition: Precondition) -> Self {
        self.precondition = Some(precondition);
        self
    }
}

/// Offset/limit pagination in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: u64,
    #[serde(default = "Page::default_limit")]
    pub limit: u64,
}

impl Page {
    pub const DEFAULT_LIMIT: u64 = 100;

    pub fn new(skip: u64, limit: u64) -> Self {
        Self { skip, limit }
    }

    fn default_limit() -> u64 {
        Self::DEFAULT_LIMIT
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_LIMIT)
    }
}
