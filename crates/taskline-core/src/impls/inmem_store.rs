//! InMemoryTaskStore - テスト・開発用の正本
//!
//! # 実装詳細
//! - BTreeMap<TaskId, Task> で ID 昇順（= 作成順）を保つ
//! - tokio の Mutex で排他制御（1 行の更新はロックの内側で完結する）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::domain::task::truncate_micros;
use crate::domain::{NewTask, Page, Task, TaskChanges, TaskError, TaskId, TaskStatus};
use crate::ports::{TaskStore, empty_counts};

struct InMemoryState {
    tasks: BTreeMap<TaskId, Task>,
    next_id: i64,
}

pub struct InMemoryTaskStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InMemoryState {
                tasks: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &NewTask, now: DateTime<Utc>) -> Result<Task, TaskError> {
        let mut state = self.state.lock().await;
        let id = TaskId::new(state.next_id);
        state.next_id += 1;

        let now = truncate_micros(now);
        let record = Task {
            id,
            title: task.title().to_string(),
            description: task.description().map(str::to_string),
            status: TaskStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        };
        state.tasks.insert(id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn list(&self, page: Page) -> Result<Vec<Task>, TaskError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .skip(page.skip as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn apply(
        &self,
        id: TaskId,
        changes: &TaskChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskError> {
        let mut state = self.state.lock().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(None);
        };
        // 検証に失敗したら元の行を残す
        let mut updated = task.clone();
        updated.apply(changes, now)?;
        *task = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, id: TaskId) -> Result<bool, TaskError> {
        let mut state = self.state.lock().await;
        Ok(state.tasks.remove(&id).is_some())
    }

    async fn counts_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>, TaskError> {
        let state = self.state.lock().await;
        let mut counts = empty_counts();
        for task in state.tasks.values() {
            *counts.entry(task.status).or_default() += 1;
        }
        Ok(counts)
    }

    async fn recent(&self, limit: u64) -> Result<Vec<Task>, TaskError> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .values()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
