//! TaskStore port - タスクの正本（source of truth）
//!
//! TaskStore は `tasks` テーブルを管理します：
//! - 行の作成（ID の採番）
//! - 取得・一覧（作成順のページング）
//! - 部分更新（1 行単位でアトミック）
//! - 削除
//!
//! # 実装
//! - `InMemoryTaskStore`（テスト・開発用）
//! - `SqliteTaskStore`（rusqlite）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::domain::{NewTask, Page, Task, TaskChanges, TaskError, TaskId, TaskStatus};

/// TaskStore は状態の正本
///
/// # 設計原則
/// - 1 行の更新はアトミック（`Precondition` 付きなら compare-and-set、なければ last-writer-wins）
/// - 状態遷移の検証は `Task::apply` に委譲し、ロック／トランザクションの内側で行う
/// - 時刻は呼び出し側（Clock）から受け取る
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// 新しい行を PENDING で作成し、採番済みの Task を返す
    async fn insert(&self, task: &NewTask, now: DateTime<Utc>) -> Result<Task, TaskError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskError>;

    /// 作成順（ID 昇順）で `skip` 件飛ばして最大 `limit` 件
    async fn list(&self, page: Page) -> Result<Vec<Task>, TaskError>;

    /// 変更を適用して更新後の行を返す。行がなければ `Ok(None)`
    async fn apply(
        &self,
        id: TaskId,
        changes: &TaskChanges,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, TaskError>;

    /// 削除できたら `true`
    async fn delete(&self, id: TaskId) -> Result<bool, TaskError>;

    /// 状態ごとの件数（0 件の状態も含む）
    async fn counts_by_status(&self) -> Result<BTreeMap<TaskStatus, u64>, TaskError>;

    /// 作成日時の新しい順に最大 `limit` 件
    async fn recent(&self, limit: u64) -> Result<Vec<Task>, TaskError>;
}

/// Every status with a zero count, as a starting point for aggregation.
pub fn empty_counts() -> BTreeMap<TaskStatus, u64> {
    TaskStatus::ALL.iter().map(|s| (*s, 0)).collect()
}
