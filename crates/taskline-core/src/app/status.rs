//! Status - 管理用のシステム状態
//!
//! DB の件数・最近のタスクと、キューの深さをまとめて返します。
//! キューが読めなくても DB の情報は返す（queue 側にエラーを載せる）。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::{Task, TaskError, TaskStatus};
use crate::ports::{DeliveryQueue, QueueCounts, TaskStore};

pub const RECENT_TASKS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    pub database: DatabaseStatus,
    pub queue: QueueStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStatus {
    pub total_tasks: u64,
    pub by_status: BTreeMap<TaskStatus, u64>,
    pub recent_tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<QueueCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SystemStatus {
    pub async fn collect(
        store: &dyn TaskStore,
        queue: &dyn DeliveryQueue,
        now: DateTime<Utc>,
    ) -> Result<Self, TaskError> {
        let by_status = store.counts_by_status().await?;
        let recent_tasks = store.recent(RECENT_TASKS).await?;

        let queue_status = match queue.counts().await {
            Ok(counts) => QueueStatus {
                backend: queue.backend(),
                metrics: Some(counts),
                error: None,
            },
            Err(e) => {
                tracing::warn!(error = %e, "queue metrics unavailable");
                QueueStatus {
                    backend: queue.backend(),
                    metrics: None,
                    error: Some(e.to_string()),
                }
            }
        };

        Ok(Self {
            timestamp: now,
            database: DatabaseStatus {
                total_tasks: by_status.values().sum(),
                by_status,
                recent_tasks,
            },
            queue: queue_status,
        })
    }
}
