//! TaskService - タスクの CRUD と通知の送信
//!
//! # フロー
//! - create: 検証 → insert（PENDING）→ send。send 失敗時は行を FAILED にして `Dispatch`
//! - reprocess: PENDING に戻して result を消す → send。send 失敗時は元の状態に戻して `Dispatch`
//!   （どちらも読んだ時点から行が変わっていなければ。変わっていたら `Conflict`）
//!
//! 他の操作は TaskStore をそのまま呼ぶだけで、ID がなければ `NotFound` を返します。

use std::sync::Arc;

use crate::app::status::SystemStatus;
use crate::domain::{
    NewTask, Page, Precondition, Task, TaskChanges, TaskError, TaskId, TaskMessage, TaskPatch,
    TaskStatus,
};
use crate::ports::{Clock, DeliveryQueue, TaskStore};

#[derive(Clone)]
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DeliveryQueue>,
    clock: Arc<dyn Clock>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DeliveryQueue>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    /// Insert a PENDING task and notify the queue.
    ///
    /// When the notification fails the row is kept but marked FAILED, and the
    /// error carries its id so the caller can still report it.
    pub async fn create(
        &self,
        title: impl Into<String>,
        description: Option<String>,
    ) -> Result<Task, TaskError> {
        let new_task = NewTask::new(title, description)?;
        let task = self.store.insert(&new_task, self.clock.now()).await?;
        tracing::info!(task_id = %task.id, "task created");

        if let Err(source) = self.queue.send(&TaskMessage::for_task(&task)).await {
            tracing::error!(task_id = %task.id, error = %source, "failed to send task to queue");
            let changes = TaskChanges::finish(
                TaskStatus::Failed,
                format!("Failed to send to queue: {source}"),
            );
            if let Err(e) = self.store.apply(task.id, &changes, self.clock.now()).await {
                tracing::error!(task_id = %task.id, error = %e, "failed to mark task as FAILED");
            }
            return Err(TaskError::Dispatch {
                task_id: Some(task.id),
                source,
            });
        }
        Ok(task)
    }

    pub async fn list(&self, page: Page) -> Result<Vec<Task>, TaskError> {
        self.store.list(page).await
    }

    pub async fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        self.store.get(id).await?.ok_or(TaskError::NotFound(id))
    }

    /// Apply only the supplied fields.
    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, TaskError> {
        let changes = patch.into_changes()?;
        let task = self
            .store
            .apply(id, &changes, self.clock.now())
            .await?
            .ok_or(TaskError::NotFound(id))?;
        tracing::info!(task_id = %id, status = %task.status, "task updated");
        Ok(task)
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), TaskError> {
        if !self.store.delete(id).await? {
            return Err(TaskError::NotFound(id));
        }
        tracing::info!(task_id = %id, "task deleted");
        Ok(())
    }

    /// Reset the task to PENDING (clearing the previous result) and send it again.
    ///
    /// The reset happens before the send so a fast worker cannot have its
    /// PROCESSING overwritten. Both the reset and the restore after a failed
    /// send are conditional on the row being unchanged since it was last read,
    /// so neither overwrites a concurrent worker write.
    pub async fn reprocess(&self, id: TaskId) -> Result<Task, TaskError> {
        let before = self.get(id).await?;
        let reset =
            TaskChanges::reset().expecting(Precondition::UnchangedSince(before.updated_at));
        let task = self
            .store
            .apply(id, &reset, self.clock.now())
            .await?
            .ok_or(TaskError::NotFound(id))?;

        if let Err(source) = self.queue.send(&TaskMessage::for_task(&task)).await {
            tracing::error!(task_id = %id, error = %source, "failed to resend task to queue");
            let restore = TaskChanges::rollback(&before)
                .expecting(Precondition::UnchangedSince(task.updated_at));
            match self.store.apply(id, &restore, self.clock.now()).await {
                Ok(_) => {}
                Err(TaskError::Conflict { status, .. }) => {
                    tracing::warn!(task_id = %id, %status, "task changed after reset; not restored");
                }
                Err(e) => {
                    tracing::error!(task_id = %id, error = %e, "failed to restore task after dispatch failure");
                }
            }
            return Err(TaskError::Dispatch {
                task_id: None,
                source,
            });
        }
        tracing::info!(task_id = %id, "task sent for reprocessing");
        Ok(task)
    }

    /// Task totals, recent tasks and queue depth.
    pub async fn status(&self) -> Result<SystemStatus, TaskError> {
        SystemStatus::collect(self.store.as_ref(), self.queue.as_ref(), self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryDeliveryQueue, InMemoryTaskStore};
    use crate::ports::{Delivery, FixedClock, QueueCounts, QueueError, Receipt, SystemClock};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct Fixture {
        service: TaskService,
        store: Arc<InMemoryTaskStore>,
        queue: Arc<InMemoryDeliveryQueue>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(30)));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        Fixture {
            service: TaskService::new(store.clone(), queue.clone(), clock),
            store,
            queue,
        }
    }

    async fn received(queue: &InMemoryDeliveryQueue) -> Vec<TaskMessage> {
        queue
            .receive(10, Duration::ZERO)
            .await
            .unwrap()
            .iter()
            .map(|d| TaskMessage::decode(&d.body).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn create_returns_pending_task_and_sends_message() {
        let f = fixture();
        let task = f
            .service
            .create("Test Task", Some("details".into()))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.result, None);
        assert_eq!(received(&f.queue).await, vec![TaskMessage::for_task(&task)]);

        let fetched = f.service.get(task.id).await.unwrap();
        assert_eq!(fetched.title, "Test Task");
        assert_eq!(fetched.description.as_deref(), Some("details"));
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn create_assigns_fresh_ids() {
        let f = fixture();
        let a = f.service.create("a", None).await.unwrap();
        let b = f.service.create("b", None).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn create_with_empty_title_persists_nothing() {
        let f = fixture();
        for title in ["", "   "] {
            let err = f.service.create(title, None).await.unwrap_err();
            assert!(matches!(err, TaskError::Validation(_)));
        }
        let too_long = "x".repeat(256);
        let err = f.service.create(too_long, None).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));

        assert!(f.service.list(Page::default()).await.unwrap().is_empty());
        assert!(received(&f.queue).await.is_empty());
    }

    #[tokio::test]
    async fn create_with_closed_queue_marks_task_failed() {
        let f = fixture();
        f.queue.close().await;

        let err = f.service.create("Test Task", None).await.unwrap_err();
        let TaskError::Dispatch {
            task_id: Some(id), ..
        } = &err
        else {
            panic!("expected dispatch error, got {err:?}");
        };

        let task = f.store.get(*id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(
            task.result
                .as_deref()
                .is_some_and(|r| r.starts_with("Failed to send to queue"))
        );
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let f = fixture();
        let err = f.service.get(TaskId::new(99)).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound(id) if id == TaskId::new(99)));
    }

    #[tokio::test]
    async fn update_applies_only_supplied_fields() {
        let f = fixture();
        let task = f
            .service
            .create("Original", Some("keep me".into()))
            .await
            .unwrap();

        let patch = TaskPatch {
            title: Some("Renamed".into()),
            ..TaskPatch::default()
        };
        let updated = f.service.update(task.id, patch).await.unwrap();

        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.description.as_deref(), Some("keep me"));
        assert_eq!(updated.status, TaskStatus::Pending);
        assert_eq!(updated.created_at, task.created_at);
        assert!(updated.updated_at > task.updated_at);

        let again = f
            .service
            .update(task.id, TaskPatch::default())
            .await
            .unwrap();
        assert!(again.updated_at > updated.updated_at);
    }

    #[tokio::test]
    async fn update_can_clear_description() {
        let f = fixture();
        let task = f.service.create("t", Some("d".into())).await.unwrap();
        let patch: TaskPatch = serde_json::from_str(r#"{"description": null}"#).unwrap();
        let updated = f.service.update(task.id, patch).await.unwrap();
        assert_eq!(updated.description, None);
    }

    #[tokio::test]
    async fn update_rejects_invalid_transition_and_missing_ids() {
        let f = fixture();
        let task = f.service.create("t", None).await.unwrap();

        let patch = TaskPatch {
            status: Some(TaskStatus::Completed),
            ..TaskPatch::default()
        };
        let err = f.service.update(task.id, patch).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));

        let err = f
            .service
            .update(TaskId::new(42), TaskPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let f = fixture();
        let task = f.service.create("t", None).await.unwrap();
        f.service.delete(task.id).await.unwrap();

        assert!(matches!(
            f.service.get(task.id).await,
            Err(TaskError::NotFound(_))
        ));
        assert!(matches!(
            f.service.delete(task.id).await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_pages_in_creation_order() {
        let f = fixture();
        for i in 1..=5 {
            f.service.create(format!("Task {i}"), None).await.unwrap();
        }
        let titles: Vec<_> = f
            .service
            .list(Page::new(2, 2))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Task 3", "Task 4"]);
    }

    #[tokio::test]
    async fn reprocess_resets_to_pending_and_clears_result() {
        let f = fixture();
        let task = f.service.create("t", None).await.unwrap();
        received(&f.queue).await;
        f.store
            .apply(task.id, &TaskChanges::status(TaskStatus::Processing), Utc::now())
            .await
            .unwrap();
        f.store
            .apply(
                task.id,
                &TaskChanges::finish(TaskStatus::Failed, "boom"),
                Utc::now(),
            )
            .await
            .unwrap();

        let reset = f.service.reprocess(task.id).await.unwrap();
        assert_eq!(reset.status, TaskStatus::Pending);
        assert_eq!(reset.result, None);
        assert_eq!(received(&f.queue).await.len(), 1);
    }

    #[tokio::test]
    async fn reprocess_dispatch_failure_leaves_status_unchanged() {
        let f = fixture();
        let task = f.service.create("t", None).await.unwrap();
        f.store
            .apply(task.id, &TaskChanges::status(TaskStatus::Processing), Utc::now())
            .await
            .unwrap();
        let before = f
            .store
            .apply(
                task.id,
                &TaskChanges::finish(TaskStatus::Completed, "done"),
                Utc::now(),
            )
            .await
            .unwrap()
            .unwrap();

        f.queue.close().await;
        let err = f.service.reprocess(task.id).await.unwrap_err();
        assert!(matches!(err, TaskError::Dispatch { .. }));

        let after = f.service.get(task.id).await.unwrap();
        assert_eq!(after.status, before.status);
        assert_eq!(after.result, before.result);
    }

    #[tokio::test]
    async fn reprocess_unknown_id_is_not_found() {
        let f = fixture();
        let err = f.service.reprocess(TaskId::new(7)).await.unwrap_err();
        assert!(matches!(err, TaskError::NotFound(_)));
    }

    /// Lets a worker pick the task up mid-send, then fails the send.
    struct WorkerWinsRace {
        store: Arc<InMemoryTaskStore>,
    }

    #[async_trait::async_trait]
    impl DeliveryQueue for WorkerWinsRace {
        async fn send(&self, message: &TaskMessage) -> Result<(), QueueError> {
            self.store
                .apply(
                    message.task_id,
                    &TaskChanges::status(TaskStatus::Processing),
                    Utc::now(),
                )
                .await
                .map_err(|e| QueueError::Transport(e.to_string()))?;
            Err(QueueError::Transport("connection reset".into()))
        }

        async fn receive(&self, _max: usize, _wait: Duration) -> Result<Vec<Delivery>, QueueError> {
            Ok(Vec::new())
        }

        async fn acknowledge(&self, receipt: &Receipt) -> Result<(), QueueError> {
            Err(QueueError::UnknownReceipt(receipt.clone()))
        }

        async fn counts(&self) -> Result<QueueCounts, QueueError> {
            Ok(QueueCounts::default())
        }

        fn backend(&self) -> &'static str {
            "race"
        }
    }

    #[tokio::test]
    async fn reprocess_rollback_does_not_overwrite_a_concurrent_write() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = store
            .insert(&NewTask::new("t", None).unwrap(), Utc::now())
            .await
            .unwrap();
        store
            .apply(task.id, &TaskChanges::status(TaskStatus::Processing), Utc::now())
            .await
            .unwrap();
        store
            .apply(task.id, &TaskChanges::finish(TaskStatus::Completed, "done"), Utc::now())
            .await
            .unwrap();

        let queue = Arc::new(WorkerWinsRace {
            store: store.clone(),
        });
        let service = TaskService::new(store.clone(), queue, Arc::new(SystemClock));

        let err = service.reprocess(task.id).await.unwrap_err();
        assert!(matches!(err, TaskError::Dispatch { .. }));

        let after = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Processing);
        assert_eq!(after.result, None);
    }

    #[tokio::test]
    async fn reprocess_of_a_row_changed_since_read_is_a_conflict() {
        let store = InMemoryTaskStore::new();
        let task = store
            .insert(&NewTask::new("t", None).unwrap(), Utc::now())
            .await
            .unwrap();
        let stale =
            TaskChanges::reset().expecting(Precondition::UnchangedSince(task.updated_at));
        store
            .apply(task.id, &TaskChanges::status(TaskStatus::Processing), Utc::now())
            .await
            .unwrap();

        let err = store.apply(task.id, &stale, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Conflict {
                status: TaskStatus::Processing,
                ..
            }
        ));
    }
}
