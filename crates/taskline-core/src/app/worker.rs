//! WorkerHandler - 配送されたメッセージを 1 バッチ分処理する
//!
//! # フロー（レコードごと）
//! 1. body を TaskMessage に decode（失敗したら MalformedPayload）
//! 2. PROCESSING にする（終端状態なら重複配送として Skipped）
//! 3. TaskProcessor を実行（timeout 付き）
//! 4. 成功: COMPLETED + result / 失敗: FAILED + エラー内容
//!    （行がもう PROCESSING でなければ書き込まずに Superseded）
//!
//! 1 件の失敗が後続のレコードを止めることはありません。
//! acknowledge するかどうかは呼び出し側が `RecordReport` を見て決めます。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    BatchSummary, FailureReason, Precondition, RecordOutcome, RecordReport, TaskChanges,
    TaskError, TaskId, TaskMessage, TaskStatus, peek_task_id,
};
use crate::ports::{Clock, Delivery, ProcessError, TaskProcessor, TaskStore};

pub struct WorkerHandler {
    store: Arc<dyn TaskStore>,
    processor: Arc<dyn TaskProcessor>,
    clock: Arc<dyn Clock>,
    process_timeout: Option<Duration>,
}

impl WorkerHandler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        processor: Arc<dyn TaskProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            processor,
            clock,
            process_timeout: None,
        }
    }

    /// Bound each processing call; a timeout counts as a processing failure.
    pub fn with_process_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.process_timeout = timeout;
        self
    }

    /// Process records sequentially, in delivery order.
    pub async fn handle_batch(&self, deliveries: &[Delivery]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for delivery in deliveries {
            summary.push(self.handle_record(delivery).await);
        }
        tracing::info!(
            records = deliveries.len(),
            processed = summary.processed().len(),
            failed = summary.failed().len(),
            "batch handled"
        );
        summary
    }

    async fn handle_record(&self, delivery: &Delivery) -> RecordReport {
        let message = match TaskMessage::decode(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                let task_id = peek_task_id(&delivery.body);
                tracing::warn!(receipt = %delivery.receipt, error = %e, "malformed payload");
                return RecordReport {
                    task_id,
                    receipt: delivery.receipt.clone(),
                    outcome: RecordOutcome::Failed {
                        reason: FailureReason::MalformedPayload(e.to_string()),
                    },
                };
            }
        };

        let outcome = self.run(&message).await;
        if let RecordOutcome::Failed { reason } = &outcome {
            tracing::warn!(task_id = %message.task_id, error = %reason, "record failed");
        }
        RecordReport {
            task_id: Some(message.task_id),
            receipt: delivery.receipt.clone(),
            outcome,
        }
    }

    async fn run(&self, message: &TaskMessage) -> RecordOutcome {
        let id = message.task_id;

        match self
            .store
            .apply(id, &TaskChanges::status(TaskStatus::Processing), self.clock.now())
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return failed(FailureReason::TaskNotFound(id)),
            // 終端状態からは PROCESSING に戻れない = 処理済みの重複配送
            Err(TaskError::InvalidTransition { from, .. }) if from.is_terminal() => {
                tracing::info!(task_id = %id, status = %from, "duplicate delivery skipped");
                return RecordOutcome::Skipped { status: from };
            }
            Err(e) => return failed(FailureReason::Storage(e.to_string())),
        }
        tracing::debug!(task_id = %id, "processing");

        match self.process(message).await {
            Ok(result) => {
                let changes = TaskChanges::finish(TaskStatus::Completed, result.clone())
                    .expecting(Precondition::Status(TaskStatus::Processing));
                match self.store.apply(id, &changes, self.clock.now()).await {
                    Ok(Some(_)) => {
                        tracing::info!(task_id = %id, "task completed");
                        RecordOutcome::Completed { result }
                    }
                    Ok(None) => failed(FailureReason::TaskNotFound(id)),
                    Err(TaskError::Conflict { status, .. }) => superseded(id, status),
                    Err(e) => {
                        let reason = format!("Error saving result: {e}");
                        if let Err(mark_err) = self.mark_failed(id, &reason).await {
                            tracing::error!(task_id = %id, error = %mark_err, "failed to mark task as FAILED");
                        }
                        failed(FailureReason::Storage(e.to_string()))
                    }
                }
            }
            Err(e) => match self.mark_failed(id, &format!("Error: {e}")).await {
                Ok(()) => failed(FailureReason::Processing(e.to_string())),
                Err(TaskError::Conflict { status, .. }) => superseded(id, status),
                Err(mark_err) => {
                    tracing::error!(task_id = %id, error = %mark_err, "failed to mark task as FAILED");
                    failed(FailureReason::Storage(format!(
                        "could not record processing failure: {e}"
                    )))
                }
            },
        }
    }

    async fn process(&self, message: &TaskMessage) -> Result<String, ProcessError> {
        let Some(limit) = self.process_timeout else {
            return self.processor.process(message).await;
        };
        match tokio::time::timeout(limit, self.processor.process(message)).await {
            Ok(result) => result,
            Err(_) => Err(ProcessError::new(format!(
                "processing timed out after {}s",
                limit.as_secs_f64()
            ))),
        }
    }

    /// Only a row this delivery still owns (PROCESSING) is marked.
    async fn mark_failed(&self, id: TaskId, reason: &str) -> Result<(), TaskError> {
        let changes = TaskChanges::finish(TaskStatus::Failed, reason)
            .expecting(Precondition::Status(TaskStatus::Processing));
        if self.store.apply(id, &changes, self.clock.now()).await?.is_none() {
            tracing::warn!(task_id = %id, "task disappeared before it could be marked FAILED");
        }
        Ok(())
    }
}

fn failed(reason: FailureReason) -> RecordOutcome {
    RecordOutcome::Failed { reason }
}

fn superseded(id: TaskId, status: TaskStatus) -> RecordOutcome {
    tracing::info!(task_id = %id, status = %status, "task changed while processing; result discarded");
    RecordOutcome::Superseded { status }
}
