//! InMemoryDeliveryQueue - 開発用の配送キュー
//!
//! # 学習ポイント
//! - tokio の Mutex + Notify による long-poll
//! - visibility timeout による at-least-once 配送
//! - 受信ごとに receipt を発行し、古い receipt での acknowledge を拒否する

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::TaskMessage;
use crate::ports::{
    Delivery, DeliveryQueue, IdGenerator, QueueCounts, QueueError, Receipt, SystemClock,
    UlidGenerator,
};

#[derive(Debug)]
struct StoredMessage {
    body: String,
    /// Hidden from `receive` until this instant.
    visible_at: Instant,
    /// Receipt of the most recent receive, if any.
    receipt: Option<Receipt>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    closed: bool,
}

/// InMemoryDeliveryQueue は開発用の配送キュー
///
/// # 実装詳細
/// - VecDeque<StoredMessage> を送信順に保持
/// - `receive` は見えているメッセージを先頭から最大 `max_messages` 件取り出し、
///   visibility timeout の間隠す
/// - 何もなければ Notify か次に見えるようになる時刻まで待つ
///
/// # 使用例
/// ```ignore
/// let queue = InMemoryDeliveryQueue::new(Duration::from_secs(30));
/// queue.send(&message).await?;
/// let batch = queue.receive(10, Duration::from_secs(5)).await?;
/// queue.acknowledge(&batch[0].receipt).await?;
/// ```
pub struct InMemoryDeliveryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    visibility_timeout: Duration,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryDeliveryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self::with_id_generator(visibility_timeout, UlidGenerator::new(SystemClock))
    }

    pub fn with_id_generator(
        visibility_timeout: Duration,
        ids: impl IdGenerator + 'static,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            visibility_timeout,
            ids: Box::new(ids),
        }
    }

    /// Simulate a transport outage: every later call fails with `Closed`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn send(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let body = message.encode()?;
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.messages.push_back(StoredMessage {
                body,
                visible_at: Instant::now(),
                receipt: None,
                receive_count: 0,
            });
        }
        // 待機中の receive に通知
        self.notify.notify_one();
        tracing::debug!(task_id = %message.task_id, "message sent");
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let max_messages = max_messages.max(1);
        let deadline = Instant::now() + wait;

        loop {
            let next_visible = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(QueueError::Closed);
                }

                let now = Instant::now();
                let mut batch = Vec::new();
                for message in state.messages.iter_mut() {
                    if batch.len() >= max_messages {
                        break;
                    }
                    if message.visible_at > now {
                        continue;
                    }
                    let receipt = self.ids.generate_receipt();
                    message.visible_at = now + self.visibility_timeout;
                    message.receipt = Some(receipt.clone());
                    message.receive_count += 1;
                    batch.push(Delivery::new(receipt, message.body.clone()));
                }
                if !batch.is_empty() {
                    return Ok(batch);
                }

                state.messages.iter().map(|m| m.visible_at).min()
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(wake_at) => {},
            }
        }
    }

    async fn acknowledge(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        let position = state
            .messages
            .iter()
            .position(|m| m.receipt.as_ref() == Some(receipt));
        match position {
            Some(i) => {
                state.messages.remove(i);
                Ok(())
            }
            None => Err(QueueError::UnknownReceipt(receipt.clone())),
        }
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        let now = Instant::now();
        let available = state
            .messages
            .iter()
            .filter(|m| m.visible_at <= now)
            .count() as u64;
        Ok(QueueCounts {
            messages_available: available,
            messages_in_flight: state.messages.len() as u64 - available,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use std::sync::Arc;

    fn message(id: i64) -> TaskMessage {
        TaskMessage {
            task_id: TaskId::new(id),
            title: format!("Task {id}"),
            description: None,
        }
    }

    fn decode(d: &Delivery) -> TaskMessage {
        TaskMessage::decode(&d.body).unwrap()
    }

    #[tokio::test]
    async fn send_receive_acknowledge() {
        let queue = InMemoryDeliveryQueue::new(Duration::from_secs(30));
        queue.send(&message(1)).await.unwrap();

        let batch = queue.receive(10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(decode(&batch[0]), message(1));

        queue.acknowledge(&batch[0].receipt).await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts, QueueCounts::default());
    }

    #[tokio::test]
    async fn receive_respects_max_messages_and_order() {
        let queue = InMemoryDeliveryQueue::new(Duration::from_secs(30));
        for id in 1..=3 {
            queue.send(&message(id)).await.unwrap();
        }

        let first = queue.receive(2, Duration::ZERO).await.unwrap();
        let ids: Vec<_> = first.iter().map(|d| decode(d).task_id.get()).collect();
        assert_eq!(ids, vec![1, 2]);

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.messages_available, 1);
        assert_eq!(counts.messages_in_flight, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn receive_times_out_empty() {
        let queue = InMemoryDeliveryQueue::new(Duration::from_secs(30));
        let start = Instant::now();
        let batch = queue.receive(1, Duration::from_millis(500)).await.unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_message_is_redelivered_with_new_receipt() {
        let queue = InMemoryDeliveryQueue::new(Duration::from_secs(30));
        queue.send(&message(1)).await.unwrap();

        let first = queue.receive(1, Duration::ZERO).await.unwrap();
        assert!(queue.receive(1, Duration::ZERO).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = queue.receive(1, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_ne!(first[0].receipt, second[0].receipt);
        assert_eq!(queue.state.lock().await.messages[0].receive_count, 2);

        // 古い receipt は無効
        let err = queue.acknowledge(&first[0].receipt).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownReceipt(_)));
        queue.acknowledge(&second[0].receipt).await.unwrap();
    }

    #[tokio::test]
    async fn send_wakes_waiting_receive() {
        let queue = Arc::new(InMemoryDeliveryQueue::new(Duration::from_secs(30)));

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.receive(1, Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        queue.send(&message(7)).await.unwrap();

        let batch = waiter.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(decode(&batch[0]).task_id, TaskId::new(7));
    }

    #[tokio::test]
    async fn closed_queue_rejects_everything() {
        let queue = InMemoryDeliveryQueue::new(Duration::from_secs(30));
        queue.close().await;

        assert!(matches!(
            queue.send(&message(1)).await,
            Err(QueueError::Closed)
        ));
        assert!(matches!(
            queue.receive(1, Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
    }
}
