//! WorkerLoop - 常駐コンシューマ
//!
//! # フロー
//! 1. DeliveryQueue::receive() で long-poll
//! 2. WorkerHandler::handle_batch() でバッチ処理
//! 3. `should_acknowledge()` なレコードだけ acknowledge
//!    （Storage 失敗は残して visibility timeout 後の再配送に任せる）
//!
//! shutdown は watch channel で通知します。処理中のバッチは最後まで実行します。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::app::worker::WorkerHandler;
use crate::domain::BatchSummary;
use crate::ports::DeliveryQueue;

/// Receive parameters for each poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub max_messages: usize,
    pub wait: Duration,
    /// Pause after a failed receive before trying again.
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Worker loop handle.
/// - `request_shutdown()` で新しい receive を止める
/// - `shutdown_and_join()` で終了を待てる
pub struct WorkerLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerLoop {
    pub fn spawn(
        queue: Arc<dyn DeliveryQueue>,
        handler: Arc<WorkerHandler>,
        settings: PollSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run(queue, handler, settings, shutdown_rx));
        tracing::info!(
            max_messages = settings.max_messages,
            wait_secs = settings.wait.as_secs(),
            "worker loop started"
        );
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "worker loop panicked");
        }
        tracing::info!("worker loop stopped");
    }
}

async fn run(
    queue: Arc<dyn DeliveryQueue>,
    handler: Arc<WorkerHandler>,
    settings: PollSettings,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // receive は待つ可能性があるので shutdown と競合させる
        let received = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            received = queue.receive(settings.max_messages, settings.wait) => received,
        };

        let deliveries = match received {
            Ok(deliveries) => deliveries,
            Err(e) => {
                tracing::warn!(error = %e, "receive failed");
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(settings.error_backoff) => {}
                }
                continue;
            }
        };
        if deliveries.is_empty() {
            continue;
        }

        let summary = handler.handle_batch(&deliveries).await;
        acknowledge_batch(queue.as_ref(), &summary).await;
    }
}

/// Acknowledge every record that should not be redelivered.
/// Returns how many acknowledgments succeeded.
pub async fn acknowledge_batch(queue: &dyn DeliveryQueue, summary: &BatchSummary) -> usize {
    let mut acknowledged = 0;
    for record in summary.records.iter().filter(|r| r.should_acknowledge()) {
        match queue.acknowledge(&record.receipt).await {
            Ok(()) => acknowledged += 1,
            Err(e) => {
                // 非致命的: timeout 後に再配送され、終端状態なら Skipped になる
                tracing::warn!(receipt = %record.receipt, error = %e, "acknowledge failed");
            }
        }
    }
    acknowledged
}
