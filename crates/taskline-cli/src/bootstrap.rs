//! Wiring: build stores, queues and handlers from `Config`.

use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use taskline_core::app::{TaskService, WorkerHandler};
use taskline_core::config::{Config, QueueBackend};
use taskline_core::impls::{
    InMemoryDeliveryQueue, SqliteDeliveryQueue, SqliteTaskStore, SummaryProcessor,
};
use taskline_core::ports::{Clock, Delivery, DeliveryQueue, SystemClock, TaskStore};

pub struct Components {
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<dyn DeliveryQueue>,
    pub clock: Arc<dyn Clock>,
}

impl Components {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteTaskStore::open(&config.database_path)
            .await
            .with_context(|| {
                format!(
                    "failed to open task store at {}",
                    config.database_path.display()
                )
            })?;

        let queue: Arc<dyn DeliveryQueue> = match config.queue_backend {
            QueueBackend::Sqlite => Arc::new(
                SqliteDeliveryQueue::open(&config.database_path, config.visibility_timeout)
                    .await
                    .context("failed to open sqlite delivery queue")?,
            ),
            QueueBackend::Memory => Arc::new(InMemoryDeliveryQueue::new(config.visibility_timeout)),
        };

        tracing::info!(
            database = %config.database_path.display(),
            queue = queue.backend(),
            "components ready"
        );
        Ok(Self {
            store: Arc::new(store),
            queue,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn service(&self) -> TaskService {
        TaskService::new(self.store.clone(), self.queue.clone(), self.clock.clone())
    }

    pub fn worker_handler(&self, config: &Config) -> Arc<WorkerHandler> {
        let processor = Arc::new(SummaryProcessor::new(self.clock.clone()));
        Arc::new(
            WorkerHandler::new(self.store.clone(), processor, self.clock.clone())
                .with_process_timeout(config.process_timeout),
        )
    }
}

/// Queue-trigger event: `{"Records": [{"body": "...", "receiptHandle": "..."}]}`.
#[derive(Debug, Deserialize)]
pub struct QueueEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<Delivery>,
}

impl QueueEvent {
    /// Serde would also accept a JSON array for a struct, so only objects pass.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).context("invalid queue event JSON")?;
        if !value.is_object() {
            anyhow::bail!("queue event must be a JSON object with a `Records` array");
        }
        serde_json::from_value(value).context("invalid queue event")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_event_and_ignores_extra_fields() {
        let raw = r#"{
            "Records": [
                {"messageId": "m1", "receiptHandle": "rh-1", "body": "{\"task_id\": 1, \"title\": \"t\"}"},
                {"body": "not json"}
            ]
        }"#;
        let event = QueueEvent::parse(raw).unwrap();
        assert_eq!(event.records.len(), 2);
        assert_eq!(event.records[0].receipt.as_str(), "rh-1");
        assert!(event.records[1].receipt.is_empty());
    }

    #[test]
    fn missing_records_is_an_empty_batch() {
        assert!(QueueEvent::parse("{}").unwrap().records.is_empty());
    }

    #[test]
    fn non_object_events_are_rejected() {
        for raw in ["[]", r#"[{"body": "x"}]"#, "null", "3", "not json"] {
            assert!(QueueEvent::parse(raw).is_err(), "{raw}");
        }
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: dir.path().join("tasks.db"),
            ..Config::default()
        };
        let components = Components::open(&config).await.unwrap();
        assert_eq!(components.queue.backend(), "sqlite");
        assert!(config.database_path.exists());

        let task = components.service().create("t", None).await.unwrap();
        let batch = components
            .queue
            .receive(1, std::time::Duration::ZERO)
            .await
            .unwrap();
        let summary = components
            .worker_handler(&config)
            .handle_batch(&batch)
            .await;
        assert_eq!(summary.processed(), vec![task.id]);
    }
}
