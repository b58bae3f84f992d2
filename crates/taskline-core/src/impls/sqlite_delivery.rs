//! SQLite-backed delivery queue.
//!
//! Lets the API process and a separate worker process share one database
//! file. Visibility is tracked as a wall-clock deadline in unix milliseconds,
//! so it survives across processes; long-polling is a bounded poll loop.

use async_trait::async_trait;
use rusqlite::{Connection, TransactionBehavior, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::TaskMessage;
use crate::ports::{
    Clock, Delivery, DeliveryQueue, IdGenerator, QueueCounts, QueueError, Receipt, SystemClock,
    UlidGenerator,
};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS queue_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    body TEXT NOT NULL,
    sent_at_ms INTEGER NOT NULL,
    visible_at_ms INTEGER NOT NULL,
    receive_count INTEGER NOT NULL DEFAULT 0,
    receipt TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_messages_visible ON queue_messages(visible_at_ms);
CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_messages_receipt ON queue_messages(receipt);
"#;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct SqliteDeliveryQueue {
    conn: Arc<Mutex<Connection>>,
    visibility_timeout: Duration,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl SqliteDeliveryQueue {
    pub async fn open(
        path: impl AsRef<Path>,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            Self::init(&conn)?;
            Ok::<_, QueueError>(conn)
        })
        .await??;
        tracing::debug!("delivery queue ready");
        Ok(Self::from_connection(conn, visibility_timeout))
    }

    pub fn open_in_memory(visibility_timeout: Duration) -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self::from_connection(conn, visibility_timeout))
    }

    fn from_connection(conn: Connection, visibility_timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            visibility_timeout,
            clock: Arc::new(SystemClock),
            ids: Box::new(UlidGenerator::new(SystemClock)),
        }
    }

    /// Replace the clock used for visibility deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn init(conn: &Connection) -> Result<(), QueueError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    async fn run<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, QueueError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }

    /// Claim up to `receipts.len()` visible messages in one transaction.
    async fn claim(&self, receipts: Vec<Receipt>) -> Result<Vec<Delivery>, QueueError> {
        let now_ms = self.now_ms();
        let timeout_ms = i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let hidden_until = now_ms.saturating_add(timeout_ms);
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let visible: Vec<(i64, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT id, body FROM queue_messages
                     WHERE visible_at_ms <= ?1
                     ORDER BY id ASC
                     LIMIT ?2",
                )?;
                stmt.query_map(params![now_ms, receipts.len() as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<_, _>>()?
            };

            let mut batch = Vec::with_capacity(visible.len());
            for ((id, body), receipt) in visible.into_iter().zip(receipts) {
                tx.execute(
                    "UPDATE queue_messages
                     SET receipt = ?1, visible_at_ms = ?2, receive_count = receive_count + 1
                     WHERE id = ?3",
                    params![receipt.as_str(), hidden_until, id],
                )?;
                batch.push(Delivery::new(receipt, body));
            }
            tx.commit()?;
            Ok(batch)
        })
        .await
    }
}

#[async_trait]
impl DeliveryQueue for SqliteDeliveryQueue {
    async fn send(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let body = message.encode()?;
        let now_ms = self.now_ms();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO queue_messages (body, sent_at_ms, visible_at_ms)
                 VALUES (?1, ?2, ?2)",
                params![body, now_ms],
            )?;
            Ok(())
        })
        .await?;
        tracing::debug!(task_id = %message.task_id, "message sent");
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            let receipts = (0..max_messages.max(1))
                .map(|_| self.ids.generate_receipt())
                .collect();
            let batch = self.claim(receipts).await?;
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn acknowledge(&self, receipt: &Receipt) -> Result<(), QueueError> {
        let handle = receipt.as_str().to_string();
        let deleted = self
            .run(move |conn| {
                Ok(conn.execute("DELETE FROM queue_messages WHERE receipt = ?1", params![handle])?)
            })
            .await?;
        if deleted == 0 {
            return Err(QueueError::UnknownReceipt(receipt.clone()));
        }
        Ok(())
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let now_ms = self.now_ms();
        let (available, total) = self
            .run(move |conn| {
                Ok(conn.query_row(
                    "SELECT COALESCE(SUM(CASE WHEN visible_at_ms <= ?1 THEN 1 ELSE 0 END), 0),
                            COUNT(*)
                     FROM queue_messages",
                    params![now_ms],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )?)
            })
            .await?;
        Ok(QueueCounts {
            messages_available: available.max(0) as u64,
            messages_in_flight: (total - available).max(0) as u64,
        })
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
