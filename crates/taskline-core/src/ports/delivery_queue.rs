//! DeliveryQueue port - 通知キュー（Queue Gateway）
//!
//! DeliveryQueue は `TaskMessage` を配送するだけで、状態は持ちません。
//! 正本はあくまで TaskStore です。
//!
//! # 配送セマンティクス（at-least-once）
//! - `receive` はメッセージごとに新しい `Receipt` を発行し、
//!   visibility timeout の間そのメッセージを他の受信者から隠す
//! - `acknowledge` されなかったメッセージは timeout 後に再び見えるようになる
//! - 自動リトライはしない（再配送は visibility timeout に任せる）
//!
//! # 実装
//! - `InMemoryDeliveryQueue`（開発用・単一プロセス）
//! - `SqliteDeliveryQueue`（API と worker を別プロセスで動かす場合）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::TaskMessage;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue transport failure: {0}")]
    Transport(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unknown or expired receipt: {0}")]
    UnknownReceipt(Receipt),

    #[error("queue is closed")]
    Closed,
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for QueueError {
    fn from(e: tokio::task::JoinError) -> Self {
        QueueError::Transport(format!("queue task join error: {e}"))
    }
}

/// Acknowledgment token handed out by `receive`.
///
/// A receipt is only valid for the receive that produced it; a redelivered
/// message carries a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Receipt(String);

impl Receipt {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One received message: the raw body plus its acknowledgment token.
///
/// The body is kept raw so the worker can report a malformed payload
/// instead of losing the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    #[serde(rename = "receiptHandle", default)]
    pub receipt: Receipt,
    pub body: String,
}

impl Delivery {
    pub fn new(receipt: Receipt, body: impl Into<String>) -> Self {
        Self {
            receipt,
            body: body.into(),
        }
    }
}

/// Approximate queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub messages_available: u64,
    pub messages_in_flight: u64,
}

/// DeliveryQueue は TaskMessage を配送するキュー
///
/// # 設計原則
/// - `send` はメッセージをフラットな JSON にして積む
/// - `receive` は最大 `wait` まで long-poll する（0 件で返ることもある）
/// - 失敗はすべて `QueueError` として呼び出し側に返す（リトライしない）
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    async fn send(&self, message: &TaskMessage) -> Result<(), QueueError>;

    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError>;

    async fn acknowledge(&self, receipt: &Receipt) -> Result<(), QueueError>;

    async fn counts(&self) -> Result<QueueCounts, QueueError>;

    /// Short label for status output (`"memory"`, `"sqlite"`).
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_reads_trigger_event_record() {
        let record = r#"{"messageId": "m-1", "receiptHandle": "abc", "body": "{\"task_id\": 1}"}"#;
        let d: Delivery = serde_json::from_str(record).unwrap();
        assert_eq!(d.receipt, Receipt::new("abc"));
        assert_eq!(d.body, r#"{"task_id": 1}"#);
    }

    #[test]
    fn delivery_without_receipt_gets_empty_one() {
        let d: Delivery = serde_json::from_str(r#"{"body": "x"}"#).unwrap();
        assert!(d.receipt.is_empty());
    }
}
