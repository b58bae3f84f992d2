//! TaskProcessor port - タスクの処理本体（差し替え可能な拡張点）
//!
//! Worker は「状態を PROCESSING にする → 処理する → COMPLETED / FAILED にする」
//! という枠だけを持ち、処理の中身はこの trait の実装に委譲します。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::TaskMessage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProcessError(pub String);

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Processor は TaskMessage を受け取り、結果文字列を返す
///
/// # 使用例
/// ```ignore
/// struct Shout;
///
/// #[async_trait]
/// impl TaskProcessor for Shout {
///     async fn process(&self, message: &TaskMessage) -> Result<String, ProcessError> {
///         Ok(message.title.to_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, message: &TaskMessage) -> Result<String, ProcessError>;
}
