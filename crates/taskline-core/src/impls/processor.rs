//! SummaryProcessor - デフォルトの処理本体
//!
//! タイトル・説明・完了時刻を含む結果文字列を返すだけの実装です。
//! 本物の業務処理は `TaskProcessor` を実装して差し替えます。

use async_trait::async_trait;
use chrono::SecondsFormat;

use crate::domain::TaskMessage;
use crate::ports::{Clock, ProcessError, TaskProcessor};

pub struct SummaryProcessor<C> {
    clock: C,
}

impl<C: Clock> SummaryProcessor<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl<C: Clock> TaskProcessor for SummaryProcessor<C> {
    async fn process(&self, message: &TaskMessage) -> Result<String, ProcessError> {
        let at = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut result = format!("Processed task '{}' at {at}", message.title);
        if let Some(description) = message.description.as_deref()
            && !description.is_empty()
        {
            result.push_str(" with description: ");
            result.push_str(description);
        }
        Ok(result)
    }
}
