//! TaskMessage - キューを流れる通知メッセージ
//!
//! Wire shape (JSON object, flat):
//! ```json
//! {"task_id": 42, "title": "Write report", "description": null}
//! ```
//!
//! - 正本は TaskStore 側。メッセージは「処理してほしい」という通知に過ぎない
//! - 未知のフィールドは無視する（別プロデューサーが付加情報を載せても壊れない）

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl TaskMessage {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            description: task.description.clone(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

/// Best-effort extraction of `task_id` from a body that failed to decode,
/// so a malformed record can still be attributed in the batch summary.
pub fn peek_task_id(body: &str) -> Option<TaskId> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("task_id")?.as_i64().map(TaskId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_flat_object_with_null_description() {
        let msg = TaskMessage {
            task_id: TaskId::new(3),
            title: "Test Task".to_string(),
            description: None,
        };
        let v: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            v,
            json!({"task_id": 3, "title": "Test Task", "description": null})
        );
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        let body = r#"{"task_id": 999, "title": "Test Task", "description": "d", "test": true}"#;
        let msg = TaskMessage::decode(body).unwrap();
        assert_eq!(msg.task_id, TaskId::new(999));
        assert_eq!(msg.description.as_deref(), Some("d"));
    }

    #[test]
    fn decode_rejects_missing_task_id() {
        assert!(TaskMessage::decode(r#"{"title": "x"}"#).is_err());
        assert!(TaskMessage::decode("not json").is_err());
    }

    #[test]
    fn peek_recovers_id_from_partial_payload() {
        assert_eq!(peek_task_id(r#"{"task_id": 5}"#), Some(TaskId::new(5)));
        assert_eq!(peek_task_id(r#"{"task_id": "five"}"#), None);
        assert_eq!(peek_task_id("{"), None);
    }
}
