//! Domain identifiers.
//!
//! # TaskId
//! タスクの ID は TaskStore が採番する整数です（SQLite の AUTOINCREMENT 相当）。
//! 一度割り当てられた ID は変更されません。
//!
//! Newtype にしておくことで、ページング用の `skip` / `limit` などの
//! ただの整数と取り違えることをコンパイル時に防ぎます。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strongly-typed task identifier.
///
/// JSON では素の整数として表現します（`{"task_id": 42}`）。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
