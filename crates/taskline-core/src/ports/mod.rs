//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（SQLite, メッセージキュー, 時計）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - DeliveryQueue は通知（TaskMessage）を運ぶだけ
//! - 処理本体（TaskProcessor）は差し替え可能

pub mod clock;
pub mod delivery_queue;
pub mod id_generator;
pub mod processor;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_queue::{Delivery, DeliveryQueue, QueueCounts, QueueError, Receipt};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::processor::{ProcessError, TaskProcessor};
pub use self::task_store::{TaskStore, empty_counts};
