//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore** / **SqliteTaskStore**: 正本
//! - **InMemoryDeliveryQueue**: 単一プロセス用の配送キュー
//! - **SqliteDeliveryQueue**: API と worker を別プロセスで動かす場合の配送キュー
//! - **SummaryProcessor**: デフォルトの処理本体

pub mod inmem_delivery;
pub mod inmem_store;
pub mod processor;
pub mod sqlite_delivery;
pub mod sqlite_store;

// 主要な型を再エクスポート
pub use self::inmem_delivery::InMemoryDeliveryQueue;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::processor::SummaryProcessor;
pub use self::sqlite_delivery::SqliteDeliveryQueue;
pub use self::sqlite_store::SqliteTaskStore;
