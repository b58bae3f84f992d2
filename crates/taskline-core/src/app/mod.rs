//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TaskService**: CRUD と通知の送信（HTTP 層から呼ばれる）
//! - **WorkerHandler**: 1 バッチ分のメッセージ処理
//! - **WorkerLoop**: receive → handle → acknowledge の常駐ループ
//! - **SystemStatus**: 管理用の状態集計

pub mod service;
pub mod status;
pub mod worker;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::service::TaskService;
pub use self::status::{DatabaseStatus, QueueStatus, SystemStatus};
pub use self::worker::WorkerHandler;
pub use self::worker_loop::{PollSettings, WorkerLoop, acknowledge_batch};
