//! taskline-core
//!
//! Task-tracking API with a queue-backed worker.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, envelope, outcome, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, DeliveryQueue, Clock, TaskProcessor, IdGenerator）
//! - **impls**: 実装（InMemory / SQLite の Store と Queue, SummaryProcessor）
//! - **app**: アプリケーションロジック（TaskService, WorkerHandler, WorkerLoop, SystemStatus）
//! - **http**: axum の Router
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod impls;
pub mod ports;
