//! IdGenerator port - receipt の生成
//!
//! `receive` のたびに新しい Receipt を発行します。
//! 再配送されたメッセージは必ず別の Receipt を持つので、
//! 古い Receipt での acknowledge をキュー側で拒否できます。

use crate::ports::{Clock, Receipt};
use ulid::Ulid;

/// IdGenerator は一意な受信トークンを生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_receipt(&self) -> Receipt;
}

/// `rcpt-<ULID>` 形式の Receipt を作る
///
/// timestamp 部分は Clock から取るので、FixedClock なら決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_receipt(&self) -> Receipt {
        let issued_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(issued_ms, rand::random());
        Receipt::new(format!("rcpt-{ulid}"))
    }
}
