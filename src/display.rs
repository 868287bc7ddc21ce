//! 表示側への結果通知
//!
//! ラベルや棒グラフなど任意の数のリスナーが最新の状態を購読する。
//! 古い値は新しい値で上書きされる（最新値のみ保持）。

use crate::types::DisplayUpdate;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct Publisher {
    tx: Arc<watch::Sender<DisplayUpdate>>,
}

impl Publisher {
    /// `Blank` 状態で作成
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(DisplayUpdate::Blank);
        Self { tx: Arc::new(tx) }
    }

    /// 新しいリスナーを登録
    pub fn subscribe(&self) -> watch::Receiver<DisplayUpdate> {
        self.tx.subscribe()
    }

    /// 状態を公開（リスナーがいなくても値は保持される）
    pub fn publish(&self, update: DisplayUpdate) {
        self.tx.send_replace(update);
    }

    /// 現在公開中の状態
    pub fn current(&self) -> DisplayUpdate {
        self.tx.borrow().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}
