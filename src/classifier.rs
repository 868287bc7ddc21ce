use crate::grid::Snapshot;
use crate::types::NUM_CLASSES;
use anyhow::Result;

/// 画像分類器の共通インターフェース
///
/// (1, H, W, 1) の正規化済みバッファを受け取り、クラスごとの確率を返す。
/// 同期的な純粋関数として扱う。失敗した場合はエラーを返す。
pub trait Classifier: Send + Sync {
    /// スナップショットを分類して確率ベクトルを返す
    fn classify(&self, input: &Snapshot) -> Result<Vec<f32>>;

    /// 出力するクラス数
    fn num_classes(&self) -> usize {
        NUM_CLASSES
    }

    /// 分類器の名前（ログ用）
    fn name(&self) -> String {
        "classifier".to_string()
    }
}
