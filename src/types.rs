use serde::{Deserialize, Serialize};

/// 数字クラス数 (0-9)
pub const NUM_CLASSES: usize = 10;

/// 入力操作の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputAction {
    Down, // ポインタ押下
    #[serde(alias = "move")]
    Drag, // 押下したまま移動
    Clear, // クリアボタン
}

/// ポインタ入力イベント（キャンバス上のピクセル座標）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    /// 記録開始からの経過時間 (ms)。リプレイ時のみ使用
    pub t_ms: u64,
    pub action: InputAction,
    pub x: i32,
    pub y: i32,
}

impl PointerEvent {
    pub fn down(x: i32, y: i32) -> Self {
        Self { t_ms: 0, action: InputAction::Down, x, y }
    }

    pub fn drag(x: i32, y: i32) -> Self {
        Self { t_ms: 0, action: InputAction::Drag, x, y }
    }

    pub fn clear() -> Self {
        Self { t_ms: 0, action: InputAction::Clear, x: 0, y: 0 }
    }
}

/// 推論結果
///
/// クラスごとの確率と、その最大値のインデックスの組。
/// 毎回のポーリングで作り直され、保存はされない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: usize,
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// 確率ベクトルから予測を作成（argmaxを計算）
    ///
    /// 空のベクトル、または有限でない値を含む場合は `None`。
    pub fn from_probabilities(probabilities: Vec<f32>) -> Option<Self> {
        if probabilities.iter().any(|p| !p.is_finite()) {
            return None;
        }
        let class = probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)?;
        Some(Self { class, probabilities })
    }

    pub fn confidence(&self) -> f32 {
        self.probabilities[self.class]
    }
}

/// 表示側へ送る状態
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DisplayUpdate {
    /// 起動直後・クリア直後（結果なし）
    Blank,
    /// 何も描かれていない（推論をスキップした）
    NoInput,
    /// 推論結果
    Predicted(Prediction),
}

impl DisplayUpdate {
    /// ラベルに表示する文字列
    pub fn label_text(&self) -> String {
        match self {
            DisplayUpdate::Blank => "Prediction: ".to_string(),
            DisplayUpdate::NoInput => "Prediction: (waiting...)".to_string(),
            DisplayUpdate::Predicted(p) => format!("Prediction: {}", p.class),
        }
    }

    /// 棒グラフ用の確率（推論結果がある場合のみ）
    pub fn bars(&self) -> Option<&[f32]> {
        match self {
            DisplayUpdate::Predicted(p) => Some(&p.probabilities),
            _ => None,
        }
    }
}

// スケジューラの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,       // 最初のtick待ち
    Polling,    // スナップショット取得中
    Predicting, // 推論実行（結果公開済み）
    Waiting,    // 入力なし
    Stopped,    // 停止済み（再開不可）
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Idle => write!(f, "idle"),
            SchedulerState::Polling => write!(f, "polling"),
            SchedulerState::Predicting => write!(f, "predicting"),
            SchedulerState::Waiting => write!(f, "waiting"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prediction_argmax() {
        let p = Prediction::from_probabilities(vec![0.1, 0.05, 0.7, 0.15]).unwrap();
        assert_eq!(p.class, 2);
        assert_eq!(p.confidence(), 0.7);
    }

    #[test]
    fn test_prediction_rejects_invalid() {
        assert!(Prediction::from_probabilities(vec![]).is_none());
        assert!(Prediction::from_probabilities(vec![0.5, f32::NAN]).is_none());
    }

    #[test]
    fn test_label_text() {
        assert_eq!(DisplayUpdate::Blank.label_text(), "Prediction: ");
        assert_eq!(DisplayUpdate::NoInput.label_text(), "Prediction: (waiting...)");
        let p = Prediction::from_probabilities(vec![0.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(DisplayUpdate::Predicted(p).label_text(), "Prediction: 3");
    }

    #[test]
    fn test_display_update_json() {
        let json = serde_json::to_string(&DisplayUpdate::NoInput).unwrap();
        assert_eq!(json, r#"{"state":"no_input"}"#);

        let p = Prediction::from_probabilities(vec![0.25, 0.75]).unwrap();
        let json = serde_json::to_string(&DisplayUpdate::Predicted(p.clone())).unwrap();
        let back: DisplayUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, DisplayUpdate::Predicted(p));
        assert!(back.bars().is_some());
    }
}
