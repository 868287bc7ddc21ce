//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデル、グリッド、ポーリング間隔をJSON形式で保存・読み込みします。

use crate::canvas::CanvasGeometry;
use crate::scheduler::PollTiming;
use crate::types::NUM_CLASSES;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 計算デバイスの種類
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// NdArray (CPU) バックエンド
    #[default]
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 重みファイルのパス
    pub model_path: String,
    /// 分類クラス数
    pub num_classes: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_path: "models/digit_classifier.bin".to_string(),
            num_classes: NUM_CLASSES,
        }
    }
}

/// グリッド設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSettings {
    /// グリッドの一辺のセル数（モデル入力サイズと同じ）
    pub grid_size: usize,
    /// 1セルのピクセル数
    pub cell_size: usize,
    /// 画像読み込み時にセルを塗る濃さのしきい値 (0-255)
    #[serde(default = "default_image_threshold")]
    pub image_threshold: u8,
}

fn default_image_threshold() -> u8 {
    128
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            grid_size: 28,
            cell_size: 10,
            image_threshold: default_image_threshold(),
        }
    }
}

/// ポーリング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingSettings {
    /// 最初の推論までの待ち時間 (ms)
    pub warmup_ms: u64,
    /// 推論完了から次の推論までの待ち時間 (ms)
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            warmup_ms: 100,
            interval_ms: 300,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    /// モデル設定
    #[serde(default)]
    pub model: ModelSettings,
    /// グリッド設定
    #[serde(default)]
    pub grid: GridSettings,
    /// ポーリング設定
    #[serde(default)]
    pub polling: PollingSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを開けません: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("設定ファイルの解析エラー: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない・読めない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    log::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("設定ファイルの読み込みに失敗しました: {:#}", e);
                    log::warn!("デフォルト設定を使用します");
                    Self::default()
                }
            }
        } else {
            log::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// 値の整合性チェック
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.grid.grid_size < 4 {
            bail!("grid_size が小さすぎます: {} (最小4)", self.grid.grid_size);
        }
        if self.grid.cell_size == 0 {
            bail!("cell_size は1以上が必要です");
        }
        if self.model.num_classes == 0 {
            bail!("num_classes は1以上が必要です");
        }
        if self.polling.interval_ms == 0 {
            bail!("interval_ms は1以上が必要です");
        }
        Ok(())
    }

    pub fn geometry(&self) -> CanvasGeometry {
        CanvasGeometry::new(self.grid.grid_size, self.grid.cell_size)
    }

    pub fn timing(&self) -> PollTiming {
        PollTiming {
            warmup: Duration::from_millis(self.polling.warmup_ms),
            interval: Duration::from_millis(self.polling.interval_ms),
        }
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        log::info!("=== アプリケーション設定 ===");
        log::info!("計算デバイス: {}", self.device_type);
        log::info!("モデルパス: {}", self.model.model_path);
        log::info!("分類クラス数: {}", self.model.num_classes);
        log::info!(
            "グリッド: {}x{} (セル {}px)",
            self.grid.grid_size,
            self.grid.grid_size,
            self.grid.cell_size
        );
        log::info!(
            "ポーリング: 初回 {}ms, 間隔 {}ms",
            self.polling.warmup_ms,
            self.polling.interval_ms
        );
    }
}
