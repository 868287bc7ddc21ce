//! モデル推論機能

use anyhow::{anyhow, bail, Context, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use burn::{
    module::Module,
    record::{BinFileRecorder, FullPrecisionSettings},
    tensor::{backend::Backend, Tensor},
};

use crate::classifier::Classifier;
use crate::grid::Snapshot;
use crate::ml::{DigitClassifier, ModelConfig};
use crate::model::{AppConfig, DeviceType};

/// CPUバックエンド
pub type CpuBackend = burn_ndarray::NdArray<f32>;

/// GPUバックエンド
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: Mutex<DigitClassifier<B>>,
    config: ModelConfig,
    device: B::Device,
}

impl<B: Backend> InferenceEngine<B> {
    /// 初期化直後（未学習）の重みで作成
    pub fn new(config: ModelConfig, device: B::Device) -> Self {
        let model = config.init::<B>(&device);
        Self {
            model: Mutex::new(model),
            config,
            device,
        }
    }

    /// 重みファイルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        config: ModelConfig,
        device: B::Device,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        let init = config.init::<B>(&device);
        // 形状の食い違いでバックエンドがpanicすることがある
        let loaded = catch_unwind(AssertUnwindSafe(|| {
            init.load_file(model_path.to_path_buf(), &recorder, &device)
        }))
        .map_err(|_| anyhow!("モデル重みの読み込み中にpanicしました: {}", model_path.display()))?;
        let model = loaded.map_err(|e| {
            anyhow!("モデル重みの読み込みエラー ({}): {:?}", model_path.display(), e)
        })?;
        model
            .check_shapes(&config)
            .with_context(|| format!("重みが設定と一致しません: {}", model_path.display()))?;

        log::info!("[Model] 重みを読み込みました: {}", model_path.display());
        Ok(Self {
            model: Mutex::new(model),
            config,
            device,
        })
    }

    /// 重みファイルがあれば読み込み、なければ未学習の重みを使う
    pub fn load_or_init<P: AsRef<Path>>(
        model_path: P,
        config: ModelConfig,
        device: B::Device,
    ) -> Self {
        let model_path = model_path.as_ref();
        if model_path.exists() {
            match Self::load(model_path, config.clone(), device.clone()) {
                Ok(engine) => return engine,
                Err(e) => log::warn!("[Model] {:#}", e),
            }
        } else {
            log::warn!("[Model] 重みファイルが存在しません: {}", model_path.display());
        }
        log::warn!("[Model] 未学習の重みを使用します（予測は無意味です）");
        Self::new(config, device)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn infer(&self, input: &Snapshot) -> Result<Vec<f32>> {
        let size = self.config.image_size;
        let shape = input.shape();
        if shape != [1, size, size, 1] {
            bail!(
                "入力サイズが不正です: {:?} (期待: [1, {}, {}, 1])",
                shape,
                size,
                size
            );
        }

        // Tensorに変換 [1, 28, 28, 1]
        let data = input.to_vec();
        let tensor =
            Tensor::<B, 1>::from_floats(data.as_slice(), &self.device).reshape(shape);

        let probs = {
            let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
            model.predict_proba(tensor)
        };

        probs
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("推論結果の取得エラー: {:?}", e))
    }
}

impl<B: Backend> Classifier for InferenceEngine<B>
where
    DigitClassifier<B>: Send,
    B::Device: Send + Sync,
{
    fn classify(&self, input: &Snapshot) -> Result<Vec<f32>> {
        self.infer(input)
    }

    fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn name(&self) -> String {
        let backend = std::any::type_name::<B>().rsplit("::").next().unwrap_or("backend");
        format!("cnn-{}", backend)
    }
}

/// 設定に従って分類器を用意する
pub fn load_classifier(config: &AppConfig) -> Arc<dyn Classifier> {
    let model_config = ModelConfig::new()
        .with_num_classes(config.model.num_classes)
        .with_image_size(config.grid.grid_size);
    let path = Path::new(&config.model.model_path);

    match config.device_type {
        #[cfg(feature = "wgpu")]
        DeviceType::Wgpu => {
            log::info!("[Model] バックエンド: {}", config.device_type);
            let engine =
                InferenceEngine::<GpuBackend>::load_or_init(path, model_config, Default::default());
            Arc::new(engine)
        }
        #[cfg(not(feature = "wgpu"))]
        DeviceType::Wgpu => {
            log::warn!("[Model] wgpu機能が無効のためCPUで推論します");
            let engine =
                InferenceEngine::<CpuBackend>::load_or_init(path, model_config, Default::default());
            Arc::new(engine)
        }
        DeviceType::Cpu => {
            log::info!("[Model] バックエンド: {}", config.device_type);
            let engine =
                InferenceEngine::<CpuBackend>::load_or_init(path, model_config, Default::default());
            Arc::new(engine)
        }
    }
}
