//! 機械学習モデルの共通定義
//!
//! 手書き数字分類用のCNNモデルと関連する設定を提供します。

use anyhow::{bail, Result};
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// 入力画像サイズ（正方形）
pub const IMAGE_SIZE: usize = 28;

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    #[config(default = 10)]
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 28)]
    pub image_size: usize,
    /// 畳み込み層の出力チャネル数
    #[config(default = 16)]
    pub conv_channels: usize,
    /// 全結合層の隠れ次元
    #[config(default = 64)]
    pub hidden_size: usize,
}

impl ModelConfig {
    /// Flatten後の特徴次元
    ///
    /// Conv (3x3, no padding): size -> size - 2
    /// Pool (2x2, stride 2):   (size - 2) -> (size - 2) / 2
    pub fn feature_dim(&self) -> usize {
        let after_pool = self.image_size.saturating_sub(2) / 2;
        self.conv_channels * after_pool * after_pool
    }

    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> DigitClassifier<B> {
        let d = self.feature_dim();
        log::debug!(
            "[Model] 入力 {}x{}, 特徴次元 {}, FC {} -> {} -> {}",
            self.image_size,
            self.image_size,
            d,
            d,
            self.hidden_size,
            self.num_classes
        );

        DigitClassifier {
            conv: Conv2dConfig::new([1, self.conv_channels], [3, 3])
                .with_stride([1, 1])
                .init(device),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            fc1: LinearConfig::new(d, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// 手書き数字分類用CNNモデル
///
/// # アーキテクチャ
/// - Conv 3x3 (1 -> 16) + ReLU
/// - MaxPool 2x2
/// - Flatten
/// - FC: d -> 64 + ReLU
/// - FC: 64 -> num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct DigitClassifier<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
    fc1: Linear<B>,
    fc2: Linear<B>,
    activation: Relu,
}

impl<B: Backend> DigitClassifier<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 1, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        self.fc2.forward(x)
    }

    /// 各層の重みの形状が設定と一致するか確認する
    ///
    /// 読み込んだ重みは設定と無関係な形状を持ちうるため、推論前に検証する。
    pub fn check_shapes(&self, config: &ModelConfig) -> Result<()> {
        let conv = self.conv.weight.val().dims();
        let expected = [config.conv_channels, 1, 3, 3];
        if conv != expected {
            bail!("畳み込み層の形状が不正です: {:?} (期待: {:?})", conv, expected);
        }

        let layers = [
            ("fc1", self.fc1.weight.val().dims(), [config.feature_dim(), config.hidden_size]),
            ("fc2", self.fc2.weight.val().dims(), [config.hidden_size, config.num_classes]),
        ];
        for (name, actual, expected) in layers {
            if actual != expected {
                bail!("{} の形状が不正です: {:?} (期待: {:?})", name, actual, expected);
            }
        }
        Ok(())
    }

    /// クラスごとの確率
    ///
    /// # 引数
    /// - `images`: チャネル末尾のバッチ画像 [batch_size, size, size, 1]
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let images = images.permute([0, 3, 1, 2]);
        softmax(self.forward(images), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_default_config() {
        let config = ModelConfig::new();
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.image_size, IMAGE_SIZE);
        assert_eq!(config.feature_dim(), 16 * 13 * 13);
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 1, 28, 28], &device);
        assert_eq!(model.forward(images).dims(), [2, 10]);

        let images = Tensor::<TestBackend, 4>::ones([1, 28, 28, 1], &device);
        let probs = model.predict_proba(images);
        assert_eq!(probs.dims(), [1, 10]);

        let values = probs.into_data().to_vec::<f32>().unwrap();
        let total: f32 = values.iter().sum();
        approx::assert_relative_eq!(total, 1.0, epsilon = 1e-4);
        assert!(values.iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn test_check_shapes() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TestBackend>(&device);
        assert!(model.check_shapes(&ModelConfig::new()).is_ok());

        let err = model.check_shapes(&ModelConfig::new().with_image_size(20)).unwrap_err();
        assert!(err.to_string().contains("fc1"));

        let err = model.check_shapes(&ModelConfig::new().with_num_classes(5)).unwrap_err();
        assert!(err.to_string().contains("fc2"));

        let err = model.check_shapes(&ModelConfig::new().with_conv_channels(8)).unwrap_err();
        assert!(err.to_string().contains("畳み込み層"));
    }
}
