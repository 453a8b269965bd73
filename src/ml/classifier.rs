//! 転移学習モデル
//!
//! 事前学習済みの特徴抽出器に、新しく学習する分類ヘッド（Dropout + Linear）を
//! 1層だけ追加します。

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{loss::CrossEntropyLossConfig, Dropout, DropoutConfig, Linear, LinearConfig},
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::{
        activation::softmax,
        backend::{AutodiffBackend, Backend},
        Int, Tensor,
    },
};

use crate::ml::backbone::{BackboneKind, ResNet};

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 特徴抽出器
    #[config(default = "BackboneKind::ResNet18")]
    pub backbone: BackboneKind,
    /// ドロップアウト率
    #[config(default = 0.2)]
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
    /// 特徴抽出層を凍結するか
    #[config(default = true)]
    pub freeze_backbone: bool,
}

impl ModelConfig {
    /// ランダム初期化した特徴抽出器でモデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransferClassifier<B> {
        self.init_with_backbone(self.backbone.init(device), device)
    }

    /// 既存の（学習済み）特徴抽出器に分類ヘッドを追加してモデルを初期化
    pub fn init_with_backbone<B: Backend>(&self, backbone: ResNet<B>, device: &B::Device) -> TransferClassifier<B> {
        let model = TransferClassifier {
            backbone,
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(self.backbone.feature_dim(), self.num_classes).init(device),
            frozen: false,
        };

        if self.freeze_backbone {
            model.freeze()
        } else {
            model
        }
    }
}

/// 転移学習による画像分類モデル
///
/// # アーキテクチャ
/// - 特徴抽出器（ResNet、凍結可能）: [batch_size, 3, H, W] → [batch_size, 512]
/// - Dropout
/// - Linear: 512 → num_classes
/// - Softmax (分類時)
#[derive(Module, Debug)]
pub struct TransferClassifier<B: Backend> {
    backbone: ResNet<B>,
    dropout: Dropout,
    head: Linear<B>,
    frozen: bool,
}

impl<B: Backend> TransferClassifier<B> {
    /// 特徴抽出層のパラメータをすべて学習対象外にする
    pub fn freeze(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn backbone(&self) -> &ResNet<B> {
        &self.backbone
    }

    /// 特徴抽出
    pub fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.backbone.forward(images)
    }

    /// 分類ヘッド
    pub fn forward_head(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(self.dropout.forward(features))
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_head(self.forward_features(images))
    }

    /// クラスごとの確率 [batch_size, num_classes]
    pub fn predict_proba(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// 分類クラス数
    pub fn num_classes(&self) -> usize {
        let [_, num_classes] = self.head.weight.dims();
        num_classes
    }

    /// 学習対象のパラメータ数
    pub fn num_trainable_params(&self) -> usize {
        if self.frozen {
            self.head.num_params()
        } else {
            self.num_params()
        }
    }

    /// 重みをバイナリに変換（全精度）
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        Recorder::<B>::record(&recorder, self.clone().into_record(), ())
            .map_err(|e| anyhow::anyhow!("モデル重みの書き出しエラー: {:?}", e))
    }

    /// バイナリから重みを復元
    pub fn load_bytes(self, bytes: Vec<u8>, device: &B::Device) -> anyhow::Result<Self> {
        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let record = Recorder::<B>::load(&recorder, bytes, device)
            .map_err(|e| anyhow::anyhow!("モデル重みの読み込みエラー: {:?}", e))?;
        Ok(self.load_record(record))
    }
}

impl<B: AutodiffBackend> TransferClassifier<B> {
    /// 学習時の順伝播
    ///
    /// 凍結時は特徴抽出器を推論モードで実行するため、勾配が流れず
    /// BatchNormの移動平均も更新されません。
    pub fn forward_train(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        if self.frozen {
            let features = self.backbone.valid().forward(images.inner());
            self.forward_head(Tensor::from_inner(features))
        } else {
            self.forward(images)
        }
    }
}

/// 交差エントロピー損失
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    #[test]
    fn test_forward_shapes() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(3).with_image_size(32).init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);

        assert_eq!(model.forward(images.clone()).dims(), [2, 3]);
        assert_eq!(model.num_classes(), 3);

        let probs: Vec<f32> = model.predict_proba(images).into_data().iter::<f32>().collect();
        let row_sum: f32 = probs[..3].iter().sum();
        assert!((row_sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_frozen_model_trains_only_head() {
        let device = NdArrayDevice::Cpu;
        let frozen = ModelConfig::new(4).init::<TestBackend>(&device);
        assert!(frozen.is_frozen());
        assert_eq!(frozen.num_trainable_params(), 512 * 4 + 4);

        let unfrozen = ModelConfig::new(4)
            .with_freeze_backbone(false)
            .init::<TestBackend>(&device);
        assert!(!unfrozen.is_frozen());
        assert_eq!(unfrozen.num_trainable_params(), unfrozen.num_params());
    }

    #[test]
    fn test_frozen_backbone_receives_no_gradient() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2)
            .with_dropout(0.0)
            .init::<TestAutodiffBackend>(&device);
        let images = Tensor::<TestAutodiffBackend, 4>::ones([2, 3, 32, 32], &device);
        let targets = Tensor::<TestAutodiffBackend, 1, Int>::from_ints([0, 1], &device);

        let loss = cross_entropy(model.forward_train(images), targets);
        let grads = loss.backward();

        assert!(model.head.weight.val().grad(&grads).is_some());
        assert!(model.backbone.conv1_weight().grad(&grads).is_none());
    }

    #[test]
    fn test_bytes_round_trip() {
        let device = NdArrayDevice::Cpu;
        let config = ModelConfig::new(2).with_image_size(32);
        let model = config.init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected: Vec<f32> = model.forward(images.clone()).into_data().iter::<f32>().collect();

        let bytes = model.to_bytes().unwrap();
        let restored = config.init::<TestBackend>(&device).load_bytes(bytes, &device).unwrap();
        let actual: Vec<f32> = restored.forward(images).into_data().iter::<f32>().collect();

        assert_eq!(expected, actual);
    }
}
