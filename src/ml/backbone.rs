//! 事前学習済みの特徴抽出器（ResNet）
//!
//! torchvisionのResNetと同じフィールド名で構成しているため、
//! ImageNetの学習済み重みを名前で読み込めます（`ml::zoo` を参照）。
//! 最終全結合層（fc）は持たず、Global Average Pooling後の特徴を返します。

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

/// 特徴抽出器のアーキテクチャ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackboneKind {
    #[default]
    ResNet18,
    ResNet34,
}

impl BackboneKind {
    /// 各ステージのBasicBlock数
    pub fn block_counts(&self) -> [usize; 4] {
        match self {
            BackboneKind::ResNet18 => [2, 2, 2, 2],
            BackboneKind::ResNet34 => [3, 4, 6, 3],
        }
    }

    /// 出力特徴の次元
    pub fn feature_dim(&self) -> usize {
        512
    }

    /// ランダム初期化した特徴抽出器を作成
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        ResNet::new(self.block_counts(), device)
    }
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneKind::ResNet18 => write!(f, "resnet18"),
            BackboneKind::ResNet34 => write!(f, "resnet34"),
        }
    }
}

impl std::str::FromStr for BackboneKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "resnet18" => Ok(BackboneKind::ResNet18),
            "resnet34" => Ok(BackboneKind::ResNet34),
            other => Err(format!("未対応の特徴抽出器です: {}", other)),
        }
    }
}

fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

/// ショートカット側の 1x1 Conv + BatchNorm
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 残差ブロック
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = if stride != 1 || in_channels != out_channels {
            Some(Downsample::new(in_channels, out_channels, stride, device))
        } else {
            None
        };

        Self {
            conv1: conv3x3(in_channels, out_channels, stride, device),
            bn1: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            conv2: conv3x3(out_channels, out_channels, 1, device),
            bn2: BatchNormConfig::new(out_channels).init(device),
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let out = self.bn2.forward(self.conv2.forward(out));

        self.relu.forward(out + identity)
    }
}

/// 同じチャネル数のBasicBlock列（ResNetの1ステージ）
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<BasicBlock<B>>,
}

impl<B: Backend> LayerBlock<B> {
    fn new(num_blocks: usize, in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let blocks = (0..num_blocks)
            .map(|i| {
                if i == 0 {
                    BasicBlock::new(in_channels, out_channels, stride, device)
                } else {
                    BasicBlock::new(out_channels, out_channels, 1, device)
                }
            })
            .collect();

        Self { blocks }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// ResNet特徴抽出器
///
/// # アーキテクチャ
/// - Conv 7x7 stride 2 + BN + ReLU + MaxPool 3x3 stride 2
/// - layer1..layer4: 64 / 128 / 256 / 512 チャネル（layer2以降は stride 2）
/// - Global Average Pooling → [batch_size, 512]
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: LayerBlock<B>,
    layer2: LayerBlock<B>,
    layer3: LayerBlock<B>,
    layer4: LayerBlock<B>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNet<B> {
    pub fn new(block_counts: [usize; 4], device: &B::Device) -> Self {
        Self {
            conv1: Conv2dConfig::new([3, 64], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: LayerBlock::new(block_counts[0], 64, 64, 1, device),
            layer2: LayerBlock::new(block_counts[1], 64, 128, 2, device),
            layer3: LayerBlock::new(block_counts[2], 128, 256, 2, device),
            layer4: LayerBlock::new(block_counts[3], 256, 512, 2, device),
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// 順伝播
    ///
    /// # 引数
    /// - `images`: 正規化済みバッチ画像 [batch_size, 3, H, W]
    ///
    /// # 戻り値
    /// - 特徴ベクトル [batch_size, 512]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.relu.forward(self.bn1.forward(x));
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        let x = self.avgpool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}

#[cfg(test)]
impl<B: Backend> ResNet<B> {
    pub(crate) fn conv1_weight(&self) -> Tensor<B, 4> {
        self.conv1.weight.val()
    }
}
