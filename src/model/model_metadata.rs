//! モデルメタデータの定義と永続化
//!
//! tar.gz形式でモデルと関連するメタデータを保存・読み込みします。
//! 推論時はこのメタデータだけで分類器の構成を復元できます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::{IMAGENET_MEAN, IMAGENET_STD};
use crate::ml::{BackboneKind, EpochMetrics, ModelConfig};

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスラベル（インデックス順 = ディレクトリ名のソート順）
    /// 例: ["cats", "dogs"]
    pub class_labels: Vec<String>,

    /// 特徴抽出器
    pub backbone: BackboneKind,

    /// モデル入力サイズ（正方形）
    pub image_size: usize,

    /// 分類ヘッドのドロップアウト率
    pub dropout: f64,

    /// 学習時に特徴抽出層を凍結していたか
    pub freeze_backbone: bool,

    /// 正規化に使用した平均・標準偏差（RGB）
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],

    /// 学習エポック数（キャンセル時は完了したエポック数）
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,

    /// 検証データの割合（評価時に同じ分割を再現するため）
    pub validation_split: f64,
    pub seed: u64,

    pub total_params: usize,
    pub trainable_params: usize,

    /// 最終エポックの指標
    #[serde(default)]
    pub final_metrics: Option<EpochMetrics>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成（正規化はImageNetの値、学習時刻は現在時刻）
    pub fn new(class_labels: Vec<String>, model_config: &ModelConfig) -> Self {
        Self {
            class_labels,
            backbone: model_config.backbone,
            image_size: model_config.image_size,
            dropout: model_config.dropout,
            freeze_backbone: model_config.freeze_backbone,
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
            num_epochs: 0,
            batch_size: 0,
            learning_rate: 0.0,
            validation_split: 0.0,
            seed: 0,
            total_params: 0,
            trainable_params: 0,
            final_metrics: None,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// 分類器の構成を復元
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.class_labels.len())
            .with_backbone(self.backbone)
            .with_dropout(self.dropout)
            .with_image_size(self.image_size)
            .with_freeze_backbone(self.freeze_backbone)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}
