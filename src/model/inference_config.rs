//! モデルメタデータを使用した推論設定
//!
//! 保存されたモデルメタデータを読み込んで推論に必要な情報を取得します。

use anyhow::{Context, Result};
use std::path::Path;

use crate::model::model_metadata::ModelMetadata;
use crate::model::model_storage;

/// モデルメタデータから推論用情報を取得
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// クラスラベル（インデックス順）
    pub class_labels: Vec<String>,

    /// モデル入力解像度
    pub image_size: usize,
}

impl InferenceConfig {
    /// メタデータからInferenceConfigを作成
    pub fn from_metadata(metadata: &ModelMetadata) -> Self {
        Self {
            class_labels: metadata.class_labels.clone(),
            image_size: metadata.image_size,
        }
    }

    /// モデルファイルから推論設定を読み込む
    pub fn load_from_model(model_path: &Path) -> Result<Self> {
        let metadata = model_storage::load_metadata(model_path).context("Failed to load model metadata")?;
        Ok(Self::from_metadata(&metadata))
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<String> {
        self.class_labels.get(index).cloned()
    }

    /// ラベルからクラスインデックスを取得
    pub fn label_to_index(&self, label: &str) -> Option<usize> {
        self.class_labels.iter().position(|l| l == label)
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== 推論設定 ===");
        println!("クラス数: {}", self.num_classes());
        for (i, label) in self.class_labels.iter().enumerate() {
            println!("  {}: {}", i, label);
        }
        println!("モデル入力サイズ: {}x{}", self.image_size, self.image_size);
        println!("==================");
    }
}
