//! モデル推論機能

use anyhow::{Context, Result};
use burn::tensor::{backend::Backend, Tensor};
use std::path::Path;

use crate::data::load_and_normalize_image;
use crate::ml::classifier::TransferClassifier;
use crate::model::{load_model_with_metadata, InferenceConfig, ModelMetadata};

/// 1枚の画像に対する分類結果
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub class_index: usize,
    /// 予測クラスの確率
    pub confidence: f32,
    /// 確率の高い順の (ラベル, 確率)
    pub top_k: Vec<(String, f32)>,
}

/// 推論エンジン
pub struct InferenceEngine<B: Backend> {
    model: TransferClassifier<B>,
    config: InferenceConfig,
    metadata: ModelMetadata,
    device: B::Device,
    top_k: usize,
}

impl<B: Backend> InferenceEngine<B> {
    /// モデルを読み込んで推論エンジンを初期化
    pub fn load<P: AsRef<Path>>(model_path: P, device: &B::Device) -> Result<Self> {
        let model_path = model_path.as_ref();
        let (metadata, model_binary) = load_model_with_metadata(model_path)
            .with_context(|| format!("Failed to load model: {}", model_path.display()))?;

        // 重みは後で上書きするため特徴抽出器はランダム初期化で構築
        let model = metadata
            .model_config()
            .init::<B>(device)
            .load_bytes(model_binary, device)?;

        tracing::info!(
            "モデルを読み込みました: {} ({} クラス, {}x{})",
            model_path.display(),
            metadata.class_labels.len(),
            metadata.image_size,
            metadata.image_size
        );

        Ok(Self::from_parts(model, metadata, device.clone()))
    }

    /// 学習済みモデルとメタデータから直接作成
    pub fn from_parts(model: TransferClassifier<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        Self {
            model,
            config: InferenceConfig::from_metadata(&metadata),
            metadata,
            device,
            top_k: 3,
        }
    }

    /// 結果に含める上位クラス数
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// 単一画像を分類
    pub fn classify_image<P: AsRef<Path>>(&self, image_path: P) -> Result<Prediction> {
        let size = self.config.image_size();
        let image_data = load_and_normalize_image(image_path.as_ref(), size)?;

        let tensor = Tensor::<B, 1>::from_floats(image_data.as_slice(), &self.device).reshape([1, 3, size, size]);

        let probs: Vec<f32> = self.model.predict_proba(tensor).into_data().iter::<f32>().collect();
        self.prediction_from_probs(&probs)
    }

    /// 複数画像をバッチ分類
    pub fn classify_batch(&self, image_paths: &[impl AsRef<Path>]) -> Result<Vec<Prediction>> {
        image_paths.iter().map(|path| self.classify_image(path)).collect()
    }

    fn prediction_from_probs(&self, probs: &[f32]) -> Result<Prediction> {
        let mut ranked: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (class_index, confidence) = *ranked
            .first()
            .ok_or_else(|| anyhow::anyhow!("推論結果が空です"))?;

        let label = self
            .config
            .class_index_to_label(class_index)
            .ok_or_else(|| anyhow::anyhow!("クラスインデックス {} は範囲外です", class_index))?;

        let top_k = ranked
            .iter()
            .take(self.top_k)
            .filter_map(|&(i, p)| self.config.class_index_to_label(i).map(|l| (l, p)))
            .collect();

        Ok(Prediction {
            label,
            class_index,
            confidence,
            top_k,
        })
    }

    /// InferenceConfigへの参照を取得
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn model(&self) -> &TransferClassifier<B> {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ModelConfig;
    use crate::model::save_model_with_metadata;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray;

    fn engine() -> InferenceEngine<TestBackend> {
        let device = NdArrayDevice::Cpu;
        let config = ModelConfig::new(3).with_image_size(32);
        let metadata = ModelMetadata::new(vec!["a".into(), "b".into(), "c".into()], &config);
        InferenceEngine::from_parts(config.init::<TestBackend>(&device), metadata, device)
    }

    #[test]
    fn test_prediction_picks_argmax() {
        let engine = engine().with_top_k(2);
        let prediction = engine.prediction_from_probs(&[0.2, 0.7, 0.1]).unwrap();

        assert_eq!(prediction.label, "b");
        assert_eq!(prediction.class_index, 1);
        assert!((prediction.confidence - 0.7).abs() < 1e-6);
        assert_eq!(prediction.top_k, vec![("b".to_string(), 0.7), ("a".to_string(), 0.2)]);
    }

    #[test]
    fn test_archive_round_trip_preserves_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("x.png");
        RgbImage::from_fn(20, 20, |x, y| Rgb([(x * 12) as u8, (y * 12) as u8, 128]))
            .save(&image_path)
            .unwrap();

        let device = NdArrayDevice::Cpu;
        let original = engine();
        let archive = save_model_with_metadata(
            &dir.path().join("model.tar.gz"),
            original.metadata(),
            &original.model().to_bytes().unwrap(),
        )
        .unwrap();

        let restored = InferenceEngine::<TestBackend>::load(&archive, &device).unwrap();
        let expected = original.classify_image(&image_path).unwrap();
        let actual = restored.classify_image(&image_path).unwrap();

        assert_eq!(expected.class_index, actual.class_index);
        assert!((expected.confidence - actual.confidence).abs() < 1e-6);
        assert_eq!(restored.config().num_classes(), 3);

        let batch = restored.classify_batch(&[&image_path, &image_path]).unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_missing_archive() {
        let result = InferenceEngine::<TestBackend>::load("missing.tar.gz", &NdArrayDevice::Cpu);
        assert!(result.is_err());
    }
}
