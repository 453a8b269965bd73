//! 分類ヘッドの学習ループ

use anyhow::Result;
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::data::{AugmentationSettings, ImageBatcher, ImageSubset};
use crate::ml::classifier::{cross_entropy, TransferClassifier};
use crate::ml::evaluation::{count_correct, evaluate};

/// 学習パラメータ
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub image_size: usize,
    /// 学習データにのみ適用
    pub augmentation: AugmentationSettings,
}

/// データ拡張用の乱数シード（シャッフル用とは別系列にする）
pub(crate) fn augmentation_seed(seed: u64) -> u64 {
    seed.wrapping_add(1)
}

/// 1エポック分の指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1始まり
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    /// 検証データが空の場合は None
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

/// エポックごとの指標の履歴
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// 検証正解率が最も高いエポック（検証データがなければ学習正解率）
    pub fn best(&self) -> Option<&EpochMetrics> {
        let score = |m: &EpochMetrics| m.val_accuracy.unwrap_or(m.train_accuracy);
        self.epochs
            .iter()
            .fold(None, |best: Option<&EpochMetrics>, m| match best {
                Some(b) if score(b) >= score(m) => Some(b),
                _ => Some(m),
            })
    }
}

/// 学習結果
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: TransferClassifier<B>,
    pub history: TrainingHistory,
    /// キャンセルで中断した場合 true
    pub cancelled: bool,
}

/// 固定エポック数だけ学習する
///
/// 各エポックで学習データの順序を `seed` から作った乱数でシャッフルし、
/// Adamでパラメータを更新した後、検証データ（データ拡張なし）で評価します。
/// `cancel_flag` はバッチごとに確認し、立っていれば途中のエポックを捨てて
/// それまでの履歴を返します。
pub fn train<B: AutodiffBackend>(
    mut model: TransferClassifier<B>,
    config: &TrainingConfig,
    train_set: &ImageSubset,
    val_set: &ImageSubset,
    device: &B::Device,
    cancel_flag: &AtomicBool,
    mut on_epoch: impl FnMut(&EpochMetrics),
) -> Result<TrainingOutcome<B>> {
    if train_set.is_empty() {
        anyhow::bail!("学習データが空です");
    }
    if config.batch_size == 0 {
        anyhow::bail!("batch_size は1以上である必要があります");
    }

    let batcher = ImageBatcher::<B>::new(config.image_size)
        .with_augmentation(&config.augmentation, augmentation_seed(config.seed));
    let mut optim = AdamConfig::new().init::<B, TransferClassifier<B>>();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut history = TrainingHistory::default();

    let num_batches = train_set.len().div_ceil(config.batch_size);

    tracing::info!(
        "学習開始: 学習 {} 枚, 検証 {} 枚, {} エポック, バッチサイズ {}, 学習率 {}",
        train_set.len(),
        val_set.len(),
        config.num_epochs,
        config.batch_size,
        config.learning_rate
    );
    tracing::info!(
        "学習対象パラメータ: {} / {}",
        model.num_trainable_params(),
        burn::module::Module::num_params(&model)
    );

    for epoch in 1..=config.num_epochs {
        let mut indices: Vec<usize> = (0..train_set.len()).collect();
        indices.shuffle(&mut rng);

        let pb = ProgressBar::new(num_batches as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message(format!("epoch {}/{}", epoch, config.num_epochs));

        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for chunk in indices.chunks(config.batch_size) {
            if cancel_flag.load(Ordering::Relaxed) {
                pb.abandon_with_message("cancelled");
                tracing::warn!("学習がキャンセルされました（エポック {} は破棄）", epoch);
                return Ok(TrainingOutcome {
                    model,
                    history,
                    cancelled: true,
                });
            }

            let items: Vec<_> = chunk.iter().filter_map(|&i| train_set.get(i)).collect();
            if items.is_empty() {
                continue;
            }
            let n = items.len();

            let batch = batcher.batch(items, device);
            let logits = model.forward_train(batch.images);
            let loss = cross_entropy(logits.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            loss_sum += loss_value * n as f64;
            correct += count_correct(logits, batch.targets);
            seen += n;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optim.step(config.learning_rate, model, grads);

            pb.set_message(format!(
                "epoch {}/{} loss {:.4}",
                epoch, config.num_epochs, loss_value
            ));
            pb.inc(1);
        }
        pb.finish_and_clear();

        let (val_loss, val_accuracy) = if val_set.is_empty() {
            (None, None)
        } else {
            let evaluation = evaluate(&model.valid(), val_set, config.batch_size, config.image_size)?;
            (Some(evaluation.loss), Some(evaluation.accuracy))
        };

        let metrics = EpochMetrics {
            epoch,
            train_loss: loss_sum / seen.max(1) as f64,
            train_accuracy: correct as f64 / seen.max(1) as f64,
            val_loss,
            val_accuracy,
        };

        match (metrics.val_loss, metrics.val_accuracy) {
            (Some(vl), Some(va)) => tracing::info!(
                "Epoch {}/{}: loss {:.4}, acc {:.2}% | val_loss {:.4}, val_acc {:.2}%",
                epoch,
                config.num_epochs,
                metrics.train_loss,
                metrics.train_accuracy * 100.0,
                vl,
                va * 100.0
            ),
            _ => tracing::info!(
                "Epoch {}/{}: loss {:.4}, acc {:.2}%",
                epoch,
                config.num_epochs,
                metrics.train_loss,
                metrics.train_accuracy * 100.0
            ),
        }

        on_epoch(&metrics);
        history.push(metrics);
    }

    Ok(TrainingOutcome {
        model,
        history,
        cancelled: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ImageFolder;
    use crate::ml::ModelConfig;
    use burn::backend::Autodiff;
    use burn::tensor::Tensor;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};
    use std::path::Path;

    type TestAutodiffBackend = Autodiff<NdArray>;

    fn write_dataset(root: &Path) {
        for (class, color) in [("black", [10u8, 10, 10]), ("white", [240u8, 240, 240])] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..3 {
                RgbImage::from_pixel(16, 16, Rgb(color))
                    .save(dir.join(format!("{}_{}.png", class, i)))
                    .unwrap();
            }
        }
    }

    fn config() -> TrainingConfig {
        TrainingConfig {
            num_epochs: 2,
            batch_size: 2,
            learning_rate: 1e-2,
            seed: 7,
            image_size: 32,
            augmentation: AugmentationSettings::none(),
        }
    }

    #[test]
    fn test_history_best_prefers_validation_accuracy() {
        let mut history = TrainingHistory::default();
        for (epoch, train_acc, val_acc) in [(1, 0.9, 0.5), (2, 0.6, 0.8), (3, 0.95, 0.7)] {
            history.push(EpochMetrics {
                epoch,
                train_loss: 1.0,
                train_accuracy: train_acc,
                val_loss: Some(1.0),
                val_accuracy: Some(val_acc),
            });
        }
        assert_eq!(history.best().map(|m| m.epoch), Some(2));
        assert_eq!(history.last().map(|m| m.epoch), Some(3));
        assert!(TrainingHistory::default().best().is_none());
    }

    #[test]
    fn test_augmentation_uses_separate_random_stream() {
        let seed = config().seed;
        let mut order: Vec<usize> = (0..16).collect();
        let mut aug_order = order.clone();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        aug_order.shuffle(&mut StdRng::seed_from_u64(augmentation_seed(seed)));

        assert_ne!(order, aug_order);
        assert_eq!(augmentation_seed(u64::MAX), 0);
    }

    #[test]
    fn test_train_updates_head_only() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        let folder = ImageFolder::scan(dir.path()).unwrap();
        let (train_set, val_set) = folder.split(0.34).unwrap();
        assert_eq!(val_set.len(), 2);

        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2)
            .with_image_size(32)
            .init::<TestAutodiffBackend>(&device);

        let input = Tensor::<NdArray, 4>::ones([1, 3, 32, 32], &device);
        let features_before: Vec<f32> = model
            .valid()
            .forward_features(input.clone())
            .into_data()
            .iter::<f32>()
            .collect();

        let mut reported = Vec::new();
        let outcome = train(
            model,
            &config(),
            &train_set,
            &val_set,
            &device,
            &AtomicBool::new(false),
            |m| reported.push(m.epoch),
        )
        .unwrap();

        assert!(!outcome.cancelled);
        assert_eq!(reported, vec![1, 2]);
        assert_eq!(outcome.history.len(), 2);
        let last = outcome.history.last().unwrap();
        assert!(last.train_loss.is_finite());
        assert!(last.val_accuracy.is_some());

        let features_after: Vec<f32> = outcome
            .model
            .valid()
            .forward_features(input)
            .into_data()
            .iter::<f32>()
            .collect();
        assert_eq!(features_before, features_after);
    }

    #[test]
    fn test_cancel_returns_partial_history() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        let folder = ImageFolder::scan(dir.path()).unwrap();
        let (train_set, val_set) = folder.split(0.0).unwrap();
        assert!(val_set.is_empty());

        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2)
            .with_image_size(32)
            .init::<TestAutodiffBackend>(&device);

        let outcome = train(
            model,
            &config(),
            &train_set,
            &val_set,
            &device,
            &AtomicBool::new(true),
            |_| {},
        )
        .unwrap();

        assert!(outcome.cancelled);
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn test_empty_training_set_is_an_error() {
        let device = NdArrayDevice::Cpu;
        let model = ModelConfig::new(2).init::<TestAutodiffBackend>(&device);
        let empty = ImageSubset::new(Vec::new(), vec!["a".into(), "b".into()]);
        let result = train(model, &config(), &empty, &empty, &device, &AtomicBool::new(false), |_| {});
        assert!(result.is_err());
    }
}
