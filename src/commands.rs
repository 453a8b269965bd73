//! CLIの各サブコマンドの処理
//!
//! バックエンドに依存しない形で実装し、`main` からデバイス設定に応じて
//! CPU / GPU のどちらかで呼び出します。

use anyhow::{Context, Result};
use burn::{
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    tensor::backend::{AutodiffBackend, Backend},
};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::data::{ImageFolder, ImageSubset};
use crate::ml::{
    evaluate, load_backbone, train, Evaluation, InferenceEngine, ModelConfig, Prediction, TrainingConfig,
    TrainingHistory, WeightSource,
};
use crate::model::{
    load_metadata, print_metadata_info, save_model_with_metadata, AppConfig, InferenceConfig, ModelMetadata,
};
use crate::report;

/// 学習コマンドの結果
#[derive(Debug)]
pub struct TrainSummary {
    /// 保存したモデル（キャンセル時は None）
    pub model_path: Option<PathBuf>,
    pub history: TrainingHistory,
    /// 検証データでの最終評価（検証データが空の場合は None）
    pub evaluation: Option<Evaluation>,
    pub cancelled: bool,
}

/// データセットを読み込み、クラス構成をログに出す
fn scan_dataset(data_dir: &Path) -> Result<ImageFolder> {
    let folder = ImageFolder::scan(data_dir)
        .with_context(|| format!("データセットを読み込めません: {}", data_dir.display()))?;

    tracing::info!(
        "{} クラス, {} 枚の画像を検出しました: {}",
        folder.num_classes(),
        folder.num_images(),
        data_dir.display()
    );
    for (i, (name, count)) in folder.class_names().iter().zip(folder.class_counts()).enumerate() {
        tracing::info!("  クラス {}: {} ({} 枚)", i, name, count);
    }

    Ok(folder)
}

/// 転移学習を実行し、モデルとレポートを保存
pub fn run_train<B: AutodiffBackend>(
    config: &AppConfig,
    device: &B::Device,
    cancel_flag: &AtomicBool,
) -> Result<TrainSummary> {
    config.validate()?;
    let settings = &config.training;

    let folder = scan_dataset(&settings.data_dir)?;
    let (train_set, val_set) = folder.split(settings.validation_split)?;
    tracing::info!("学習データ: {} 枚, 検証データ: {} 枚", train_set.len(), val_set.len());

    let model_config = ModelConfig::new(folder.num_classes())
        .with_backbone(config.model.backbone)
        .with_dropout(config.model.dropout)
        .with_image_size(settings.image_size)
        .with_freeze_backbone(config.model.freeze_backbone);

    let backbone = load_backbone::<B>(
        config.model.backbone,
        &WeightSource::from_settings(&config.model),
        device,
    )?;
    let model = model_config.init_with_backbone(backbone, device);
    let total_params = model.num_params();
    let trainable_params = model.num_trainable_params();

    let training_config = TrainingConfig {
        num_epochs: settings.num_epochs,
        batch_size: settings.batch_size,
        learning_rate: settings.learning_rate,
        seed: settings.seed,
        image_size: settings.image_size,
        augmentation: config.augmentation.clone(),
    };

    let outcome = train(
        model,
        &training_config,
        &train_set,
        &val_set,
        device,
        cancel_flag,
        |_| {},
    )?;

    if !outcome.history.is_empty() {
        let written = report::write_training_report(&outcome.history, &config.report_dir)?;
        for path in written {
            tracing::info!("レポートを保存しました: {}", path.display());
        }
    }

    if outcome.cancelled {
        tracing::warn!("学習がキャンセルされたため、モデルは保存しません");
        return Ok(TrainSummary {
            model_path: None,
            history: outcome.history,
            evaluation: None,
            cancelled: true,
        });
    }

    let model = outcome.model.valid();

    let evaluation = if val_set.is_empty() {
        None
    } else {
        let evaluation = evaluate(&model, &val_set, settings.batch_size, settings.image_size)?;
        report::print_confusion_table(&evaluation.confusion_matrix, folder.class_names());
        report::write_evaluation_report(&evaluation, folder.class_names(), &config.report_dir)?;
        Some(evaluation)
    };

    let mut metadata = ModelMetadata::new(folder.class_names().to_vec(), &model_config);
    metadata.num_epochs = outcome.history.len();
    metadata.batch_size = settings.batch_size;
    metadata.learning_rate = settings.learning_rate;
    metadata.validation_split = settings.validation_split;
    metadata.seed = settings.seed;
    metadata.total_params = total_params;
    metadata.trainable_params = trainable_params;
    metadata.final_metrics = outcome.history.last().cloned();

    let model_path = save_model_with_metadata(&config.model.model_path, &metadata, &model.to_bytes()?)?;

    Ok(TrainSummary {
        model_path: Some(model_path),
        history: outcome.history,
        evaluation,
        cancelled: false,
    })
}

/// 保存済みモデルを評価
///
/// 学習時と同じ検証割合で分割を再現し、その検証データで評価します。
/// `use_all` が true の場合、または検証データが空の場合はデータセット全体を使います。
pub fn run_evaluate<B: Backend>(
    model_path: &Path,
    data_dir: &Path,
    batch_size: usize,
    use_all: bool,
    report_dir: &Path,
    device: &B::Device,
) -> Result<Evaluation> {
    let engine = InferenceEngine::<B>::load(model_path, device)?;
    let metadata = engine.metadata();

    let folder = scan_dataset(data_dir)?;
    if folder.class_names() != metadata.class_labels.as_slice() {
        anyhow::bail!(
            "データセットのクラス構成がモデルと一致しません\n  モデル: {}\n  データ: {}",
            metadata.class_labels.join(", "),
            folder.class_names().join(", ")
        );
    }

    let subset: ImageSubset = if use_all {
        folder.all()
    } else {
        let (_, val_set) = folder.split(metadata.validation_split)?;
        if val_set.is_empty() {
            tracing::warn!("検証データが空のため、データセット全体で評価します");
            folder.all()
        } else {
            val_set
        }
    };

    let evaluation = evaluate(engine.model(), &subset, batch_size, metadata.image_size)?;

    println!(
        "評価: {} 枚, loss {:.4}, accuracy {:.2}%",
        subset.len(),
        evaluation.loss,
        evaluation.accuracy * 100.0
    );
    report::print_confusion_table(&evaluation.confusion_matrix, &metadata.class_labels);
    for path in report::write_evaluation_report(&evaluation, &metadata.class_labels, report_dir)? {
        tracing::info!("レポートを保存しました: {}", path.display());
    }

    Ok(evaluation)
}

/// 画像を分類して結果を表示
pub fn run_predict<B: Backend>(
    model_path: &Path,
    images: &[PathBuf],
    top_k: usize,
    device: &B::Device,
) -> Result<Vec<(PathBuf, Prediction)>> {
    let engine = InferenceEngine::<B>::load(model_path, device)?.with_top_k(top_k);
    let predictions = engine.classify_batch(images)?;

    for (path, prediction) in images.iter().zip(&predictions) {
        println!(
            "{}: {} ({:.2}%)",
            path.display(),
            prediction.label,
            prediction.confidence * 100.0
        );
        for (label, prob) in prediction.top_k.iter().skip(1) {
            println!("    {}: {:.2}%", label, prob * 100.0);
        }
    }

    Ok(images.iter().cloned().zip(predictions).collect())
}

/// モデルのメタデータを表示
pub fn run_info(model_path: &Path) -> Result<()> {
    let metadata = load_metadata(model_path)?;
    print_metadata_info(&metadata);
    InferenceConfig::from_metadata(&metadata).print_info();
    Ok(())
}

/// データディレクトリからクラスラベルを取得（ソート順 = クラスインデックス）
pub fn class_labels_from_data_dir(data_dir: &Path) -> Result<Vec<String>> {
    Ok(ImageFolder::scan(data_dir)?.class_names().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::AugmentationSettings;
    use crate::model::WeightsSetting;
    use burn::backend::Autodiff;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn write_dataset(root: &Path) {
        for (class, color) in [("red", [220u8, 20, 20]), ("blue", [20u8, 20, 220])] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..3 {
                RgbImage::from_pixel(24, 24, Rgb(color))
                    .save(dir.join(format!("{:02}.png", i)))
                    .unwrap();
            }
        }
    }

    fn test_config(root: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.model.weights = WeightsSetting::RandomInit;
        config.model.model_path = root.join("models/classifier.tar.gz");
        config.training.data_dir = root.join("data");
        config.training.image_size = 32;
        config.training.num_epochs = 1;
        config.training.batch_size = 2;
        config.training.validation_split = 0.34;
        config.augmentation = AugmentationSettings::default();
        config.report_dir = root.join("reports");
        config
    }

    #[test]
    fn test_train_evaluate_predict() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_dataset(&config.training.data_dir);
        let device = NdArrayDevice::Cpu;

        let summary = run_train::<TestAutodiffBackend>(&config, &device, &AtomicBool::new(false)).unwrap();
        assert!(!summary.cancelled);
        assert_eq!(summary.history.len(), 1);
        let model_path = summary.model_path.unwrap();
        assert!(model_path.is_file());
        assert_eq!(summary.evaluation.map(|e| e.confusion_matrix.total()), Some(2));

        let metadata = load_metadata(&model_path).unwrap();
        assert_eq!(metadata.class_labels, vec!["blue".to_string(), "red".to_string()]);
        assert_eq!(metadata.num_epochs, 1);
        assert_eq!(metadata.trainable_params, 512 * 2 + 2);
        assert!(metadata.final_metrics.is_some());

        for name in [report::HISTORY_FILE, report::LOSS_CHART_FILE, report::CONFUSION_SVG_FILE] {
            assert!(config.report_dir.join(name).is_file());
        }

        let evaluation = run_evaluate::<TestBackend>(
            &model_path,
            &config.training.data_dir,
            4,
            true,
            &config.report_dir,
            &device,
        )
        .unwrap();
        assert_eq!(evaluation.confusion_matrix.total(), 6);
        assert!((0.0..=1.0).contains(&evaluation.accuracy));

        let image = config.training.data_dir.join("red/00.png");
        let predictions = run_predict::<TestBackend>(&model_path, &[image], 2, &device).unwrap();
        assert_eq!(predictions.len(), 1);
        assert!(metadata.class_labels.contains(&predictions[0].1.label));
        assert_eq!(predictions[0].1.top_k.len(), 2);

        run_info(&model_path).unwrap();
    }

    #[test]
    fn test_evaluate_rejects_mismatched_classes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_dataset(&config.training.data_dir);
        let device = NdArrayDevice::Cpu;

        let summary = run_train::<TestAutodiffBackend>(&config, &device, &AtomicBool::new(false)).unwrap();
        let model_path = summary.model_path.unwrap();

        let other = dir.path().join("other");
        for class in ["apple", "pear"] {
            std::fs::create_dir_all(other.join(class)).unwrap();
            RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))
                .save(other.join(class).join("a.png"))
                .unwrap();
        }

        let err = run_evaluate::<TestBackend>(&model_path, &other, 2, true, &config.report_dir, &device).unwrap_err();
        assert!(err.to_string().contains("一致しません"));
    }

    #[test]
    fn test_cancelled_training_saves_no_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_dataset(&config.training.data_dir);

        let summary =
            run_train::<TestAutodiffBackend>(&config, &NdArrayDevice::Cpu, &AtomicBool::new(true)).unwrap();
        assert!(summary.cancelled);
        assert!(summary.model_path.is_none());
        assert!(!config.model.model_path.exists());
    }

    #[test]
    fn test_class_labels_from_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(dir.path());
        assert_eq!(
            class_labels_from_data_dir(dir.path()).unwrap(),
            vec!["blue".to_string(), "red".to_string()]
        );
    }
}
