//! 学習・評価結果のレポート出力

pub mod charts;
pub mod confusion;
pub mod history;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::ml::{Evaluation, TrainingHistory};

pub use charts::{accuracy_chart, loss_chart};
pub use confusion::{confusion_svg, print_confusion_table, ConfusionReport};
pub use history::{load_csv, save_csv};

pub const HISTORY_FILE: &str = "history.csv";
pub const LOSS_CHART_FILE: &str = "loss.svg";
pub const ACCURACY_CHART_FILE: &str = "accuracy.svg";
pub const CONFUSION_SVG_FILE: &str = "confusion_matrix.svg";
pub const CONFUSION_JSON_FILE: &str = "confusion_matrix.json";

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create report directory: {}", dir.display()))
}

/// 学習履歴（CSV）と損失・正解率の曲線（SVG）を保存し、書き出したファイルを返す
pub fn write_training_report(history: &TrainingHistory, dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;

    let csv_path = dir.join(HISTORY_FILE);
    save_csv(history, &csv_path)?;

    let loss_path = dir.join(LOSS_CHART_FILE);
    charts::save_svg(&loss_chart(history), &loss_path)?;

    let accuracy_path = dir.join(ACCURACY_CHART_FILE);
    charts::save_svg(&accuracy_chart(history), &accuracy_path)?;

    Ok(vec![csv_path, loss_path, accuracy_path])
}

/// 混同行列（SVG, JSON）を保存し、書き出したファイルを返す
pub fn write_evaluation_report(evaluation: &Evaluation, labels: &[String], dir: &Path) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;

    let svg_path = dir.join(CONFUSION_SVG_FILE);
    let json_path = dir.join(CONFUSION_JSON_FILE);
    confusion::save_confusion(&evaluation.confusion_matrix, labels, &svg_path, &json_path)?;

    Ok(vec![svg_path, json_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{ConfusionMatrix, EpochMetrics};

    #[test]
    fn test_report_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");

        let mut history = TrainingHistory::default();
        history.push(EpochMetrics {
            epoch: 1,
            train_loss: 0.7,
            train_accuracy: 0.5,
            val_loss: Some(0.6),
            val_accuracy: Some(0.5),
        });
        let written = write_training_report(&history, &out).unwrap();
        assert_eq!(written.len(), 3);

        let evaluation = Evaluation {
            loss: 0.6,
            accuracy: 0.5,
            confusion_matrix: ConfusionMatrix::from_predictions(&[0, 0], &[0, 1], 2),
            predictions: vec![0, 0],
            targets: vec![0, 1],
        };
        write_evaluation_report(&evaluation, &["a".into(), "b".into()], &out).unwrap();

        for name in [
            HISTORY_FILE,
            LOSS_CHART_FILE,
            ACCURACY_CHART_FILE,
            CONFUSION_SVG_FILE,
            CONFUSION_JSON_FILE,
        ] {
            assert!(out.join(name).is_file(), "{} missing", name);
        }
    }
}
