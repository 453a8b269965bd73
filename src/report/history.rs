//! 学習履歴のCSV入出力

use anyhow::{Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::path::Path;

use crate::ml::{EpochMetrics, TrainingHistory};

/// 1エポック1行で保存（検証データがない場合 val_* は空欄）
///
/// 列: epoch, train_loss, train_accuracy, val_loss, val_accuracy
pub fn save_csv(history: &TrainingHistory, path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to create CSV: {}", path.display()))?;

    for metrics in &history.epochs {
        writer.serialize(metrics)?;
    }
    writer.flush()?;

    Ok(())
}

/// `save_csv` で保存した履歴を読み込む
pub fn load_csv(path: &Path) -> Result<TrainingHistory> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV: {}", path.display()))?;

    let mut history = TrainingHistory::default();
    for result in reader.deserialize() {
        let metrics: EpochMetrics = result?;
        history.push(metrics);
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.csv");

        let mut history = TrainingHistory::default();
        history.push(EpochMetrics {
            epoch: 1,
            train_loss: 0.5,
            train_accuracy: 0.75,
            val_loss: Some(0.25),
            val_accuracy: Some(1.0),
        });
        history.push(EpochMetrics {
            epoch: 2,
            train_loss: 0.25,
            train_accuracy: 1.0,
            val_loss: None,
            val_accuracy: None,
        });
        save_csv(&history, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "epoch,train_loss,train_accuracy,val_loss,val_accuracy");
        assert_eq!(lines[1], "1,0.5,0.75,0.25,1.0");
        assert_eq!(lines[2], "2,0.25,1.0,,");

        assert_eq!(load_csv(&path).unwrap(), history);
    }
}
