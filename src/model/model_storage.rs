//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラスラベル、特徴抽出器、学習条件など）
//! - model.bin       - モデルの重み（全精度バイナリ）

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 保存先のパス（`.gz` で終わらなければファイル名の末尾に `.tar.gz` を付ける）
pub fn archive_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        let mut name = output_path.as_os_str().to_os_string();
        name.push(".tar.gz");
        PathBuf::from(name)
    }
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    builder
        .append(&header, data)
        .with_context(|| format!("Failed to add {} to tar", name))
}

/// メタデータと共にモデルをTar.gz形式で保存し、保存先のパスを返す
///
/// 1つのtar.gzファイルに以下を含む：
/// - metadata.json : メタデータ
/// - model.bin : モデルの重み
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
) -> Result<PathBuf> {
    let tar_gz_path = archive_path(output_path);

    // 親ディレクトリが存在しない場合は作成
    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {:?}", parent))?;
        }
    }

    let tar_gz_file = File::create(&tar_gz_path)
        .with_context(|| format!("Failed to create tar.gz file: {:?}", tar_gz_path))?;

    let encoder = GzEncoder::new(tar_gz_file, Compression::default());
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, MODEL_ENTRY, model_binary)?;

    // gzipストリームまで閉じる
    tar_builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .context("Failed to finalize tar.gz archive")?;

    tracing::info!(
        "モデルを保存しました: {} ({:.2} MB)",
        tar_gz_path.display(),
        model_binary.len() as f64 / 1024.0 / 1024.0
    );

    Ok(tar_gz_path)
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_file = File::open(tar_gz_path)
        .with_context(|| format!("Failed to open tar.gz file: {:?}", tar_gz_path))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(METADATA_ENTRY) {
            let mut json_str = String::new();
            entry.read_to_string(&mut json_str)?;
            return ModelMetadata::from_json_string(&json_str);
        }
    }

    Err(anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY))
}

/// Tar.gzからモデルバイナリを読み込む
pub fn load_model_binary(tar_gz_path: &Path) -> Result<Vec<u8>> {
    let mut archive = open_archive(tar_gz_path)?;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.path()?.to_str() == Some(MODEL_ENTRY) {
            let mut buffer = Vec::new();
            entry.read_to_end(&mut buffer)?;
            return Ok(buffer);
        }
    }

    Err(anyhow::anyhow!("{} not found in tar.gz archive", MODEL_ENTRY))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    let mut archive = open_archive(tar_gz_path)?;

    let mut metadata_opt: Option<ModelMetadata> = None;
    let mut model_binary_opt: Option<Vec<u8>> = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;

        match path.to_str() {
            Some(METADATA_ENTRY) => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str)?;
                metadata_opt = Some(ModelMetadata::from_json_string(&json_str)?);
            }
            Some(MODEL_ENTRY) => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                model_binary_opt = Some(buffer);
            }
            _ => {}
        }
    }

    match (metadata_opt, model_binary_opt) {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(anyhow::anyhow!("{} not found in tar.gz archive", METADATA_ENTRY)),
        (_, None) => Err(anyhow::anyhow!("{} not found in tar.gz archive", MODEL_ENTRY)),
    }
}

/// メタデータをコンソールに表示
pub fn print_metadata_info(metadata: &ModelMetadata) {
    println!("\n=== モデルメタデータ ===");
    println!("クラス数: {}", metadata.class_labels.len());
    println!("クラスラベル: {}", metadata.class_labels.join(", "));
    println!("特徴抽出器: {} (凍結: {})", metadata.backbone, metadata.freeze_backbone);
    println!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    println!(
        "正規化: mean={:?}, std={:?}",
        metadata.normalization_mean, metadata.normalization_std
    );
    println!("ドロップアウト: {}", metadata.dropout);
    println!(
        "学習条件: {} エポック, バッチサイズ {}, 学習率 {}, 検証割合 {}, seed {}",
        metadata.num_epochs, metadata.batch_size, metadata.learning_rate, metadata.validation_split, metadata.seed
    );
    println!(
        "パラメータ数: {} (学習対象 {})",
        metadata.total_params, metadata.trainable_params
    );
    if let Some(m) = &metadata.final_metrics {
        print!(
            "最終指標: epoch {} loss {:.4} acc {:.2}%",
            m.epoch,
            m.train_loss,
            m.train_accuracy * 100.0
        );
        if let (Some(vl), Some(va)) = (m.val_loss, m.val_accuracy) {
            print!(" | val_loss {:.4} val_acc {:.2}%", vl, va * 100.0);
        }
        println!();
    }
    println!("学習日時: {}", metadata.trained_at);
    println!("========================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ModelConfig;

    fn metadata() -> ModelMetadata {
        ModelMetadata::new(vec!["cats".into(), "dogs".into()], &ModelConfig::new(2))
    }

    #[test]
    fn test_archive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = metadata();
        let binary = vec![1u8, 2, 3, 4, 5];

        let path = save_model_with_metadata(&dir.path().join("nested/model"), &metadata, &binary).unwrap();
        assert!(path.to_string_lossy().ends_with("model.tar.gz"));

        assert_eq!(load_metadata(&path).unwrap(), metadata);
        assert_eq!(load_model_binary(&path).unwrap(), binary);

        let (m, b) = load_model_with_metadata(&path).unwrap();
        assert_eq!(m, metadata);
        assert_eq!(b, binary);
    }

    #[test]
    fn test_archive_path_keeps_gz_extension() {
        assert_eq!(archive_path(Path::new("out/a.tar.gz")), PathBuf::from("out/a.tar.gz"));
        assert_eq!(archive_path(Path::new("out/a")), PathBuf::from("out/a.tar.gz"));
        assert_eq!(archive_path(Path::new("out/clf.v2")), PathBuf::from("out/clf.v2.tar.gz"));
    }

    #[test]
    fn test_missing_entry_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.tar.gz");

        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = Builder::new(encoder);
        append_entry(&mut builder, MODEL_ENTRY, &[0u8; 4]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = load_metadata(&path).unwrap_err();
        assert!(err.to_string().contains("metadata.json"));
        let err = load_model_with_metadata(&path).unwrap_err();
        assert!(err.to_string().contains("metadata.json"));
        assert_eq!(load_model_binary(&path).unwrap(), vec![0u8; 4]);
    }

    #[test]
    fn test_missing_file() {
        let err = load_metadata(Path::new("does/not/exist.tar.gz")).unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }
}
