//! アプリケーション設定管理モジュール
//!
//! 計算デバイス、モデル、学習、データ拡張の設定をJSON形式で保存・読み込みします。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::data::augmentation::AugmentationSettings;
use crate::ml::backbone::BackboneKind;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

/// 特徴抽出器の重みの取得元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum WeightsSetting {
    /// モデルズーからImageNet学習済み重みをダウンロード（キャッシュ済みなら再利用）
    #[default]
    Pretrained,
    /// ローカルのPyTorch state_dictファイル
    File(PathBuf),
    /// ランダム初期化（オフライン確認用）
    RandomInit,
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 特徴抽出器のアーキテクチャ
    pub backbone: BackboneKind,
    /// 特徴抽出器の重み
    #[serde(default)]
    pub weights: WeightsSetting,
    /// 事前学習済み重みのキャッシュディレクトリ
    pub cache_dir: PathBuf,
    /// 特徴抽出層を凍結するか
    pub freeze_backbone: bool,
    /// 分類ヘッド前のドロップアウト率
    pub dropout: f64,
    /// 学習済みモデルの保存先
    pub model_path: PathBuf,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            backbone: BackboneKind::ResNet18,
            weights: WeightsSetting::Pretrained,
            cache_dir: PathBuf::from("models/pretrained"),
            freeze_backbone: true,
            dropout: 0.2,
            model_path: PathBuf::from("models/transfer_classifier.tar.gz"),
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// 学習画像のルートディレクトリ（クラスごとのサブディレクトリ）
    pub data_dir: PathBuf,
    /// 入力画像サイズ（正方形にリサイズ）
    pub image_size: usize,
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 検証データの割合
    pub validation_split: f64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/train"),
            image_size: 224,
            num_epochs: 10,
            batch_size: 32,
            learning_rate: 1e-3,
            seed: 42,
            validation_split: 0.2,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    pub device_type: DeviceType,
    /// モデル設定
    pub model: ModelSettings,
    /// トレーニング設定
    pub training: TrainingSettings,
    /// データ拡張設定（学習データのみに適用）
    #[serde(default)]
    pub augmentation: AugmentationSettings,
    /// 損失曲線・混同行列の出力先
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::default(),
            model: ModelSettings::default(),
            training: TrainingSettings::default(),
            augmentation: AugmentationSettings::default(),
            report_dir: default_report_dir(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("transfer_classifier.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 設定を読み込む、存在しない場合はデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(config) => {
                    tracing::info!("設定ファイルを読み込みました: {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "設定ファイルの読み込みに失敗しました ({}): {}。デフォルト設定を使用します",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            Self::default()
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// 設定値の整合性を検証
    pub fn validate(&self) -> anyhow::Result<()> {
        let t = &self.training;
        if t.batch_size == 0 {
            anyhow::bail!("batch_size は1以上である必要があります");
        }
        if t.num_epochs == 0 {
            anyhow::bail!("num_epochs は1以上である必要があります");
        }
        if !(0.0..1.0).contains(&t.validation_split) {
            anyhow::bail!(
                "validation_split は [0, 1) の範囲である必要があります: {}",
                t.validation_split
            );
        }
        if t.image_size < 32 {
            anyhow::bail!("image_size が小さすぎます: {} (最小32)", t.image_size);
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            anyhow::bail!("dropout は [0, 1) の範囲である必要があります");
        }
        Ok(())
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("計算デバイス: {}", self.device_type);
        println!("特徴抽出器: {}", self.model.backbone);
        println!("重み: {:?}", self.model.weights);
        println!("特徴抽出層の凍結: {}", self.model.freeze_backbone);
        println!("ドロップアウト率: {}", self.model.dropout);
        println!("モデル保存先: {}", self.model.model_path.display());
        println!("\n--- トレーニング設定 ---");
        println!("データ: {}", self.training.data_dir.display());
        println!("画像サイズ: {0}x{0}", self.training.image_size);
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("検証データ割合: {}", self.training.validation_split);
        println!("シード: {}", self.training.seed);
        println!("\n--- データ拡張 ---");
        println!("{:?}", self.augmentation);
        println!("\nレポート出力先: {}", self.report_dir.display());
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.device_type, DeviceType::Wgpu);
        assert_eq!(config.training.image_size, 224);
        assert_eq!(config.training.num_epochs, 10);
        assert!(config.model.freeze_backbone);
        config.validate().unwrap();
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut config = AppConfig::default();
        config.model.weights = WeightsSetting::File(PathBuf::from("w/resnet18.pth"));
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.device_type, deserialized.device_type);
        assert_eq!(config.model.weights, deserialized.model.weights);
        assert_eq!(config.training.batch_size, deserialized.training.batch_size);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");
        let mut config = AppConfig::default();
        config.training.num_epochs = 3;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.training.num_epochs, 3);
    }

    #[test]
    fn test_load_or_default_falls_back_on_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = AppConfig::load_or_default(&path);
        assert_eq!(config.training.batch_size, 32);
    }

    #[test]
    fn test_validate_rejects_bad_split() {
        let mut config = AppConfig::default();
        config.training.validation_split = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_type_display() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
    }
}
