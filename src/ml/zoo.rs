//! 事前学習済み重みの取得（モデルズー）
//!
//! torchvisionが公開しているImageNet-1k学習済みResNetの重み（PyTorch state_dict）を
//! キャッシュディレクトリにダウンロードし、burn-importで特徴抽出器に読み込みます。

use anyhow::{Context, Result};
use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::ml::backbone::{BackboneKind, ResNet, ResNetRecord};
use crate::model::config::{ModelSettings, WeightsSetting};

/// 公開されている学習済み重み
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PretrainedWeights {
    pub file_name: &'static str,
    pub url: &'static str,
}

impl BackboneKind {
    /// ImageNet-1k学習済み重み
    pub fn pretrained_weights(&self) -> PretrainedWeights {
        match self {
            BackboneKind::ResNet18 => PretrainedWeights {
                file_name: "resnet18-f37072fd.pth",
                url: "https://download.pytorch.org/models/resnet18-f37072fd.pth",
            },
            BackboneKind::ResNet34 => PretrainedWeights {
                file_name: "resnet34-b627a593.pth",
                url: "https://download.pytorch.org/models/resnet34-b627a593.pth",
            },
        }
    }
}

/// 特徴抽出器の重みの取得元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    /// キャッシュディレクトリ経由でダウンロード
    Pretrained { cache_dir: PathBuf },
    /// ローカルのstate_dictファイル
    File(PathBuf),
    /// ランダム初期化
    RandomInit,
}

impl WeightSource {
    pub fn from_settings(settings: &ModelSettings) -> Self {
        match &settings.weights {
            WeightsSetting::Pretrained => WeightSource::Pretrained {
                cache_dir: settings.cache_dir.clone(),
            },
            WeightsSetting::File(path) => WeightSource::File(path.clone()),
            WeightsSetting::RandomInit => WeightSource::RandomInit,
        }
    }
}

/// 重みファイルがキャッシュになければダウンロードし、そのパスを返す
pub fn ensure_downloaded(weights: &PretrainedWeights, cache_dir: &Path) -> Result<PathBuf> {
    let target = cache_dir.join(weights.file_name);
    if target.is_file() {
        tracing::debug!("キャッシュ済みの重みを使用します: {}", target.display());
        return Ok(target);
    }

    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("Failed to create cache directory: {}", cache_dir.display()))?;

    tracing::info!("学習済み重みをダウンロードします: {}", weights.url);

    let response = reqwest::blocking::get(weights.url)
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to download {}", weights.url))?;

    let pb = match response.content_length() {
        Some(total) => {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    // 途中で失敗しても壊れたファイルがキャッシュに残らないよう一時ファイルに書く
    let partial = cache_dir.join(format!("{}.part", weights.file_name));
    let mut file = File::create(&partial)
        .with_context(|| format!("Failed to create file: {}", partial.display()))?;
    let mut reader = pb.wrap_read(response);
    std::io::copy(&mut reader, &mut file)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    drop(file);
    pb.finish_and_clear();

    std::fs::rename(&partial, &target)
        .with_context(|| format!("Failed to move {} into place", partial.display()))?;

    tracing::info!("ダウンロード完了: {}", target.display());
    Ok(target)
}

/// PyTorch state_dict を特徴抽出器のレコードとして読み込む
///
/// torchvisionのキーを本クレートのフィールド名に読み替えます:
/// - `layerN.i.*` → `layerN.blocks.i.*`
/// - `downsample.0` / `downsample.1` → `downsample.conv` / `downsample.bn`
///
/// `fc.*` は特徴抽出器に対応するフィールドがないため無視されます。
pub fn load_state_dict<B: Backend>(path: &Path, device: &B::Device) -> Result<ResNetRecord<B>> {
    PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(state_dict_args(path), device)
        .map_err(|e| anyhow::anyhow!("学習済み重みの読み込みエラー ({}): {:?}", path.display(), e))
}

fn state_dict_args(path: &Path) -> LoadArgs {
    LoadArgs::new(path.to_path_buf())
        .with_key_remap(r"downsample\.0", "downsample.conv")
        .with_key_remap(r"downsample\.1", "downsample.bn")
        .with_key_remap(r"(layer[1-4])\.([0-9]+)", "$1.blocks.$2")
}

/// 重みの取得元に従って特徴抽出器を構築
pub fn load_backbone<B: Backend>(kind: BackboneKind, source: &WeightSource, device: &B::Device) -> Result<ResNet<B>> {
    let backbone = kind.init::<B>(device);

    let path = match source {
        WeightSource::RandomInit => {
            tracing::warn!("特徴抽出器をランダム初期化します（学習済み重みなし）");
            return Ok(backbone);
        }
        WeightSource::File(path) => {
            if !path.is_file() {
                anyhow::bail!("重みファイルが見つかりません: {}", path.display());
            }
            path.clone()
        }
        WeightSource::Pretrained { cache_dir } => ensure_downloaded(&kind.pretrained_weights(), cache_dir)?,
    };

    tracing::info!("{} の学習済み重みを読み込みます: {}", kind, path.display());
    let record = load_state_dict::<B>(&path, device)?;
    Ok(backbone.load_record(record))
}
