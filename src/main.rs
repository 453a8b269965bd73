#![recursion_limit = "256"]
//! 転移学習による画像分類CLI

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use transfer_classifier::backend::{
    cpu_device, gpu_device, CpuAutodiffBackend, CpuBackend, GpuAutodiffBackend, GpuBackend,
};
use transfer_classifier::commands;
use transfer_classifier::logging::init_logging;
use transfer_classifier::ml::BackboneKind;
use transfer_classifier::model::{AppConfig, DeviceType, WeightsSetting};

#[derive(Parser, Debug)]
#[command(name = "transfer_classifier")]
#[command(version)]
#[command(about = "Transfer learning image classifier (frozen ResNet + new head) with Burn", long_about = None)]
struct Cli {
    /// 設定ファイル（存在しなければデフォルト設定）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 計算デバイス（設定ファイルの値を上書き）
    #[arg(long, global = true, value_enum)]
    device: Option<DeviceArg>,

    /// デバッグログを出力
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DeviceArg {
    Wgpu,
    Cpu,
}

impl From<DeviceArg> for DeviceType {
    fn from(arg: DeviceArg) -> Self {
        match arg {
            DeviceArg::Wgpu => DeviceType::Wgpu,
            DeviceArg::Cpu => DeviceType::Cpu,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 分類ヘッドを学習してモデルを保存
    Train {
        /// 学習画像のディレクトリ（クラスごとのサブディレクトリ）
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// 入力画像サイズ（正方形）
        #[arg(long)]
        image_size: Option<usize>,

        /// 検証データの割合 [0, 1)
        #[arg(long)]
        validation_split: Option<f64>,

        #[arg(long)]
        seed: Option<u64>,

        /// resnet18 / resnet34
        #[arg(long)]
        backbone: Option<BackboneKind>,

        /// ローカルのPyTorch重みファイル（ダウンロードしない）
        #[arg(long, conflicts_with = "random_init")]
        weights: Option<PathBuf>,

        /// 学習済み重みを使わずランダム初期化
        #[arg(long)]
        random_init: bool,

        /// 特徴抽出層も学習する
        #[arg(long)]
        no_freeze: bool,

        /// データ拡張を無効化
        #[arg(long)]
        no_augment: bool,

        /// モデルの保存先（.tar.gz）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// レポートの出力先
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// 保存済みモデルを評価して混同行列を出力
    Evaluate {
        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long)]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// 検証分割ではなくデータセット全体で評価
        #[arg(long)]
        all: bool,

        #[arg(long)]
        report_dir: Option<PathBuf>,
    },

    /// 画像を分類
    Predict {
        #[arg(short, long)]
        model: PathBuf,

        /// 分類する画像
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// 表示する上位クラス数
        #[arg(short = 'k', long, default_value = "3")]
        top_k: usize,
    },

    /// モデルのメタデータを表示
    Info {
        #[arg(short, long)]
        model: PathBuf,
    },

    /// デフォルト設定ファイルを書き出す
    InitConfig {
        /// 既存のファイルを上書き
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load_or_default(&config_path);
    if let Some(device) = cli.device {
        config.device_type = device.into();
    }

    match cli.command {
        Commands::Train {
            data_dir,
            epochs,
            batch_size,
            learning_rate,
            image_size,
            validation_split,
            seed,
            backbone,
            weights,
            random_init,
            no_freeze,
            no_augment,
            output,
            report_dir,
        } => {
            let t = &mut config.training;
            if let Some(v) = data_dir {
                t.data_dir = v;
            }
            if let Some(v) = epochs {
                t.num_epochs = v;
            }
            if let Some(v) = batch_size {
                t.batch_size = v;
            }
            if let Some(v) = learning_rate {
                t.learning_rate = v;
            }
            if let Some(v) = image_size {
                t.image_size = v;
            }
            if let Some(v) = validation_split {
                t.validation_split = v;
            }
            if let Some(v) = seed {
                t.seed = v;
            }

            let m = &mut config.model;
            if let Some(v) = backbone {
                m.backbone = v;
            }
            if let Some(path) = weights {
                m.weights = WeightsSetting::File(path);
            }
            if random_init {
                m.weights = WeightsSetting::RandomInit;
            }
            if no_freeze {
                m.freeze_backbone = false;
            }
            if let Some(v) = output {
                m.model_path = v;
            }
            if no_augment {
                config.augmentation.enabled = false;
            }
            if let Some(v) = report_dir {
                config.report_dir = v;
            }

            if cli.verbose {
                config.display();
            }

            // CLIからはキャンセルしない
            let cancel_flag = AtomicBool::new(false);
            let summary = match config.device_type {
                DeviceType::Wgpu => {
                    commands::run_train::<GpuAutodiffBackend>(&config, &gpu_device(), &cancel_flag)?
                }
                DeviceType::Cpu => {
                    commands::run_train::<CpuAutodiffBackend>(&config, &cpu_device(), &cancel_flag)?
                }
            };

            if let Some(best) = summary.history.best() {
                println!(
                    "最良エポック: {} (train_acc {:.2}%{})",
                    best.epoch,
                    best.train_accuracy * 100.0,
                    best.val_accuracy
                        .map(|v| format!(", val_acc {:.2}%", v * 100.0))
                        .unwrap_or_default()
                );
            }
            if let Some(path) = summary.model_path {
                println!("学習完了: {} に保存しました", path.display());
            }
        }

        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
            all,
            report_dir,
        } => {
            let report_dir = report_dir.unwrap_or_else(|| config.report_dir.clone());
            match config.device_type {
                DeviceType::Wgpu => {
                    commands::run_evaluate::<GpuBackend>(&model, &data_dir, batch_size, all, &report_dir, &gpu_device())?;
                }
                DeviceType::Cpu => {
                    commands::run_evaluate::<CpuBackend>(&model, &data_dir, batch_size, all, &report_dir, &cpu_device())?;
                }
            }
        }

        Commands::Predict { model, images, top_k } => match config.device_type {
            DeviceType::Wgpu => {
                commands::run_predict::<GpuBackend>(&model, &images, top_k, &gpu_device())?;
            }
            DeviceType::Cpu => {
                commands::run_predict::<CpuBackend>(&model, &images, top_k, &cpu_device())?;
            }
        },

        Commands::Info { model } => commands::run_info(&model)?,

        Commands::InitConfig { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "設定ファイルが既に存在します: {}（上書きするには --force）",
                    config_path.display()
                );
            }
            AppConfig::default().save(&config_path)?;
            println!("設定ファイルを作成しました: {}", config_path.display());
        }
    }

    Ok(())
}
