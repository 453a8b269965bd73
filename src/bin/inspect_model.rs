//! 保存済みモデルアーカイブの確認用バイナリ

use transfer_classifier::model::{load_model_with_metadata, print_metadata_info, InferenceConfig};
use std::path::PathBuf;

fn main() {
    println!("=== Model Archive Inspector ===\n");

    let args: Vec<String> = std::env::args().collect();
    let model_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("models/transfer_classifier.tar.gz")
    };

    match load_model_with_metadata(&model_path) {
        Ok((metadata, binary)) => {
            println!("✓ モデル読み込み成功: {}", model_path.display());
            println!(
                "  重みサイズ: {} バイト ({:.2} MB)",
                binary.len(),
                binary.len() as f64 / 1024.0 / 1024.0
            );
            print_metadata_info(&metadata);
            InferenceConfig::from_metadata(&metadata).print_info();
        }
        Err(e) => {
            eprintln!("✗ エラー: {:#}", e);
            std::process::exit(1);
        }
    }
}
