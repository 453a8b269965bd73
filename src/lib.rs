//! 事前学習済みCNNを使った小規模画像データセット向けの転移学習
//!
//! 特徴抽出層を凍結したResNetに新しい分類ヘッドを1層追加して学習し、
//! 損失・正解率の推移と混同行列で評価、学習済みモデルで画像を分類します。

pub mod backend;
pub mod commands;
pub mod data;
pub mod logging;
pub mod ml;
pub mod model;
pub mod report;
