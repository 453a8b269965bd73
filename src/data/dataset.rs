//! ラベル付き画像ディレクトリの読み込みと学習/検証分割
//!
//! ディレクトリ構成:
//! ```text
//! root/
//!   cat/  0001.jpg 0002.jpg ...
//!   dog/  0001.jpg ...
//! ```
//! クラスIDはクラスディレクトリ名の昇順で割り当てます。

use burn::data::dataset::Dataset;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data::image::is_image_file;

/// データセット読み込み時のエラー
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("データディレクトリが見つかりません: {0}")]
    MissingRoot(PathBuf),

    #[error("クラスディレクトリが1つもありません: {0}")]
    NoClasses(PathBuf),

    #[error("クラス '{0}' に画像が1枚もありません")]
    EmptyClass(String),

    #[error("validation_split は [0, 1) の範囲である必要があります: {0}")]
    InvalidSplit(f64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// クラスごとのサブディレクトリからなる画像データセット
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    class_names: Vec<String>,
    // クラスIDごとの画像パス（ファイル名の昇順）
    files: Vec<Vec<PathBuf>>,
}

impl ImageFolder {
    /// ディレクトリを走査してクラスと画像を収集
    pub fn scan(root: &Path) -> Result<Self, DatasetError> {
        if !root.is_dir() {
            return Err(DatasetError::MissingRoot(root.to_path_buf()));
        }

        let mut class_dirs = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if !name.starts_with('.') {
                        class_dirs.push((name.to_string(), path));
                    }
                }
            }
        }

        if class_dirs.is_empty() {
            return Err(DatasetError::NoClasses(root.to_path_buf()));
        }
        class_dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut class_names = Vec::with_capacity(class_dirs.len());
        let mut files = Vec::with_capacity(class_dirs.len());

        for (name, dir) in class_dirs {
            let mut images = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_file() && is_image_file(&path) {
                    images.push(path);
                }
            }

            if images.is_empty() {
                return Err(DatasetError::EmptyClass(name));
            }
            images.sort();

            class_names.push(name);
            files.push(images);
        }

        Ok(Self {
            root: root.to_path_buf(),
            class_names,
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// 全画像数
    pub fn num_images(&self) -> usize {
        self.files.iter().map(Vec::len).sum()
    }

    /// クラスごとの画像数
    pub fn class_counts(&self) -> Vec<usize> {
        self.files.iter().map(Vec::len).collect()
    }

    /// 全画像を1つのサブセットとして取得
    pub fn all(&self) -> ImageSubset {
        let samples = self
            .files
            .iter()
            .enumerate()
            .flat_map(|(label, paths)| paths.iter().map(move |p| (p.clone(), label)))
            .collect();

        ImageSubset::new(samples, self.class_names.clone())
    }

    /// 学習用と検証用に分割
    ///
    /// クラスごとにファイル名順で先頭 `floor(n * validation_split)` 枚を検証用、
    /// 残りを学習用とします。乱数を使わないため、同じディレクトリと割合からは
    /// 常に同じ分割が得られます。
    pub fn split(&self, validation_split: f64) -> Result<(ImageSubset, ImageSubset), DatasetError> {
        if !(0.0..1.0).contains(&validation_split) {
            return Err(DatasetError::InvalidSplit(validation_split));
        }

        let mut train = Vec::new();
        let mut validation = Vec::new();

        for (label, paths) in self.files.iter().enumerate() {
            let n_val = (paths.len() as f64 * validation_split).floor() as usize;
            for (i, path) in paths.iter().enumerate() {
                if i < n_val {
                    validation.push((path.clone(), label));
                } else {
                    train.push((path.clone(), label));
                }
            }
        }

        Ok((
            ImageSubset::new(train, self.class_names.clone()),
            ImageSubset::new(validation, self.class_names.clone()),
        ))
    }
}

/// データセットアイテム（画像パスのみ保持）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

/// 学習または検証に使う画像の集合
#[derive(Debug, Clone)]
pub struct ImageSubset {
    samples: Vec<(PathBuf, usize)>, // (画像パス, クラスID)
    class_names: Vec<String>,
}

impl ImageSubset {
    pub fn new(samples: Vec<(PathBuf, usize)>, class_names: Vec<String>) -> Self {
        Self {
            samples,
            class_names,
        }
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスごとのサンプル数
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for (_, label) in &self.samples {
            // 範囲外のラベルは数えない
            if let Some(count) = counts.get_mut(*label) {
                *count += 1;
            }
        }
        counts
    }

    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|(_, label)| *label).collect()
    }
}

impl Dataset<ImageItem> for ImageSubset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        let (path, label) = self.samples.get(index)?;
        Some(ImageItem {
            path: path.clone(),
            label: *label,
        })
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
