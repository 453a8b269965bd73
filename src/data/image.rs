//! 画像の読み込みと正規化

use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbImage};
use std::path::Path;

/// ImageNetの平均（RGB）
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNetの標準偏差（RGB）
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 学習・推論の対象とする拡張子
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// 拡張子から画像ファイルかどうかを判定
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// 画像を読み込み、RGB8に変換して `size x size` にリサイズ
pub fn load_image(path: &Path, size: u32) -> Result<RgbImage> {
    let img = image::open(path)
        .with_context(|| format!("画像を開けません: {}", path.display()))?;

    if img.width() == size && img.height() == size {
        return Ok(img.to_rgb8());
    }

    Ok(img.resize_exact(size, size, FilterType::Triangle).to_rgb8())
}

/// RGB画像を [0, 1] に変換後、ImageNetの平均と標準偏差で正規化
///
/// # 戻り値
/// - (C, H, W) の順で平坦化したデータ
pub fn normalize(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let mut data = Vec::with_capacity(3 * width as usize * height as usize);

    for channel in 0..3 {
        for y in 0..height {
            for x in 0..width {
                let value = img.get_pixel(x, y)[channel] as f32 / 255.0;
                data.push((value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
            }
        }
    }

    data
}

/// 画像を読み込んで正規化
pub fn load_and_normalize_image(path: &Path, size: usize) -> Result<Vec<f32>> {
    let img = load_image(path, size as u32)?;
    Ok(normalize(&img))
}
