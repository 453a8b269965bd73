//! データ拡張モジュール
//!
//! 学習データにのみランダムな幾何変換と明るさ変化を適用します。
//! 検証・推論時は適用しません。
//!
//! 回転・ズーム・平行移動・せん断は画像中心まわりの1つのアフィン変換に合成し、
//! 出力画素ごとに逆変換で元画像の座標を求めて最近傍で読み取ります。
//! 範囲外の座標は端の画素で埋めます。

use image::{Rgb, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// データ拡張の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationSettings {
    /// データ拡張を有効にするか
    pub enabled: bool,
    /// 左右反転（確率0.5）
    pub horizontal_flip: bool,
    /// 上下反転（確率0.5）
    pub vertical_flip: bool,
    /// 回転角の範囲（度、±）
    pub rotation_range: f32,
    /// 拡大率の範囲（[1 - z, 1 + z]）
    pub zoom_range: f32,
    /// 水平方向の平行移動（画像幅に対する割合、±）
    pub width_shift_range: f32,
    /// 垂直方向の平行移動（画像高さに対する割合、±）
    pub height_shift_range: f32,
    /// せん断角の範囲（度、±）
    pub shear_range: f32,
    /// 明るさ倍率の範囲
    pub brightness_range: Option<[f32; 2]>,
}

impl Default for AugmentationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            horizontal_flip: true,
            vertical_flip: false,
            rotation_range: 20.0,
            zoom_range: 0.2,
            width_shift_range: 0.1,
            height_shift_range: 0.1,
            shear_range: 0.0,
            brightness_range: None,
        }
    }
}

impl AugmentationSettings {
    /// データ拡張なし
    pub fn none() -> Self {
        Self {
            enabled: false,
            horizontal_flip: false,
            vertical_flip: false,
            rotation_range: 0.0,
            zoom_range: 0.0,
            width_shift_range: 0.0,
            height_shift_range: 0.0,
            shear_range: 0.0,
            brightness_range: None,
        }
    }

    /// どの変換も適用されない設定か
    pub fn is_identity(&self) -> bool {
        !self.enabled
            || (!self.horizontal_flip
                && !self.vertical_flip
                && self.rotation_range == 0.0
                && self.zoom_range == 0.0
                && self.width_shift_range == 0.0
                && self.height_shift_range == 0.0
                && self.shear_range == 0.0
                && self.brightness_range.is_none())
    }
}

/// 1枚の画像に適用する具体的な変換パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// 回転角（度、反時計回り）
    pub rotation: f32,
    /// 拡大率（1.0 = 等倍、1より大きいと拡大）
    pub zoom: f32,
    /// 平行移動（ピクセル）
    pub shift_x: f32,
    pub shift_y: f32,
    /// せん断角（度）
    pub shear: f32,
    /// 明るさ倍率
    pub brightness: f32,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            flip_horizontal: false,
            flip_vertical: false,
            rotation: 0.0,
            zoom: 1.0,
            shift_x: 0.0,
            shift_y: 0.0,
            shear: 0.0,
            brightness: 1.0,
        }
    }

    /// 変換を適用した新しい画像を返す
    pub fn apply(&self, img: &RgbImage) -> RgbImage {
        let (width, height) = img.dimensions();
        let mut out = RgbImage::new(width, height);
        if width == 0 || height == 0 {
            return out;
        }

        let inverse = self.inverse_matrix();
        let cx = (width as f32 - 1.0) / 2.0;
        let cy = (height as f32 - 1.0) / 2.0;
        let max_x = width as f32 - 1.0;
        let max_y = height as f32 - 1.0;

        for y in 0..height {
            for x in 0..width {
                // 反転は幾何変換の後段
                let ox = if self.flip_horizontal { width - 1 - x } else { x };
                let oy = if self.flip_vertical { height - 1 - y } else { y };

                let u = ox as f32 - cx - self.shift_x;
                let v = oy as f32 - cy - self.shift_y;
                let sx = inverse[0][0] * u + inverse[0][1] * v + cx;
                let sy = inverse[1][0] * u + inverse[1][1] * v + cy;

                let sx = sx.round().clamp(0.0, max_x) as u32;
                let sy = sy.round().clamp(0.0, max_y) as u32;

                let pixel = img.get_pixel(sx, sy);
                out.put_pixel(x, y, self.adjust_brightness(pixel));
            }
        }

        out
    }

    fn adjust_brightness(&self, pixel: &Rgb<u8>) -> Rgb<u8> {
        if self.brightness == 1.0 {
            return *pixel;
        }
        Rgb(pixel.0.map(|c| (c as f32 * self.brightness).round().clamp(0.0, 255.0) as u8))
    }

    /// 出力座標から入力座標への2x2行列
    ///
    /// 順方向は `R(rotation) * Shear(shear) * zoom`。
    fn inverse_matrix(&self) -> [[f32; 2]; 2] {
        let theta = self.rotation.to_radians();
        let phi = self.shear.to_radians();
        let (sin_t, cos_t) = theta.sin_cos();
        let (sin_p, cos_p) = phi.sin_cos();

        // R * S, S = [[1, -sin φ], [0, cos φ]]
        let a = cos_t;
        let b = -cos_t * sin_p - sin_t * cos_p;
        let c = sin_t;
        let d = -sin_t * sin_p + cos_t * cos_p;

        let a = a * self.zoom;
        let b = b * self.zoom;
        let c = c * self.zoom;
        let d = d * self.zoom;

        let det = a * d - b * c;
        if det.abs() < 1e-6 {
            return [[1.0, 0.0], [0.0, 1.0]];
        }

        [[d / det, -b / det], [-c / det, a / det]]
    }
}

/// 設定に従ってランダムな変換を生成し適用する
#[derive(Debug, Clone)]
pub struct Augmenter {
    settings: AugmentationSettings,
}

impl Augmenter {
    pub fn new(settings: AugmentationSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AugmentationSettings {
        &self.settings
    }

    /// 画像サイズに応じたランダムな変換を生成
    pub fn sample_transform<R: Rng>(&self, width: u32, height: u32, rng: &mut R) -> Transform {
        let s = &self.settings;
        if s.is_identity() {
            return Transform::identity();
        }

        Transform {
            flip_horizontal: s.horizontal_flip && rng.gen_bool(0.5),
            flip_vertical: s.vertical_flip && rng.gen_bool(0.5),
            rotation: symmetric(rng, s.rotation_range),
            zoom: 1.0 + symmetric(rng, s.zoom_range),
            shift_x: symmetric(rng, s.width_shift_range) * width as f32,
            shift_y: symmetric(rng, s.height_shift_range) * height as f32,
            shear: symmetric(rng, s.shear_range),
            brightness: match s.brightness_range {
                Some([lo, hi]) if hi > lo => rng.gen_range(lo..hi),
                Some([lo, _]) => lo,
                None => 1.0,
            },
        }
    }

    /// ランダムな変換を適用
    pub fn apply<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        if self.settings.is_identity() {
            return img.clone();
        }
        let transform = self.sample_transform(img.width(), img.height(), rng);
        transform.apply(img)
    }
}

fn symmetric<R: Rng>(rng: &mut R, range: f32) -> f32 {
    if range <= 0.0 {
        0.0
    } else {
        rng.gen_range(-range..range)
    }
}
