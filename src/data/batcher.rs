//! 画像バッチの作成

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::{backend::Backend, Int, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

use crate::data::augmentation::{AugmentationSettings, Augmenter};
use crate::data::dataset::ImageItem;
use crate::data::image::{load_image, normalize};

/// バッチデータ
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// [batch_size, 3, size, size]
    pub images: Tensor<B, 4>,
    /// [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// バッチャー
///
/// データ拡張を設定した場合、バッチャーが保持する乱数生成器を全バッチで共有します。
#[derive(Clone)]
pub struct ImageBatcher<B: Backend> {
    image_size: usize,
    augmentation: Option<Arc<(Augmenter, Mutex<StdRng>)>>,
    _backend: std::marker::PhantomData<B>,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(image_size: usize) -> Self {
        Self {
            image_size,
            augmentation: None,
            _backend: std::marker::PhantomData,
        }
    }

    /// データ拡張を有効にする（学習データ用）
    pub fn with_augmentation(mut self, settings: &AugmentationSettings, seed: u64) -> Self {
        self.augmentation = if settings.is_identity() {
            None
        } else {
            Some(Arc::new((
                Augmenter::new(settings.clone()),
                Mutex::new(StdRng::seed_from_u64(seed)),
            )))
        };
        self
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn is_augmenting(&self) -> bool {
        self.augmentation.is_some()
    }

    /// 1枚の画像を読み込み、拡張・正規化したピクセル列を返す
    fn load_item(&self, item: &ImageItem) -> anyhow::Result<Vec<f32>> {
        let img = load_image(&item.path, self.image_size as u32)?;

        let img = match &self.augmentation {
            Some(state) => {
                let (augmenter, rng) = state.as_ref();
                let mut rng = rng
                    .lock()
                    .map_err(|_| anyhow::anyhow!("augmentation RNG lock poisoned"))?;
                augmenter.apply(&img, &mut *rng)
            }
            None => img,
        };

        Ok(normalize(&img))
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets = Vec::with_capacity(batch_size);

        for item in &items {
            match self.load_item(item) {
                Ok(pixels) => all_pixels.extend_from_slice(&pixels),
                Err(e) => {
                    // 読み込めない画像はゼロで埋め、ラベルは残す
                    tracing::warn!("画像読み込み失敗 {}: {:#}", item.path.display(), e);
                    all_pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                }
            }
            targets.push(item.label as i64);
        }

        // 1回の転送でバッチ全体をデバイスへ
        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes_and_targets() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        RgbImage::from_pixel(12, 12, Rgb([255, 255, 255])).save(&a).unwrap();
        RgbImage::from_pixel(6, 6, Rgb([0, 0, 0])).save(&b).unwrap();

        let batcher = ImageBatcher::<TestBackend>::new(8);
        let device = NdArrayDevice::Cpu;
        let batch = batcher.batch(
            vec![
                ImageItem { path: a, label: 1 },
                ImageItem { path: b, label: 0 },
            ],
            &device,
        );

        assert_eq!(batch.images.dims(), [2, 3, 8, 8]);
        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![1, 0]);
    }

    #[test]
    fn test_unreadable_image_becomes_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.png");
        std::fs::write(&broken, b"not a png").unwrap();

        let batcher = ImageBatcher::<TestBackend>::new(4);
        let batch = batcher.batch(
            vec![ImageItem {
                path: broken,
                label: 3,
            }],
            &NdArrayDevice::Cpu,
        );

        let values: Vec<f32> = batch.images.into_data().iter::<f32>().collect();
        assert_eq!(values.len(), 3 * 4 * 4);
        assert!(values.iter().all(|v| *v == 0.0));
        let targets: Vec<i64> = batch.targets.into_data().iter::<i64>().collect();
        assert_eq!(targets, vec![3]);
    }

    #[test]
    fn test_identity_augmentation_is_dropped() {
        let batcher =
            ImageBatcher::<TestBackend>::new(4).with_augmentation(&AugmentationSettings::none(), 0);
        assert!(!batcher.is_augmenting());

        let batcher = ImageBatcher::<TestBackend>::new(4)
            .with_augmentation(&AugmentationSettings::default(), 0);
        assert!(batcher.is_augmenting());
    }
}
