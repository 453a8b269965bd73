pub mod augmentation;
pub mod batcher;
pub mod dataset;
pub mod image;

pub use augmentation::{AugmentationSettings, Augmenter, Transform};
pub use batcher::{ImageBatch, ImageBatcher};
pub use dataset::{DatasetError, ImageFolder, ImageItem, ImageSubset};
pub use image::{load_and_normalize_image, load_image, normalize, IMAGENET_MEAN, IMAGENET_STD};
