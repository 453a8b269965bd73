pub mod backbone;
pub mod classifier;
pub mod evaluation;
pub mod inference;
pub mod training;
pub mod zoo;

pub use backbone::{BackboneKind, ResNet};
pub use classifier::{cross_entropy, ModelConfig, TransferClassifier};
pub use evaluation::{evaluate, ConfusionMatrix, Evaluation};
pub use inference::{InferenceEngine, Prediction};
pub use training::{train, EpochMetrics, TrainingConfig, TrainingHistory, TrainingOutcome};
pub use zoo::{ensure_downloaded, load_backbone, PretrainedWeights, WeightSource};
