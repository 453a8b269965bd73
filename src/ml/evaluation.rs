//! 検証データでの評価と混同行列

use anyhow::Result;
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::Module,
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::data::{ImageBatcher, ImageSubset};
use crate::ml::classifier::{cross_entropy, TransferClassifier};

/// 混同行列（行 = 正解クラス、列 = 予測クラス）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    /// 行優先で平坦化した件数
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// 予測と正解から混同行列を作成
    pub fn from_predictions(predictions: &[usize], targets: &[usize], num_classes: usize) -> Self {
        let mut cm = Self::new(num_classes);
        for (&predicted, &actual) in predictions.iter().zip(targets) {
            cm.add(actual, predicted);
        }
        cm
    }

    /// 1件追加（範囲外のクラスは無視）
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// 対角成分の合計
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct(), self.total())
    }

    /// 正解クラスごとの件数
    pub fn row_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|row| (0..self.num_classes).map(|col| self.get(row, col)).sum())
            .collect()
    }

    /// 予測クラスごとの件数
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|col| (0..self.num_classes).map(|row| self.get(row, col)).sum())
            .collect()
    }

    /// 各行の合計が1になるよう正規化（件数0の行は0のまま）
    pub fn normalize_rows(&self) -> Vec<Vec<f64>> {
        let row_sums = self.row_sums();
        (0..self.num_classes)
            .map(|row| {
                (0..self.num_classes)
                    .map(|col| ratio(self.get(row, col), row_sums[row]))
                    .collect()
            })
            .collect()
    }

    pub fn precision(&self, class: usize) -> f64 {
        ratio(self.get(class, class), self.col_sums().get(class).copied().unwrap_or(0))
    }

    pub fn recall(&self, class: usize) -> f64 {
        ratio(self.get(class, class), self.row_sums().get(class).copied().unwrap_or(0))
    }

    pub fn f1(&self, class: usize) -> f64 {
        let p = self.precision(class);
        let r = self.recall(class);
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }

    /// コンソール表示用の表
    pub fn format_table(&self, labels: &[String]) -> String {
        let label = |i: usize| labels.get(i).cloned().unwrap_or_else(|| i.to_string());
        let width = (0..self.num_classes)
            .map(|i| label(i).chars().count())
            .chain(self.matrix.iter().map(|v| v.to_string().len()))
            .chain(std::iter::once("actual\\pred".len()))
            .max()
            .unwrap_or(6);

        let mut out = String::new();
        out.push_str(&format!("{:>width$}", "actual\\pred", width = width));
        for col in 0..self.num_classes {
            out.push_str(&format!(" {:>width$}", label(col), width = width));
        }
        out.push_str(&format!(" {:>9} {:>9}\n", "precision", "recall"));

        for row in 0..self.num_classes {
            out.push_str(&format!("{:>width$}", label(row), width = width));
            for col in 0..self.num_classes {
                out.push_str(&format!(" {:>width$}", self.get(row, col), width = width));
            }
            out.push_str(&format!(
                " {:>8.1}% {:>8.1}%\n",
                self.precision(row) * 100.0,
                self.recall(row) * 100.0
            ));
        }

        out.push_str(&format!(
            "accuracy: {:.2}% ({}/{})\n",
            self.accuracy() * 100.0,
            self.correct(),
            self.total()
        ));
        out
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// 評価結果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// 平均損失
    pub loss: f64,
    /// 正解率 (0.0 - 1.0)
    pub accuracy: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub predictions: Vec<usize>,
    pub targets: Vec<usize>,
}

/// バッチ内の正解数
pub(crate) fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

/// モデルが置かれているデバイス
pub(crate) fn model_device<B: Backend, M: Module<B>>(model: &M) -> B::Device {
    model.devices().into_iter().next().unwrap_or_default()
}

/// サブセット全体でモデルを評価（データ拡張なし）
pub fn evaluate<B: Backend>(
    model: &TransferClassifier<B>,
    subset: &ImageSubset,
    batch_size: usize,
    image_size: usize,
) -> Result<Evaluation> {
    if subset.is_empty() {
        anyhow::bail!("評価データが空です");
    }
    if batch_size == 0 {
        anyhow::bail!("batch_size は1以上である必要があります");
    }

    let device = model_device::<B, _>(model);
    let batcher = ImageBatcher::<B>::new(image_size);
    let num_classes = subset.num_classes().max(model.num_classes());

    let mut loss_sum = 0.0f64;
    let mut predictions = Vec::with_capacity(subset.len());
    let mut targets = Vec::with_capacity(subset.len());

    let indices: Vec<usize> = (0..subset.len()).collect();
    for chunk in indices.chunks(batch_size) {
        let items: Vec<_> = chunk.iter().filter_map(|&i| subset.get(i)).collect();
        let n = items.len();
        targets.extend(items.iter().map(|item| item.label));

        let batch = batcher.batch(items, &device);
        let logits = model.forward(batch.images);

        let loss: f64 = cross_entropy(logits.clone(), batch.targets).into_scalar().elem();
        loss_sum += loss * n as f64;

        predictions.extend(
            logits
                .argmax(1)
                .reshape([n])
                .into_data()
                .iter::<i64>()
                .map(|p| p as usize),
        );
    }

    let confusion_matrix = ConfusionMatrix::from_predictions(&predictions, &targets, num_classes);

    Ok(Evaluation {
        loss: loss_sum / targets.len() as f64,
        accuracy: confusion_matrix.accuracy(),
        confusion_matrix,
        predictions,
        targets,
    })
}
