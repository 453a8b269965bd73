//! 混同行列の出力（SVGヒートマップ、JSON、コンソール表）

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ml::ConfusionMatrix;
use crate::report::charts::escape_xml;

const CELL_SIZE: f64 = 60.0;
const LABEL_SPACE: f64 = 140.0;
const MARGIN: f64 = 40.0;

/// クラスごとの指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// 正解がこのクラスである件数
    pub support: usize,
}

/// JSONとして保存する混同行列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionReport {
    pub labels: Vec<String>,
    /// matrix[actual][predicted]
    pub matrix: Vec<Vec<usize>>,
    pub accuracy: f64,
    pub per_class: Vec<ClassReport>,
}

impl ConfusionReport {
    pub fn new(cm: &ConfusionMatrix, labels: &[String]) -> Self {
        let n = cm.num_classes;
        let label = |i: usize| labels.get(i).cloned().unwrap_or_else(|| i.to_string());
        let row_sums = cm.row_sums();

        Self {
            labels: (0..n).map(label).collect(),
            matrix: (0..n).map(|r| (0..n).map(|c| cm.get(r, c)).collect()).collect(),
            accuracy: cm.accuracy(),
            per_class: (0..n)
                .map(|i| ClassReport {
                    label: label(i),
                    precision: cm.precision(i),
                    recall: cm.recall(i),
                    f1: cm.f1(i),
                    support: row_sums[i],
                })
                .collect(),
        }
    }
}

/// 行ごとに正規化した割合で色を付けたヒートマップ（セルには件数を表示）
pub fn confusion_svg(cm: &ConfusionMatrix, labels: &[String]) -> String {
    let n = cm.num_classes;
    let normalized = cm.normalize_rows();
    let label = |i: usize| labels.get(i).cloned().unwrap_or_else(|| i.to_string());

    let grid = CELL_SIZE * n as f64;
    let width = MARGIN + LABEL_SPACE + grid + MARGIN;
    let height = MARGIN + 40.0 + grid + LABEL_SPACE;
    let left = MARGIN + LABEL_SPACE;
    let top = MARGIN + 40.0;

    let mut svg = String::new();
    svg.push_str(&format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"##,
        w = width,
        h = height
    ));
    svg.push_str(&format!(r##"<rect width="{}" height="{}" fill="white"/>"##, width, height));
    svg.push_str(&format!(
        r##"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="18" font-weight="bold" fill="#2c3e50">Confusion matrix (accuracy {:.1}%)</text>"##,
        width / 2.0,
        MARGIN,
        cm.accuracy() * 100.0
    ));

    for row in 0..n {
        for col in 0..n {
            let ratio = normalized[row][col];
            let x = left + col as f64 * CELL_SIZE;
            let y = top + row as f64 * CELL_SIZE;
            svg.push_str(&format!(
                r##"<rect x="{}" y="{}" width="{}" height="{}" fill="{}" stroke="white" stroke-width="1"/>"##,
                x,
                y,
                CELL_SIZE,
                CELL_SIZE,
                heat_color(ratio)
            ));
            let text_color = if ratio > 0.5 { "white" } else { "#2c3e50" };
            svg.push_str(&format!(
                r##"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="{}">{}</text>"##,
                x + CELL_SIZE / 2.0,
                y + CELL_SIZE / 2.0 + 5.0,
                text_color,
                cm.get(row, col)
            ));
        }
    }

    // 行ラベル（正解）
    for row in 0..n {
        svg.push_str(&format!(
            r##"<text x="{}" y="{}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="#2c3e50">{}</text>"##,
            left - 8.0,
            top + row as f64 * CELL_SIZE + CELL_SIZE / 2.0 + 4.0,
            escape_xml(&label(row))
        ));
    }

    // 列ラベル（予測）
    for col in 0..n {
        let x = left + col as f64 * CELL_SIZE + CELL_SIZE / 2.0;
        let y = top + grid + 12.0;
        svg.push_str(&format!(
            r##"<text x="{x}" y="{y}" text-anchor="end" font-family="Arial, sans-serif" font-size="12" fill="#2c3e50" transform="rotate(-45 {x} {y})">{}</text>"##,
            escape_xml(&label(col)),
            x = x,
            y = y
        ));
    }

    svg.push_str(&format!(
        r##"<text x="{}" y="{}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="#2c3e50">Predicted</text>"##,
        left + grid / 2.0,
        height - 10.0
    ));
    svg.push_str(&format!(
        r##"<text x="16" y="{c}" text-anchor="middle" font-family="Arial, sans-serif" font-size="14" fill="#2c3e50" transform="rotate(-90 16 {c})">Actual</text>"##,
        c = top + grid / 2.0
    ));

    svg.push_str("</svg>");
    svg
}

/// 0.0 = 白, 1.0 = 濃い青
fn heat_color(ratio: f64) -> String {
    let t = ratio.clamp(0.0, 1.0);
    let lerp = |from: f64, to: f64| (from + (to - from) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0))
}

/// `confusion_matrix.svg` と `confusion_matrix.json` を保存
pub fn save_confusion(cm: &ConfusionMatrix, labels: &[String], svg_path: &Path, json_path: &Path) -> Result<()> {
    std::fs::write(svg_path, confusion_svg(cm, labels))
        .with_context(|| format!("Failed to write SVG: {}", svg_path.display()))?;

    let json = serde_json::to_string_pretty(&ConfusionReport::new(cm, labels))?;
    std::fs::write(json_path, json).with_context(|| format!("Failed to write JSON: {}", json_path.display()))?;

    Ok(())
}

/// 混同行列とクラスごとの適合率・再現率を表示
pub fn print_confusion_table(cm: &ConfusionMatrix, labels: &[String]) {
    println!("\n=== 混同行列（行: 正解, 列: 予測）===");
    print!("{}", cm.format_table(labels));
    println!("====================================");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["cats".into(), "dogs".into()]
    }

    #[test]
    fn test_svg_has_one_cell_per_entry() {
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1], &[0, 0, 1], 2);
        let svg = confusion_svg(&cm, &labels());
        // 背景 + 4セル
        assert_eq!(svg.matches("<rect").count(), 5);
        assert!(svg.contains("dogs"));
        assert!(svg.contains("66.7%"));
    }

    #[test]
    fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let svg = dir.path().join("cm.svg");
        let json = dir.path().join("cm.json");
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1, 1], &[0, 0, 1, 1], 2);

        save_confusion(&cm, &labels(), &svg, &json).unwrap();
        assert!(svg.is_file());

        let report: ConfusionReport = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(report.matrix, vec![vec![1, 1], vec![0, 2]]);
        assert_eq!(report.per_class[0].support, 2);
        assert_eq!(report.per_class[1].recall, 1.0);
        assert!((report.accuracy - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_heat_color_bounds() {
        assert_eq!(heat_color(0.0), "#f7fbff");
        assert_eq!(heat_color(1.0), "#08306b");
        assert_eq!(heat_color(2.0), "#08306b");
    }
}
