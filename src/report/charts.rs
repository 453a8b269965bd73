//! 学習曲線のSVG出力
//!
//! 外部の描画ライブラリを使わず、SVG文字列を直接組み立てます。

use anyhow::{Context, Result};
use std::path::Path;

use crate::ml::TrainingHistory;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 80.0;

const COLOR_TRAIN: &str = "#3498db";
const COLOR_VALID: &str = "#e74c3c";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";
const FONT: &str = "Arial, sans-serif";

/// 折れ線1本分のデータ
#[derive(Debug, Clone)]
pub struct Series {
    pub name: String,
    pub color: &'static str,
    pub points: Vec<(f64, f64)>,
}

/// Y軸の範囲と目盛りの書式
#[derive(Debug, Clone, Copy)]
pub struct YAxis {
    pub min: f64,
    pub max: f64,
    pub percent: bool,
}

/// 学習損失と検証損失の推移
pub fn loss_chart(history: &TrainingHistory) -> String {
    let train = Series {
        name: "train_loss".to_string(),
        color: COLOR_TRAIN,
        points: history
            .epochs
            .iter()
            .map(|m| (m.epoch as f64, m.train_loss))
            .collect(),
    };
    let valid = Series {
        name: "val_loss".to_string(),
        color: COLOR_VALID,
        points: history
            .epochs
            .iter()
            .filter_map(|m| m.val_loss.map(|v| (m.epoch as f64, v)))
            .collect(),
    };

    let max = train
        .points
        .iter()
        .chain(&valid.points)
        .map(|&(_, y)| y)
        .filter(|y| y.is_finite())
        .fold(0.0f64, f64::max);
    let axis = YAxis {
        min: 0.0,
        max: if max > 0.0 { max * 1.1 } else { 1.0 },
        percent: false,
    };

    line_chart("Training and validation loss", "Epoch", "Loss", axis, &[train, valid])
}

/// 学習正解率と検証正解率の推移（%表示）
pub fn accuracy_chart(history: &TrainingHistory) -> String {
    let train = Series {
        name: "train_accuracy".to_string(),
        color: COLOR_TRAIN,
        points: history
            .epochs
            .iter()
            .map(|m| (m.epoch as f64, m.train_accuracy * 100.0))
            .collect(),
    };
    let valid = Series {
        name: "val_accuracy".to_string(),
        color: COLOR_VALID,
        points: history
            .epochs
            .iter()
            .filter_map(|m| m.val_accuracy.map(|v| (m.epoch as f64, v * 100.0)))
            .collect(),
    };

    let axis = YAxis {
        min: 0.0,
        max: 100.0,
        percent: true,
    };
    line_chart("Training and validation accuracy", "Epoch", "Accuracy", axis, &[train, valid])
}

/// SVGをファイルに書き出す
pub fn save_svg(svg: &str, path: &Path) -> Result<()> {
    std::fs::write(path, svg).with_context(|| format!("Failed to write SVG: {}", path.display()))
}

/// 折れ線グラフ
pub fn line_chart(title: &str, x_label: &str, y_label: &str, axis: YAxis, series: &[Series]) -> String {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max) = series
        .iter()
        .flat_map(|s| s.points.iter().map(|&(x, _)| x))
        .fold(None, |range: Option<(f64, f64)>, x| match range {
            Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
            None => Some((x, x)),
        })
        .unwrap_or((0.0, 1.0));
    // 1点だけのときも幅を持たせる
    let (x_min, x_max) = if x_max > x_min { (x_min, x_max) } else { (x_min - 0.5, x_max + 0.5) };
    let y_span = if axis.max > axis.min { axis.max - axis.min } else { 1.0 };

    let to_x = |x: f64| MARGIN_LEFT + (x - x_min) / (x_max - x_min) * plot_width;
    let to_y = |y: f64| {
        let y = y.clamp(axis.min, axis.min + y_span);
        MARGIN_TOP + plot_height - (y - axis.min) / y_span * plot_height
    };

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    ));
    svg.push_str(&format!(r#"<rect width="{}" height="{}" fill="white"/>"#, CHART_WIDTH, CHART_HEIGHT));
    svg.push_str(&format!(
        r#"<text x="{}" y="35" text-anchor="middle" font-family="{}" font-size="18" font-weight="bold" fill="{}">{}</text>"#,
        CHART_WIDTH / 2.0,
        FONT,
        COLOR_TEXT,
        escape_xml(title)
    ));

    // 横グリッドとY目盛り
    for i in 0..=5 {
        let value = axis.min + i as f64 / 5.0 * y_span;
        let y = to_y(value);
        svg.push_str(&format!(
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            MARGIN_LEFT,
            y,
            MARGIN_LEFT + plot_width,
            y,
            COLOR_GRID
        ));
        let tick = if axis.percent {
            format!("{:.0}%", value)
        } else {
            format!("{:.2}", value)
        };
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            MARGIN_LEFT - 10.0,
            y + 4.0,
            FONT,
            COLOR_TEXT,
            tick
        ));
    }

    // 軸
    let bottom = MARGIN_TOP + plot_height;
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT,
        bottom,
        MARGIN_LEFT + plot_width,
        bottom,
        COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="2"/>"#,
        MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, bottom, COLOR_AXIS
    ));
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="14" fill="{}">{}</text>"#,
        MARGIN_LEFT + plot_width / 2.0,
        CHART_HEIGHT - 20.0,
        FONT,
        COLOR_TEXT,
        escape_xml(x_label)
    ));
    svg.push_str(&format!(
        r#"<text x="20" y="{c}" text-anchor="middle" font-family="{}" font-size="14" fill="{}" transform="rotate(-90 20 {c})">{}</text>"#,
        FONT,
        COLOR_TEXT,
        escape_xml(y_label),
        c = CHART_HEIGHT / 2.0
    ));

    // X目盛り（エポック番号）
    let mut ticks: Vec<f64> = series.iter().flat_map(|s| s.points.iter().map(|&(x, _)| x)).collect();
    ticks.sort_by(f64::total_cmp);
    ticks.dedup();
    for x in ticks {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="11" fill="{}">{:.0}</text>"#,
            to_x(x),
            bottom + 20.0,
            FONT,
            COLOR_TEXT,
            x
        ));
    }

    for s in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = s
            .points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| format!("{} {:.2} {:.2}", if i == 0 { "M" } else { "L" }, to_x(x), to_y(y)))
            .collect();
        svg.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            s.color
        ));
        for &(x, y) in &s.points {
            svg.push_str(&format!(
                r#"<circle cx="{:.2}" cy="{:.2}" r="4" fill="{}" stroke="white" stroke-width="2"/>"#,
                to_x(x),
                to_y(y),
                s.color
            ));
        }
    }

    // 凡例
    let mut legend_y = MARGIN_TOP + 10.0;
    for s in series.iter().filter(|s| !s.points.is_empty()) {
        svg.push_str(&format!(
            r#"<rect x="{}" y="{}" width="15" height="15" fill="{}"/>"#,
            CHART_WIDTH - MARGIN_RIGHT - 130.0,
            legend_y,
            s.color
        ));
        svg.push_str(&format!(
            r#"<text x="{}" y="{}" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            CHART_WIDTH - MARGIN_RIGHT - 110.0,
            legend_y + 12.0,
            FONT,
            COLOR_TEXT,
            escape_xml(&s.name)
        ));
        legend_y += 25.0;
    }

    svg.push_str("</svg>");
    svg
}

pub(crate) fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::EpochMetrics;

    fn history(with_validation: bool) -> TrainingHistory {
        let mut history = TrainingHistory::default();
        for epoch in 1..=3 {
            history.push(EpochMetrics {
                epoch,
                train_loss: 1.0 / epoch as f64,
                train_accuracy: 0.3 * epoch as f64,
                val_loss: with_validation.then(|| 1.2 / epoch as f64),
                val_accuracy: with_validation.then(|| 0.25 * epoch as f64),
            });
        }
        history
    }

    #[test]
    fn test_loss_chart_has_both_curves() {
        let svg = loss_chart(&history(true));
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert_eq!(svg.matches("<path").count(), 2);
        assert!(svg.contains("val_loss"));
    }

    #[test]
    fn test_accuracy_chart_without_validation() {
        let svg = accuracy_chart(&history(false));
        assert_eq!(svg.matches("<path").count(), 1);
        assert!(!svg.contains("val_accuracy"));
        assert!(svg.contains("100%"));
    }

    #[test]
    fn test_empty_history() {
        let svg = loss_chart(&TrainingHistory::default());
        assert!(!svg.contains("<path"));
        assert!(svg.ends_with("</svg>"));
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
