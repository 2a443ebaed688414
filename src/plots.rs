//! SVG charts for dataset and training reports
//!
//! Plain SVG documents: class distribution bars, a confusion-matrix heatmap
//! and loss/accuracy curves.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

const WIDTH: f32 = 640.0;
const HEIGHT: f32 = 400.0;
const MARGIN: f32 = 50.0;

fn header(out: &mut String, width: f32, height: f32, title: &str) {
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="11">"#,
        w = width,
        h = height
    );
    let _ = writeln!(out, r#"<rect width="100%" height="100%" fill="white"/>"#);
    let _ = writeln!(
        out,
        r#"<text x="{}" y="20" text-anchor="middle" font-size="14">{}</text>"#,
        width / 2.0,
        escape(title)
    );
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn save(path: &Path, svg: &str) -> Result<()> {
    std::fs::write(path, svg).with_context(|| format!("Failed to write plot {:?}", path))
}

/// Bar chart of samples per class
pub fn class_distribution_svg(counts: &[(i64, usize)], title: &str) -> String {
    let mut out = String::new();
    header(&mut out, WIDTH, HEIGHT, title);

    let max = counts.iter().map(|(_, c)| *c).max().unwrap_or(0).max(1) as f32;
    let plot_w = WIDTH - 2.0 * MARGIN;
    let plot_h = HEIGHT - 2.0 * MARGIN;
    let slot = plot_w / counts.len().max(1) as f32;

    for (i, (label, count)) in counts.iter().enumerate() {
        let h = plot_h * *count as f32 / max;
        let x = MARGIN + i as f32 * slot;
        let y = HEIGHT - MARGIN - h;
        let _ = writeln!(
            out,
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="#4c72b0"><title>{}: {}</title></rect>"##,
            x + slot * 0.1,
            y,
            slot * 0.8,
            h,
            label,
            count
        );
        let _ = writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            x + slot / 2.0,
            HEIGHT - MARGIN + 14.0,
            label
        );
    }

    let _ = writeln!(
        out,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#,
        MARGIN - 4.0,
        MARGIN + 4.0,
        max as usize
    );
    out.push_str("</svg>\n");
    out
}

/// Write a class distribution chart
pub fn save_class_distribution<P: AsRef<Path>>(
    path: P,
    counts: &[(i64, usize)],
    title: &str,
) -> Result<()> {
    save(path.as_ref(), &class_distribution_svg(counts, title))
}

/// Heatmap with true classes as rows and predictions as columns
pub fn confusion_matrix_svg(matrix: &[Vec<usize>], labels: &[i64]) -> String {
    let n = matrix.len().max(1);
    let cell = ((WIDTH - 2.0 * MARGIN) / n as f32).min(40.0);
    let size = 2.0 * MARGIN + cell * n as f32;

    let mut out = String::new();
    header(&mut out, size, size, "Confusion matrix");

    let max = matrix
        .iter()
        .flat_map(|row| row.iter())
        .copied()
        .max()
        .unwrap_or(0)
        .max(1) as f32;

    for (i, row) in matrix.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            let shade = 255 - (215.0 * value as f32 / max) as u8;
            let x = MARGIN + j as f32 * cell;
            let y = MARGIN + i as f32 * cell;
            let _ = writeln!(
                out,
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="rgb({},{},255)" stroke="white"/>"#,
                x, y, cell, cell, shade, shade
            );
            if value > 0 {
                let _ = writeln!(
                    out,
                    r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
                    x + cell / 2.0,
                    y + cell / 2.0 + 4.0,
                    value
                );
            }
        }
    }

    for (k, label) in labels.iter().enumerate() {
        let pos = MARGIN + k as f32 * cell + cell / 2.0;
        let _ = writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{}</text>"#,
            pos,
            MARGIN - 6.0,
            label
        );
        let _ = writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{}</text>"#,
            MARGIN - 6.0,
            pos + 4.0,
            label
        );
    }

    out.push_str("</svg>\n");
    out
}

/// Write a confusion-matrix heatmap
pub fn save_confusion_matrix<P: AsRef<Path>>(
    path: P,
    matrix: &[Vec<usize>],
    labels: &[i64],
) -> Result<()> {
    save(path.as_ref(), &confusion_matrix_svg(matrix, labels))
}

fn polyline(out: &mut String, values: &[f32], x0: f32, y0: f32, w: f32, h: f32, max: f32, color: &str) {
    if values.is_empty() {
        return;
    }
    let step = if values.len() > 1 {
        w / (values.len() - 1) as f32
    } else {
        0.0
    };
    let points: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let y = y0 + h - h * (v / max).clamp(0.0, 1.0);
            format!("{:.1},{:.1}", x0 + i as f32 * step, y)
        })
        .collect();
    let _ = writeln!(
        out,
        r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="1.5"/>"#,
        points.join(" "),
        color
    );
}

/// Loss (top) and accuracy (bottom) curves for train and validation
pub fn history_svg(
    train_loss: &[f32],
    valid_loss: &[f32],
    train_acc: &[f32],
    valid_acc: &[f32],
) -> String {
    let mut out = String::new();
    header(&mut out, WIDTH, HEIGHT * 1.5, "Training history");

    let w = WIDTH - 2.0 * MARGIN;
    let h = (HEIGHT * 1.5 - 3.0 * MARGIN) / 2.0;
    let max_loss = train_loss
        .iter()
        .chain(valid_loss.iter())
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max)
        .max(1e-6);

    for (top, label, max) in [(MARGIN, "loss", max_loss), (2.0 * MARGIN + h, "accuracy", 1.0)] {
        let _ = writeln!(
            out,
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="gray"/>"#,
            MARGIN, top, w, h
        );
        let _ = writeln!(
            out,
            r#"<text x="{}" y="{}" text-anchor="end">{} ({:.3})</text>"#,
            MARGIN + w,
            top - 4.0,
            label,
            max
        );
    }

    polyline(&mut out, train_loss, MARGIN, MARGIN, w, h, max_loss, "#4c72b0");
    polyline(&mut out, valid_loss, MARGIN, MARGIN, w, h, max_loss, "#dd8452");
    let acc_top = 2.0 * MARGIN + h;
    polyline(&mut out, train_acc, MARGIN, acc_top, w, h, 1.0, "#4c72b0");
    polyline(&mut out, valid_acc, MARGIN, acc_top, w, h, 1.0, "#dd8452");

    let _ = writeln!(
        out,
        r##"<text x="{}" y="{}" fill="#4c72b0">train</text><text x="{}" y="{}" fill="#dd8452">valid</text>"##,
        MARGIN,
        HEIGHT * 1.5 - 10.0,
        MARGIN + 50.0,
        HEIGHT * 1.5 - 10.0
    );
    out.push_str("</svg>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_has_bar_per_class() {
        let svg = class_distribution_svg(&[(0, 5), (1, 10), (7, 2)], "train <split>");
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<rect x=").count(), 3);
        assert!(svg.contains("train &lt;split&gt;"));
    }

    #[test]
    fn test_confusion_matrix_cells() {
        let svg = confusion_matrix_svg(&[vec![3, 1], vec![0, 4]], &[10, 20]);
        assert_eq!(svg.matches("stroke=\"white\"").count(), 4);
        assert!(svg.contains(">4</text>"));
    }

    #[test]
    fn test_history_empty_is_valid() {
        let svg = history_svg(&[], &[], &[], &[]);
        assert!(svg.contains("Training history"));
        assert!(!svg.contains("polyline"));
    }
}
