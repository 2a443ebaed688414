//! Feature standardization
//!
//! Features are viewed as rows of their last dimension: a `[N, n_mfcc,
//! frames]` buffer is `N * n_mfcc` rows of `frames` columns. Each column is
//! shifted to zero mean and scaled to unit variance.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-column mean/standard deviation scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Column means
    pub mean: Vec<f32>,
    /// Standard deviation; 1 for constant columns
    pub scale: Vec<f32>,
    /// Rows seen while fitting
    pub n_samples_seen: usize,
}

impl StandardScaler {
    /// Fit on a row-major buffer of `width`-wide rows
    pub fn fit(values: &[f32], width: usize) -> Result<Self> {
        if width == 0 || values.is_empty() || values.len() % width != 0 {
            anyhow::bail!(
                "Cannot fit scaler on {} values with row width {}",
                values.len(),
                width
            );
        }
        let rows = values.len() / width;

        let mut sum = vec![0.0f64; width];
        for row in values.chunks_exact(width) {
            for (s, &v) in sum.iter_mut().zip(row) {
                *s += v as f64;
            }
        }
        let mean: Vec<f64> = sum.into_iter().map(|s| s / rows as f64).collect();

        let mut var = vec![0.0f64; width];
        for row in values.chunks_exact(width) {
            for ((acc, &v), m) in var.iter_mut().zip(row).zip(&mean) {
                let d = v as f64 - m;
                *acc += d * d;
            }
        }

        let scale = var
            .into_iter()
            .map(|v| {
                let std = (v / rows as f64).sqrt();
                if std < 10.0 * f64::EPSILON {
                    1.0
                } else {
                    std as f32
                }
            })
            .collect();

        Ok(Self {
            mean: mean.into_iter().map(|m| m as f32).collect(),
            scale,
            n_samples_seen: rows,
        })
    }

    /// Row width the scaler was fit on
    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// Standardize a row-major buffer in place
    pub fn transform(&self, values: &mut [f32]) -> Result<()> {
        let width = self.width();
        if width == 0 || values.len() % width != 0 {
            anyhow::bail!(
                "{} values are not rows of the fitted width {}",
                values.len(),
                width
            );
        }
        for row in values.chunks_exact_mut(width) {
            for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.scale) {
                *v = (*v - m) / s;
            }
        }
        Ok(())
    }

    /// Write the scaler as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write scaler {:?}", path))
    }

    /// Read a scaler written by [`StandardScaler::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scaler {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed scaler {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_columns() {
        // Two columns: [1, 3, 5] and constant 7
        let values = [1.0, 7.0, 3.0, 7.0, 5.0, 7.0];
        let scaler = StandardScaler::fit(&values, 2).unwrap();
        assert_eq!(scaler.n_samples_seen, 3);
        assert!((scaler.mean[0] - 3.0).abs() < 1e-6);
        assert!((scaler.mean[1] - 7.0).abs() < 1e-6);
        assert!((scaler.scale[0] - (8.0f32 / 3.0).sqrt()).abs() < 1e-5);
        assert_eq!(scaler.scale[1], 1.0);
    }

    #[test]
    fn test_transform_standardizes() {
        let values: Vec<f32> = (0..40).map(|i| (i as f32).powi(2) * 0.1).collect();
        let scaler = StandardScaler::fit(&values, 4).unwrap();
        let mut scaled = values.clone();
        scaler.transform(&mut scaled).unwrap();

        for col in 0..4 {
            let column: Vec<f32> = scaled.iter().skip(col).step_by(4).copied().collect();
            let mean = column.iter().sum::<f32>() / column.len() as f32;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / column.len() as f32;
            assert!(mean.abs() < 1e-4);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_rejects_bad_widths() {
        assert!(StandardScaler::fit(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(StandardScaler::fit(&[], 2).is_err());
        let scaler = StandardScaler::fit(&[1.0, 2.0], 2).unwrap();
        assert!(scaler.transform(&mut [1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.json");
        let scaler = StandardScaler::fit(&[1.0, 2.0, 4.0, 8.0], 2).unwrap();
        scaler.save(&path).unwrap();
        assert_eq!(StandardScaler::load(&path).unwrap(), scaler);
    }
}
