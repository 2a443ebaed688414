//! Representation bundle stored as safetensors

use anyhow::{Context, Result};
use candle_core::{safetensors, DType, Device, Tensor};
use std::collections::HashMap;
use std::path::Path;

/// File name of a split's bundle
pub const REPRESENTATION_FILE: &str = "representation.safetensors";

const FEATURES_KEY: &str = "representation";
const LABELS_KEY: &str = "label";

/// Feature matrices `[N, n_mfcc, frames]` and labels `[N]` of one split
#[derive(Debug, Clone, PartialEq)]
pub struct RepresentationBundle {
    /// Row-major features
    pub features: Vec<f32>,
    /// `[N, n_mfcc, frames]`
    pub shape: [usize; 3],
    /// Label of each row
    pub labels: Vec<i64>,
}

impl RepresentationBundle {
    /// Create a bundle, checking that sizes agree
    pub fn new(features: Vec<f32>, shape: [usize; 3], labels: Vec<i64>) -> Result<Self> {
        if features.len() != shape.iter().product::<usize>() {
            anyhow::bail!(
                "Feature buffer of {} values does not match shape {:?}",
                features.len(),
                shape
            );
        }
        if labels.len() != shape[0] {
            anyhow::bail!("{} labels for {} feature matrices", labels.len(), shape[0]);
        }
        Ok(Self {
            features,
            shape,
            labels,
        })
    }

    /// Number of feature matrices
    pub fn len(&self) -> usize {
        self.shape[0]
    }

    /// Whether the bundle holds no matrix
    pub fn is_empty(&self) -> bool {
        self.shape[0] == 0
    }

    /// `(n_mfcc, frames)` of every matrix
    pub fn matrix_shape(&self) -> (usize, usize) {
        (self.shape[1], self.shape[2])
    }

    /// Features as a `[N, n_mfcc, frames]` tensor and labels as `[N]` i64
    pub fn to_tensors(&self, device: &Device) -> Result<(Tensor, Tensor)> {
        let features = Tensor::from_slice(&self.features, self.shape.to_vec(), device)?;
        let labels = Tensor::from_slice(&self.labels, self.labels.len(), device)?;
        Ok((features, labels))
    }

    /// Write the bundle
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let (features, labels) = self.to_tensors(&Device::Cpu)?;
        let tensors: HashMap<String, Tensor> = [
            (FEATURES_KEY.to_string(), features),
            (LABELS_KEY.to_string(), labels),
        ]
        .into_iter()
        .collect();
        safetensors::save(&tensors, path)
            .with_context(|| format!("Failed to write representation {:?}", path))
    }

    /// Read a bundle written by [`RepresentationBundle::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let tensors = safetensors::load(path, &Device::Cpu)
            .with_context(|| format!("Failed to read representation {:?}", path))?;

        let features = tensors
            .get(FEATURES_KEY)
            .with_context(|| format!("{:?} has no '{}' tensor", path, FEATURES_KEY))?;
        let labels = tensors
            .get(LABELS_KEY)
            .with_context(|| format!("{:?} has no '{}' tensor", path, LABELS_KEY))?;

        let (n, coeffs, frames) = features.dims3()?;
        Self::new(
            features.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?,
            [n, coeffs, frames],
            labels.to_dtype(DType::I64)?.to_vec1::<i64>()?,
        )
    }
}

/// Load `<dir>/representation.safetensors`, or `path` itself when it is a file
pub fn load_representation<P: AsRef<Path>>(path: P) -> Result<RepresentationBundle> {
    let path = path.as_ref();
    if path.is_dir() {
        RepresentationBundle::load(path.join(REPRESENTATION_FILE))
    } else {
        RepresentationBundle::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_checks_sizes() {
        assert!(RepresentationBundle::new(vec![0.0; 12], [2, 3, 2], vec![0, 1]).is_ok());
        assert!(RepresentationBundle::new(vec![0.0; 11], [2, 3, 2], vec![0, 1]).is_err());
        assert!(RepresentationBundle::new(vec![0.0; 12], [2, 3, 2], vec![0]).is_err());
    }

    #[test]
    fn test_save_and_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        let features: Vec<f32> = (0..24).map(|i| i as f32 * 0.5 - 3.0).collect();
        let bundle = RepresentationBundle::new(features, [2, 4, 3], vec![7, 3]).unwrap();
        bundle.save(dir.path().join(REPRESENTATION_FILE)).unwrap();

        let loaded = load_representation(dir.path()).unwrap();
        assert_eq!(loaded, bundle);
        assert_eq!(loaded.matrix_shape(), (4, 3));
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_to_tensors_shapes() {
        let bundle = RepresentationBundle::new(vec![1.0; 30], [5, 3, 2], vec![0; 5]).unwrap();
        let (x, y) = bundle.to_tensors(&Device::Cpu).unwrap();
        assert_eq!(x.dims(), &[5, 3, 2]);
        assert_eq!(y.dims(), &[5]);
        assert_eq!(y.dtype(), DType::I64);
    }
}
