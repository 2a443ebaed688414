//! Dense perceptron classifier
//!
//! Architecture per run:
//! - Flatten `[batch, n_mfcc, frames]` to `[batch, n_mfcc * frames]`
//! - Dense(d1, ReLU) -> Dropout(p1)
//! - Dense(d2, ReLU) -> Dropout(p2)
//! - Dense(d3, ReLU) when d3 > 0
//! - Dense(classes), logits for softmax cross-entropy

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Dropout, Linear, Module, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{ModelConfig, RepresentationConfig};

/// Everything needed to rebuild a trained classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArchitecture {
    /// `(n_mfcc, frames)` of one input matrix
    pub input_shape: [usize; 2],
    /// Hidden layer widths and dropout
    pub model: ModelConfig,
    /// Original label value of each output class, in class order
    pub classes: Vec<i64>,
    /// Sample rate the features were computed at
    pub sample_rate: u32,
    /// Segment length in seconds
    pub segment_length: u32,
    /// MFCC settings of the inputs
    pub representation: RepresentationConfig,
}

impl ModelArchitecture {
    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Length of a flattened input row
    pub fn input_dim(&self) -> usize {
        self.input_shape[0] * self.input_shape[1]
    }

    /// `(name, inputs, outputs, dropout)` of every dense layer, output last
    pub fn layers(&self) -> Vec<(&'static str, usize, usize, f32)> {
        let hidden = [
            ("dense1", self.model.dense1, self.model.dropout1),
            ("dense2", self.model.dense2, self.model.dropout2),
            ("dense3", self.model.dense3, 0.0),
        ];

        let mut layers = Vec::new();
        let mut inputs = self.input_dim();
        for (name, width, dropout) in hidden {
            if width == 0 {
                continue;
            }
            layers.push((name, inputs, width, dropout));
            inputs = width;
        }
        layers.push(("output", inputs, self.num_classes(), 0.0));
        layers
    }

    /// Trainable parameter count
    pub fn num_parameters(&self) -> usize {
        self.layers()
            .iter()
            .map(|(_, inputs, outputs, _)| inputs * outputs + outputs)
            .sum()
    }

    /// Write the description as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write architecture {:?}", path))
    }

    /// Read a description written by [`ModelArchitecture::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read architecture {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed architecture {:?}", path))
    }

    /// Weight map with Glorot-uniform weights and zero biases drawn from `seed`
    pub fn seeded_varmap(&self, seed: u64, device: &Device) -> Result<VarMap> {
        let varmap = VarMap::new();
        let mut rng = StdRng::seed_from_u64(seed);
        {
            let mut data = varmap
                .data()
                .lock()
                .map_err(|_| anyhow::anyhow!("Weight map lock poisoned"))?;
            for (name, inputs, outputs, _) in self.layers() {
                let limit = (6.0 / (inputs + outputs) as f32).sqrt();
                let weights: Vec<f32> = (0..inputs * outputs)
                    .map(|_| rng.gen_range(-limit..limit))
                    .collect();
                let weights = Tensor::from_vec(weights, (outputs, inputs), device)?;
                data.insert(format!("{}.weight", name), Var::from_tensor(&weights)?);
                data.insert(
                    format!("{}.bias", name),
                    Var::zeros(outputs, DType::F32, device)?,
                );
            }
        }
        Ok(varmap)
    }
}

/// Dense classifier
pub struct Perceptron {
    hidden: Vec<(Linear, Dropout, f32)>,
    output: Linear,
    input_dim: usize,
}

impl Perceptron {
    /// Build the layers from `vb`
    pub fn new(arch: &ModelArchitecture, vb: VarBuilder) -> Result<Self> {
        if arch.num_classes() == 0 {
            anyhow::bail!("A classifier needs at least one class");
        }

        let mut layers = arch.layers();
        let (name, inputs, outputs, _) = layers
            .pop()
            .context("Architecture has no output layer")?;
        let output = candle_nn::linear(inputs, outputs, vb.pp(name))?;

        let hidden = layers
            .into_iter()
            .map(|(name, inputs, outputs, p)| {
                let linear = candle_nn::linear(inputs, outputs, vb.pp(name))?;
                Ok((linear, Dropout::new(p), p))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            hidden,
            output,
            input_dim: arch.input_dim(),
        })
    }

    /// Build a fresh model with seeded weights
    pub fn initialize(arch: &ModelArchitecture, seed: u64, device: &Device) -> Result<(VarMap, Self)> {
        let varmap = arch.seeded_varmap(seed, device)?;
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = Self::new(arch, vb)?;
        Ok((varmap, model))
    }

    /// Build a model and load trained weights from `path`
    pub fn load<P: AsRef<Path>>(
        arch: &ModelArchitecture,
        path: P,
        device: &Device,
    ) -> Result<(VarMap, Self)> {
        let path = path.as_ref();
        let (mut varmap, model) = Self::initialize(arch, 0, device)?;
        varmap
            .load(path)
            .with_context(|| format!("Failed to load weights {:?}", path))?;
        Ok((varmap, model))
    }

    /// Logits `[batch, classes]`; dropout is active only when `train` is set
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = x.flatten_from(1)?;
        let width = x.dim(1)?;
        if width != self.input_dim {
            anyhow::bail!("Expected {} input features, got {}", self.input_dim, width);
        }

        for (linear, dropout, p) in &self.hidden {
            x = linear.forward(&x)?.relu()?;
            if train && *p > 0.0 {
                x = dropout.forward(&x, true)?;
            }
        }
        self.output.forward(&x).map_err(Into::into)
    }

    /// Class probabilities `[batch, classes]`
    pub fn predict_proba(&self, x: &Tensor) -> Result<Tensor> {
        let logits = self.forward_t(x, false)?;
        candle_nn::ops::softmax_last_dim(&logits).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch(dense3: usize) -> ModelArchitecture {
        ModelArchitecture {
            input_shape: [4, 5],
            model: ModelConfig {
                dense1: 8,
                dropout1: 0.3,
                dense2: 6,
                dropout2: 0.0,
                dense3,
            },
            classes: vec![3, 5, 9],
            sample_rate: 24000,
            segment_length: 5,
            representation: RepresentationConfig::default(),
        }
    }

    #[test]
    fn test_layers_and_parameters() {
        let a = arch(0);
        let names: Vec<_> = a.layers().iter().map(|l| l.0).collect();
        assert_eq!(names, vec!["dense1", "dense2", "output"]);
        assert_eq!(a.num_parameters(), (20 * 8 + 8) + (8 * 6 + 6) + (6 * 3 + 3));

        let b = arch(4);
        assert_eq!(b.layers().len(), 4);
        assert_eq!(b.layers()[3], ("output", 4, 3, 0.0));
    }

    #[test]
    fn test_forward_shapes() {
        let device = Device::Cpu;
        let (_, model) = Perceptron::initialize(&arch(4), 7, &device).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, (2, 4, 5), &device).unwrap();
        let logits = model.forward_t(&x, true).unwrap();
        assert_eq!(logits.dims2().unwrap(), (2, 3));

        let probs = model.predict_proba(&x).unwrap();
        let sums = probs.sum(1).unwrap().to_vec1::<f32>().unwrap();
        for s in sums {
            assert!((s - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_wrong_input_width() {
        let device = Device::Cpu;
        let (_, model) = Perceptron::initialize(&arch(0), 7, &device).unwrap();
        let x = Tensor::zeros((1, 3, 5), DType::F32, &device).unwrap();
        assert!(model.forward_t(&x, false).is_err());
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let device = Device::Cpu;
        let x = Tensor::randn(0.0f32, 1.0, (3, 4, 5), &device).unwrap();
        let (_, a) = Perceptron::initialize(&arch(0), 11, &device).unwrap();
        let (_, b) = Perceptron::initialize(&arch(0), 11, &device).unwrap();
        let ya = a.forward_t(&x, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let yb = b.forward_t(&x, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(ya, yb);
    }

    #[test]
    fn test_weights_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");
        let device = Device::Cpu;
        let a = arch(0);

        let (varmap, model) = Perceptron::initialize(&a, 3, &device).unwrap();
        varmap.save(&path).unwrap();
        a.save(dir.path().join("model_architecture.json")).unwrap();

        let loaded_arch = ModelArchitecture::load(dir.path().join("model_architecture.json")).unwrap();
        assert_eq!(loaded_arch, a);
        let (_, loaded) = Perceptron::load(&loaded_arch, &path, &device).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, (2, 4, 5), &device).unwrap();
        let ya = model.forward_t(&x, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let yb = loaded.forward_t(&x, false).unwrap().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (p, q) in ya.iter().zip(&yb) {
            assert!((p - q).abs() < 1e-6);
        }
    }
}
