//! Classification of audio files with a trained run
//!
//! Mirrors the training data path: decode at the model's sample rate, peak
//! normalize, cut non-overlapping segments, MFCC, scale, then average the
//! softmax of every segment.

use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::audio::{AudioLoader, Normalize, Transform};
use crate::dataset::segment_starts;
use crate::models::{
    ModelArchitecture, Perceptron, StandardScaler, ARCHITECTURE_FILE, SCALER_FILE, WEIGHTS_FILE,
};
use crate::representation::Representer;

/// Probability of one class
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Original label value
    pub label: i64,
    /// Mean segment probability
    pub probability: f32,
}

/// Ranked predictions for one file
#[derive(Debug, Clone)]
pub struct Classification {
    /// Classified file
    pub path: PathBuf,
    /// Segments the file was cut into
    pub segments: usize,
    /// Most probable class first
    pub ranking: Vec<Prediction>,
}

impl Classification {
    /// Most probable class
    pub fn top(&self) -> Option<&Prediction> {
        self.ranking.first()
    }
}

/// A trained run loaded for inference
pub struct Classifier {
    architecture: ModelArchitecture,
    scaler: StandardScaler,
    model: Perceptron,
    representer: Representer,
    device: Device,
    // Owns the weights the model reads
    _varmap: VarMap,
}

impl Classifier {
    /// Load architecture, scaler and weights from a run directory
    pub fn load<P: AsRef<Path>>(run_dir: P, device: &Device) -> Result<Self> {
        let run_dir = run_dir.as_ref();
        let architecture = ModelArchitecture::load(run_dir.join(ARCHITECTURE_FILE))?;
        let scaler = StandardScaler::load(run_dir.join(SCALER_FILE))?;
        if scaler.width() != architecture.input_shape[1] {
            anyhow::bail!(
                "Scaler width {} does not match {} frames per matrix",
                scaler.width(),
                architecture.input_shape[1]
            );
        }

        let (varmap, model) = Perceptron::load(&architecture, run_dir.join(WEIGHTS_FILE), device)?;
        let representer = Representer::new(&architecture.representation, architecture.sample_rate)?;

        Ok(Self {
            architecture,
            scaler,
            model,
            representer,
            device: device.clone(),
            _varmap: varmap,
        })
    }

    /// Architecture of the loaded run
    pub fn architecture(&self) -> &ModelArchitecture {
        &self.architecture
    }

    /// Samples per segment
    pub fn segment_samples(&self) -> usize {
        self.architecture.segment_length as usize * self.architecture.sample_rate as usize
    }

    /// Ranked class probabilities of mono samples at the model's sample rate
    ///
    /// Audio shorter than one segment is zero padded to a full segment.
    pub fn classify_samples(&self, samples: &[f32]) -> Result<(usize, Vec<Prediction>)> {
        let segment_len = self.segment_samples();
        let mut audio = samples.to_vec();
        if audio.is_empty() {
            anyhow::bail!("Cannot classify empty audio");
        }
        if audio.len() < segment_len {
            audio.resize(segment_len, 0.0);
        }

        let mut rng = StdRng::seed_from_u64(0);
        Normalize.apply(&mut audio, self.architecture.sample_rate, &mut rng)?;

        let starts = segment_starts(audio.len(), segment_len, segment_len);
        let [n_mfcc, frames] = self.architecture.input_shape;

        let mut features = Vec::with_capacity(starts.len() * n_mfcc * frames);
        for &start in &starts {
            let (matrix, n_frames) = self
                .representer
                .represent_samples(&audio[start..start + segment_len])?;
            if n_frames != frames {
                anyhow::bail!("Segment has {} frames, the model expects {}", n_frames, frames);
            }
            features.extend(matrix);
        }
        self.scaler.transform(&mut features)?;

        let x = Tensor::from_vec(features, (starts.len(), n_mfcc, frames), &self.device)?;
        let probs = self.model.predict_proba(&x)?.mean(0)?.to_vec1::<f32>()?;

        let mut ranking: Vec<Prediction> = self
            .architecture
            .classes
            .iter()
            .zip(probs)
            .map(|(&label, probability)| Prediction { label, probability })
            .collect();
        ranking.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        Ok((starts.len(), ranking))
    }

    /// Decode and classify one audio file
    pub fn classify_file<P: AsRef<Path>>(&self, path: P) -> Result<Classification> {
        let path = path.as_ref();
        let (samples, _) = AudioLoader::load(path, self.architecture.sample_rate)?;
        let (segments, ranking) = self.classify_samples(&samples)?;
        debug!("{:?}: {} segments", path, segments);
        Ok(Classification {
            path: path.to_path_buf(),
            segments,
            ranking,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, RepresentationConfig};
    use crate::models::StandardScaler;

    const SR: u32 = 4000;

    fn run_fixture(dir: &Path) -> ModelArchitecture {
        let representation = RepresentationConfig {
            n_mfcc: 8,
            n_fft: 256,
            hop_length: 128,
            n_mels: 20,
            ..Default::default()
        };
        let frames = 1 + SR as usize / 128;
        let arch = ModelArchitecture {
            input_shape: [8, frames],
            model: ModelConfig {
                dense1: 6,
                dropout1: 0.0,
                dense2: 4,
                dropout2: 0.0,
                dense3: 0,
            },
            classes: vec![2, 5, 9],
            sample_rate: SR,
            segment_length: 1,
            representation,
        };

        let (varmap, _) = Perceptron::initialize(&arch, 5, &Device::Cpu).unwrap();
        varmap.save(dir.join(WEIGHTS_FILE)).unwrap();
        arch.save(dir.join(ARCHITECTURE_FILE)).unwrap();

        let values: Vec<f32> = (0..frames * 4).map(|i| (i % 7) as f32).collect();
        StandardScaler::fit(&values, frames)
            .unwrap()
            .save(dir.join(SCALER_FILE))
            .unwrap();
        arch
    }

    fn tone(seconds: f32) -> Vec<f32> {
        (0..(seconds * SR as f32) as usize)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SR as f32).sin() * 0.3)
            .collect()
    }

    #[test]
    fn test_probabilities_are_ranked() {
        let dir = tempfile::tempdir().unwrap();
        run_fixture(dir.path());
        let classifier = Classifier::load(dir.path(), &Device::Cpu).unwrap();

        let (segments, ranking) = classifier.classify_samples(&tone(3.5)).unwrap();
        assert_eq!(segments, 3);
        assert_eq!(ranking.len(), 3);
        let total: f32 = ranking.iter().map(|p| p.probability).sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert!(ranking.windows(2).all(|w| w[0].probability >= w[1].probability));

        let mut labels: Vec<i64> = ranking.iter().map(|p| p.label).collect();
        labels.sort();
        assert_eq!(labels, vec![2, 5, 9]);
    }

    #[test]
    fn test_short_audio_is_padded() {
        let dir = tempfile::tempdir().unwrap();
        run_fixture(dir.path());
        let classifier = Classifier::load(dir.path(), &Device::Cpu).unwrap();

        let (segments, _) = classifier.classify_samples(&tone(0.2)).unwrap();
        assert_eq!(segments, 1);
        assert!(classifier.classify_samples(&[]).is_err());
    }

    #[test]
    fn test_classify_file() {
        let dir = tempfile::tempdir().unwrap();
        run_fixture(dir.path());
        let path = dir.path().join("clip.wav");
        crate::audio::AudioOutput::save(&tone(2.0), SR, &path).unwrap();

        let classifier = Classifier::load(dir.path(), &Device::Cpu).unwrap();
        let result = classifier.classify_file(&path).unwrap();
        assert_eq!(result.segments, 2);
        assert!(result.top().is_some());
    }

    #[test]
    fn test_missing_run_dir() {
        assert!(Classifier::load("no/such/run", &Device::Cpu).is_err());
    }
}
