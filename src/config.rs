//! Pipeline configuration
//!
//! Loaded from YAML. Every field has a default, so an empty document (or no
//! file at all) yields the stock research setup: 24 kHz audio, 5 second
//! segments, 40 MFCC coefficients and a 320/310 dense network.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::TransformConfig;
use crate::dataset::Split;

/// Top-level configuration for every pipeline stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input and output roots
    pub paths: PathsConfig,
    /// Stage toggles
    pub stages: StagesConfig,
    /// Annotation settings
    pub annotation: AnnotationConfig,
    /// Segmentation settings
    pub segmentation: SegmentationConfig,
    /// MFCC settings
    pub representation: RepresentationConfig,
    /// Network shape
    pub model: ModelConfig,
    /// Optimizer settings
    pub training: TrainingConfig,
}

/// Filesystem roots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root holding the raw datasets, one subdirectory per dataset
    pub raw_root: PathBuf,
    /// Root receiving annotated datasets and their segmentations
    pub annotated_root: PathBuf,
    /// Root receiving trained model runs
    pub models_root: PathBuf,
    /// Dataset subdirectory name
    pub dataset: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_root: PathBuf::from("datasets"),
            annotated_root: PathBuf::from("dataset"),
            models_root: PathBuf::from("models"),
            dataset: "spotify_20".to_string(),
        }
    }
}

/// Which stages `run` executes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    /// Annotate the raw dataset
    pub annotate: bool,
    /// Segment the train split
    pub segment_train: bool,
    /// Segment the valid split
    pub segment_valid: bool,
    /// Segment the test split
    pub segment_test: bool,
    /// Represent the train split
    pub represent_train: bool,
    /// Represent the valid split
    pub represent_valid: bool,
    /// Represent the test split
    pub represent_test: bool,
    /// Train and evaluate a model
    pub train: bool,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            annotate: true,
            segment_train: true,
            segment_valid: true,
            segment_test: true,
            represent_train: true,
            represent_valid: true,
            represent_test: true,
            train: true,
        }
    }
}

impl StagesConfig {
    /// Segmentation toggle for a split
    pub fn segment(&self, split: Split) -> bool {
        match split {
            Split::Train => self.segment_train,
            Split::Valid => self.segment_valid,
            Split::Test => self.segment_test,
        }
    }

    /// Representation toggle for a split
    pub fn represent(&self, split: Split) -> bool {
        match split {
            Split::Train => self.represent_train,
            Split::Valid => self.represent_valid,
            Split::Test => self.represent_test,
        }
    }
}

/// Annotation stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Target sample rate of annotated audio
    pub sample_rate: u32,
    /// Only annotate the first N files (sorted by path)
    pub extract: Option<usize>,
    /// Skip files that carry no tag at all
    pub require_tags: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            extract: None,
            require_tags: true,
        }
    }
}

/// Train/valid/test fractions of each recording's segments
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitRatios {
    /// Train fraction
    pub train: f32,
    /// Validation fraction
    pub valid: f32,
    /// Test fraction
    pub test: f32,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.7,
            valid: 0.15,
            test: 0.15,
        }
    }
}

/// Transform chains applied to one split
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitTransforms {
    /// Applied to every kept segment
    pub base: Vec<TransformConfig>,
    /// Applied on top of `base` to each augmented copy
    pub extra: Vec<TransformConfig>,
}

/// Segmentation stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Segment length in seconds
    pub segment_length: u32,
    /// Fraction of a segment shared with the next one, in `[0, 1)`
    pub overlap: f32,
    /// Augmented copies written per train segment
    pub augment_size: usize,
    /// Share of each recording per split
    pub ratios: SplitRatios,
    /// Seed of the split plan and augmentation
    pub seed: u64,
    /// Train split transforms
    pub train: SplitTransforms,
    /// Validation split transforms
    pub valid: SplitTransforms,
    /// Test split transforms
    pub test: SplitTransforms,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        let noisy = TransformConfig::noise_chain();
        let eval_chain: Vec<TransformConfig> = std::iter::once(TransformConfig::normalize())
            .chain(noisy.iter().cloned())
            .collect();

        Self {
            segment_length: 5,
            overlap: 0.0,
            augment_size: 0,
            ratios: SplitRatios::default(),
            seed: 42,
            train: SplitTransforms {
                base: vec![TransformConfig::normalize()],
                extra: noisy,
            },
            valid: SplitTransforms {
                base: eval_chain.clone(),
                extra: Vec::new(),
            },
            test: SplitTransforms {
                base: eval_chain,
                extra: Vec::new(),
            },
        }
    }
}

impl SegmentationConfig {
    /// Transform chains for a split
    pub fn transforms(&self, split: Split) -> &SplitTransforms {
        match split {
            Split::Train => &self.train,
            Split::Valid => &self.valid,
            Split::Test => &self.test,
        }
    }

    /// Augmented copies per segment for a split; only train is augmented
    pub fn augment_size_for(&self, split: Split) -> usize {
        match split {
            Split::Train => self.augment_size,
            Split::Valid | Split::Test => 0,
        }
    }
}

/// MFCC extraction settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepresentationConfig {
    /// Coefficients kept per frame
    pub n_mfcc: usize,
    /// FFT window length in samples
    pub n_fft: usize,
    /// Samples between frames
    pub hop_length: usize,
    /// Mel bands
    pub n_mels: usize,
    /// Lower mel edge in Hz
    pub fmin: f32,
    /// Upper mel edge in Hz; Nyquist when unset
    pub fmax: Option<f32>,
    /// HTK mel scale instead of Slaney
    pub htk: bool,
}

impl Default for RepresentationConfig {
    fn default() -> Self {
        Self {
            n_mfcc: 40,
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            fmin: 0.0,
            fmax: None,
            htk: false,
        }
    }
}

/// Dense network shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// First hidden layer width
    pub dense1: usize,
    /// Dropout after the first layer
    pub dropout1: f32,
    /// Second hidden layer width; 0 disables it
    pub dense2: usize,
    /// Dropout after the second layer
    pub dropout2: f32,
    /// Third hidden layer width; 0 disables it
    pub dense3: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dense1: 320,
            dropout1: 0.3,
            dense2: 310,
            dropout2: 0.0,
            dense3: 0,
        }
    }
}

impl ModelConfig {
    /// Directory component naming this architecture, e.g. `D320_DO0.3_D310_DO0_D0`
    pub fn dir_name(&self) -> String {
        format!(
            "D{}_DO{}_D{}_DO{}_D{}",
            self.dense1, self.dropout1, self.dense2, self.dropout2, self.dense3
        )
    }
}

/// Optimizer and early-stopping settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Maximum epochs, at least 1
    pub epochs: usize,
    /// Rows per optimizer step
    pub batch_size: usize,
    /// Epochs without validation-loss improvement before stopping
    pub patience: usize,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Seed of weight init and batch shuffling
    pub seed: u64,
    /// Reload the weights of the best validation epoch after stopping
    pub restore_best: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            batch_size: 32,
            patience: 20,
            learning_rate: 1e-4,
            seed: 42,
            restore_best: false,
        }
    }
}

/// Command-line overrides mirroring the training entry point flags
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// `-c`
    pub n_mfcc: Option<usize>,
    /// `-a`
    pub augment_size: Option<usize>,
    /// `-s`
    pub segment_length: Option<u32>,
    /// `-o`
    pub overlap: Option<f32>,
    /// `-b`
    pub dataset: Option<String>,
}

impl PipelineConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(n_mfcc) = overrides.n_mfcc {
            self.representation.n_mfcc = n_mfcc;
        }
        if let Some(augment_size) = overrides.augment_size {
            self.segmentation.augment_size = augment_size;
        }
        if let Some(segment_length) = overrides.segment_length {
            self.segmentation.segment_length = segment_length;
        }
        if let Some(overlap) = overrides.overlap {
            self.segmentation.overlap = overlap;
        }
        if let Some(ref dataset) = overrides.dataset {
            self.paths.dataset = dataset.clone();
        }
    }

    /// Reject settings no stage can work with
    pub fn validate(&self) -> Result<()> {
        let seg = &self.segmentation;
        if seg.segment_length == 0 {
            anyhow::bail!("segment_length must be positive");
        }
        if !(0.0..1.0).contains(&seg.overlap) {
            anyhow::bail!("overlap must be in [0, 1), got {}", seg.overlap);
        }

        let r = seg.ratios;
        if r.train < 0.0 || r.valid < 0.0 || r.test < 0.0 {
            anyhow::bail!("split ratios must be non-negative");
        }
        if ((r.train + r.valid + r.test) - 1.0).abs() > 1e-4 {
            anyhow::bail!(
                "split ratios must sum to 1, got {}",
                r.train + r.valid + r.test
            );
        }

        let rep = &self.representation;
        if rep.n_fft == 0 || rep.hop_length == 0 {
            anyhow::bail!("n_fft and hop_length must be positive");
        }
        if rep.n_mfcc == 0 || rep.n_mfcc > rep.n_mels {
            anyhow::bail!(
                "n_mfcc must be in 1..={} (n_mels), got {}",
                rep.n_mels,
                rep.n_mfcc
            );
        }

        if self.annotation.sample_rate == 0 {
            anyhow::bail!("sample_rate must be positive");
        }
        if self.training.epochs == 0 {
            anyhow::bail!("epochs must be positive");
        }
        if self.training.batch_size == 0 {
            anyhow::bail!("batch_size must be positive");
        }
        for p in [self.model.dropout1, self.model.dropout2] {
            if !(0.0..1.0).contains(&p) {
                anyhow::bail!("dropout must be in [0, 1), got {}", p);
            }
        }

        Ok(())
    }

    /// Raw dataset directory
    pub fn raw_dir(&self) -> PathBuf {
        self.paths.raw_root.join(&self.paths.dataset)
    }

    /// Annotated dataset directory (metadata.csv + audio/)
    pub fn annotated_dir(&self) -> PathBuf {
        self.paths.annotated_root.join(&self.paths.dataset)
    }

    /// Segmentation directory name, e.g. `SEG_5_OVERLAP_0_AUG_0`
    pub fn segmentation_name(&self) -> String {
        let seg = &self.segmentation;
        format!(
            "SEG_{}_OVERLAP_{}_AUG_{}",
            seg.segment_length,
            (f64::from(seg.overlap) * 100.0) as u32,
            seg.augment_size
        )
    }

    /// Base directory holding every split of one segmentation
    pub fn segmentation_dir(&self) -> PathBuf {
        self.annotated_dir().join(self.segmentation_name())
    }

    /// Segment directory of a split
    pub fn segment_dir(&self, split: Split) -> PathBuf {
        self.segmentation_dir().join(split.as_str())
    }

    /// Representation directory of a split
    pub fn representation_dir(&self, split: Split) -> PathBuf {
        self.segmentation_dir()
            .join(format!("MFCC_{}", self.representation.n_mfcc))
            .join(split.as_str())
    }

    /// Parent of every run directory sharing this configuration
    pub fn model_family_dir(&self) -> PathBuf {
        self.paths
            .models_root
            .join(&self.paths.dataset)
            .join(self.segmentation_name())
            .join(format!("MFCC_{}", self.representation.n_mfcc))
            .join(self.model.dir_name())
    }
}
