//! Augmentation transforms
//!
//! Each transform mutates a mono buffer in place. A [`Compose`] chain fires
//! every step with its own probability, drawing from the caller's RNG so a
//! seeded run is reproducible.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{is_audio_file, AudioLoader};

/// A single in-place audio transform
pub trait Transform: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Apply the transform
    fn apply(&self, samples: &mut [f32], sample_rate: u32, rng: &mut StdRng) -> Result<()>;
}

/// Serializable description of a transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformConfig {
    /// Peak normalization
    Normalize {
        #[serde(default = "always")]
        p: f32,
    },
    /// White noise at a random signal-to-noise ratio
    AddGaussianSnr {
        min_snr_db: f32,
        max_snr_db: f32,
        p: f32,
    },
    /// Butterworth high-pass with a random cutoff
    HighPassFilter {
        min_cutoff_freq: f32,
        max_cutoff_freq: f32,
        p: f32,
    },
    /// Butterworth low-pass with a random cutoff
    LowPassFilter {
        min_cutoff_freq: f32,
        max_cutoff_freq: f32,
        p: f32,
    },
    /// Mix in a random clip from a directory of noise recordings
    AddBackgroundNoise {
        path: PathBuf,
        #[serde(default = "default_min_noise_snr")]
        min_snr_db: f32,
        #[serde(default = "default_max_noise_snr")]
        max_snr_db: f32,
        p: f32,
    },
}

fn always() -> f32 {
    1.0
}

fn default_min_noise_snr() -> f32 {
    3.0
}

fn default_max_noise_snr() -> f32 {
    30.0
}

impl TransformConfig {
    /// `Normalize` that always fires
    pub fn normalize() -> Self {
        Self::Normalize { p: 1.0 }
    }

    /// Noise and band-limiting chain used for augmented and evaluation segments
    pub fn noise_chain() -> Vec<Self> {
        vec![
            Self::AddGaussianSnr {
                min_snr_db: 24.0,
                max_snr_db: 40.0,
                p: 0.8,
            },
            Self::HighPassFilter {
                min_cutoff_freq: 60.0,
                max_cutoff_freq: 100.0,
                p: 0.8,
            },
            Self::LowPassFilter {
                min_cutoff_freq: 3400.0,
                max_cutoff_freq: 10000.0,
                p: 0.8,
            },
        ]
    }

    /// Probability that the transform fires
    pub fn probability(&self) -> f32 {
        match *self {
            Self::Normalize { p }
            | Self::AddGaussianSnr { p, .. }
            | Self::HighPassFilter { p, .. }
            | Self::LowPassFilter { p, .. }
            | Self::AddBackgroundNoise { p, .. } => p,
        }
    }

    /// Instantiate the transform
    pub fn build(&self) -> Result<Box<dyn Transform>> {
        let transform: Box<dyn Transform> = match self {
            Self::Normalize { .. } => Box::new(Normalize),
            Self::AddGaussianSnr {
                min_snr_db,
                max_snr_db,
                ..
            } => Box::new(AddGaussianSnr::new(*min_snr_db, *max_snr_db)?),
            Self::HighPassFilter {
                min_cutoff_freq,
                max_cutoff_freq,
                ..
            } => Box::new(PassFilter::new(
                FilterKind::HighPass,
                *min_cutoff_freq,
                *max_cutoff_freq,
            )?),
            Self::LowPassFilter {
                min_cutoff_freq,
                max_cutoff_freq,
                ..
            } => Box::new(PassFilter::new(
                FilterKind::LowPass,
                *min_cutoff_freq,
                *max_cutoff_freq,
            )?),
            Self::AddBackgroundNoise {
                path,
                min_snr_db,
                max_snr_db,
                ..
            } => Box::new(AddBackgroundNoise::new(path, *min_snr_db, *max_snr_db)?),
        };
        Ok(transform)
    }
}

fn check_range(name: &str, min: f32, max: f32) -> Result<()> {
    if !(min <= max) {
        anyhow::bail!("{}: min ({}) must not exceed max ({})", name, min, max);
    }
    Ok(())
}

fn uniform(rng: &mut StdRng, min: f32, max: f32) -> f32 {
    if min == max {
        min
    } else {
        rng.gen_range(min..max)
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Scale so the peak absolute sample is 1.0
pub struct Normalize;

impl Transform for Normalize {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn apply(&self, samples: &mut [f32], _sample_rate: u32, _rng: &mut StdRng) -> Result<()> {
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > 0.0 {
            for s in samples.iter_mut() {
                *s /= peak;
            }
        }
        Ok(())
    }
}

/// Add white Gaussian noise at an SNR drawn from `[min_snr_db, max_snr_db)`
pub struct AddGaussianSnr {
    min_snr_db: f32,
    max_snr_db: f32,
}

impl AddGaussianSnr {
    /// Create the transform
    pub fn new(min_snr_db: f32, max_snr_db: f32) -> Result<Self> {
        check_range("add_gaussian_snr", min_snr_db, max_snr_db)?;
        Ok(Self {
            min_snr_db,
            max_snr_db,
        })
    }
}

impl Transform for AddGaussianSnr {
    fn name(&self) -> &'static str {
        "add_gaussian_snr"
    }

    fn apply(&self, samples: &mut [f32], _sample_rate: u32, rng: &mut StdRng) -> Result<()> {
        let signal_rms = rms(samples);
        if signal_rms == 0.0 {
            return Ok(());
        }

        let snr_db = uniform(rng, self.min_snr_db, self.max_snr_db);
        let noise_std = signal_rms / 10f32.powf(snr_db / 20.0);
        let normal = Normal::new(0.0f32, noise_std)?;
        for s in samples.iter_mut() {
            *s += normal.sample(rng);
        }
        Ok(())
    }
}

/// Which side of the cutoff a [`PassFilter`] keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Attenuate below the cutoff
    HighPass,
    /// Attenuate above the cutoff
    LowPass,
}

/// Second-order Butterworth filter with a random cutoff
pub struct PassFilter {
    kind: FilterKind,
    min_cutoff: f32,
    max_cutoff: f32,
}

impl PassFilter {
    /// Create the filter; cutoffs are in Hz
    pub fn new(kind: FilterKind, min_cutoff: f32, max_cutoff: f32) -> Result<Self> {
        check_range("pass_filter", min_cutoff, max_cutoff)?;
        if min_cutoff <= 0.0 {
            anyhow::bail!("pass_filter: cutoff must be positive, got {}", min_cutoff);
        }
        Ok(Self {
            kind,
            min_cutoff,
            max_cutoff,
        })
    }

    /// Biquad coefficients `(b0, b1, b2, a1, a2)` normalized by `a0`
    fn coefficients(&self, cutoff: f32, sample_rate: u32) -> (f32, f32, f32, f32, f32) {
        // Keep the cutoff strictly below Nyquist
        let cutoff = cutoff.min(sample_rate as f32 * 0.45);
        let w0 = 2.0 * PI * cutoff / sample_rate as f32;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * std::f32::consts::FRAC_1_SQRT_2);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match self.kind {
            FilterKind::LowPass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            FilterKind::HighPass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };

        (b0 / a0, b1 / a0, b2 / a0, -2.0 * cos / a0, (1.0 - alpha) / a0)
    }

    /// Filter with a fixed cutoff
    pub fn filter(&self, samples: &mut [f32], cutoff: f32, sample_rate: u32) {
        let (b0, b1, b2, a1, a2) = self.coefficients(cutoff, sample_rate);
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
        for s in samples.iter_mut() {
            let x0 = *s;
            let y0 = b0 * x0 + b1 * x1 + b2 * x2 - a1 * y1 - a2 * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            *s = y0;
        }
    }
}

impl Transform for PassFilter {
    fn name(&self) -> &'static str {
        match self.kind {
            FilterKind::HighPass => "high_pass_filter",
            FilterKind::LowPass => "low_pass_filter",
        }
    }

    fn apply(&self, samples: &mut [f32], sample_rate: u32, rng: &mut StdRng) -> Result<()> {
        let cutoff = uniform(rng, self.min_cutoff, self.max_cutoff);
        self.filter(samples, cutoff, sample_rate);
        Ok(())
    }
}

/// Mix a random noise recording into the signal
pub struct AddBackgroundNoise {
    noise_files: Vec<PathBuf>,
    min_snr_db: f32,
    max_snr_db: f32,
}

impl AddBackgroundNoise {
    /// Index every audio file under `dir`
    pub fn new<P: AsRef<Path>>(dir: P, min_snr_db: f32, max_snr_db: f32) -> Result<Self> {
        check_range("add_background_noise", min_snr_db, max_snr_db)?;
        let dir = dir.as_ref();

        let mut noise_files: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        noise_files.sort();

        if noise_files.is_empty() {
            anyhow::bail!("No background noise files found in {:?}", dir);
        }

        Ok(Self {
            noise_files,
            min_snr_db,
            max_snr_db,
        })
    }

    /// Number of indexed noise files
    pub fn len(&self) -> usize {
        self.noise_files.len()
    }

    /// Whether no noise file was indexed
    pub fn is_empty(&self) -> bool {
        self.noise_files.is_empty()
    }
}

impl Transform for AddBackgroundNoise {
    fn name(&self) -> &'static str {
        "add_background_noise"
    }

    fn apply(&self, samples: &mut [f32], sample_rate: u32, rng: &mut StdRng) -> Result<()> {
        let signal_rms = rms(samples);
        if signal_rms == 0.0 || samples.is_empty() {
            return Ok(());
        }

        let path = &self.noise_files[rng.gen_range(0..self.noise_files.len())];
        let (noise, _) = AudioLoader::load(path, sample_rate)
            .with_context(|| format!("Failed to load background noise {:?}", path))?;

        let noise_rms = rms(&noise);
        if noise_rms == 0.0 {
            return Ok(());
        }

        let snr_db = uniform(rng, self.min_snr_db, self.max_snr_db);
        let gain = signal_rms / 10f32.powf(snr_db / 20.0) / noise_rms;

        // Loop the clip from a random offset to cover the whole buffer
        let offset = rng.gen_range(0..noise.len());
        for (i, s) in samples.iter_mut().enumerate() {
            *s += noise[(offset + i) % noise.len()] * gain;
        }
        Ok(())
    }
}

/// Ordered chain of probabilistic transforms
#[derive(Default)]
pub struct Compose {
    steps: Vec<(f32, Box<dyn Transform>)>,
}

impl Compose {
    /// Build a chain from its configuration
    pub fn from_configs(configs: &[TransformConfig]) -> Result<Self> {
        let steps = configs
            .iter()
            .map(|config| Ok((config.probability(), config.build()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { steps })
    }

    /// Whether the chain has no step
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the transforms in order
    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|(_, t)| t.name()).collect()
    }

    /// Apply each step with its probability
    pub fn apply(&self, samples: &mut [f32], sample_rate: u32, rng: &mut StdRng) -> Result<()> {
        for (p, transform) in &self.steps {
            if rng.gen::<f32>() < *p {
                transform.apply(samples, sample_rate, rng)?;
            }
        }
        Ok(())
    }
}
