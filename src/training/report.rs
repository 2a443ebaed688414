//! Run directory artifacts
//!
//! A finished run writes:
//! - `model.safetensors`, `model_architecture.json`, `scaler.json`
//! - `history.json`, `history.svg`, `confusion_matrix.svg`
//! - `{train,valid,test}_distribution.svg`
//! - `overview.json`

use anyhow::{Context, Result};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::metrics::Evaluation;
use super::trainer::History;
use crate::config::PipelineConfig;
use crate::models::{ModelArchitecture, StandardScaler, ARCHITECTURE_FILE, SCALER_FILE, WEIGHTS_FILE};
use crate::plots;
use crate::utils::label_counts;

/// Name of the history file
pub const HISTORY_FILE: &str = "history.json";
/// Name of the run summary
pub const OVERVIEW_FILE: &str = "overview.json";

/// Final scores of a run
///
/// Losses and last-epoch scores are `None` when no epoch ran or the value is
/// not finite, so the file always reads back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Test macro F1
    pub test_macro: f32,
    /// Test micro F1
    pub test_micro: f32,
    /// Test loss
    pub test_loss: Option<f32>,
    /// Test accuracy
    pub test_acc: f32,
    /// Last epoch train loss
    pub train_loss: Option<f32>,
    /// Last epoch train accuracy
    pub train_acc: Option<f32>,
    /// Last epoch validation loss
    pub valid_loss: Option<f32>,
    /// Last epoch validation accuracy
    pub valid_acc: Option<f32>,
}

fn finite(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}

/// Optimizer settings recorded with a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    /// Configured maximum
    pub epochs: usize,
    /// Epochs actually run
    pub epochs_run: usize,
    /// Batch size
    pub batch_size: usize,
    /// Patience
    pub patience: usize,
    /// Learning rate
    pub learning_rate: f64,
}

/// Feature settings recorded with a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentationSummary {
    /// Feature kind
    pub name: String,
    /// N mfcc
    pub n_mfcc: usize,
    /// N fft
    pub n_fft: usize,
    /// Hop length
    pub hop_length: usize,
}

/// `overview.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    /// Dataset name
    pub dataset_dir: String,
    /// Number of classes
    pub classes: usize,
    /// Segment length in seconds
    pub segment_length: u32,
    /// Sample rate
    pub sample_rate: u32,
    /// Augmented copies per train segment
    pub augment_size: usize,
    /// Segment overlap fraction
    pub overlap_size: f32,
    /// `[N, n_mfcc, frames]` of each split
    pub train_shape: [usize; 3],
    /// Validation split shape
    pub valid_shape: [usize; 3],
    /// Test split shape
    pub test_shape: [usize; 3],
    /// Seconds spent in training epochs
    pub train_time: f64,
    /// Final scores
    pub scores: Scores,
    /// Optimizer settings
    pub training_params: TrainingParams,
    /// Feature settings
    pub representation: RepresentationSummary,
}

impl Overview {
    /// Summarize a finished run
    pub fn new(
        config: &PipelineConfig,
        classes: usize,
        shapes: [[usize; 3]; 3],
        history: &History,
        evaluation: &Evaluation,
    ) -> Self {
        let last = history.last();
        let [train_shape, valid_shape, test_shape] = shapes;
        Self {
            dataset_dir: config.paths.dataset.clone(),
            classes,
            segment_length: config.segmentation.segment_length,
            sample_rate: config.annotation.sample_rate,
            augment_size: config.segmentation.augment_size,
            overlap_size: config.segmentation.overlap,
            train_shape,
            valid_shape,
            test_shape,
            train_time: history.train_time(),
            scores: Scores {
                test_macro: evaluation.f1_macro,
                test_micro: evaluation.f1_micro,
                test_loss: finite(evaluation.loss),
                test_acc: evaluation.accuracy,
                train_loss: last.and_then(|e| finite(e.loss)),
                train_acc: last.and_then(|e| finite(e.accuracy)),
                valid_loss: last.and_then(|e| finite(e.val_loss)),
                valid_acc: last.and_then(|e| finite(e.val_accuracy)),
            },
            training_params: TrainingParams {
                epochs: config.training.epochs,
                epochs_run: history.epochs.len(),
                batch_size: config.training.batch_size,
                patience: config.training.patience,
                learning_rate: config.training.learning_rate,
            },
            representation: RepresentationSummary {
                name: "MFCC".to_string(),
                n_mfcc: config.representation.n_mfcc,
                n_fft: config.representation.n_fft,
                hop_length: config.representation.hop_length,
            },
        }
    }
}

/// `<family_dir>/<unix_ts>_<test accuracy in percent>`
pub fn run_dir_name(family_dir: &Path, timestamp: u64, test_accuracy: f32) -> PathBuf {
    family_dir.join(format!("{}_{:.2}", timestamp, test_accuracy * 100.0))
}

/// Everything a run directory is written from
pub struct RunArtifacts<'a> {
    /// Architecture
    pub architecture: &'a ModelArchitecture,
    /// Trained weights
    pub varmap: &'a VarMap,
    /// Scaler
    pub scaler: &'a StandardScaler,
    /// History
    pub history: &'a History,
    /// Test split scores
    pub evaluation: &'a Evaluation,
    /// Overview
    pub overview: &'a Overview,
    /// Label values of the train, valid and test rows
    pub split_labels: [&'a [i64]; 3],
}

impl RunArtifacts<'_> {
    /// Write every artifact into `run_dir`
    pub fn save(&self, run_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(run_dir)
            .with_context(|| format!("Failed to create run directory {:?}", run_dir))?;

        self.varmap
            .save(run_dir.join(WEIGHTS_FILE))
            .with_context(|| format!("Failed to write weights into {:?}", run_dir))?;
        self.architecture.save(run_dir.join(ARCHITECTURE_FILE))?;
        self.scaler.save(run_dir.join(SCALER_FILE))?;

        write_json(&run_dir.join(HISTORY_FILE), self.history)?;
        std::fs::write(
            run_dir.join("history.svg"),
            plots::history_svg(
                &self.history.series(|e| e.loss),
                &self.history.series(|e| e.val_loss),
                &self.history.series(|e| e.accuracy),
                &self.history.series(|e| e.val_accuracy),
            ),
        )
        .with_context(|| format!("Failed to write history plot into {:?}", run_dir))?;

        plots::save_confusion_matrix(
            run_dir.join("confusion_matrix.svg"),
            &self.evaluation.confusion,
            &self.architecture.classes,
        )?;

        for (name, labels) in ["train", "valid", "test"].iter().zip(self.split_labels) {
            plots::save_class_distribution(
                run_dir.join(format!("{}_distribution.svg", name)),
                &label_counts(labels),
                &format!("{} class distribution", name),
            )?;
        }

        write_json(&run_dir.join(OVERVIEW_FILE), self.overview)?;
        info!("Saved run artifacts to {:?}", run_dir);
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))
}

/// Read the `overview.json` of a run
pub fn load_overview<P: AsRef<Path>>(run_dir: P) -> Result<Overview> {
    let path = run_dir.as_ref().join(OVERVIEW_FILE);
    let json =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&json).with_context(|| format!("Malformed overview {:?}", path))
}
