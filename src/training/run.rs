//! End-to-end training of one configuration

use anyhow::Result;
use candle_core::Device;
use std::path::PathBuf;
use tracing::info;

use super::metrics::Evaluation;
use super::report::{run_dir_name, Overview, RunArtifacts};
use super::trainer::{evaluate, History, LabelEncoder, SplitData, Trainer};
use crate::config::PipelineConfig;
use crate::dataset::Split;
use crate::models::{ModelArchitecture, Perceptron, StandardScaler};
use crate::representation::{load_representation, RepresentationBundle};
use crate::utils::{timed, unix_timestamp};

/// Result of [`train_model`]
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    /// Directory the run was saved to
    pub run_dir: PathBuf,
    /// Per-epoch scores
    pub history: History,
    /// Test split scores
    pub evaluation: Evaluation,
}

/// Train, evaluate and persist a classifier on the configured representations
pub fn train_model(config: &PipelineConfig, device: &Device) -> Result<TrainingOutcome> {
    let load = |split: Split| -> Result<RepresentationBundle> {
        let bundle = load_representation(config.representation_dir(split))?;
        info!("{} representation: {:?}", split, bundle.shape);
        Ok(bundle)
    };
    let train_bundle = load(Split::Train)?;
    let valid_bundle = load(Split::Valid)?;
    let test_bundle = load(Split::Test)?;

    if train_bundle.is_empty() {
        anyhow::bail!("Training representation is empty");
    }
    let input_shape = train_bundle.matrix_shape();
    for (split, bundle) in [(Split::Valid, &valid_bundle), (Split::Test, &test_bundle)] {
        if bundle.matrix_shape() != input_shape {
            anyhow::bail!(
                "{} matrices are {:?}, train matrices are {:?}",
                split,
                bundle.matrix_shape(),
                input_shape
            );
        }
    }

    let encoder = LabelEncoder::fit(&train_bundle.labels);
    // Columns are the last dimension, so rows are single coefficient tracks
    let scaler = StandardScaler::fit(&train_bundle.features, input_shape.1)?;

    let train = SplitData::new(&train_bundle, &encoder, &scaler, device)?;
    let valid = SplitData::new(&valid_bundle, &encoder, &scaler, device)?;
    let test = SplitData::new(&test_bundle, &encoder, &scaler, device)?;

    let architecture = ModelArchitecture {
        input_shape: [input_shape.0, input_shape.1],
        model: config.model,
        classes: encoder.classes().to_vec(),
        sample_rate: config.annotation.sample_rate,
        segment_length: config.segmentation.segment_length,
        representation: config.representation,
    };
    let (varmap, model) = Perceptron::initialize(&architecture, config.training.seed, device)?;
    info!(
        "Model {}: {} classes, {} inputs, {} parameters",
        config.model.dir_name(),
        architecture.num_classes(),
        architecture.input_dim(),
        architecture.num_parameters()
    );

    let trainer = Trainer::new(config.training);
    let history = timed("train_model", || trainer.fit(&model, &varmap, &train, &valid))?;

    let (test_loss, predictions) = evaluate(&model, &test, config.training.batch_size)?;
    let evaluation = Evaluation::new(test_loss, &test.classes, &predictions, encoder.len());
    info!(
        "Test - loss: {:.4} - accuracy: {:.4} - f1 micro: {:.4} - f1 macro: {:.4}",
        evaluation.loss, evaluation.accuracy, evaluation.f1_micro, evaluation.f1_macro
    );

    let overview = Overview::new(
        config,
        encoder.len(),
        [train_bundle.shape, valid_bundle.shape, test_bundle.shape],
        &history,
        &evaluation,
    );
    let run_dir = run_dir_name(
        &config.model_family_dir(),
        unix_timestamp(),
        evaluation.accuracy,
    );

    RunArtifacts {
        architecture: &architecture,
        varmap: &varmap,
        scaler: &scaler,
        history: &history,
        evaluation: &evaluation,
        overview: &overview,
        split_labels: [
            train_bundle.labels.as_slice(),
            valid_bundle.labels.as_slice(),
            test_bundle.labels.as_slice(),
        ],
    }
    .save(&run_dir)?;

    Ok(TrainingOutcome {
        run_dir,
        history,
        evaluation,
    })
}
