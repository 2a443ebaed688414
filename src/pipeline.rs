//! Stage orchestration
//!
//! Each stage reads its input and output locations from a [`PipelineConfig`]
//! and is skipped when its output directory already exists:
//! 1. Annotation: `<raw>/<dataset>` -> `<annotated>/<dataset>`
//! 2. Segmentation per split: -> `<annotated>/<dataset>/SEG_..`
//! 3. Representation per split: -> `<segmentation>/MFCC_<c>/<split>`
//! 4. Training: -> `<models>/..`

use anyhow::Result;
use candle_core::Device;
use tracing::info;

use crate::config::PipelineConfig;
use crate::dataset::{annotate_dataset, segment_dataset, AnnotationSummary, Split};
use crate::representation::represent_dataset;
use crate::training::{train_model, TrainingOutcome};

/// What a pipeline run did; `None` marks a skipped or disabled stage
#[derive(Debug, Default)]
pub struct PipelineReport {
    /// Annotation counts
    pub annotation: Option<AnnotationSummary>,
    /// Segments written per split
    pub segments: Vec<(Split, Option<usize>)>,
    /// Bundle shape written per split
    pub representations: Vec<(Split, Option<[usize; 3]>)>,
    /// Saved run and its test evaluation
    pub training: Option<TrainingOutcome>,
}

/// Annotate the configured raw dataset
pub fn annotate(config: &PipelineConfig) -> Result<Option<AnnotationSummary>> {
    annotate_dataset(config.raw_dir(), config.annotated_dir(), &config.annotation)
}

/// Segment one split of the annotated dataset
pub fn segment(config: &PipelineConfig, split: Split) -> Result<Option<usize>> {
    segment_dataset(
        config.annotated_dir(),
        config.segmentation_dir(),
        &config.segmentation,
        split,
    )
}

/// Represent one segmented split
pub fn represent(config: &PipelineConfig, split: Split) -> Result<Option<[usize; 3]>> {
    represent_dataset(
        config.segment_dir(split),
        config.representation_dir(split),
        &config.representation,
        config.annotation.sample_rate,
    )
}

/// Run every enabled stage in order
pub fn run_pipeline(config: &PipelineConfig, device: &Device) -> Result<PipelineReport> {
    config.validate()?;
    let stages = &config.stages;
    let mut report = PipelineReport::default();

    if stages.annotate {
        report.annotation = annotate(config)?;
    }

    for split in Split::ALL {
        if stages.segment(split) {
            report.segments.push((split, segment(config, split)?));
        }
    }

    for split in Split::ALL {
        if stages.represent(split) {
            report.representations.push((split, represent(config, split)?));
        }
    }

    if stages.train {
        let outcome = train_model(config, device)?;
        info!("Run saved to {:?}", outcome.run_dir);
        report.training = Some(outcome);
    }

    Ok(report)
}
