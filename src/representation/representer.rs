//! Segment directory to representation bundle

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use super::bundle::{RepresentationBundle, REPRESENTATION_FILE};
use crate::audio::{AudioLoader, Mfcc};
use crate::config::RepresentationConfig;
use crate::dataset::{read_table, LabelRow, LABELS_FILE};
use crate::utils::{progress_bar, timed};

/// MFCC representer for segments at one sample rate
pub struct Representer {
    mfcc: Mfcc,
}

impl Representer {
    /// Create a representer for segments sampled at `sample_rate`
    pub fn new(params: &RepresentationConfig, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            mfcc: Mfcc::new(params, sample_rate)?,
        })
    }

    /// MFCC matrix of one segment, row-major `(n_mfcc, frames)`
    pub fn represent_samples(&self, samples: &[f32]) -> Result<(Vec<f32>, usize)> {
        self.mfcc.compute_flat(samples)
    }

    /// Represent every segment listed in `<segment_dir>/labels.csv`
    ///
    /// Fails when segments differ in sample rate or matrix shape.
    pub fn represent(&self, segment_dir: &Path) -> Result<RepresentationBundle> {
        let rows: Vec<LabelRow> = read_table(segment_dir.join(LABELS_FILE))?;
        if rows.is_empty() {
            anyhow::bail!("No segments listed in {:?}", segment_dir);
        }

        let mut features = Vec::new();
        let mut labels = Vec::with_capacity(rows.len());
        let mut frames: Option<usize> = None;

        let pb = progress_bar(rows.len() as u64, "represent");
        for row in &rows {
            let path = segment_dir.join(&row.filename);
            let audio = AudioLoader::decode(&path)
                .with_context(|| format!("Failed to load segment {:?}", path))?;
            if audio.sample_rate != self.mfcc.sample_rate {
                anyhow::bail!(
                    "{:?} is sampled at {} Hz, expected {} Hz",
                    path,
                    audio.sample_rate,
                    self.mfcc.sample_rate
                );
            }

            let (matrix, n_frames) = self.represent_samples(&audio.samples)?;
            match frames {
                None => frames = Some(n_frames),
                Some(expected) if expected != n_frames => anyhow::bail!(
                    "{:?} has {} frames, previous segments have {}",
                    path,
                    n_frames,
                    expected
                ),
                Some(_) => {}
            }

            features.extend(matrix);
            labels.push(row.label);
            pb.inc(1);
        }
        pb.finish_and_clear();

        let shape = [rows.len(), self.mfcc.n_mfcc, frames.unwrap_or(0)];
        RepresentationBundle::new(features, shape, labels)
    }
}

/// Represent `segment_dir` into `<output_dir>/representation.safetensors`
///
/// Skipped (returns `None`) when `output_dir` exists.
pub fn represent_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    segment_dir: P,
    output_dir: Q,
    params: &RepresentationConfig,
    sample_rate: u32,
) -> Result<Option<[usize; 3]>> {
    let segment_dir = segment_dir.as_ref();
    let output_dir = output_dir.as_ref();
    if output_dir.exists() {
        info!("{:?} exists, skipping representation", output_dir);
        return Ok(None);
    }

    timed("represent_dataset", || {
        let bundle = Representer::new(params, sample_rate)?.represent(segment_dir)?;

        let partial = output_dir.with_extension("partial");
        std::fs::create_dir_all(&partial)
            .with_context(|| format!("Failed to create {:?}", partial))?;
        bundle.save(partial.join(REPRESENTATION_FILE))?;
        std::fs::rename(&partial, output_dir)
            .with_context(|| format!("Failed to move {:?} to {:?}", partial, output_dir))?;

        info!(
            "Represented {} segments of {:?} as {:?}",
            bundle.len(),
            segment_dir,
            bundle.shape
        );
        Ok(Some(bundle.shape))
    })
}
