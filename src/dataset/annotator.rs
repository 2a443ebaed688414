//! Annotation of raw audio
//!
//! Walks a raw dataset, decodes every file to mono at the target rate,
//! reads its tags and writes `audio/<name>.wav` plus `metadata.csv`.
//! Files are independent, so they are processed on the rayon pool; a failing
//! file is logged and left out of the table.
//!
//! [`annotate_dataset`] writes into `<dataset>.partial` and renames it into
//! place once `metadata.csv` is written, so an interrupted run is redone.

use anyhow::{Context, Result};
use indicatif::ParallelProgressIterator;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::tables::{write_table, MetadataRow};
use super::tags::{read_tags, TrackTags};
use super::{AUDIO_DIR, METADATA_FILE};
use crate::audio::{is_audio_file, AudioLoader, AudioOutput};
use crate::config::AnnotationConfig;
use crate::utils::{progress_bar, timed};

/// Outcome of an annotation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationSummary {
    /// Audio files selected for annotation
    pub discovered: usize,
    /// Rows written to `metadata.csv`
    pub annotated: usize,
    /// Files skipped for missing tags or errors
    pub skipped: usize,
}

/// Raw audio annotator
pub struct Annotator {
    sample_rate: u32,
    extract: Option<usize>,
    require_tags: bool,
}

impl Annotator {
    /// Create an annotator from its configuration
    pub fn new(config: &AnnotationConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            extract: config.extract,
            require_tags: config.require_tags,
        }
    }

    /// Audio files under `raw_dir`, sorted by path and truncated to `extract`
    ///
    /// The position of a file in this list is its label.
    pub fn discover<P: AsRef<Path>>(&self, raw_dir: P) -> Result<Vec<PathBuf>> {
        let raw_dir = raw_dir.as_ref();
        if !raw_dir.is_dir() {
            anyhow::bail!("Raw dataset directory not found: {:?}", raw_dir);
        }

        let mut files: Vec<PathBuf> = WalkDir::new(raw_dir)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        files.sort();

        if let Some(limit) = self.extract {
            files.truncate(limit);
        }
        Ok(files)
    }

    /// Annotate every discovered file into `output_dir`
    pub fn annotate<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        raw_dir: P,
        output_dir: Q,
    ) -> Result<AnnotationSummary> {
        let output_dir = output_dir.as_ref();
        let files = self.discover(raw_dir)?;
        let names = output_names(&files);

        let audio_dir = output_dir.join(AUDIO_DIR);
        std::fs::create_dir_all(&audio_dir)
            .with_context(|| format!("Failed to create {:?}", audio_dir))?;

        info!(
            "Annotating {} files at {} Hz into {:?}",
            files.len(),
            self.sample_rate,
            output_dir
        );

        let pb = progress_bar(files.len() as u64, "annotate");
        let rows: Vec<Option<MetadataRow>> = files
            .par_iter()
            .zip(names.par_iter())
            .enumerate()
            .progress_with(pb.clone())
            .map(|(label, (path, name))| {
                match self.annotate_one(label as i64, path, &audio_dir.join(name)) {
                    Ok(row) => row,
                    Err(e) => {
                        warn!("{} - {:?}: {:#}", label, path, e);
                        None
                    }
                }
            })
            .collect();
        pb.finish_and_clear();

        let rows: Vec<MetadataRow> = rows.into_iter().flatten().collect();
        write_table(output_dir.join(METADATA_FILE), &rows)?;

        let summary = AnnotationSummary {
            discovered: files.len(),
            annotated: rows.len(),
            skipped: files.len() - rows.len(),
        };
        info!(
            "Annotated {} of {} files ({} skipped)",
            summary.annotated, summary.discovered, summary.skipped
        );
        Ok(summary)
    }

    /// Annotate one file; `Ok(None)` when its tags are required but absent
    fn annotate_one(&self, label: i64, path: &Path, output: &Path) -> Result<Option<MetadataRow>> {
        let tags = match read_tags(path) {
            Ok(Some(tags)) => tags,
            Ok(None) if self.require_tags => {
                info!("{:?} has no tag metadata, skipping", path);
                return Ok(None);
            }
            Ok(None) => TrackTags::unknown(),
            Err(e) if self.require_tags => {
                return Err(e).with_context(|| format!("Failed to read tags of {:?}", path))
            }
            Err(_) => TrackTags::unknown(),
        };

        let (samples, sample_rate) = AudioLoader::load(path, self.sample_rate)?;
        AudioOutput::save(&samples, sample_rate, output)?;

        if !output.exists() {
            anyhow::bail!("File not created: {:?}", output);
        }

        let filename = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Some(MetadataRow {
            label,
            sample_rate,
            length: (samples.len() as u64 * 1000) / sample_rate as u64,
            artists: tags.artist,
            album: tags.album,
            title: tags.title,
            genre: tags.genre,
            filename,
        }))
    }
}

/// `<stem>.wav` per file; repeated stems get the file's label appended
fn output_names(files: &[PathBuf]) -> Vec<String> {
    let stem = |p: &PathBuf| {
        p.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string())
    };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for file in files {
        *counts.entry(stem(file)).or_default() += 1;
    }

    files
        .iter()
        .enumerate()
        .map(|(i, file)| {
            let stem = stem(file);
            if counts[&stem] > 1 {
                format!("{}_{}.wav", stem, i)
            } else {
                format!("{}.wav", stem)
            }
        })
        .collect()
}

/// Sibling of `output_dir` that receives an annotation in progress
fn partial_dir(output_dir: &Path) -> Result<PathBuf> {
    let name = output_dir
        .file_name()
        .with_context(|| format!("Annotation directory has no name: {:?}", output_dir))?;
    Ok(output_dir.with_file_name(format!("{}.partial", name.to_string_lossy())))
}

/// Annotate `raw_dir` into `output_dir` unless `output_dir` already exists
///
/// Returns `None` when the stage was skipped.
pub fn annotate_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    raw_dir: P,
    output_dir: Q,
    config: &AnnotationConfig,
) -> Result<Option<AnnotationSummary>> {
    let output_dir = output_dir.as_ref();
    if output_dir.exists() {
        info!("{:?} exists, skipping annotation", output_dir);
        return Ok(None);
    }

    let partial = partial_dir(output_dir)?;
    if partial.exists() {
        warn!("Discarding interrupted annotation {:?}", partial);
        std::fs::remove_dir_all(&partial)
            .with_context(|| format!("Failed to clear {:?}", partial))?;
    }

    let summary = timed("annotate_dataset", || {
        Annotator::new(config).annotate(raw_dir, &partial)
    })?;

    std::fs::rename(&partial, output_dir)
        .with_context(|| format!("Failed to move {:?} to {:?}", partial, output_dir))?;
    Ok(Some(summary))
}
