//! Segmentation of annotated recordings
//!
//! Cuts each recording into fixed-length clips, keeps the clips the split
//! plan assigns to the requested split and runs the split's transform
//! chains over them:
//! - copy 0: `base` chain, written as `<stem>_<idx>.wav`
//! - copy k: `base` then `extra`, written as `<stem>_<idx>_aug<k>.wav`
//!
//! Output goes to `<split>.partial` and is renamed into place once
//! `labels.csv` is written, so an interrupted run never looks finished.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::splits::{segment_starts, SplitPlan};
use super::tables::{read_table, write_table, LabelRow, MetadataRow};
use super::{Split, AUDIO_DIR, LABELS_FILE, METADATA_FILE, SPLITS_FILE};
use crate::audio::{AudioLoader, AudioOutput, Compose, TransformConfig};
use crate::config::{SegmentationConfig, SplitRatios};
use crate::plots::save_class_distribution;
use crate::utils::{label_counts, progress_bar, timed};

/// What one segmentation run writes
#[derive(Debug, Clone)]
pub struct SegmentPolicy {
    /// Split being written
    pub split: Split,
    /// Chain applied to every kept segment
    pub base: Vec<TransformConfig>,
    /// Chain applied on top of `base` to augmented copies
    pub extra: Vec<TransformConfig>,
    /// Augmented copies per kept segment
    pub augment_size: usize,
}

impl SegmentPolicy {
    /// Policy of `split` as configured
    pub fn from_config(config: &SegmentationConfig, split: Split) -> Self {
        let transforms = config.transforms(split);
        Self {
            split,
            base: transforms.base.clone(),
            extra: transforms.extra.clone(),
            augment_size: config.augment_size_for(split),
        }
    }
}

/// Fixed-length segmenter
pub struct Segmenter {
    segment_length: u32,
    overlap: f32,
    ratios: SplitRatios,
    seed: u64,
}

impl Segmenter {
    /// Create a segmenter from its configuration
    pub fn new(config: &SegmentationConfig) -> Self {
        Self {
            segment_length: config.segment_length,
            overlap: config.overlap,
            ratios: config.ratios,
            seed: config.seed,
        }
    }

    /// Samples per segment at `sample_rate`
    pub fn segment_samples(&self, sample_rate: u32) -> usize {
        self.segment_length as usize * sample_rate as usize
    }

    /// Samples between the starts of consecutive segments
    pub fn hop_samples(&self, sample_rate: u32) -> usize {
        let segment = self.segment_samples(sample_rate) as f32;
        ((segment * (1.0 - self.overlap)).round() as usize).max(1)
    }

    /// Read `metadata.csv` and the split plan of `base_dir`
    ///
    /// The plan is built from the recordings' segment counts the first time
    /// and read back afterwards.
    pub fn plan(&self, annotated_dir: &Path, base_dir: &Path) -> Result<(Vec<MetadataRow>, SplitPlan)> {
        let rows: Vec<MetadataRow> = read_table(annotated_dir.join(METADATA_FILE))?;

        let mut recordings = Vec::with_capacity(rows.len());
        for row in &rows {
            let path = annotated_dir.join(AUDIO_DIR).join(&row.filename);
            let reader = hound::WavReader::open(&path)
                .with_context(|| format!("Failed to open annotated audio {:?}", path))?;
            let total = reader.duration() as usize;
            let count = segment_starts(
                total,
                self.segment_samples(row.sample_rate),
                self.hop_samples(row.sample_rate),
            )
            .len();
            recordings.push((row.filename.clone(), count));
        }

        let plan = SplitPlan::load_or_build(
            base_dir.join(SPLITS_FILE),
            &recordings,
            self.ratios,
            self.seed,
        )?;
        Ok((rows, plan))
    }

    /// Write the segments of `policy.split` to `<base_dir>/<split>`
    pub fn segment(
        &self,
        annotated_dir: &Path,
        base_dir: &Path,
        policy: &SegmentPolicy,
    ) -> Result<Vec<LabelRow>> {
        let (recordings, plan) = self.plan(annotated_dir, base_dir)?;

        let output = base_dir.join(policy.split.as_str());
        let partial = base_dir.join(format!("{}.partial", policy.split));
        if partial.exists() {
            std::fs::remove_dir_all(&partial)
                .with_context(|| format!("Failed to clear {:?}", partial))?;
        }
        std::fs::create_dir_all(&partial)
            .with_context(|| format!("Failed to create {:?}", partial))?;

        let base = Compose::from_configs(&policy.base)?;
        let augmented = Compose::from_configs(
            &policy
                .base
                .iter()
                .chain(policy.extra.iter())
                .cloned()
                .collect::<Vec<_>>(),
        )?;
        debug!(
            "{} chains: base {:?}, augmented {:?}",
            policy.split,
            base.names(),
            augmented.names()
        );

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(split_salt(policy.split)));
        let mut labels = Vec::new();

        let pb = progress_bar(recordings.len() as u64, policy.split.as_str());
        for recording in &recordings {
            let path = annotated_dir.join(AUDIO_DIR).join(&recording.filename);
            let audio = AudioLoader::decode(&path)?;
            let segment_len = self.segment_samples(audio.sample_rate);
            let hop = self.hop_samples(audio.sample_rate);
            let stem = file_stem(&recording.filename);

            for (idx, start) in segment_starts(audio.samples.len(), segment_len, hop)
                .into_iter()
                .enumerate()
            {
                if plan.split_of(&recording.filename, idx) != Some(policy.split) {
                    continue;
                }
                let clip = &audio.samples[start..start + segment_len];

                for copy in 0..=policy.augment_size {
                    let mut samples = clip.to_vec();
                    let filename = if copy == 0 {
                        base.apply(&mut samples, audio.sample_rate, &mut rng)?;
                        format!("{}_{:04}.wav", stem, idx)
                    } else {
                        augmented.apply(&mut samples, audio.sample_rate, &mut rng)?;
                        format!("{}_{:04}_aug{}.wav", stem, idx, copy)
                    };

                    AudioOutput::save(&samples, audio.sample_rate, partial.join(&filename))?;
                    labels.push(LabelRow {
                        label: recording.label,
                        filename,
                        source: recording.filename.clone(),
                        segment: idx,
                        augmentation: copy,
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        write_table(partial.join(LABELS_FILE), &labels)?;

        let counts = label_counts(&labels.iter().map(|l| l.label).collect::<Vec<_>>());
        save_class_distribution(
            partial.join("distribution.svg"),
            &counts,
            &format!("{} segments per class", policy.split),
        )?;

        std::fs::rename(&partial, &output)
            .with_context(|| format!("Failed to move {:?} to {:?}", partial, output))?;

        info!(
            "Wrote {} {} segments from {} recordings into {:?}",
            labels.len(),
            policy.split,
            recordings.len(),
            output
        );
        Ok(labels)
    }
}

fn split_salt(split: Split) -> u64 {
    match split {
        Split::Train => 1,
        Split::Valid => 2,
        Split::Test => 3,
    }
}

fn file_stem(filename: &str) -> String {
    PathBuf::from(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

/// Segment one split unless `<base_dir>/<split>` already exists
///
/// Returns the number of written segments, or `None` when skipped.
pub fn segment_dataset<P: AsRef<Path>, Q: AsRef<Path>>(
    annotated_dir: P,
    base_dir: Q,
    config: &SegmentationConfig,
    split: Split,
) -> Result<Option<usize>> {
    let base_dir = base_dir.as_ref();
    let output = base_dir.join(split.as_str());
    if output.exists() {
        info!("{:?} exists, skipping {} segmentation", output, split);
        return Ok(None);
    }

    let policy = SegmentPolicy::from_config(config, split);
    timed(&format!("segment_dataset({})", split), || {
        Segmenter::new(config).segment(annotated_dir.as_ref(), base_dir, &policy)
    })
    .map(|labels| Some(labels.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 1000;

    fn tone(seconds: f32, freq: f32) -> Vec<f32> {
        (0..(seconds * SR as f32) as usize)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    /// Annotated dataset with a 10.5 s and a 3 s recording
    fn annotated_fixture(dir: &Path) {
        let audio = dir.join(AUDIO_DIR);
        std::fs::create_dir_all(&audio).unwrap();

        let mut rows = Vec::new();
        for (label, (name, seconds)) in [("long.wav", 10.5f32), ("short.wav", 3.0)].iter().enumerate() {
            AudioOutput::save(&tone(*seconds, 50.0 + label as f32 * 30.0), SR, audio.join(name)).unwrap();
            rows.push(MetadataRow {
                label: label as i64,
                sample_rate: SR,
                length: (*seconds * 1000.0) as u64,
                artists: String::new(),
                album: String::new(),
                title: String::new(),
                genre: "unknown".to_string(),
                filename: name.to_string(),
            });
        }
        write_table(dir.join(METADATA_FILE), &rows).unwrap();
    }

    fn config(augment_size: usize) -> SegmentationConfig {
        SegmentationConfig {
            segment_length: 1,
            augment_size,
            ..Default::default()
        }
    }

    #[test]
    fn test_hop_from_overlap() {
        let mut cfg = config(0);
        assert_eq!(Segmenter::new(&cfg).hop_samples(SR), 1000);
        cfg.overlap = 0.25;
        assert_eq!(Segmenter::new(&cfg).hop_samples(SR), 750);
        cfg.overlap = 0.999_99;
        assert_eq!(Segmenter::new(&cfg).hop_samples(SR), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let cfg = config(3);
        let train = SegmentPolicy::from_config(&cfg, Split::Train);
        assert_eq!(train.augment_size, 3);
        assert_eq!(train.base, vec![TransformConfig::normalize()]);
        assert!(!train.extra.is_empty());

        let test = SegmentPolicy::from_config(&cfg, Split::Test);
        assert_eq!(test.augment_size, 0);
        assert!(test.extra.is_empty());
    }

    #[test]
    fn test_splits_partition_every_segment() {
        let dir = tempfile::tempdir().unwrap();
        let annotated = dir.path().join("annotated");
        let base = annotated.join("SEG_1_OVERLAP_0_AUG_2");
        annotated_fixture(&annotated);

        let cfg = config(2);
        let mut seen = std::collections::HashSet::new();
        let mut totals = Vec::new();
        for split in Split::ALL {
            let written = segment_dataset(&annotated, &base, &cfg, split).unwrap().unwrap();
            let rows: Vec<LabelRow> = read_table(base.join(split.as_str()).join(LABELS_FILE)).unwrap();
            assert_eq!(rows.len(), written);

            for row in &rows {
                assert!(base.join(split.as_str()).join(&row.filename).exists());
                if row.augmentation == 0 {
                    // No segment may appear in two splits
                    assert!(seen.insert((row.source.clone(), row.segment)));
                }
            }
            totals.push((split, rows.len()));
        }

        // 10 + 3 segments: long gives 6/2/2, short gives 1/1/1
        assert_eq!(seen.len(), 13);
        assert_eq!(totals, vec![(Split::Test, 3), (Split::Valid, 3), (Split::Train, 7 * 3)]);
        assert!(base.join(SPLITS_FILE).exists());
        assert!(!base.join("train.partial").exists());
    }

    #[test]
    fn test_segments_have_fixed_length() {
        let dir = tempfile::tempdir().unwrap();
        let annotated = dir.path().join("annotated");
        let base = annotated.join("seg");
        annotated_fixture(&annotated);

        segment_dataset(&annotated, &base, &config(0), Split::Train).unwrap();
        let rows: Vec<LabelRow> = read_table(base.join("train").join(LABELS_FILE)).unwrap();
        for row in rows {
            let audio = AudioLoader::decode(base.join("train").join(&row.filename)).unwrap();
            assert_eq!(audio.samples.len(), SR as usize);
            assert_eq!(audio.sample_rate, SR);
        }
    }

    #[test]
    fn test_existing_split_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let annotated = dir.path().join("annotated");
        let base = annotated.join("seg");
        annotated_fixture(&annotated);

        std::fs::create_dir_all(base.join("valid")).unwrap();
        assert!(segment_dataset(&annotated, &base, &config(0), Split::Valid).unwrap().is_none());
        assert!(!base.join("valid").join(LABELS_FILE).exists());
    }
}
