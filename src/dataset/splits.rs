//! Train/valid/test assignment of segments
//!
//! The plan is drawn once per segmentation and persisted as `splits.csv`.
//! Every later split run reads it back, so a segment can never move between
//! partitions.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use super::tables::{read_table, write_table};
use super::Split;
use crate::config::SplitRatios;

/// Start offsets of every full segment of `segment_len` samples
///
/// Segments advance by `hop` samples; a trailing partial segment is dropped.
pub fn segment_starts(total_len: usize, segment_len: usize, hop: usize) -> Vec<usize> {
    if segment_len == 0 || hop == 0 || total_len < segment_len {
        return Vec::new();
    }
    (0..=total_len - segment_len).step_by(hop).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct SplitRow {
    source: String,
    segment: usize,
    split: Split,
}

/// Persisted segment-to-split assignment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPlan {
    assignments: BTreeMap<(String, usize), Split>,
}

impl SplitPlan {
    /// Draw a plan for `(recording, segment count)` pairs
    ///
    /// Each recording's segments are shuffled and divided by `ratios`, so
    /// every class is represented in every split once it has three or more
    /// segments.
    pub fn build(recordings: &[(String, usize)], ratios: SplitRatios, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut sorted: Vec<&(String, usize)> = recordings.iter().collect();
        sorted.sort();

        let mut assignments = BTreeMap::new();
        for (source, count) in sorted {
            let (_, n_valid, n_test) = allocate(*count, ratios);
            let mut order: Vec<usize> = (0..*count).collect();
            order.shuffle(&mut rng);

            for (rank, segment) in order.into_iter().enumerate() {
                let split = if rank < n_test {
                    Split::Test
                } else if rank < n_test + n_valid {
                    Split::Valid
                } else {
                    Split::Train
                };
                assignments.insert((source.clone(), segment), split);
            }
        }

        Self { assignments }
    }

    /// Reuse the plan at `path`, or build and persist a new one
    pub fn load_or_build<P: AsRef<Path>>(
        path: P,
        recordings: &[(String, usize)],
        ratios: SplitRatios,
        seed: u64,
    ) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let plan = Self::load(path)?;
            for (source, count) in recordings {
                for segment in 0..*count {
                    if plan.split_of(source, segment).is_none() {
                        anyhow::bail!(
                            "Split plan {:?} has no entry for {} segment {}; remove the segmentation directory to rebuild it",
                            path,
                            source,
                            segment
                        );
                    }
                }
            }
            info!("Reusing split plan {:?}", path);
            return Ok(plan);
        }

        let plan = Self::build(recordings, ratios, seed);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        plan.save(path)?;
        info!("Wrote split plan {:?}: {:?}", path, plan.counts());
        Ok(plan)
    }

    /// Read a plan from CSV
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let rows: Vec<SplitRow> = read_table(path)?;
        Ok(Self {
            assignments: rows
                .into_iter()
                .map(|row| ((row.source, row.segment), row.split))
                .collect(),
        })
    }

    /// Write the plan as CSV
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let rows: Vec<SplitRow> = self
            .assignments
            .iter()
            .map(|((source, segment), split)| SplitRow {
                source: source.clone(),
                segment: *segment,
                split: *split,
            })
            .collect();
        write_table(path, &rows)
    }

    /// Split of one segment
    pub fn split_of(&self, source: &str, segment: usize) -> Option<Split> {
        self.assignments
            .get(&(source.to_string(), segment))
            .copied()
    }

    /// Number of segments per split
    pub fn counts(&self) -> BTreeMap<Split, usize> {
        let mut counts = BTreeMap::new();
        for split in self.assignments.values() {
            *counts.entry(*split).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of assigned segments
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Whether the plan is empty
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// `(train, valid, test)` counts for `n` segments
fn allocate(n: usize, ratios: SplitRatios) -> (usize, usize, usize) {
    let mut test = (n as f32 * ratios.test).round() as usize;
    let mut valid = (n as f32 * ratios.valid).round() as usize;

    if n >= 3 {
        if ratios.test > 0.0 {
            test = test.max(1);
        }
        if ratios.valid > 0.0 {
            valid = valid.max(1);
        }
    }

    // Leave at least one train segment when train is wanted
    let keep_train = usize::from(ratios.train > 0.0 && n > 0);
    while test + valid + keep_train > n {
        if valid >= test && valid > 0 {
            valid -= 1;
        } else if test > 0 {
            test -= 1;
        } else {
            break;
        }
    }

    (n - test - valid, valid, test)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recordings() -> Vec<(String, usize)> {
        vec![
            ("b.wav".to_string(), 20),
            ("a.wav".to_string(), 10),
            ("c.wav".to_string(), 2),
        ]
    }

    #[test]
    fn test_segment_starts() {
        assert_eq!(segment_starts(10, 4, 4), vec![0, 4]);
        assert_eq!(segment_starts(10, 4, 2), vec![0, 2, 4, 6]);
        assert_eq!(segment_starts(8, 4, 4), vec![0, 4]);
        assert!(segment_starts(3, 4, 4).is_empty());
    }

    #[test]
    fn test_allocate() {
        let ratios = SplitRatios::default();
        assert_eq!(allocate(20, ratios), (14, 3, 3));
        assert_eq!(allocate(3, ratios), (1, 1, 1));
        assert_eq!(allocate(2, ratios), (2, 0, 0));
        assert_eq!(allocate(1, ratios), (1, 0, 0));
        assert_eq!(allocate(0, ratios), (0, 0, 0));
    }

    #[test]
    fn test_build_is_deterministic_and_complete() {
        let a = SplitPlan::build(&recordings(), SplitRatios::default(), 42);
        let b = SplitPlan::build(&recordings(), SplitRatios::default(), 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let counts = a.counts();
        assert_eq!(counts[&Split::Test], 3 + 2);
        assert_eq!(counts[&Split::Valid], 3 + 2);

        // Input order does not matter
        let mut reversed = recordings();
        reversed.reverse();
        assert_eq!(SplitPlan::build(&reversed, SplitRatios::default(), 42), a);
    }

    #[test]
    fn test_plan_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg").join("splits.csv");

        let first = SplitPlan::load_or_build(&path, &recordings(), SplitRatios::default(), 1).unwrap();
        assert!(path.exists());

        // A different seed must not change an existing plan
        let second = SplitPlan::load_or_build(&path, &recordings(), SplitRatios::default(), 2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plan_rejects_unknown_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("splits.csv");
        SplitPlan::load_or_build(&path, &recordings(), SplitRatios::default(), 1).unwrap();

        let grown = vec![("a.wav".to_string(), 11)];
        assert!(SplitPlan::load_or_build(&path, &grown, SplitRatios::default(), 1).is_err());
    }
}
