//! Dataset preparation
//!
//! - Annotation: decode, resample and tag raw audio into `metadata.csv` + `audio/`
//! - Segmentation: fixed-length (optionally overlapping, augmented) clips per split
//! - Split planning: one persisted train/valid/test assignment per segmentation
//! - CSV tables shared by the stages

mod annotator;
mod segmenter;
mod splits;
mod tables;
mod tags;

pub use annotator::{annotate_dataset, AnnotationSummary, Annotator};
pub use segmenter::{segment_dataset, SegmentPolicy, Segmenter};
pub use splits::{segment_starts, SplitPlan};
pub use tables::{read_table, write_table, LabelRow, MetadataRow};
pub use tags::{read_tags, TrackTags};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the annotation table
pub const METADATA_FILE: &str = "metadata.csv";
/// Name of the per-split label table
pub const LABELS_FILE: &str = "labels.csv";
/// Name of the persisted split plan
pub const SPLITS_FILE: &str = "splits.csv";
/// Subdirectory of annotated audio
pub const AUDIO_DIR: &str = "audio";

/// Dataset partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    /// Fits the scaler and the network
    Train,
    /// Drives early stopping
    Valid,
    /// Held out for the final scores
    Test,
}

impl Split {
    /// Every split, in processing order
    pub const ALL: [Split; 3] = [Split::Test, Split::Valid, Split::Train];

    /// Directory/file name of the split
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Valid => "valid",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "valid" | "validation" => Ok(Split::Valid),
            "test" => Ok(Split::Test),
            other => anyhow::bail!("Unknown split: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_names() {
        for split in Split::ALL {
            assert_eq!(split.as_str().parse::<Split>().unwrap(), split);
        }
        assert_eq!("validation".parse::<Split>().unwrap(), Split::Valid);
        assert!("holdout".parse::<Split>().is_err());
    }
}
