//! CSV tables written between stages

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One annotated recording (`metadata.csv`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRow {
    /// Class index of the recording
    pub label: i64,
    /// Sample rate of the annotated file
    pub sample_rate: u32,
    /// Duration in milliseconds
    pub length: u64,
    /// Artist tag
    pub artists: String,
    /// Album tag
    pub album: String,
    /// Title tag
    pub title: String,
    /// Genre tag, `unknown` when absent
    pub genre: String,
    /// File name under `audio/`
    pub filename: String,
}

/// One written segment (`labels.csv`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRow {
    /// Class index of the source recording
    pub label: i64,
    /// Segment file name inside the split directory
    pub filename: String,
    /// Annotated recording the segment was cut from
    pub source: String,
    /// Position of the segment in its recording
    pub segment: usize,
    /// 0 for the base copy, k for the k-th augmented copy
    pub augmentation: usize,
}

/// Read every row of a CSV file with a header
pub fn read_table<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<Vec<T>> {
    let path = path.as_ref();
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("Failed to open {:?}", path))?;
    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .with_context(|| format!("Malformed table {:?}", path))
}

/// Write rows to a CSV file with a header
pub fn write_table<T: Serialize, P: AsRef<Path>>(path: P, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create {:?}", path))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.csv");
        let rows = vec![MetadataRow {
            label: 3,
            sample_rate: 24000,
            length: 1500,
            artists: "Flora Cash".to_string(),
            album: "Nothing Lasts".to_string(),
            title: "18 Dollars, live".to_string(),
            genre: "unknown".to_string(),
            filename: "18 Dollars.wav".to_string(),
        }];
        write_table(&path, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("label,sample_rate,length,artists,album,title,genre,filename\n"));

        let back: Vec<MetadataRow> = read_table(&path).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_missing_table_is_error() {
        assert!(read_table::<LabelRow, _>("nope/labels.csv").is_err());
    }
}
