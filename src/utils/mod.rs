//! Utility functions and helpers
//!
//! This module provides common utilities used across the crate.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tracing::info;

/// Run `f` and log how long it took
pub fn timed<T, F>(name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    let start = Instant::now();
    let result = f();
    info!(
        "### {} took {:.4} sec",
        name,
        start.elapsed().as_secs_f64()
    );
    result
}

/// Progress bar for a per-file stage
pub fn progress_bar(len: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:10.bold.dim} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_prefix(prefix.to_string());
    pb
}

/// Seconds since the Unix epoch
pub fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Class counts of a label list, sorted by label
pub fn label_counts(labels: &[i64]) -> Vec<(i64, usize)> {
    let mut counts = std::collections::BTreeMap::new();
    for &label in labels {
        *counts.entry(label).or_insert(0usize) += 1;
    }
    counts.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_passes_result_through() {
        let value = timed("answer", || Ok(42)).unwrap();
        assert_eq!(value, 42);
        assert!(timed::<(), _>("fails", || anyhow::bail!("boom")).is_err());
    }

    #[test]
    fn test_label_counts() {
        assert_eq!(label_counts(&[3, 1, 3, 3, 0]), vec![(0, 1), (1, 1), (3, 3)]);
        assert!(label_counts(&[]).is_empty());
    }
}
