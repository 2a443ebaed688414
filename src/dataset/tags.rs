//! Tag metadata via lofty (ID3v2/ID3v1, Vorbis comments, MP4, RIFF INFO)

use anyhow::Result;
use lofty::file::TaggedFileExt;
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::path::Path;
use tracing::debug;

/// Genre recorded when a tag carries none
pub const UNKNOWN_GENRE: &str = "unknown";

/// Descriptive fields of a recording
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackTags {
    /// Artist
    pub artist: String,
    /// Album
    pub album: String,
    /// Title
    pub title: String,
    /// Genre
    pub genre: String,
}

impl TrackTags {
    /// Tags for an untagged file
    pub fn unknown() -> Self {
        Self {
            genre: UNKNOWN_GENRE.to_string(),
            ..Default::default()
        }
    }
}

/// Read the primary tag of `path`
///
/// Returns `Ok(None)` when the file parses but carries no tag.
pub fn read_tags<P: AsRef<Path>>(path: P) -> Result<Option<TrackTags>> {
    let path = path.as_ref();
    let tagged_file = Probe::open(path)?.read()?;

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        debug!(file = ?path, "No tags found in audio file");
        return Ok(None);
    };

    let text = |value: Option<std::borrow::Cow<'_, str>>| value.map(|v| v.to_string()).unwrap_or_default();

    Ok(Some(TrackTags {
        artist: text(tag.artist()),
        album: text(tag.album()),
        title: text(tag.title()),
        genre: tag
            .genre()
            .map(|g| g.to_string())
            .filter(|g| !g.is_empty())
            .unwrap_or_else(|| UNKNOWN_GENRE.to_string()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_defaults() {
        let tags = TrackTags::unknown();
        assert_eq!(tags.genre, "unknown");
        assert!(tags.artist.is_empty());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(read_tags("missing/file.mp3").is_err());
    }
}
