//! Audio processing modules
//!
//! - Audio file loading and decoding (WAV via hound, MP3/FLAC/OGG/AAC via symphonia)
//! - Sample rate conversion
//! - MFCC extraction (librosa-compatible defaults)
//! - Augmentation transforms for segment copies
//! - WAV output

mod augment;
mod loader;
mod mfcc;
mod output;
mod resampler;

pub use augment::{
    AddBackgroundNoise, AddGaussianSnr, Compose, FilterKind, Normalize, PassFilter, Transform,
    TransformConfig,
};
pub use loader::{AudioLoader, DecodedAudio};
pub use mfcc::Mfcc;
pub use output::AudioOutput;
pub use resampler::Resampler;

/// File extensions treated as audio when walking a dataset
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "m4a", "aac"];

/// Whether `path` has one of [`AUDIO_EXTENSIONS`]
pub fn is_audio_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
