//! Audio file loading

use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::Resampler;

/// Mono samples at their native sample rate
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Native sample rate in Hz
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in seconds
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Audio loader that supports various formats
pub struct AudioLoader;

impl AudioLoader {
    /// Load audio from a file and return mono samples at the specified sample rate
    pub fn load<P: AsRef<Path>>(path: P, target_sr: u32) -> Result<(Vec<f32>, u32)> {
        let decoded = Self::decode(path)?;
        if decoded.sample_rate == target_sr {
            return Ok((decoded.samples, target_sr));
        }
        let resampled = Resampler::resample(&decoded.samples, decoded.sample_rate, target_sr)?;
        Ok((resampled, target_sr))
    }

    /// Decode a file to mono without resampling
    pub fn decode<P: AsRef<Path>>(path: P) -> Result<DecodedAudio> {
        let path = path.as_ref();

        // hound is exact for the WAV files this crate writes itself
        if path
            .extension()
            .map_or(false, |e| e.eq_ignore_ascii_case("wav"))
        {
            if let Ok(decoded) = Self::decode_wav(path) {
                return Ok(decoded);
            }
            debug!(file = ?path, "hound could not read WAV, falling back to symphonia");
        }

        Self::decode_any(path)
    }

    fn decode_wav(path: &Path) -> Result<DecodedAudio> {
        let reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file: {:?}", path))?;

        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max_value))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        Ok(DecodedAudio {
            samples: downmix(&samples, spec.channels as usize),
            sample_rate: spec.sample_rate,
        })
    }

    fn decode_any(path: &Path) -> Result<DecodedAudio> {
        let file = File::open(path).with_context(|| format!("Failed to open audio file: {:?}", path))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("Unsupported audio format: {:?}", path))?;

        let mut format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .with_context(|| format!("No supported audio track in {:?}", path))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .with_context(|| format!("Missing sample rate in {:?}", path))?;
        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                // End of stream
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => bail!("Error reading {:?}: {}", path, e),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let channels = decoded.spec().channels.count();
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                    buf.copy_interleaved_ref(decoded);
                    samples.extend(downmix(buf.samples(), channels));
                }
                // A corrupt frame is skipped, the rest of the stream is still usable
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!(file = ?path, "Skipping undecodable packet: {}", e);
                }
                Err(e) => bail!("Error decoding {:?}: {}", path, e),
            }
        }

        if samples.is_empty() {
            bail!("No audio decoded from {:?}", path);
        }
        Ok(DecodedAudio {
            samples,
            sample_rate,
        })
    }
}

/// Average interleaved channels into one
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
