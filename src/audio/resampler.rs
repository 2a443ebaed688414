//! Audio resampling using rubato

use anyhow::Result;
use rubato::{
    Resampler as RubatoResampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

/// Input frames fed to rubato per call
const CHUNK_SIZE: usize = 4096;

/// Audio resampler
pub struct Resampler;

impl Resampler {
    /// Resample mono audio from one sample rate to another
    ///
    /// The output is aligned with the input (rubato's filter delay is removed)
    /// and holds `round(len * to_sr / from_sr)` samples.
    pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
        if from_sr == to_sr || samples.is_empty() {
            return Ok(samples.to_vec());
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let ratio = to_sr as f64 / from_sr as f64;
        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)?;

        let delay = resampler.output_delay();
        let expected = (samples.len() as f64 * ratio).round() as usize;
        let mut output = Vec::with_capacity(expected + delay);

        let mut pos = 0;
        while pos + resampler.input_frames_next() <= samples.len() {
            let next = resampler.input_frames_next();
            let chunk = resampler.process(&[&samples[pos..pos + next]], None)?;
            output.extend_from_slice(&chunk[0]);
            pos += next;
        }

        if pos < samples.len() {
            let chunk = resampler.process_partial(Some(&[&samples[pos..]]), None)?;
            output.extend_from_slice(&chunk[0]);
        }

        // Flush the filter tail
        while output.len() < expected + delay {
            let chunk = resampler.process_partial(None::<&[&[f32]]>, None)?;
            if chunk[0].is_empty() {
                break;
            }
            output.extend_from_slice(&chunk[0]);
        }

        output.drain(..delay.min(output.len()));
        output.truncate(expected);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(Resampler::resample(&samples, 24000, 24000).unwrap(), samples);
    }

    #[test]
    fn test_downsample_length() {
        let samples: Vec<f32> = (0..48000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 48000.0).sin())
            .collect();
        let resampled = Resampler::resample(&samples, 48000, 24000).unwrap();
        assert_eq!(resampled.len(), 24000);
    }

    #[test]
    fn test_upsample_preserves_amplitude() {
        let samples: Vec<f32> = (0..22050)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 22050.0).sin())
            .collect();
        let resampled = Resampler::resample(&samples, 22050, 24000).unwrap();
        assert_eq!(resampled.len(), 24000);

        let peak = resampled[1000..23000]
            .iter()
            .fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(peak > 0.9 && peak < 1.1, "peak {}", peak);
    }
}
