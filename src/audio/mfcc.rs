//! MFCC computation
//!
//! Follows the librosa pipeline: centered frames, periodic Hann window,
//! power spectrum, Slaney mel filterbank, power-to-dB with an 80 dB floor,
//! orthonormal DCT-II.

use anyhow::Result;
use rustfft::{num_complex::Complex, FftPlanner};
use std::f32::consts::PI;

use crate::config::RepresentationConfig;

/// Dynamic range kept by the dB conversion
const TOP_DB: f32 = 80.0;
/// Power floor before taking the log
const AMIN: f32 = 1e-10;

/// MFCC extractor
pub struct Mfcc {
    /// Number of cepstral coefficients kept
    pub n_mfcc: usize,
    /// FFT size (and window length)
    pub n_fft: usize,
    /// Hop length
    pub hop_length: usize,
    /// Number of mel bands
    pub n_mels: usize,
    /// Sample rate
    pub sample_rate: u32,
    /// Mel filterbank, `n_mels` rows of `n_fft / 2 + 1` weights
    mel_filters: Vec<Vec<f32>>,
    /// Hann window
    window: Vec<f32>,
    /// DCT-II basis, `n_mfcc` rows of `n_mels` weights
    dct: Vec<Vec<f32>>,
}

impl Mfcc {
    /// Create a new MFCC extractor
    pub fn new(params: &RepresentationConfig, sample_rate: u32) -> Result<Self> {
        if params.n_fft == 0 || params.hop_length == 0 {
            anyhow::bail!("n_fft and hop_length must be positive");
        }
        if params.n_mfcc == 0 || params.n_mfcc > params.n_mels {
            anyhow::bail!(
                "n_mfcc must be in 1..={}, got {}",
                params.n_mels,
                params.n_mfcc
            );
        }

        let fmax = params.fmax.unwrap_or(sample_rate as f32 / 2.0);
        let mel_filters = Self::mel_filterbank(
            params.n_fft,
            params.n_mels,
            sample_rate,
            params.fmin,
            fmax,
            params.htk,
        );

        Ok(Self {
            n_mfcc: params.n_mfcc,
            n_fft: params.n_fft,
            hop_length: params.hop_length,
            n_mels: params.n_mels,
            sample_rate,
            mel_filters,
            window: Self::hann_window(params.n_fft),
            dct: Self::dct_basis(params.n_mfcc, params.n_mels),
        })
    }

    /// Number of frames produced for `num_samples` input samples
    pub fn num_frames(&self, num_samples: usize) -> usize {
        1 + num_samples / self.hop_length
    }

    /// Compute MFCCs, returned as `n_mfcc` rows of `num_frames` values
    pub fn compute(&self, audio: &[f32]) -> Result<Vec<Vec<f32>>> {
        let power_spec = self.power_spectrum(audio);
        let mel_spec = self.apply_mel_filters(&power_spec);
        let log_mel = Self::power_to_db(&mel_spec);

        let num_frames = log_mel.len();
        let mut mfcc = vec![vec![0.0f32; num_frames]; self.n_mfcc];
        for (t, frame) in log_mel.iter().enumerate() {
            for (k, basis) in self.dct.iter().enumerate() {
                mfcc[k][t] = basis.iter().zip(frame.iter()).map(|(b, v)| b * v).sum();
            }
        }

        Ok(mfcc)
    }

    /// Compute MFCCs flattened row-major into `(n_mfcc, num_frames)`
    pub fn compute_flat(&self, audio: &[f32]) -> Result<(Vec<f32>, usize)> {
        let mfcc = self.compute(audio)?;
        let num_frames = mfcc.first().map_or(0, |row| row.len());
        Ok((mfcc.into_iter().flatten().collect(), num_frames))
    }

    /// Power spectrum of centered frames, one row per frame
    fn power_spectrum(&self, audio: &[f32]) -> Vec<Vec<f32>> {
        let padded = Self::center_pad(audio, self.n_fft / 2);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(self.n_fft);

        let num_frames = self.num_frames(audio.len());
        let n_freqs = self.n_fft / 2 + 1;
        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];

        for i in 0..num_frames {
            let start = i * self.hop_length;
            for (j, slot) in buffer.iter_mut().enumerate() {
                let sample = padded.get(start + j).copied().unwrap_or(0.0);
                *slot = Complex::new(sample * self.window[j], 0.0);
            }
            fft.process(&mut buffer);
            frames.push(buffer[..n_freqs].iter().map(|c| c.norm_sqr()).collect());
        }

        frames
    }

    /// Reflect-pad both ends; zero-pad when the signal is too short to reflect
    fn center_pad(audio: &[f32], pad: usize) -> Vec<f32> {
        let mut padded = Vec::with_capacity(audio.len() + 2 * pad);
        if audio.len() > pad {
            padded.extend((1..=pad).rev().map(|i| audio[i]));
            padded.extend_from_slice(audio);
            let last = audio.len() - 1;
            padded.extend((1..=pad).map(|i| audio[last - i]));
        } else {
            padded.resize(pad, 0.0);
            padded.extend_from_slice(audio);
            padded.resize(audio.len() + 2 * pad, 0.0);
        }
        padded
    }

    /// Apply mel filterbank to power spectrum
    fn apply_mel_filters(&self, power_spec: &[Vec<f32>]) -> Vec<Vec<f32>> {
        power_spec
            .iter()
            .map(|frame| {
                self.mel_filters
                    .iter()
                    .map(|filter| filter.iter().zip(frame.iter()).map(|(f, p)| f * p).sum())
                    .collect()
            })
            .collect()
    }

    /// `10 * log10(power)` clipped to `TOP_DB` below the global peak
    fn power_to_db(mel_spec: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let mut db: Vec<Vec<f32>> = mel_spec
            .iter()
            .map(|frame| frame.iter().map(|v| 10.0 * v.max(AMIN).log10()).collect())
            .collect();

        let peak = db
            .iter()
            .flat_map(|frame| frame.iter())
            .fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let floor = peak - TOP_DB;
        for value in db.iter_mut().flat_map(|frame| frame.iter_mut()) {
            *value = value.max(floor);
        }
        db
    }

    /// Periodic Hann window
    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / size as f32).cos()))
            .collect()
    }

    /// Orthonormal DCT-II rows
    fn dct_basis(n_mfcc: usize, n_mels: usize) -> Vec<Vec<f32>> {
        let n = n_mels as f32;
        (0..n_mfcc)
            .map(|k| {
                let scale = if k == 0 {
                    (1.0 / n).sqrt()
                } else {
                    (2.0 / n).sqrt()
                };
                (0..n_mels)
                    .map(|m| scale * (PI * k as f32 * (m as f32 + 0.5) / n).cos())
                    .collect()
            })
            .collect()
    }

    /// Hz to Mel conversion
    fn hz_to_mel(hz: f32, htk: bool) -> f32 {
        if htk {
            return 2595.0 * (1.0 + hz / 700.0).log10();
        }
        // Slaney: linear below 1 kHz, logarithmic above
        let f_sp = 200.0 / 3.0;
        let min_log_hz = 1000.0;
        let min_log_mel = min_log_hz / f_sp;
        let logstep = 6.4f32.ln() / 27.0;
        if hz >= min_log_hz {
            min_log_mel + (hz / min_log_hz).ln() / logstep
        } else {
            hz / f_sp
        }
    }

    /// Mel to Hz conversion
    fn mel_to_hz(mel: f32, htk: bool) -> f32 {
        if htk {
            return 700.0 * (10.0_f32.powf(mel / 2595.0) - 1.0);
        }
        let f_sp = 200.0 / 3.0;
        let min_log_hz = 1000.0;
        let min_log_mel = min_log_hz / f_sp;
        let logstep = 6.4f32.ln() / 27.0;
        if mel >= min_log_mel {
            min_log_hz * (logstep * (mel - min_log_mel)).exp()
        } else {
            f_sp * mel
        }
    }

    /// Create an area-normalized triangular mel filterbank
    fn mel_filterbank(
        n_fft: usize,
        n_mels: usize,
        sr: u32,
        fmin: f32,
        fmax: f32,
        htk: bool,
    ) -> Vec<Vec<f32>> {
        let n_freqs = n_fft / 2 + 1;
        let freq_bins: Vec<f32> = (0..n_freqs)
            .map(|i| i as f32 * sr as f32 / n_fft as f32)
            .collect();

        let mel_min = Self::hz_to_mel(fmin, htk);
        let mel_max = Self::hz_to_mel(fmax, htk);
        let hz_points: Vec<f32> = (0..n_mels + 2)
            .map(|i| {
                Self::mel_to_hz(
                    mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32,
                    htk,
                )
            })
            .collect();

        let mut filters = vec![vec![0.0; n_freqs]; n_mels];

        for (i, filter) in filters.iter_mut().enumerate() {
            let left = hz_points[i];
            let center = hz_points[i + 1];
            let right = hz_points[i + 2];
            let enorm = 2.0 / (right - left);

            for (j, &freq) in freq_bins.iter().enumerate() {
                let lower = (freq - left) / (center - left);
                let upper = (right - freq) / (right - center);
                filter[j] = lower.min(upper).max(0.0) * enorm;
            }
        }

        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(n_mfcc: usize) -> RepresentationConfig {
        RepresentationConfig {
            n_mfcc,
            ..Default::default()
        }
    }

    fn sine(freq: f32, sr: u32, seconds: f32) -> Vec<f32> {
        (0..(sr as f32 * seconds) as usize)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn test_shape_matches_coefficients_by_frames() {
        let mfcc = Mfcc::new(&params(40), 24000).unwrap();
        let audio = sine(440.0, 24000, 5.0);
        let out = mfcc.compute(&audio).unwrap();

        assert_eq!(out.len(), 40);
        // 1 + 120000 / 512
        assert_eq!(out[0].len(), 235);
        assert!(out.iter().all(|row| row.len() == 235));
        assert!(out.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_flat_layout() {
        let mfcc = Mfcc::new(&params(13), 22050).unwrap();
        let audio = sine(220.0, 22050, 1.0);
        let rows = mfcc.compute(&audio).unwrap();
        let (flat, frames) = mfcc.compute_flat(&audio).unwrap();
        assert_eq!(frames, mfcc.num_frames(audio.len()));
        assert_eq!(flat.len(), 13 * frames);
        assert_eq!(flat[frames + 3], rows[1][3]);
    }

    #[test]
    fn test_silence_is_flat() {
        let mfcc = Mfcc::new(&params(20), 16000).unwrap();
        let out = mfcc.compute(&vec![0.0; 16000]).unwrap();
        // Every frame is the floor, so only the DC coefficient is non-zero
        for row in &out[1..] {
            assert!(row.iter().all(|v| v.abs() < 1e-2));
        }
    }

    #[test]
    fn test_short_signal_still_pads() {
        let mfcc = Mfcc::new(&params(13), 16000).unwrap();
        let out = mfcc.compute(&[0.5; 100]).unwrap();
        assert_eq!(out[0].len(), 1);
    }

    #[test]
    fn test_mel_scale_roundtrip() {
        for &htk in &[false, true] {
            for &hz in &[0.0f32, 300.0, 1000.0, 4000.0, 11025.0] {
                let back = Mfcc::mel_to_hz(Mfcc::hz_to_mel(hz, htk), htk);
                assert!((back - hz).abs() < 0.5, "{} -> {}", hz, back);
            }
        }
    }

    #[test]
    fn test_dct_is_orthonormal() {
        let dct = Mfcc::dct_basis(8, 8);
        for a in 0..8 {
            for b in 0..8 {
                let dot: f32 = dct[a].iter().zip(&dct[b]).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_rejects_too_many_coefficients() {
        assert!(Mfcc::new(&params(200), 24000).is_err());
    }
}
