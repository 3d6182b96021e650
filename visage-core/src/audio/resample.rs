//! Audio sample-rate conversion using a rubato sinc resampler.
//!
//! ## Design
//!
//! Speech synthesis services emit PCM at whatever rate their voice model
//! uses (24 kHz is common); the rendering engine accepts exactly one input
//! rate. `RateConverter` bridges that gap on the ingest task, where
//! allocation is allowed.
//!
//! Conversion is band-limited sinc interpolation — naive decimation aliases
//! audibly on speech and the engine lip-syncs off this signal.
//!
//! When source rate == target rate, `RateConverter` is a zero-copy
//! passthrough — no rubato session is created at all.
//!
//! Duration preservation matters here: the completion heuristic compares
//! input and output durations, so the converter must not silently eat the
//! tail of an utterance. Full sub-chunks flow through `process`; the final
//! remainder is flushed by `drain` (zero-padded to a full chunk, output
//! truncated to the frames the remainder actually maps to).

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::error;

use crate::error::{Result, VisageError};

/// Input frame count per rubato call.
const CHUNK_SIZE: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<SincFixedIn<f32>>,
    /// Conversion ratio (target / source).
    ratio: f64,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter from `source_rate` to `target_rate` (Hz).
    ///
    /// # Errors
    /// Returns `VisageError::Resample` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                ratio: 1.0,
                input_buf: Vec::new(),
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };

        let resampler = SincFixedIn::<f32>::new(
            ratio, 1.0, // fixed ratio — no dynamic adjustment
            params, CHUNK_SIZE, 1, // mono
        )
        .map_err(|e| VisageError::Resample(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(source_rate, target_rate, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            ratio,
            input_buf: Vec::new(),
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full chunk is available
    /// for rubato. Any remainder is kept for the next call (or `drain`).
    ///
    /// In passthrough mode (same rates), input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            // Zero-copy passthrough
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= CHUNK_SIZE {
            let input_slice = &self.input_buf[..CHUNK_SIZE];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..CHUNK_SIZE);
        }

        result
    }

    /// Flush the buffered remainder, preserving total duration.
    ///
    /// The remainder is zero-padded up to a full chunk before conversion
    /// and the output is truncated to `round(remainder × ratio)` frames, so
    /// the frames the padding maps to are never forwarded.
    pub fn drain(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };

        if self.input_buf.is_empty() {
            return Vec::new();
        }

        let tail_len = self.input_buf.len();
        let mut padded = std::mem::take(&mut self.input_buf);
        padded.resize(CHUNK_SIZE, 0.0);

        let wanted = (tail_len as f64 * self.ratio).round() as usize;

        match resampler.process_into_buffer(&[padded.as_slice()], &mut self.output_buf, None) {
            Ok((_consumed, produced)) => self.output_buf[0][..wanted.min(produced)].to_vec(),
            Err(e) => {
                error!("resampler drain error: {e}");
                Vec::new()
            }
        }
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Input samples buffered but not yet converted.
    pub fn pending(&self) -> usize {
        self.input_buf.len()
    }
}

/// Widen signed 16-bit PCM to normalized f32.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

/// Narrow normalized f32 back to signed 16-bit PCM, clamping overshoot.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
        assert!(rc.drain().is_empty());
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        // Fewer than a full chunk → nothing output yet
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(out.is_empty(), "expected empty output, got {}", out.len());
        assert_eq!(rc.pending(), 500);
    }

    #[test]
    fn multiple_partial_chunks_accumulate() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        // Two 600-sample pushes = 1200 total ≥ 1024 → should produce output
        let out1 = rc.process(&vec![0.0f32; 600]);
        assert!(out1.is_empty());
        let out2 = rc.process(&vec![0.0f32; 600]);
        assert!(!out2.is_empty(), "second push should trigger processing");
    }

    #[test]
    fn upsample_16k_to_24k_preserves_duration() {
        // One second of 16 kHz audio must map to one second of 24 kHz audio
        // within a couple of samples once the remainder is drained.
        let mut rc = RateConverter::new(16_000, 24_000).unwrap();
        let input: Vec<f32> = (0..16_000)
            .map(|i| (i as f32 * 0.05).sin() * 0.3)
            .collect();

        let mut total = rc.process(&input).len();
        total += rc.drain().len();

        assert!(
            (total as i64 - 24_000).unsigned_abs() <= 2,
            "expected ≈24000 output samples, got {total}"
        );
    }

    #[test]
    fn downsample_48k_to_16k_preserves_duration() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        let input = vec![0.1f32; 48_000];

        let mut total = rc.process(&input).len();
        total += rc.drain().len();

        assert!(
            (total as i64 - 16_000).unsigned_abs() <= 2,
            "expected ≈16000 output samples, got {total}"
        );
    }

    #[test]
    fn drain_is_idempotent() {
        let mut rc = RateConverter::new(48_000, 16_000).unwrap();
        rc.process(&vec![0.0f32; 1500]);
        let first = rc.drain();
        assert!(!first.is_empty());
        assert!(rc.drain().is_empty());
    }

    #[test]
    fn pcm_round_trip_is_close() {
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN + 1];
        let round = f32_to_i16(&i16_to_f32(&samples));
        for (a, b) in samples.iter().zip(round.iter()) {
            assert_abs_diff_eq!(*a as f32, *b as f32, epsilon = 2.0);
        }
    }
}
