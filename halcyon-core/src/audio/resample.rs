//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Devices rarely run at the session's processing rate (48 kHz hardware
//! against a 44.1 kHz session is the common case). `RateConverter` bridges
//! the gap on the non-RT pipeline thread, in both directions: capture rate
//! to session rate on the way in, session rate to playback rate on the way
//! out.
//!
//! When the two rates match, `RateConverter` is a passthrough — no rubato
//! session is created at all. Every unit test takes that path.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{HalcyonError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `source_rate` to `target_rate`, fed in
    /// blocks of up to `chunk_size` samples.
    ///
    /// # Errors
    /// Returns `HalcyonError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| HalcyonError::AudioStream(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(source_rate, target_rate, chunk_size, "rate conversion enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning converted output (may be empty).
    ///
    /// Samples accumulate internally until a full `chunk_size` block is
    /// available for rubato; any remainder is kept for the next call. In
    /// passthrough mode the input is returned directly.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Returns `true` when source rate == target rate.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(44_100, 44_100, 1024).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..512).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
    }

    #[test]
    fn ratio_48k_to_44k1_correct_length() {
        let mut rc = RateConverter::new(48_000, 44_100, 1024).unwrap();
        assert!(!rc.is_passthrough());
        // 2048 input samples at 48 kHz → ~1882 at 44.1 kHz
        let out = rc.process(&vec![0.0f32; 2048]);
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 1882usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 20,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_chunk_accumulates_until_full() {
        let mut rc = RateConverter::new(48_000, 44_100, 1024).unwrap();
        // Fewer than chunk_size samples → nothing output yet
        assert!(rc.process(&vec![0.0f32; 600]).is_empty());
        // Second push crosses the chunk boundary → output produced
        assert!(!rc.process(&vec![0.0f32; 600]).is_empty());
    }
}
