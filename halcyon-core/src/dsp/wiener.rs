//! Frequency-domain Wiener-style gain filtering.
//!
//! ## Per-frame steps
//!
//! 1. Forward FFT → complex bins; split into magnitude and phase.
//! 2. Floor the noise estimate at [`NOISE_EPSILON`] so the gain division
//!    is always defined.
//! 3. Per bin: `gain = mag² / (mag² + floor²)` — the scalar noise floor is
//!    broadcast across all bins, not a per-bin noise spectrum.
//! 4. Scale magnitudes by the gain, recombine with the original phase,
//!    inverse FFT, keep the real part.
//!
//! Bins whose energy dominates the floor pass near-unattenuated; bins at
//! or below the floor are pulled toward zero.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::buffering::frame::AudioFrame;

/// Floor applied to the noise estimate before it enters the gain division.
pub const NOISE_EPSILON: f32 = 1e-10;

/// Reusable spectral gain filter for frames of one fixed size.
///
/// The FFT plans and scratch buffers are allocated once in [`new`] and
/// reused for every frame; `apply` itself is a pure function of the frame
/// and the noise estimate.
///
/// [`new`]: WienerFilter::new
pub struct WienerFilter {
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// In-place transform buffer, `frame_size` complex bins.
    bins: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    frame_size: usize,
}

impl WienerFilter {
    /// Plan forward and inverse transforms for `frame_size`-sample frames.
    pub fn new(frame_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(frame_size);
        let ifft = planner.plan_fft_inverse(frame_size);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());

        Self {
            fft,
            ifft,
            bins: vec![Complex::new(0.0, 0.0); frame_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            frame_size,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Filter one frame against the given noise estimate, returning the
    /// time-domain reconstruction.
    ///
    /// The frame must be exactly `frame_size` samples — the pipeline
    /// assembles frames of that length before calling.
    pub fn apply(&mut self, frame: &AudioFrame, noise_estimate: f32) -> Vec<f32> {
        debug_assert_eq!(frame.samples.len(), self.frame_size);

        for (bin, sample) in self.bins.iter_mut().zip(&frame.samples) {
            *bin = Complex::new(*sample, 0.0);
        }
        self.fft.process_with_scratch(&mut self.bins, &mut self.scratch);

        let noise_floor = noise_estimate.max(NOISE_EPSILON);
        let noise_power = noise_floor * noise_floor;

        for bin in self.bins.iter_mut() {
            let magnitude = bin.norm();
            let phase = bin.arg();
            let power = magnitude * magnitude;
            let gain = power / (power + noise_power);
            *bin = Complex::from_polar(gain * magnitude, phase);
        }

        self.ifft.process_with_scratch(&mut self.bins, &mut self.scratch);

        // rustfft's inverse is unnormalized; divide by N and discard the
        // residual imaginary part left by floating-point rounding.
        let scale = 1.0 / self.frame_size as f32;
        self.bins.iter().map(|c| c.re * scale).collect()
    }
}

impl std::fmt::Debug for WienerFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WienerFilter")
            .field("frame_size", &self.frame_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_SIZE: usize = 1024;

    fn sine_frame(amplitude: f32) -> AudioFrame {
        let samples: Vec<f32> = (0..FRAME_SIZE)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * 8.0 * i as f32 / FRAME_SIZE as f32).sin()
            })
            .collect();
        AudioFrame::new(samples, 44_100)
    }

    #[test]
    fn output_length_matches_input() {
        let mut filter = WienerFilter::new(FRAME_SIZE);
        let out = filter.apply(&sine_frame(0.5), 0.01);
        assert_eq!(out.len(), FRAME_SIZE);
    }

    #[test]
    fn negligible_noise_passes_signal_through() {
        // With noise_estimate = 0 the floor is EPSILON, so every bin with
        // nonzero magnitude gets gain ≈ 1 and the output matches the input.
        let mut filter = WienerFilter::new(FRAME_SIZE);
        let frame = sine_frame(0.5);
        let out = filter.apply(&frame, 0.0);

        let max_err = out
            .iter()
            .zip(&frame.samples)
            .map(|(o, i)| (o - i).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-4, "max_err={max_err}");
    }

    #[test]
    fn silence_stays_silent_for_any_estimate() {
        let mut filter = WienerFilter::new(FRAME_SIZE);
        let silent = AudioFrame::new(vec![0.0; FRAME_SIZE], 44_100);

        for estimate in [0.0, 1e-12, 0.1, 10.0] {
            let out = filter.apply(&silent, estimate);
            assert!(out.iter().all(|s| s.is_finite()));
            assert!(out.iter().all(|s| s.abs() < 1e-6));
        }
    }

    #[test]
    fn large_noise_floor_attenuates() {
        let mut filter = WienerFilter::new(FRAME_SIZE);
        let frame = sine_frame(0.1);
        // Noise floor far above the signal's spectral magnitudes.
        let out = filter.apply(&frame, 1_000.0);

        let in_energy: f32 = frame.samples.iter().map(|s| s * s).sum();
        let out_energy: f32 = out.iter().map(|s| s * s).sum();
        assert!(
            out_energy < in_energy * 1e-3,
            "out_energy={out_energy} in_energy={in_energy}"
        );
    }

    #[test]
    fn refiltering_own_output_stays_finite() {
        // Guards the epsilon floor: running the filter on its own output
        // must never divide by zero or produce NaN, whatever the estimate.
        let mut filter = WienerFilter::new(FRAME_SIZE);
        let first = filter.apply(&sine_frame(0.5), 0.0);
        let second = filter.apply(&AudioFrame::new(first, 44_100), 0.02);
        assert!(second.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn gain_is_scale_invariant() {
        // gain = m²/(m² + n²) is unchanged when signal and noise scale
        // together, so a scaled frame with a scaled estimate comes out
        // scaled by the same factor.
        let mut filter = WienerFilter::new(FRAME_SIZE);
        let base = filter.apply(&sine_frame(0.2), 0.05);
        let scaled = filter.apply(&sine_frame(0.4), 0.10);

        let max_err = base
            .iter()
            .zip(&scaled)
            .map(|(b, s)| (b * 2.0 - s).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-4, "max_err={max_err}");
    }
}
