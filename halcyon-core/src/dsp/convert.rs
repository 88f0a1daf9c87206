//! Sample representation conversion between normalized f32 and i16 PCM.

/// Scale factor between normalized float samples and 16-bit PCM.
const I16_SCALE: f32 = 32_768.0;

/// Quantize normalized f32 samples to 16-bit PCM with saturation.
///
/// Out-of-range values are clamped to [-32768, 32767] before the cast —
/// saturated, never wrapped — so filter overshoot produces a flat-topped
/// sample instead of a full-scale polarity flip. Returns the quantized
/// samples and how many of them saturated.
pub fn quantize_frame(samples: &[f32]) -> (Vec<i16>, usize) {
    let mut saturated = 0usize;
    let quantized = samples
        .iter()
        .map(|&s| {
            let scaled = s * I16_SCALE;
            if !(-I16_SCALE..=I16_SCALE - 1.0).contains(&scaled) {
                saturated += 1;
            }
            scaled.clamp(-I16_SCALE, I16_SCALE - 1.0) as i16
        })
        .collect();
    (quantized, saturated)
}

/// Convert 16-bit PCM back to normalized f32 for playback.
pub fn samples_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / I16_SCALE).collect()
}
