//! Signal processing stages of the per-frame cycle.
//!
//! The pipeline applies these in a fixed order for every frame:
//!
//! ```text
//! AudioFrame ── NoiseEstimator::update ──► noise estimate
//!      │                                        │
//!      └────────── WienerFilter::apply ◄────────┘
//!                         │
//!               quantize_frame (saturating i16)
//! ```
//!
//! All stages run on the single pipeline thread; none is shared across
//! threads and none allocates in the real-time audio callbacks.

pub mod convert;
pub mod estimator;
pub mod wiener;

pub use convert::{quantize_frame, samples_to_f32};
pub use estimator::NoiseEstimator;
pub use wiener::{WienerFilter, NOISE_EPSILON};
