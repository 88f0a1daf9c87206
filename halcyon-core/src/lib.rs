//! # halcyon-core
//!
//! Real-time adaptive noise reduction engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioDuplex → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                   │
//!                                     NoiseEstimator::update (EMA)
//!                                                   │
//!                                     WienerFilter::apply (FFT gain)
//!                                                   │
//!                              quantize (saturating i16) ─► SessionBuffer
//!                                                   │              │
//!                          SPSC RingBuffer ◄────────┘         WaveSink
//!                                │                          (on session end)
//!                            Speakers
//! ```
//!
//! The audio callbacks are zero-alloc. All heap work happens on the
//! pipeline thread, which owns the noise estimate and session buffer
//! exclusively and processes frames in strict arrival order.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod events;
pub mod sink;

// Convenience re-exports for downstream crates
pub use dsp::{NoiseEstimator, WienerFilter, NOISE_EPSILON};
pub use engine::{EngineConfig, HalcyonEngine};
pub use error::HalcyonError;
pub use events::{EngineStatus, EngineStatusEvent, FrameActivityEvent, SessionSavedEvent};
pub use sink::{SinkHandle, WavFileSink, WaveSink};
