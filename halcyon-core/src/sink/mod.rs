//! Waveform persistence seam.
//!
//! The `WaveSink` trait decouples the pipeline from any specific storage
//! backend (WAV file on disk, in-memory capture in tests). The pipeline's
//! only obligation is to hand the accumulated session buffer to the sink
//! when a session ends.

pub mod wav;

pub use wav::WavFileSink;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Contract for session persistence backends.
pub trait WaveSink: Send + 'static {
    /// Write one session's processed samples as a mono 16-bit waveform.
    ///
    /// Called at most once per session, with a non-empty buffer — empty
    /// sessions never reach the sink. Returns where the audio landed.
    ///
    /// # Errors
    /// Returns `HalcyonError::Persistence` when the write fails. The
    /// caller keeps the buffer and may retry.
    fn persist(&mut self, samples: &[i16], sample_rate: u32) -> Result<PathBuf>;
}

/// Thread-safe reference-counted handle to any `WaveSink` implementor.
///
/// The pipeline thread persists through it on session end; the engine
/// reuses the same sink for `retry_save()`.
#[derive(Clone)]
pub struct SinkHandle(pub Arc<Mutex<dyn WaveSink>>);

impl SinkHandle {
    /// Wrap any `WaveSink` in a `SinkHandle`.
    pub fn new<S: WaveSink>(sink: S) -> Self {
        Self(Arc::new(Mutex::new(sink)))
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle").finish_non_exhaustive()
    }
}
