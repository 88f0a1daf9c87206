//! Event types broadcast to the control surface.
//!
//! The engine never talks to a UI directly: it publishes these over
//! `tokio::sync::broadcast` channels and any number of subscribers (CLI,
//! status bar, tests) consume them at their own pace.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted whenever the engine's lifecycle state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the Halcyon engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// No session active; `start()` may be called.
    Idle,
    /// Actively capturing, filtering and playing back audio.
    Running,
    /// The last session ended on a device failure. Lifecycle-wise
    /// equivalent to `Idle` — a new `start()` is permitted.
    Error,
}

// ---------------------------------------------------------------------------
// Per-frame activity events
// ---------------------------------------------------------------------------

/// Emitted once per processed frame: input level and the noise floor the
/// filter used for that frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameActivityEvent {
    /// Monotonically increasing frame sequence number within the session.
    pub seq: u64,
    /// Root-mean-square level of the raw input frame in [0.0, 1.0].
    pub input_rms: f32,
    /// Noise estimate after this frame's update.
    pub noise_estimate: f32,
}

// ---------------------------------------------------------------------------
// Session save events
// ---------------------------------------------------------------------------

/// Emitted when a session ends and its buffer has been handed to the sink.
///
/// `path` is `None` either when there was nothing to save (`warning` says
/// so) or when the sink failed (`warning` carries the error; the buffer is
/// parked for [`retry_save`](crate::engine::HalcyonEngine::retry_save)).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSavedEvent {
    /// Where the WAV landed, if persistence succeeded.
    pub path: Option<PathBuf>,
    /// Number of samples written (0 when nothing was saved).
    pub samples_written: usize,
    /// Present when the save was skipped or failed.
    pub warning: Option<String>,
}
