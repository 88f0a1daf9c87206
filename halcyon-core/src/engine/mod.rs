//! `HalcyonEngine` — top-level session lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! HalcyonEngine::new()
//!     └─► start()        → duplex open, pipeline spawned, status = Running
//!         └─► stop()     → running=false, loop exits within one frame,
//!                          session buffer flushed to the sink, status = Idle
//! ```
//!
//! `stop()` is idempotent: stopping an idle engine is a no-op that emits
//! the empty-session notice rather than an error. `start()` on a running
//! engine is rejected with `AlreadyRunning`.
//!
//! ## Threading
//!
//! cpal streams are `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). The duplex is therefore opened *inside* the
//! `spawn_blocking` closure, on the thread that then runs the pipeline
//! loop, and never crosses a thread boundary. A sync mpsc channel
//! propagates any open-device error back to the `start()` caller.

pub mod pipeline;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    audio::AudioDuplex,
    buffering::{create_audio_ring, CAPTURE_RING_CAPACITY, PLAYBACK_RING_CAPACITY},
    error::{HalcyonError, Result},
    events::{EngineStatus, EngineStatusEvent, FrameActivityEvent, SessionSavedEvent},
    sink::SinkHandle,
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `HalcyonEngine`.
///
/// The session buffer accumulates every processed sample in memory until
/// the session stops (one hour of mono 44.1 kHz i16 is roughly 300 MB).
/// Very long sessions should stop and restart periodically; the buffer
/// is kept in memory so a failed save can be retried without data loss.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Session processing and output sample rate (Hz). Device rates that
    /// differ are bridged by rate conversion. Default: 44100.
    pub sample_rate: u32,
    /// Samples per frame fed to the estimator and filter. Default: 1024.
    pub frame_size: usize,
    /// Initial smoothing factor in [0, 1]. Default: 0.9.
    pub initial_alpha: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 1024,
            initial_alpha: 0.9,
        }
    }
}

/// The top-level engine handle.
///
/// `HalcyonEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<HalcyonEngine>` to share between the control surface and
/// event-forwarding async tasks.
pub struct HalcyonEngine {
    config: EngineConfig,
    sink: SinkHandle,
    /// `true` while capture + pipeline are active.
    running: Arc<AtomicBool>,
    /// Live smoothing factor, shared with the pipeline loop.
    alpha: Arc<Mutex<f32>>,
    /// Canonical status (read from commands, written by the pipeline on exit).
    status: Arc<Mutex<EngineStatus>>,
    /// Session buffer parked after a failed persist, awaiting retry.
    unsaved: Arc<Mutex<Option<Vec<i16>>>>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    activity_tx: broadcast::Sender<FrameActivityEvent>,
    saved_tx: broadcast::Sender<SessionSavedEvent>,
    /// Shared pipeline diagnostics counters.
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl std::fmt::Debug for HalcyonEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // `SinkHandle` wraps `dyn WaveSink`, which is not `Debug`, so this is a
        // hand-rolled formatter rather than a derive. It exposes only the
        // plainly-printable configuration; no engine state is mutated.
        f.debug_struct("HalcyonEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HalcyonEngine {
    /// Create a new engine. Does not open any device — call `start()`.
    ///
    /// # Errors
    /// - `InvalidSmoothingFactor` if `config.initial_alpha` is outside [0, 1].
    /// - `InvalidFrameSize` if `config.frame_size` is zero (a zero-length
    ///   transform is a contract violation rejected up front).
    pub fn new(config: EngineConfig, sink: SinkHandle) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.initial_alpha) {
            return Err(HalcyonError::InvalidSmoothingFactor {
                value: config.initial_alpha,
            });
        }
        if config.frame_size == 0 {
            return Err(HalcyonError::InvalidFrameSize);
        }

        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (saved_tx, _) = broadcast::channel(BROADCAST_CAP);

        let alpha = Arc::new(Mutex::new(config.initial_alpha));

        Ok(Self {
            config,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            alpha,
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            unsaved: Arc::new(Mutex::new(None)),
            status_tx,
            activity_tx,
            saved_tx,
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        })
    }

    /// Start a session on the default input device.
    ///
    /// Blocks until the audio devices are confirmed open (or fail), then
    /// returns; the pipeline continues on a background blocking thread.
    ///
    /// # Errors
    /// - `AlreadyRunning` if a session is active.
    /// - `NoDefaultInputDevice` / `NoDefaultOutputDevice` / `AudioStream`
    ///   on device errors.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start a session using a preferred input device name.
    ///
    /// `None` selects the system default input.
    pub fn start_with_device(&self, preferred_input: Option<String>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(HalcyonError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);
        self.set_status(EngineStatus::Running, None);

        let (capture_tx, capture_rx) = create_audio_ring(CAPTURE_RING_CAPACITY);
        let (playback_tx, playback_rx) = create_audio_ring(PLAYBACK_RING_CAPACITY);

        // Clone all Arc-wrapped state before moving into the closure.
        let config = self.config.clone();
        let sink = self.sink.clone();
        let running = Arc::clone(&self.running);
        let alpha = Arc::clone(&self.alpha);
        let status = Arc::clone(&self.status);
        let unsaved = Arc::clone(&self.unsaved);
        let status_tx = self.status_tx.clone();
        let activity_tx = self.activity_tx.clone();
        let saved_tx = self.saved_tx.clone();
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync oneshot: the pipeline thread signals open success/failure
        // back to start(). Carries the device rates on success.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<(u32, u32)>>();

        tokio::task::spawn_blocking(move || {
            // Open devices on THIS thread — the streams are !Send.
            let duplex = match AudioDuplex::open(
                capture_tx,
                playback_rx,
                Arc::clone(&running),
                preferred_input.as_deref(),
            ) {
                Ok(d) => {
                    let _ = open_tx.send(Ok((d.capture_rate, d.playback_rate)));
                    d
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            pipeline::run(pipeline::PipelineContext {
                config,
                consumer: capture_rx,
                playback: playback_tx,
                running,
                device_failed: duplex.failure_flag(),
                alpha,
                sink,
                unsaved,
                status,
                status_tx,
                activity_tx,
                saved_tx,
                capture_rate: duplex.capture_rate,
                playback_rate: duplex.playback_rate,
                diagnostics,
            });

            // Streams drop here, releasing the devices on this thread.
            drop(duplex);
        });

        match open_rx.recv() {
            Ok(Ok((capture_rate, playback_rate))) => {
                info!(capture_rate, playback_rate, "engine started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("pipeline failed to start".into()));
                Err(HalcyonError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Request the current session to stop.
    ///
    /// Idempotent: stopping an idle engine is a no-op that emits the
    /// empty-session notice. When a session is active, the pipeline loop
    /// observes the cleared flag within one frame's duration, flushes the
    /// session buffer to the sink and transitions to Idle. There is no
    /// stop-without-save.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            let _ = self.saved_tx.send(SessionSavedEvent {
                path: None,
                samples_written: 0,
                warning: Some("stop requested with no active session; nothing to save".into()),
            });
            return;
        }
        info!("engine stop requested");
    }

    /// Update the smoothing factor; takes effect on the next frame.
    ///
    /// # Errors
    /// `InvalidSmoothingFactor` for values outside [0, 1] (including NaN).
    /// The previous valid value remains in effect.
    pub fn set_alpha(&self, value: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(HalcyonError::InvalidSmoothingFactor { value });
        }
        *self.alpha.lock() = value;
        debug!(alpha = value, "smoothing factor updated");
        Ok(())
    }

    /// Current smoothing factor.
    pub fn alpha(&self) -> f32 {
        *self.alpha.lock()
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Whether a session buffer is parked after a failed save.
    pub fn has_unsaved(&self) -> bool {
        self.unsaved.lock().is_some()
    }

    /// Retry persisting the most recent session whose save failed.
    ///
    /// # Errors
    /// - `NothingToSave` when no buffer is parked.
    /// - The sink's error when the retry fails; the buffer stays parked.
    pub fn retry_save(&self) -> Result<PathBuf> {
        let Some(samples) = self.unsaved.lock().take() else {
            return Err(HalcyonError::NothingToSave);
        };

        match self.sink.0.lock().persist(&samples, self.config.sample_rate) {
            Ok(path) => {
                let _ = self.saved_tx.send(SessionSavedEvent {
                    path: Some(path.clone()),
                    samples_written: samples.len(),
                    warning: None,
                });
                Ok(path)
            }
            Err(e) => {
                *self.unsaved.lock() = Some(samples);
                Err(e)
            }
        }
    }

    /// Subscribe to lifecycle status events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to per-frame activity events (input level + noise floor).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<FrameActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Subscribe to session save results.
    pub fn subscribe_saved(&self) -> broadcast::Receiver<SessionSavedEvent> {
        self.saved_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}
