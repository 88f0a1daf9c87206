//! Blocking per-frame processing loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Check the running flag and the device failure flag
//! 2. Drain the capture ring (one block per iteration)
//! 3. Rate-convert to the session sample rate
//! 4. Assemble exact frame_size frames
//! 5. Per frame: NoiseEstimator::update → WienerFilter::apply →
//!    saturating i16 quantization → SessionBuffer append →
//!    playback ring push → FrameActivityEvent
//! 6. On exit (stop or device failure): flush the SessionBuffer to the
//!    WaveSink and publish the final status
//! ```
//!
//! The entire loop runs in `spawn_blocking`, keeping the Tokio async
//! executor free for the control surface. Frames are processed strictly
//! in arrival order; the estimator's exponential average is sequential by
//! definition and is never parallelized across frames.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::RateConverter,
    buffering::{frame::AudioFrame, AudioConsumer, AudioProducer, Consumer, Producer},
    dsp::{quantize_frame, samples_to_f32, NoiseEstimator, WienerFilter},
    engine::EngineConfig,
    events::{EngineStatus, EngineStatusEvent, FrameActivityEvent, SessionSavedEvent},
    sink::SinkHandle,
};

pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub frames_processed: AtomicUsize,
    pub samples_saturated: AtomicUsize,
    pub playback_dropped: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            frames_processed: AtomicUsize::new(0),
            samples_saturated: AtomicUsize::new(0),
            playback_dropped: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.frames_processed.store(0, Ordering::Relaxed);
        self.samples_saturated.store(0, Ordering::Relaxed);
        self.playback_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            samples_saturated: self.samples_saturated.load(Ordering::Relaxed),
            playback_dropped: self.playback_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub frames_processed: usize,
    pub samples_saturated: usize,
    pub playback_dropped: usize,
}

/// All context the pipeline needs, passed as one struct so the closure
/// stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    /// Capture ring consumer (device callback is the producer).
    pub consumer: AudioConsumer,
    /// Playback ring producer (device callback is the consumer).
    pub playback: AudioProducer,
    pub running: Arc<AtomicBool>,
    /// Raised by the device error callbacks; checked once per iteration.
    pub device_failed: Arc<AtomicBool>,
    /// Live smoothing factor, shared with the control surface. Read once
    /// per frame; a momentarily stale value only shifts adaptation
    /// smoothness for that frame.
    pub alpha: Arc<Mutex<f32>>,
    pub sink: SinkHandle,
    /// Parking spot for a session buffer whose persist failed, so the
    /// engine can retry without re-capturing.
    pub unsaved: Arc<Mutex<Option<Vec<i16>>>>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub status_tx: broadcast::Sender<EngineStatusEvent>,
    pub activity_tx: broadcast::Sender<FrameActivityEvent>,
    pub saved_tx: broadcast::Sender<SessionSavedEvent>,
    pub capture_rate: u32,
    pub playback_rate: u32,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Sleep when the capture ring is empty (avoids busy-wait burning a core).
/// Well under one frame's duration, so a stop request is still observed
/// within the contract's one-frame bound.
const SLEEP_EMPTY_MS: u64 = 5;

/// Run the blocking pipeline until `ctx.running` becomes false or the
/// device fails. Always flushes the session buffer on the way out.
pub fn run(mut ctx: PipelineContext) {
    info!(
        sample_rate = ctx.config.sample_rate,
        frame_size = ctx.config.frame_size,
        "pipeline started"
    );

    let frame_size = ctx.config.frame_size;

    let mut estimator = NoiseEstimator::new(*ctx.alpha.lock());
    let mut filter = WienerFilter::new(frame_size);

    // Inbound: capture rate → session rate. Outbound: session rate →
    // playback rate. Both are passthrough when the rates already match.
    let mut inbound = match RateConverter::new(ctx.capture_rate, ctx.config.sample_rate, frame_size)
    {
        Ok(rc) => rc,
        Err(e) => {
            error!("failed to create inbound rate converter: {e}");
            finish_session(&mut ctx, Vec::new(), Some(e.to_string()));
            return;
        }
    };
    let mut outbound =
        match RateConverter::new(ctx.config.sample_rate, ctx.playback_rate, frame_size) {
            Ok(rc) => rc,
            Err(e) => {
                error!("failed to create outbound rate converter: {e}");
                finish_session(&mut ctx, Vec::new(), Some(e.to_string()));
                return;
            }
        };

    // Scratch block reused each iteration.
    let mut raw = vec![0f32; frame_size];
    // Rate-converted samples awaiting assembly into a full frame.
    let mut pending: Vec<f32> = Vec::with_capacity(frame_size * 2);
    // Every processed sample of the session, in order. Grows unbounded by
    // design; see the note on `EngineConfig`.
    let mut session_buf: Vec<i16> = Vec::new();
    // Frame sequence within this session.
    let mut seq = 0u64;
    // Set when the loop exits on a failure rather than a stop request.
    let mut exit_error: Option<String> = None;

    loop {
        // ── 0. Cooperative cancellation and failure check ─────────────────
        if !ctx.running.load(Ordering::Acquire) {
            break;
        }
        if ctx.device_failed.load(Ordering::Acquire) {
            exit_error = Some("audio device stream failed".into());
            break;
        }

        // ── 1. Drain capture ring ─────────────────────────────────────────
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            std::thread::sleep(std::time::Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        // ── 2. Rate-convert to the session rate ───────────────────────────
        let converted = inbound.process(&raw[..n]);
        if converted.is_empty() {
            // Partial chunk, waiting for more input
            continue;
        }
        pending.extend_from_slice(&converted);

        // ── 3. Process every complete frame ───────────────────────────────
        while pending.len() >= frame_size {
            let samples: Vec<f32> = pending.drain(..frame_size).collect();
            let frame = AudioFrame::new(samples, ctx.config.sample_rate);

            // The shared alpha takes effect on this frame's update.
            estimator.set_alpha(*ctx.alpha.lock());
            estimator.update(&frame);
            let estimate = estimator.estimate();

            let processed = filter.apply(&frame, estimate);

            let (quantized, saturated) = quantize_frame(&processed);
            if saturated > 0 {
                ctx.diagnostics
                    .samples_saturated
                    .fetch_add(saturated, Ordering::Relaxed);
            }
            session_buf.extend_from_slice(&quantized);

            let playback_samples = outbound.process(&samples_to_f32(&quantized));
            if !playback_samples.is_empty() {
                let written = ctx.playback.push_slice(&playback_samples);
                if written < playback_samples.len() {
                    let dropped = playback_samples.len() - written;
                    ctx.diagnostics
                        .playback_dropped
                        .fetch_add(dropped, Ordering::Relaxed);
                    warn!("playback ring full: dropped {dropped} samples");
                }
            }

            let _ = ctx.activity_tx.send(FrameActivityEvent {
                seq,
                input_rms: frame.rms(),
                noise_estimate: estimate,
            });
            ctx.diagnostics
                .frames_processed
                .fetch_add(1, Ordering::Relaxed);
            seq = seq.saturating_add(1);

            if seq % 50 == 0 {
                debug!(
                    seq,
                    noise_estimate = format_args!("{:.6}", estimate),
                    buffered_samples = session_buf.len(),
                    "frame cycle"
                );
            }
        }
    }

    // The loop may have exited on a failure; make sure the engine-side
    // flag agrees before anything else observes the session as over.
    ctx.running.store(false, Ordering::Release);

    finish_session(&mut ctx, session_buf, exit_error);

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        frames_processed = snap.frames_processed,
        samples_saturated = snap.samples_saturated,
        playback_dropped = snap.playback_dropped,
        "pipeline stopped"
    );
}

/// Hand the session buffer to the sink and publish the final status.
///
/// Runs on every exit path: stop request, device failure, converter init
/// failure. There is no discard path; whatever was processed is always
/// offered to the sink.
fn finish_session(ctx: &mut PipelineContext, session_buf: Vec<i16>, exit_error: Option<String>) {
    if session_buf.is_empty() {
        let _ = ctx.saved_tx.send(SessionSavedEvent {
            path: None,
            samples_written: 0,
            warning: Some("no audio captured, nothing to save".into()),
        });
    } else {
        let sample_count = session_buf.len();
        let result = ctx
            .sink
            .0
            .lock()
            .persist(&session_buf, ctx.config.sample_rate);
        match result {
            Ok(path) => {
                let _ = ctx.saved_tx.send(SessionSavedEvent {
                    path: Some(path),
                    samples_written: sample_count,
                    warning: None,
                });
            }
            Err(e) => {
                warn!(
                    samples = sample_count,
                    "session persist failed, parking buffer for retry: {e}"
                );
                *ctx.unsaved.lock() = Some(session_buf);
                let _ = ctx.saved_tx.send(SessionSavedEvent {
                    path: None,
                    samples_written: 0,
                    warning: Some(format!(
                        "failed to save session audio ({e}); buffered audio retained for retry"
                    )),
                });
            }
        }
    }

    match exit_error {
        Some(detail) => set_status(ctx, EngineStatus::Error, Some(detail)),
        None => set_status(ctx, EngineStatus::Idle, None),
    }
}

fn set_status(ctx: &PipelineContext, status: EngineStatus, detail: Option<String>) {
    *ctx.status.lock() = status;
    let _ = ctx.status_tx.send(EngineStatusEvent { status, detail });
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::PathBuf;
    use std::thread;
    use std::time::{Duration, Instant};

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::buffering::{create_audio_ring, CAPTURE_RING_CAPACITY, PLAYBACK_RING_CAPACITY};
    use crate::error::{HalcyonError, Result};
    use crate::sink::WaveSink;

    const FRAME_SIZE: usize = 1024;

    /// Records every persisted session in memory.
    struct MemorySink {
        sessions: Arc<Mutex<Vec<Vec<i16>>>>,
    }

    impl WaveSink for MemorySink {
        fn persist(&mut self, samples: &[i16], _sample_rate: u32) -> Result<PathBuf> {
            self.sessions.lock().push(samples.to_vec());
            Ok(PathBuf::from("memory.wav"))
        }
    }

    struct FailingSink;

    impl WaveSink for FailingSink {
        fn persist(&mut self, _samples: &[i16], _sample_rate: u32) -> Result<PathBuf> {
            Err(HalcyonError::Persistence("disk full".into()))
        }
    }

    struct TestHarness {
        ctx: PipelineContext,
        producer: AudioProducer,
        /// Held so the playback ring stays fully functional for the session.
        _playback_rx: AudioConsumer,
        running: Arc<AtomicBool>,
        device_failed: Arc<AtomicBool>,
        alpha: Arc<Mutex<f32>>,
        unsaved: Arc<Mutex<Option<Vec<i16>>>>,
        status_rx: broadcast::Receiver<EngineStatusEvent>,
        activity_rx: broadcast::Receiver<FrameActivityEvent>,
        saved_rx: broadcast::Receiver<SessionSavedEvent>,
    }

    fn harness(sink: SinkHandle, alpha: f32) -> TestHarness {
        let (producer, consumer) = create_audio_ring(CAPTURE_RING_CAPACITY);
        let (playback, playback_rx) = create_audio_ring(PLAYBACK_RING_CAPACITY);

        let (status_tx, status_rx) = broadcast::channel(32);
        let (activity_tx, activity_rx) = broadcast::channel(64);
        let (saved_tx, saved_rx) = broadcast::channel(8);

        let running = Arc::new(AtomicBool::new(true));
        let device_failed = Arc::new(AtomicBool::new(false));
        let alpha = Arc::new(Mutex::new(alpha));
        let unsaved = Arc::new(Mutex::new(None));

        let config = EngineConfig {
            sample_rate: 44_100,
            frame_size: FRAME_SIZE,
            initial_alpha: *alpha.lock(),
        };

        let ctx = PipelineContext {
            config,
            consumer,
            playback,
            running: Arc::clone(&running),
            device_failed: Arc::clone(&device_failed),
            alpha: Arc::clone(&alpha),
            sink,
            unsaved: Arc::clone(&unsaved),
            status: Arc::new(Mutex::new(EngineStatus::Running)),
            status_tx,
            activity_tx,
            saved_tx,
            capture_rate: 44_100,
            playback_rate: 44_100,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };

        TestHarness {
            ctx,
            producer,
            _playback_rx: playback_rx,
            running,
            device_failed,
            alpha,
            unsaved,
            status_rx,
            activity_rx,
            saved_rx,
        }
    }

    fn recv_with_timeout<T: Clone>(rx: &mut broadcast::Receiver<T>, timeout: Duration) -> T {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(ev) => return ev,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("channel closed unexpectedly"),
            }
        }
    }

    fn sine_frame(amplitude: f32) -> Vec<f32> {
        (0..FRAME_SIZE)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * 4.0 * i as f32 / FRAME_SIZE as f32).sin()
            })
            .collect()
    }

    #[test]
    fn session_buffers_and_persists_every_frame() {
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let sink = SinkHandle::new(MemorySink {
            sessions: Arc::clone(&sessions),
        });
        let mut h = harness(sink, 0.9);

        for _ in 0..4 {
            h.producer.push_slice(&sine_frame(0.5));
        }

        let diagnostics = Arc::clone(&h.ctx.diagnostics);
        let handle = thread::spawn(move || run(h.ctx));

        // Wait until all four frames produced activity events.
        let mut last_seq = 0;
        for _ in 0..4 {
            let ev = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
            last_seq = ev.seq;
        }
        assert_eq!(last_seq, 3);

        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        let saved = recv_with_timeout(&mut h.saved_rx, Duration::from_secs(1));
        assert_eq!(saved.samples_written, 4 * FRAME_SIZE);
        assert_eq!(saved.path.as_deref(), Some(std::path::Path::new("memory.wav")));
        assert!(saved.warning.is_none());

        let persisted = sessions.lock();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].len(), 4 * FRAME_SIZE);
        // A sine at 0.5 amplitude with a near-zero noise floor passes
        // through essentially intact.
        assert!(persisted[0].iter().any(|&s| s.abs() > 8_000));

        assert_eq!(diagnostics.snapshot().frames_processed, 4);

        let status = recv_with_timeout(&mut h.status_rx, Duration::from_secs(1));
        assert_eq!(status.status, EngineStatus::Idle);
    }

    #[test]
    fn empty_session_warns_and_skips_sink() {
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let sink = SinkHandle::new(MemorySink {
            sessions: Arc::clone(&sessions),
        });
        let mut h = harness(sink, 0.9);

        let handle = thread::spawn(move || run(h.ctx));
        thread::sleep(Duration::from_millis(30));
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        let saved = recv_with_timeout(&mut h.saved_rx, Duration::from_secs(1));
        assert!(saved.path.is_none());
        assert_eq!(saved.samples_written, 0);
        assert!(saved
            .warning
            .as_deref()
            .is_some_and(|w| w.contains("nothing to save")));
        assert!(sessions.lock().is_empty());
    }

    #[test]
    fn device_failure_flushes_session_and_reports_error() {
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let sink = SinkHandle::new(MemorySink {
            sessions: Arc::clone(&sessions),
        });
        let mut h = harness(sink, 0.9);

        h.producer.push_slice(&sine_frame(0.4));

        let handle = thread::spawn(move || run(h.ctx));

        // Let the frame process, then simulate a stream failure.
        recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
        h.device_failed.store(true, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        // Whatever was processed before the failure is still flushed.
        let saved = recv_with_timeout(&mut h.saved_rx, Duration::from_secs(1));
        assert_eq!(saved.samples_written, FRAME_SIZE);
        assert_eq!(sessions.lock().len(), 1);

        let status = recv_with_timeout(&mut h.status_rx, Duration::from_secs(1));
        assert_eq!(status.status, EngineStatus::Error);
        assert!(status
            .detail
            .as_deref()
            .is_some_and(|d| d.contains("device")));

        // The loop cleared the running flag itself.
        assert!(!h.running.load(Ordering::SeqCst));
    }

    #[test]
    fn persist_failure_parks_buffer_for_retry() {
        let sink = SinkHandle::new(FailingSink);
        let mut h = harness(sink, 0.9);

        h.producer.push_slice(&sine_frame(0.4));

        let unsaved = Arc::clone(&h.unsaved);
        let handle = thread::spawn(move || run(h.ctx));

        recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
        h.running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");

        let saved = recv_with_timeout(&mut h.saved_rx, Duration::from_secs(1));
        assert!(saved.path.is_none());
        assert!(saved
            .warning
            .as_deref()
            .is_some_and(|w| w.contains("retained for retry")));

        let parked = unsaved.lock();
        assert_eq!(parked.as_ref().map(Vec::len), Some(FRAME_SIZE));
    }

    #[test]
    fn shared_alpha_takes_effect_on_next_frame() {
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let sink = SinkHandle::new(MemorySink {
            sessions: Arc::clone(&sessions),
        });
        // alpha = 0: the estimate tracks each frame's mean |x| exactly.
        let mut h = harness(sink, 0.0);

        let constant = vec![0.25f32; FRAME_SIZE];
        h.producer.push_slice(&constant);

        let alpha = Arc::clone(&h.alpha);
        let producer_running = Arc::clone(&h.running);
        let handle = thread::spawn(move || run(h.ctx));

        let first = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
        assert!(
            (first.noise_estimate - 0.25).abs() < 1e-6,
            "estimate={}",
            first.noise_estimate
        );

        // alpha = 1: the estimate must freeze regardless of input.
        *alpha.lock() = 1.0;
        h.producer.push_slice(&vec![0.9f32; FRAME_SIZE]);

        let second = recv_with_timeout(&mut h.activity_rx, Duration::from_secs(2));
        assert!(
            (second.noise_estimate - 0.25).abs() < 1e-6,
            "estimate={}",
            second.noise_estimate
        );

        producer_running.store(false, Ordering::SeqCst);
        handle.join().expect("pipeline thread panicked");
    }
}
