//! Duplex audio I/O via the cpal backend.
//!
//! # Design constraints
//!
//! Both cpal callbacks run on OS audio threads at elevated priority. They
//! **must not**:
//! - Allocate heap memory (beyond the one-time scratch growth on the first
//!   callback)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by moving samples exclusively
//! through lock-free SPSC ring halves: the input callback pushes mono
//! f32 into the capture ring, the output callback drains the playback
//! ring, zero-filling on underrun.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). `AudioDuplex` therefore must be created and dropped on the
//! same thread. The engine accomplishes this by calling `open` inside
//! `spawn_blocking`, on the thread that then runs the pipeline loop.

pub mod device;
pub mod resample;

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, Stream,
};

#[cfg(feature = "audio-cpal")]
use crate::buffering::{Consumer, Producer};
use crate::{
    buffering::{AudioConsumer, AudioProducer},
    error::{HalcyonError, Result},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Handle to an active capture + playback stream pair.
///
/// **Not `Send`** — the underlying streams are bound to their creation
/// thread on Windows/macOS. Create and drop this type on the same OS
/// thread.
pub struct AudioDuplex {
    /// Kept alive so the input stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _input: Stream,
    /// Kept alive so the output stream is not dropped prematurely.
    #[cfg(feature = "audio-cpal")]
    _output: Stream,
    /// Shared flag — set to `false` to make the callbacks no-op.
    running: Arc<AtomicBool>,
    /// Raised by either stream's error callback; polled by the pipeline.
    failed: Arc<AtomicBool>,
    /// Capture sample rate reported by the input device (Hz).
    pub capture_rate: u32,
    /// Playback sample rate reported by the output device (Hz).
    pub playback_rate: u32,
}

impl AudioDuplex {
    /// Open the input device (by preferred name, falling back to the
    /// system default) and the default output device, wiring them to the
    /// given ring halves.
    ///
    /// Must be called from the thread that will also drop this value —
    /// in practice, inside `tokio::task::spawn_blocking`.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` / `NoDefaultOutputDevice` when no device is
    /// available, `AudioDevice` / `AudioStream` on cpal failures.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        capture: AudioProducer,
        playback: AudioConsumer,
        running: Arc<AtomicBool>,
        preferred_input: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let failed = Arc::new(AtomicBool::new(false));

        // ── Input side ────────────────────────────────────────────────────
        let mut selected_input = None;
        if let Some(preferred_name) = preferred_input {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_input = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });
                    if selected_input.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let input_device = match selected_input.or_else(|| host.default_input_device()) {
            Some(device) => device,
            None => return Err(HalcyonError::NoDefaultInputDevice),
        };

        let input_config = input_device
            .default_input_config()
            .map_err(|e| HalcyonError::AudioDevice(e.to_string()))?;
        let capture_rate = input_config.sample_rate().0;
        let input_channels = input_config.channels() as usize;

        info!(
            device = input_device.name().unwrap_or_default().as_str(),
            capture_rate, input_channels, "opening input device"
        );

        let input_stream = build_input_stream(
            &input_device,
            &input_config,
            capture,
            Arc::clone(&running),
            Arc::clone(&failed),
        )?;

        // ── Output side ───────────────────────────────────────────────────
        let output_device = host
            .default_output_device()
            .ok_or(HalcyonError::NoDefaultOutputDevice)?;
        let output_config = output_device
            .default_output_config()
            .map_err(|e| HalcyonError::AudioDevice(e.to_string()))?;
        let playback_rate = output_config.sample_rate().0;
        let output_channels = output_config.channels() as usize;

        info!(
            device = output_device.name().unwrap_or_default().as_str(),
            playback_rate, output_channels, "opening output device"
        );

        let output_stream = build_output_stream(
            &output_device,
            &output_config,
            playback,
            Arc::clone(&running),
            Arc::clone(&failed),
        )?;

        input_stream
            .play()
            .map_err(|e| HalcyonError::AudioStream(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| HalcyonError::AudioStream(e.to_string()))?;

        Ok(Self {
            _input: input_stream,
            _output: output_stream,
            running,
            failed,
            capture_rate,
            playback_rate,
        })
    }

    /// Returns `true` if either stream reported an unrecoverable error.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Clone of the failure flag, for the pipeline to poll per iteration.
    pub fn failure_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }

    /// Stop: signal the callbacks to no-op on their next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn build_input_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
) -> Result<Stream> {
    let stream_config: cpal::StreamConfig = config.clone().into();
    let ch = config.channels() as usize;

    let err_failed = Arc::clone(&failed);
    let err_fn = move |err: cpal::StreamError| {
        error!("input stream error: {err}");
        err_failed.store(true, Ordering::Release);
    };

    let stream = match config.sample_format() {
        SampleFormat::F32 => {
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    if ch == 1 {
                        let written = producer.push_slice(data);
                        if written < data.len() {
                            warn!("capture ring full: dropped {} samples", data.len() - written);
                        }
                        return;
                    }

                    let frames = data.len() / ch;
                    mix_buf.resize(frames, 0.0);
                    for f in 0..frames {
                        let mut sum = 0f32;
                        let base = f * ch;
                        for c in 0..ch {
                            sum += data[base + c];
                        }
                        mix_buf[f] = sum / ch as f32;
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!(
                            "capture ring full: dropped {} samples",
                            mix_buf.len() - written
                        );
                    }
                },
                err_fn,
                None,
            )
        }

        SampleFormat::I16 => {
            let mut mix_buf: Vec<f32> = Vec::new();
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _info| {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    let frames = data.len() / ch;
                    mix_buf.resize(frames, 0.0);
                    if ch == 1 {
                        for (idx, sample) in data.iter().take(frames).enumerate() {
                            mix_buf[idx] = *sample as f32 / 32768.0;
                        }
                    } else {
                        for f in 0..frames {
                            let mut sum = 0f32;
                            let base = f * ch;
                            for c in 0..ch {
                                sum += data[base + c] as f32 / 32768.0;
                            }
                            mix_buf[f] = sum / ch as f32;
                        }
                    }
                    let written = producer.push_slice(&mix_buf);
                    if written < mix_buf.len() {
                        warn!(
                            "capture ring full: dropped {} samples",
                            mix_buf.len() - written
                        );
                    }
                },
                err_fn,
                None,
            )
        }

        fmt => {
            return Err(HalcyonError::AudioStream(format!(
                "unsupported input sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| HalcyonError::AudioStream(e.to_string()))?;

    Ok(stream)
}

#[cfg(feature = "audio-cpal")]
fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    mut playback: AudioConsumer,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
) -> Result<Stream> {
    let stream_config: cpal::StreamConfig = config.clone().into();
    let ch = config.channels() as usize;

    let err_failed = Arc::clone(&failed);
    let err_fn = move |err: cpal::StreamError| {
        error!("output stream error: {err}");
        err_failed.store(true, Ordering::Release);
    };

    let stream = match config.sample_format() {
        SampleFormat::F32 => {
            let mut mono_buf: Vec<f32> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info| {
                    if !running.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    let frames = data.len() / ch;
                    mono_buf.resize(frames, 0.0);
                    let popped = playback.pop_slice(&mut mono_buf);
                    // Underrun fills the tail with silence rather than
                    // blocking the RT thread.
                    mono_buf[popped..].fill(0.0);
                    for f in 0..frames {
                        let base = f * ch;
                        for c in 0..ch {
                            data[base + c] = mono_buf[f];
                        }
                    }
                },
                err_fn,
                None,
            )
        }

        SampleFormat::I16 => {
            let mut mono_buf: Vec<f32> = Vec::new();
            device.build_output_stream(
                &stream_config,
                move |data: &mut [i16], _info| {
                    if !running.load(Ordering::Relaxed) {
                        data.fill(0);
                        return;
                    }
                    let frames = data.len() / ch;
                    mono_buf.resize(frames, 0.0);
                    let popped = playback.pop_slice(&mut mono_buf);
                    mono_buf[popped..].fill(0.0);
                    for f in 0..frames {
                        let sample = (mono_buf[f] * 32768.0).clamp(-32768.0, 32767.0) as i16;
                        let base = f * ch;
                        for c in 0..ch {
                            data[base + c] = sample;
                        }
                    }
                },
                err_fn,
                None,
            )
        }

        fmt => {
            return Err(HalcyonError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| HalcyonError::AudioStream(e.to_string()))?;

    Ok(stream)
}

/// Stub when the `audio-cpal` feature is disabled. The DSP pipeline and
/// engine stay fully testable through the ring buffers without a sound
/// card.
#[cfg(not(feature = "audio-cpal"))]
impl AudioDuplex {
    pub fn open(
        _capture: AudioProducer,
        _playback: AudioConsumer,
        running: Arc<AtomicBool>,
        _preferred_input: Option<&str>,
    ) -> Result<Self> {
        let _ = running;
        Err(HalcyonError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
