//! Lock-free SPSC ring buffers for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callbacks.
//!
//! Two rings exist per session: the capture ring (device callback →
//! pipeline) and the playback ring (pipeline → device callback).

pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half of a ring.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half of a ring.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^18 = 262 144 f32 samples ≈ 5.9 s at 44.1 kHz.
/// Enough slack for the pipeline to fall behind a full FFT frame or two
/// without the callback dropping input.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Playback ring capacity: 2^16 = 65 536 samples ≈ 1.5 s at 44.1 kHz.
/// Deliberately smaller — anything the pipeline produces beyond this is
/// stale for live monitoring.
pub const PLAYBACK_RING_CAPACITY: usize = 1 << 16;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_audio_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity).split()
}
