//! Lock-free SPSC ring buffers between device callbacks and the render thread.
//!
//! `ringbuf::HeapRb<f32>` gives a wait-free `push_slice`/`pop_slice`, safe to
//! call from real-time audio callbacks.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half: held by whoever writes samples.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half: held by whoever reads samples.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Microphone ring: 2^16 samples ≈ 1.4 s at 48 kHz.
/// The render thread drains it every quantum, so it only absorbs scheduling jitter.
pub const INPUT_RING_CAPACITY: usize = 1 << 16;

/// Output ring: 2^12 samples ≈ 85 ms at 48 kHz. Kept small because
/// everything queued here is latency between the microphone and the speaker.
pub const OUTPUT_RING_CAPACITY: usize = 1 << 12;

/// Create a matched producer/consumer pair with the given capacity.
pub fn create_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(capacity).split()
}
