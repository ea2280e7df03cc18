//! Processing nodes.
//!
//! Every node is mono: it receives the sum of its upstream connections and
//! writes one block of output per render quantum. Sources ignore their input.

use std::collections::VecDeque;
use std::f32::consts::PI;

use crate::audio::resample::RateConverter;
use crate::buffering::{AudioConsumer, Consumer};
use crate::graph::RENDER_QUANTUM;

/// What a node does, for introspection and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    MicrophoneSource,
    Convolver,
    Delay,
    BiquadFilter,
    Gain,
    BufferSource,
}

/// Contract for everything that can live in an [`AudioGraph`](super::AudioGraph).
pub trait Processor: Send + 'static {
    fn kind(&self) -> NodeKind;

    /// Process one block. `input` and `output` have the same length.
    fn process(&mut self, input: &[f32], output: &mut [f32]);
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

/// Upper bound on converted-but-unplayed microphone audio. Anything beyond
/// this is dropped from the front so latency cannot grow without bound.
const MAX_PENDING_INPUT: usize = RENDER_QUANTUM * 8;

/// Live input: drains the microphone ring and converts it to the context rate.
pub struct MicrophoneSource {
    consumer: AudioConsumer,
    converter: RateConverter,
    raw: Vec<f32>,
    converted: Vec<f32>,
    pending: VecDeque<f32>,
}

impl MicrophoneSource {
    pub fn new(consumer: AudioConsumer, converter: RateConverter) -> Self {
        Self {
            consumer,
            converter,
            raw: vec![0.0; RENDER_QUANTUM * 4],
            converted: Vec::with_capacity(RENDER_QUANTUM * 4),
            pending: VecDeque::with_capacity(MAX_PENDING_INPUT),
        }
    }
}

impl Processor for MicrophoneSource {
    fn kind(&self) -> NodeKind {
        NodeKind::MicrophoneSource
    }

    fn process(&mut self, _input: &[f32], output: &mut [f32]) {
        loop {
            let n = self.consumer.pop_slice(&mut self.raw);
            if n == 0 {
                break;
            }
            self.converted.clear();
            self.converter.process_into(&self.raw[..n], &mut self.converted);
            self.pending.extend(self.converted.iter().copied());
        }

        let overflow = self.pending.len().saturating_sub(MAX_PENDING_INPUT);
        if overflow > 0 {
            self.pending.drain(..overflow);
        }

        for out in output.iter_mut() {
            *out = self.pending.pop_front().unwrap_or(0.0);
        }
    }
}

// ---------------------------------------------------------------------------
// Gain
// ---------------------------------------------------------------------------

pub struct Gain {
    factor: f32,
}

impl Gain {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl Processor for Gain {
    fn kind(&self) -> NodeKind {
        NodeKind::Gain
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for (out, x) in output.iter_mut().zip(input) {
            *out = x * self.factor;
        }
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// Wet-only delay line; the dry signal is not mixed back in.
pub struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
    delay_samples: usize,
}

impl DelayLine {
    /// `delay_seconds` is clamped to `max_delay_seconds`.
    pub fn new(sample_rate: u32, delay_seconds: f32, max_delay_seconds: f32) -> Self {
        let max_samples = (max_delay_seconds.max(0.0) * sample_rate as f32).ceil() as usize;
        let delay_samples =
            ((delay_seconds.clamp(0.0, max_delay_seconds.max(0.0))) * sample_rate as f32).round()
                as usize;
        Self {
            buffer: vec![0.0; max_samples.max(delay_samples) + 1],
            write: 0,
            delay_samples,
        }
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples
    }
}

impl Processor for DelayLine {
    fn kind(&self) -> NodeKind {
        NodeKind::Delay
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let len = self.buffer.len();
        for (out, x) in output.iter_mut().zip(input) {
            self.buffer[self.write] = *x;
            let read = (self.write + len - self.delay_samples) % len;
            *out = self.buffer[read];
            self.write = (self.write + 1) % len;
        }
    }
}

// ---------------------------------------------------------------------------
// Biquad
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    LowPass,
    HighPass,
}

/// Second-order resonant filter (RBJ audio-EQ cookbook), transposed direct form II.
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl Biquad {
    pub fn new(filter: FilterType, sample_rate: u32, cutoff_hz: f32, q: f32) -> Self {
        let nyquist = sample_rate as f32 / 2.0;
        let f0 = cutoff_hz.clamp(10.0, nyquist * 0.99);
        let w0 = 2.0 * PI * f0 / sample_rate as f32;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q.max(1e-3));

        let (b0, b1, b2) = match filter {
            FilterType::LowPass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterType::HighPass => {
                let b1 = -(1.0 + cos_w0);
                (-b1 / 2.0, b1, -b1 / 2.0)
            }
        };
        let a0 = 1.0 + alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }
}

impl Processor for Biquad {
    fn kind(&self) -> NodeKind {
        NodeKind::BiquadFilter
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for (out, x) in output.iter_mut().zip(input) {
            let y = self.b0 * x + self.z1;
            self.z1 = self.b1 * x - self.a1 * y + self.z2;
            self.z2 = self.b2 * x - self.a2 * y;
            *out = y;
        }
    }
}

// ---------------------------------------------------------------------------
// Buffer source
// ---------------------------------------------------------------------------

/// Plays a prerecorded buffer once at a playback rate, with linear interpolation.
/// Outputs silence after the end of the buffer.
pub struct BufferSource {
    buffer: Vec<f32>,
    position: f64,
    step: f64,
}

impl BufferSource {
    pub fn new(buffer: Vec<f32>, buffer_rate: u32, context_rate: u32, playback_rate: f32) -> Self {
        Self {
            buffer,
            position: 0.0,
            step: playback_rate as f64 * buffer_rate as f64 / context_rate as f64,
        }
    }

    /// `seconds` of `sin(i / 10)` sampled at `sample_rate`.
    pub fn tone(sample_rate: u32, seconds: f32) -> Vec<f32> {
        let len = (sample_rate as f32 * seconds).round() as usize;
        (0..len).map(|i| (i as f32 / 10.0).sin()).collect()
    }

    pub fn finished(&self) -> bool {
        self.position >= (self.buffer.len().saturating_sub(1)) as f64
    }
}

impl Processor for BufferSource {
    fn kind(&self) -> NodeKind {
        NodeKind::BufferSource
    }

    fn process(&mut self, _input: &[f32], output: &mut [f32]) {
        for out in output.iter_mut() {
            if self.finished() {
                *out = 0.0;
                continue;
            }
            let idx = self.position as usize;
            let frac = (self.position - idx as f64) as f32;
            let a = self.buffer[idx];
            let b = self.buffer[idx + 1];
            *out = a + (b - a) * frac;
            self.position += self.step;
        }
    }
}
