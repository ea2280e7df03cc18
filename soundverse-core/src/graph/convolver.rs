//! Convolution reverb.
//!
//! ## Algorithm
//!
//! Uniformly partitioned overlap-save convolution. The impulse response is
//! split into `P` partitions of `B` samples, each transformed once into an
//! `N = 2B` spectrum. Per block of `B` input samples:
//!
//! 1. Slide the `2B` input window and take its FFT.
//! 2. Push the spectrum onto a frequency-domain delay line of `P` spectra.
//! 3. Multiply-accumulate delay line × partitions, inverse FFT.
//! 4. The last `B` samples of the result are the output block.
//!
//! With `B` equal to the render quantum the convolver adds no latency.
//! Multi-channel impulse responses are convolved independently and averaged
//! to the mono graph signal.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::{rngs::StdRng, Rng, SeedableRng};
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::nodes::{NodeKind, Processor};

/// Decay over the length of the impulse response, in nepers (≈ −60 dB).
const IMPULSE_DECAY: f32 = 6.9;

/// Exponentially decaying seeded noise, one buffer per channel, normalised
/// so each channel carries unit energy.
pub fn impulse_response(sample_rate: u32, seconds: f32, channels: usize, seed: u64) -> Vec<Vec<f32>> {
    let len = ((sample_rate as f32 * seconds).round() as usize).max(1);
    let mut rng = StdRng::seed_from_u64(seed);

    (0..channels.max(1))
        .map(|_| {
            let mut data: Vec<f32> = (0..len)
                .map(|i| {
                    let envelope = (-IMPULSE_DECAY * i as f32 / len as f32).exp();
                    rng.gen_range(-1.0f32..1.0) * envelope
                })
                .collect();
            let energy = data.iter().map(|s| s * s).sum::<f32>().sqrt();
            if energy > 0.0 {
                data.iter_mut().for_each(|s| *s /= energy);
            }
            data
        })
        .collect()
}

pub struct Convolver {
    block: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// `[channel][partition][bin]`
    partitions: Vec<Vec<Vec<Complex<f32>>>>,
    /// Most recent input spectrum first.
    history: VecDeque<Vec<Complex<f32>>>,
    window: Vec<f32>,
    accumulator: Vec<Complex<f32>>,
    mixed: Vec<f32>,
    input_fill: Vec<f32>,
    output_ready: VecDeque<f32>,
}

impl Convolver {
    pub fn new(impulse: &[Vec<f32>], block: usize) -> Self {
        let block = block.max(1);
        let size = block * 2;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);

        let partitions: Vec<Vec<Vec<Complex<f32>>>> = impulse
            .iter()
            .map(|channel| {
                channel
                    .chunks(block)
                    .map(|part| {
                        let mut spectrum = vec![Complex::new(0.0, 0.0); size];
                        for (bin, s) in spectrum.iter_mut().zip(part) {
                            bin.re = *s;
                        }
                        fft.process(&mut spectrum);
                        spectrum
                    })
                    .collect()
            })
            .collect();
        let depth = partitions.iter().map(Vec::len).max().unwrap_or(0);

        Self {
            block,
            fft,
            ifft,
            partitions,
            history: VecDeque::with_capacity(depth),
            window: vec![0.0; size],
            accumulator: vec![Complex::new(0.0, 0.0); size],
            mixed: vec![0.0; block],
            input_fill: Vec::with_capacity(block),
            output_ready: VecDeque::with_capacity(block * 2),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.iter().map(Vec::len).max().unwrap_or(0)
    }

    fn process_block(&mut self) {
        let size = self.block * 2;
        self.window.copy_within(self.block.., 0);
        self.window[self.block..].copy_from_slice(&self.input_fill);
        self.input_fill.clear();

        // Reuse the oldest spectrum buffer once the delay line is full.
        let mut spectrum = if self.history.len() >= self.partition_count() {
            self.history.pop_back().unwrap_or_default()
        } else {
            Vec::new()
        };
        spectrum.clear();
        spectrum.extend(self.window.iter().map(|s| Complex::new(*s, 0.0)));
        self.fft.process(&mut spectrum);
        self.history.push_front(spectrum);

        self.mixed.iter_mut().for_each(|s| *s = 0.0);
        let channels = self.partitions.len().max(1) as f32;
        let scale = 1.0 / (size as f32 * channels);

        for channel in &self.partitions {
            self.accumulator
                .iter_mut()
                .for_each(|c| *c = Complex::new(0.0, 0.0));
            for (x, h) in self.history.iter().zip(channel) {
                for ((acc, xk), hk) in self.accumulator.iter_mut().zip(x).zip(h) {
                    *acc += xk * hk;
                }
            }
            self.ifft.process(&mut self.accumulator);
            for (out, y) in self.mixed.iter_mut().zip(&self.accumulator[self.block..]) {
                *out += y.re * scale;
            }
        }

        self.output_ready.extend(self.mixed.iter().copied());
    }
}

impl Processor for Convolver {
    fn kind(&self) -> NodeKind {
        NodeKind::Convolver
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        for x in input {
            self.input_fill.push(*x);
            if self.input_fill.len() == self.block {
                self.process_block();
            }
        }
        for out in output.iter_mut() {
            *out = self.output_ready.pop_front().unwrap_or(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn direct_convolution(x: &[f32], h: &[f32]) -> Vec<f32> {
        (0..x.len())
            .map(|n| {
                (0..h.len())
                    .filter(|k| *k <= n)
                    .map(|k| h[k] * x[n - k])
                    .sum()
            })
            .collect()
    }

    #[test]
    fn impulse_response_is_deterministic_and_decays() {
        let a = impulse_response(8_000, 0.5, 2, 7);
        let b = impulse_response(8_000, 0.5, 2, 7);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].len(), 4_000);
        assert_ne!(a[0], a[1]);

        let head: f32 = a[0][..400].iter().map(|s| s * s).sum();
        let tail: f32 = a[0][3_600..].iter().map(|s| s * s).sum();
        assert!(head > tail * 100.0);

        let energy: f32 = a[0].iter().map(|s| s * s).sum();
        assert_abs_diff_eq!(energy, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn matches_direct_convolution() {
        let h: Vec<f32> = (0..37).map(|i| ((i * 7 % 11) as f32 - 5.0) / 10.0).collect();
        let x: Vec<f32> = (0..64).map(|i| ((i * 3 % 13) as f32 - 6.0) / 10.0).collect();
        let expected = direct_convolution(&x, &h);

        let mut conv = Convolver::new(&[h], 16);
        assert_eq!(conv.partition_count(), 3);
        let mut out = vec![0.0; 64];
        for (xin, yout) in x.chunks(16).zip(out.chunks_mut(16)) {
            conv.process(xin, yout);
        }
        for (got, want) in out.iter().zip(&expected) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
        }
    }

    #[test]
    fn stereo_impulse_is_averaged_to_mono() {
        let left = vec![1.0, 0.0, 0.0, 0.0];
        let right = vec![0.0, 1.0, 0.0, 0.0];
        let mut conv = Convolver::new(&[left, right], 4);
        let mut out = vec![0.0; 4];
        conv.process(&[1.0, 0.0, 0.0, 0.0], &mut out);
        assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-5);
        assert_abs_diff_eq!(out[2], 0.0, epsilon = 1e-5);
    }
}
