//! Microphone → context sample-rate conversion using a rubato `FastFixedIn`.
//!
//! The microphone and the output device rarely agree on a rate (44.1 kHz
//! headsets next to 48 kHz speakers are common). The microphone source node
//! converts captured audio to the context rate on the render thread, where
//! allocation is allowed.
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{error, info};

use crate::error::{Result, SoundverseError};

/// Converts mono f32 audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when both rates match.
    resampler: Option<FastFixedIn<f32>>,
    /// Input accumulated until rubato has a full block.
    pending: Vec<f32>,
    block: usize,
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// `block` is the number of input frames rubato consumes per call.
    pub fn new(from_rate: u32, to_rate: u32, block: usize) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            block,
            1,
        )
        .map_err(|e| SoundverseError::AudioStream(format!("resampler init: {e}")))?;

        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];
        info!(from_rate, to_rate, block, "microphone resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(block * 2),
            block,
            scratch,
        })
    }

    /// Convert `samples` and append the result to `out`.
    ///
    /// Input shorter than a rubato block is held back until the next call.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        let Some(ref mut resampler) = self.resampler else {
            out.extend_from_slice(samples);
            return;
        };

        self.pending.extend_from_slice(samples);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.block {
            let block = &self.pending[consumed..consumed + self.block];
            match resampler.process_into_buffer(&[block], &mut self.scratch, None) {
                Ok((_, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            consumed += self.block;
        }
        self.pending.drain(..consumed);
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
