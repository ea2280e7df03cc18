//! Effect kinds and the node chains that realise them.
//!
//! | Kind | Topology |
//! |------|----------|
//! | Reverb | microphone → convolver → destination |
//! | Delay | microphone → delay line → destination |
//! | LowPass / HighPass | microphone → biquad → destination |
//! | PitchUp / PitchDown | tone buffer at an altered rate → destination |
//! | GainUp / GainDown | microphone → gain → destination |
//!
//! The pitch chains play a locally generated tone and never touch the live
//! microphone signal.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SoundverseError};
use crate::graph::{
    convolver::{impulse_response, Convolver},
    nodes::{Biquad, BufferSource, DelayLine, FilterType, Gain, Processor},
    AudioGraph, Endpoint, NodeId, RENDER_QUANTUM,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectKind {
    Reverb,
    Delay,
    LowPass,
    HighPass,
    PitchUp,
    PitchDown,
    GainUp,
    GainDown,
    None,
}

impl EffectKind {
    pub fn label(self) -> &'static str {
        match self {
            EffectKind::Reverb => "reverb",
            EffectKind::Delay => "delay",
            EffectKind::LowPass => "low-pass",
            EffectKind::HighPass => "high-pass",
            EffectKind::PitchUp => "pitch up",
            EffectKind::PitchDown => "pitch down",
            EffectKind::GainUp => "volume up",
            EffectKind::GainDown => "volume down",
            EffectKind::None => "none",
        }
    }

    /// Whether the chain is fed by the live microphone.
    pub fn uses_microphone(self) -> bool {
        !matches!(
            self,
            EffectKind::PitchUp | EffectKind::PitchDown | EffectKind::None
        )
    }
}

impl std::fmt::Display for EffectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed parameters for every effect kind.
#[derive(Debug, Clone)]
pub struct EffectParams {
    /// Impulse response length in seconds. Default: 0.5.
    pub reverb_seconds: f32,
    /// Impulse response channels, averaged to mono when convolving. Default: 2.
    pub reverb_channels: usize,
    /// Noise seed so the same reverb is built every time.
    pub reverb_seed: u64,
    /// Default: 0.5 s.
    pub delay_seconds: f32,
    /// Upper bound for `delay_seconds`. Default: 5.0 s.
    pub max_delay_seconds: f32,
    /// Cutoff shared by both filters. Default: 1000 Hz.
    pub filter_cutoff_hz: f32,
    pub filter_q: f32,
    /// Rate the pitch tone is generated at. Default: 44100.
    pub tone_sample_rate: u32,
    /// Default: 1.0 s.
    pub tone_seconds: f32,
    pub pitch_up_rate: f32,
    pub pitch_down_rate: f32,
    pub gain_up: f32,
    pub gain_down: f32,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            reverb_seconds: 0.5,
            reverb_channels: 2,
            reverb_seed: 0x5eed_0f_5a7e,
            delay_seconds: 0.5,
            max_delay_seconds: 5.0,
            filter_cutoff_hz: 1000.0,
            filter_q: 1.0,
            tone_sample_rate: 44_100,
            tone_seconds: 1.0,
            pitch_up_rate: 1.5,
            pitch_down_rate: 0.7,
            gain_up: 2.0,
            gain_down: 0.3,
        }
    }
}

/// Nodes of one applied effect.
///
/// `source` is the shared microphone node the chain hangs off, if any; it is
/// not owned by the chain. `nodes` are owned and removed on teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectChain {
    pub kind: EffectKind,
    pub source: Option<NodeId>,
    pub nodes: Vec<NodeId>,
}

impl EffectChain {
    /// Disconnect the chain from the microphone and drop its nodes.
    pub fn teardown(&self, graph: &mut AudioGraph) {
        if let Some(source) = self.source {
            graph.disconnect(source);
        }
        for id in &self.nodes {
            graph.remove(*id);
        }
        debug!(kind = %self.kind, nodes = self.nodes.len(), "effect chain torn down");
    }
}

/// Build and connect the chain for `kind`.
///
/// Returns `Ok(None)` for [`EffectKind::None`]. Microphone chains require
/// `source`. On error every node created here is removed again.
pub fn build_chain(
    graph: &mut AudioGraph,
    kind: EffectKind,
    params: &EffectParams,
    source: Option<NodeId>,
) -> Result<Option<EffectChain>> {
    if kind == EffectKind::None {
        return Ok(None);
    }
    let sample_rate = graph.sample_rate();

    let processor: Box<dyn Processor> = match kind {
        EffectKind::Reverb => {
            let impulse = impulse_response(
                sample_rate,
                params.reverb_seconds,
                params.reverb_channels,
                params.reverb_seed,
            );
            Box::new(Convolver::new(&impulse, RENDER_QUANTUM))
        }
        EffectKind::Delay => Box::new(DelayLine::new(
            sample_rate,
            params.delay_seconds,
            params.max_delay_seconds,
        )),
        EffectKind::LowPass => Box::new(Biquad::new(
            FilterType::LowPass,
            sample_rate,
            params.filter_cutoff_hz,
            params.filter_q,
        )),
        EffectKind::HighPass => Box::new(Biquad::new(
            FilterType::HighPass,
            sample_rate,
            params.filter_cutoff_hz,
            params.filter_q,
        )),
        EffectKind::PitchUp | EffectKind::PitchDown => {
            let rate = if kind == EffectKind::PitchUp {
                params.pitch_up_rate
            } else {
                params.pitch_down_rate
            };
            let tone = BufferSource::tone(params.tone_sample_rate, params.tone_seconds);
            Box::new(BufferSource::new(
                tone,
                params.tone_sample_rate,
                sample_rate,
                rate,
            ))
        }
        EffectKind::GainUp => Box::new(Gain::new(params.gain_up)),
        EffectKind::GainDown => Box::new(Gain::new(params.gain_down)),
        EffectKind::None => return Ok(None),
    };

    let source = if kind.uses_microphone() {
        match source {
            Some(id) if graph.contains(id) => Some(id),
            _ => {
                return Err(SoundverseError::Graph(format!(
                    "{kind} needs a microphone source"
                )))
            }
        }
    } else {
        None
    };

    let node = graph.add_node(processor);
    let chain = EffectChain {
        kind,
        source,
        nodes: vec![node],
    };

    let wired = match source {
        Some(src) => graph
            .connect(src, Endpoint::Node(node))
            .and_then(|_| graph.connect(node, Endpoint::Destination)),
        None => graph.connect(node, Endpoint::Destination),
    };
    if let Err(e) = wired {
        chain.teardown(graph);
        return Err(e);
    }

    debug!(kind = %kind, %node, "effect chain built");
    Ok(Some(chain))
}
