//! The live session and the manager that mutates its audio graph.
//!
//! ## Lifecycle
//!
//! ```text
//! Session::new()
//!     └─► acquire_input()   → audio context + microphone source node
//!         └─► apply_effect() → previous chain torn down, new chain connected
//!             └─► release_all() → nodes dropped, context closed, tracks stopped
//! ```
//!
//! `release_all()` leaves the session ready for another `acquire_input()`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    audio::{resample::RateConverter, AudioContext, MediaDevices, MicrophoneStream},
    buffering::{create_ring, INPUT_RING_CAPACITY},
    effects::{build_chain, EffectChain, EffectKind, EffectParams},
    error::{Result, SoundverseError},
    graph::{nodes::MicrophoneSource, NodeId, RENDER_QUANTUM},
};

/// Where the conversational loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnState {
    #[default]
    Idle,
    Listening,
    Interpreting,
    Speaking,
    Acting,
}

/// Audio resources of one assistant run.
#[derive(Default)]
pub struct Session {
    context: Option<AudioContext>,
    microphone: Option<MicrophoneStream>,
    source: Option<NodeId>,
    active_chain: Option<EffectChain>,
    turn_state: TurnState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn_state
    }

    pub fn set_turn_state(&mut self, state: TurnState) {
        if self.turn_state != state {
            debug!(from = ?self.turn_state, to = ?state, "turn state");
            self.turn_state = state;
        }
    }

    pub fn active_chain(&self) -> Option<&EffectChain> {
        self.active_chain.as_ref()
    }

    pub fn active_effect(&self) -> Option<EffectKind> {
        self.active_chain.as_ref().map(|c| c.kind)
    }

    pub fn has_input(&self) -> bool {
        self.context.is_some() && self.source.is_some()
    }

    /// Live microphone tracks; zero once released.
    pub fn active_tracks(&self) -> usize {
        self.microphone
            .as_ref()
            .map_or(0, MicrophoneStream::active_tracks)
    }

    pub fn context(&self) -> Option<&AudioContext> {
        self.context.as_ref()
    }

    /// Nodes currently routed to the output.
    pub fn routed_to_output(&self) -> usize {
        self.context
            .as_ref()
            .map_or(0, |ctx| ctx.graph().lock().destination_inputs().len())
    }
}

/// Builds and tears down effect chains on a [`Session`].
pub struct AudioGraphManager {
    devices: Box<dyn MediaDevices>,
    params: EffectParams,
}

impl AudioGraphManager {
    pub fn new(devices: Box<dyn MediaDevices>, params: EffectParams) -> Self {
        Self { devices, params }
    }

    pub fn params(&self) -> &EffectParams {
        &self.params
    }

    /// Open the audio context and microphone if not already open.
    ///
    /// # Errors
    /// `SoundverseError::DeviceUnavailable` when the microphone or speaker
    /// cannot be opened. Anything opened before the failure stays in the
    /// session for `release_all()`.
    pub fn acquire_input(&mut self, session: &mut Session) -> Result<()> {
        if session.context.is_none() {
            session.context = Some(AudioContext::open(self.devices.as_mut())?);
        }
        if session.source.is_some() {
            return Ok(());
        }

        let (producer, consumer) = create_ring(INPUT_RING_CAPACITY);
        let microphone = self.devices.open_microphone(producer)?;
        let input_rate = microphone.sample_rate();
        session.microphone = Some(microphone);

        let Some(context) = session.context.as_ref() else {
            return Err(SoundverseError::Graph("audio context missing".into()));
        };
        let converter = RateConverter::new(input_rate, context.sample_rate(), RENDER_QUANTUM)?;
        let source = context
            .graph()
            .lock()
            .add_node(Box::new(MicrophoneSource::new(consumer, converter)));
        session.source = Some(source);

        info!(
            input_rate,
            output_rate = context.sample_rate(),
            "microphone input acquired"
        );
        Ok(())
    }

    /// Replace the active chain with one of `kind`.
    ///
    /// The previous chain is always torn down first, even for the same kind.
    /// `EffectKind::None` only tears down.
    pub fn apply_effect(&mut self, session: &mut Session, kind: EffectKind) -> Result<()> {
        self.teardown_active(session);
        if kind == EffectKind::None {
            info!("effects cleared");
            return Ok(());
        }

        self.acquire_input(session)?;
        let Some(context) = session.context.as_ref() else {
            return Err(SoundverseError::Graph("audio context missing".into()));
        };

        let mut graph = context.graph().lock();
        let Some(chain) = build_chain(&mut graph, kind, &self.params, session.source)? else {
            return Ok(());
        };

        let connected = graph.destination_inputs().len();
        if connected > 1 {
            chain.teardown(&mut graph);
            warn!(connected, kind = %kind, "more than one chain routed to the output");
            return Err(SoundverseError::DoubleRouting { connected });
        }
        drop(graph);

        info!(kind = %kind, "effect applied");
        session.active_chain = Some(chain);
        Ok(())
    }

    /// Drop every node, close the context, stop every track. Idempotent.
    pub fn release_all(&mut self, session: &mut Session) {
        session.active_chain = None;
        session.source = None;
        if let Some(mut microphone) = session.microphone.take() {
            microphone.stop_all();
        }
        if let Some(mut context) = session.context.take() {
            context.graph().lock().clear();
            context.close();
            info!("session audio released");
        }
    }

    fn teardown_active(&self, session: &mut Session) {
        let Some(chain) = session.active_chain.take() else {
            return;
        };
        if let Some(context) = session.context.as_ref() {
            chain.teardown(&mut context.graph().lock());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_idle_and_empty() {
        let session = Session::new();
        assert_eq!(session.turn_state(), TurnState::Idle);
        assert!(!session.has_input());
        assert_eq!(session.active_tracks(), 0);
        assert_eq!(session.active_effect(), None);
        assert_eq!(session.routed_to_output(), 0);
    }

    #[test]
    fn turn_state_serializes_lowercase() {
        let json = serde_json::to_value(TurnState::Interpreting).unwrap();
        assert_eq!(json, "interpreting");
    }
}
