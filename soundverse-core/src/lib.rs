//! # soundverse-core
//!
//! Voice-controlled live audio effects.
//!
//! ## Architecture
//!
//! ```text
//! SpeechRecognizer ─► TurnController ─► RemoteInterpreter (reply text)
//!                          │  │
//!                          │  └────────► SpeechSynthesizer (reply, prompts)
//!                          ▼
//!                  AudioGraphManager ─► AudioGraph ─► render thread ─► speaker
//!                          ▲
//!                 microphone ring
//! ```
//!
//! Device callbacks are lock-free. All DSP runs on the render thread; the
//! turn loop only mutates the graph between quanta.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod controller;
pub mod effects;
pub mod error;
pub mod events;
pub mod graph;
pub mod intent;
pub mod remote;
pub mod session;
pub mod speech;

// Convenience re-exports for downstream crates
pub use audio::{AudioContext, MediaDevices, MediaTrack, MicrophoneStream, OutputSink};
pub use controller::{ControllerConfig, StopHandle, TurnController};
pub use effects::{EffectChain, EffectKind, EffectParams};
pub use error::{Result, SoundverseError};
pub use events::{TranscriptEvent, TurnStatusEvent};
pub use intent::{interpret, Intent};
pub use remote::{
    CommandService, HttpCommandService, LocalCommandService, RemoteInterpreter, FALLBACK_REPLY,
};
pub use session::{AudioGraphManager, Session, TurnState};
pub use speech::{RecognitionEvent, SpeechRecognizer, SpeechSynthesizer};

#[cfg(feature = "audio-cpal")]
pub use audio::CpalDevices;
