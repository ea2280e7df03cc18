//! Keyword interpretation of transcripts.

use serde::{Deserialize, Serialize};

use crate::effects::EffectKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "effect")]
pub enum Intent {
    ApplyEffect(EffectKind),
    Stop,
    Unrecognized,
}

/// Checked in order; the first keyword found anywhere in the transcript wins.
const KEYWORDS: &[(&str, Intent)] = &[
    ("reverb", Intent::ApplyEffect(EffectKind::Reverb)),
    ("delay", Intent::ApplyEffect(EffectKind::Delay)),
    ("echo", Intent::ApplyEffect(EffectKind::Delay)),
    ("low pass", Intent::ApplyEffect(EffectKind::LowPass)),
    ("high pass", Intent::ApplyEffect(EffectKind::HighPass)),
    ("pitch up", Intent::ApplyEffect(EffectKind::PitchUp)),
    ("pitch down", Intent::ApplyEffect(EffectKind::PitchDown)),
    ("increase volume", Intent::ApplyEffect(EffectKind::GainUp)),
    ("decrease volume", Intent::ApplyEffect(EffectKind::GainDown)),
    ("stop", Intent::Stop),
];

/// Classify a transcript. Never fails; unmatched text is `Unrecognized`.
pub fn interpret(transcript: &str) -> Intent {
    let lowered = transcript.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map_or(Intent::Unrecognized, |(_, intent)| *intent)
}

impl Intent {
    /// The reply the command service gives for this intent.
    pub fn reply_text(self) -> &'static str {
        match self {
            Intent::ApplyEffect(EffectKind::Reverb) => "Reverb effect added.",
            Intent::ApplyEffect(EffectKind::Delay) => "Delay effect applied.",
            Intent::ApplyEffect(EffectKind::LowPass) => "Low-pass filter added.",
            Intent::ApplyEffect(EffectKind::HighPass) => "High-pass filter applied.",
            Intent::ApplyEffect(EffectKind::PitchUp) => "Pitch shifted up.",
            Intent::ApplyEffect(EffectKind::PitchDown) => "Pitch shifted down.",
            Intent::ApplyEffect(EffectKind::GainUp) => "Volume increased.",
            Intent::ApplyEffect(EffectKind::GainDown) => "Volume decreased.",
            Intent::Stop | Intent::ApplyEffect(EffectKind::None) => "All effects stopped.",
            Intent::Unrecognized => {
                "Sorry, I didn't understand that. Try saying 'add reverb' or 'stop'."
            }
        }
    }
}
