//! Events broadcast to hosts.
//!
//! | Event | Emitted when |
//! |-------|--------------|
//! | `TurnStatusEvent` | the turn state changes |
//! | `TranscriptEvent` | a final transcript has been classified |

use serde::{Deserialize, Serialize};

use crate::effects::EffectKind;
use crate::intent::Intent;
use crate::session::TurnState;

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub text: String,
    /// Local classification of `text`.
    pub intent: Intent,
}

// ---------------------------------------------------------------------------
// Turn status events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStatusEvent {
    pub seq: u64,
    pub state: TurnState,
    /// Effect connected to the output at the time of the event.
    pub active_effect: Option<EffectKind>,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_serializes_with_camel_case() {
        let event = TurnStatusEvent {
            seq: 3,
            state: TurnState::Listening,
            active_effect: Some(EffectKind::HighPass),
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["state"], "listening");
        assert_eq!(json["activeEffect"], "highPass");
        assert!(json["detail"].is_null());

        let round_trip: TurnStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.state, TurnState::Listening);
        assert_eq!(round_trip.active_effect, Some(EffectKind::HighPass));
    }

    #[test]
    fn transcript_event_carries_the_intent() {
        let event = TranscriptEvent {
            seq: 1,
            text: "add some reverb please".into(),
            intent: Intent::ApplyEffect(EffectKind::Reverb),
        };

        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["text"], "add some reverb please");
        assert_eq!(json["intent"]["type"], "applyEffect");
        assert_eq!(json["intent"]["effect"], "reverb");
    }

    #[test]
    fn turn_state_rejects_unknown_values() {
        let bad = serde_json::json!({
            "seq": 1,
            "state": "Dancing",
            "activeEffect": null,
            "detail": null
        });
        assert!(serde_json::from_value::<TurnStatusEvent>(bad).is_err());
    }
}
