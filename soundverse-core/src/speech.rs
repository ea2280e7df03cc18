//! Speech collaborators.
//!
//! Recognition and synthesis live outside this crate; hosts plug them in
//! through [`SpeechRecognizer`] and [`SpeechSynthesizer`].

use tokio::sync::{broadcast, oneshot};

use crate::error::Result;

/// Lifecycle of one listen cycle.
///
/// A cycle yields at most one `Result` and always finishes with `Ended`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Started,
    /// A final transcript.
    Result(String),
    /// Recognizer error code, e.g. `"no-speech"` or `"not-allowed"`.
    Error(String),
    Ended,
}

pub trait SpeechRecognizer: Send + Sync + 'static {
    /// `false` when the host has no recognition capability at all.
    fn is_available(&self) -> bool;

    /// Begin a listen cycle.
    ///
    /// # Errors
    /// `SoundverseError::RecognitionError` if the cycle could not start.
    fn start(&self) -> Result<()>;

    /// End the current cycle early. A no-op when not listening.
    fn stop(&self);

    fn subscribe(&self) -> broadcast::Receiver<RecognitionEvent>;
}

pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Queue `text` for playback.
    ///
    /// The receiver resolves when the utterance finishes; a dropped sender
    /// counts as finished too.
    fn speak(&self, text: &str) -> oneshot::Receiver<()>;

    /// Cut off whatever is being spoken.
    fn cancel(&self);
}
