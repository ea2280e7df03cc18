use thiserror::Error;

/// All errors produced by soundverse-core.
#[derive(Debug, Error)]
pub enum SoundverseError {
    /// No microphone, or permission to open it was denied.
    #[error("audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    /// Failure reported by the speech-recognition collaborator.
    #[error("speech recognition error: {0}")]
    RecognitionError(String),

    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    /// The remote command service could not produce a reply.
    #[error("remote command service failed: {0}")]
    RemoteCallFailure(String),

    /// No speech-recognition capability exists on this host.
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("audio graph error: {0}")]
    Graph(String),

    #[error("{connected} chains routed to the output at once")]
    DoubleRouting { connected: usize },

    #[error("assistant is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SoundverseError {
    /// `true` for failures that end the current session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SoundverseError::DeviceUnavailable(_) | SoundverseError::UnsupportedPlatform(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SoundverseError>;
