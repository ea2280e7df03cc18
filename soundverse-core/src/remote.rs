//! Remote interpretation of transcripts.
//!
//! The command service is reached through [`CommandService`]; the HTTP
//! implementation POSTs `{"audio": transcript}` and reads `{"text": reply}`.
//! [`RemoteInterpreter`] bounds every call with a timeout and turns any
//! failure into [`FALLBACK_REPLY`], so callers always get something to say.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, SoundverseError};
use crate::intent;

/// Spoken when the command service cannot produce a reply.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't process that.";

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/process-audio";

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of `POST /process-audio`. The field carries transcript text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessAudioRequest {
    pub audio: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessAudioResponse {
    pub text: String,
}

/// Text-in, text-out command processing.
#[async_trait]
pub trait CommandService: Send + Sync + 'static {
    async fn process(&self, transcript: &str) -> Result<String>;
}

/// Talks to a command service over HTTP.
pub struct HttpCommandService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpCommandService {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SoundverseError::RemoteCallFailure(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommandService for HttpCommandService {
    async fn process(&self, transcript: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&ProcessAudioRequest {
                audio: transcript.to_string(),
            })
            .send()
            .await
            .map_err(|e| SoundverseError::RemoteCallFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SoundverseError::RemoteCallFailure(format!(
                "{} returned {status}",
                self.endpoint
            )));
        }

        let body: ProcessAudioResponse = response
            .json()
            .await
            .map_err(|e| SoundverseError::RemoteCallFailure(format!("malformed reply: {e}")))?;
        Ok(body.text)
    }
}

/// Answers with the canned reply for the local intent, without any I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCommandService;

#[async_trait]
impl CommandService for LocalCommandService {
    async fn process(&self, transcript: &str) -> Result<String> {
        Ok(intent::interpret(transcript).reply_text().to_string())
    }
}

/// Bounded, infallible front for a [`CommandService`].
#[derive(Clone)]
pub struct RemoteInterpreter {
    service: Arc<dyn CommandService>,
    timeout: Duration,
}

impl RemoteInterpreter {
    pub fn new(service: Arc<dyn CommandService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The service's reply, or [`FALLBACK_REPLY`] on error or timeout.
    pub async fn interpret_remotely(&self, transcript: &str) -> String {
        match tokio::time::timeout(self.timeout, self.service.process(transcript)).await {
            Ok(Ok(reply)) => {
                debug!(reply = %reply, "command service replied");
                reply
            }
            Ok(Err(e)) => {
                warn!("command service failed: {e}");
                FALLBACK_REPLY.to_string()
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "command service timed out");
                FALLBACK_REPLY.to_string()
            }
        }
    }
}
