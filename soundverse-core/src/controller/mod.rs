//! `TurnController`: the conversational loop.
//!
//! ## Lifecycle
//!
//! ```text
//! TurnController::new()
//!     └─► run()    → greeting, then listen → interpret → speak → act → relisten
//!         └─► StopHandle::stop()  → recognizer stopped, remote abandoned,
//!                                   audio released, farewell spoken
//! ```
//!
//! ## Threading
//!
//! `run()` is a single task. It suspends only on the stop signal, recognizer
//! events, the pending remote reply, the utterance in flight and the relisten
//! timer, all raced in one biased `select!` with stop first. Remote calls run
//! on a spawned task so stopping can abort them without waiting. The task
//! handle lives on the controller, so `shutdown()` aborts it even after a
//! `run()` future was dropped.

pub mod machine;

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::{
    effects::EffectKind,
    error::{Result, SoundverseError},
    events::{TranscriptEvent, TurnStatusEvent},
    remote::{RemoteInterpreter, DEFAULT_REMOTE_TIMEOUT, FALLBACK_REPLY},
    session::{AudioGraphManager, Session, TurnState},
    speech::{RecognitionEvent, SpeechRecognizer, SpeechSynthesizer},
};
pub use machine::{Prompt, TurnAction, TurnEvent, TurnMachine};

/// Broadcast channel capacity for status and transcript events.
const BROADCAST_CAP: usize = 64;

/// Configuration for `TurnController`.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Spoken once when the assistant starts.
    pub greeting: String,
    /// Spoken after every handled command that does not end the session.
    pub follow_up: String,
    /// Spoken after an external stop.
    pub farewell: String,
    /// Spoken when the microphone cannot be opened.
    pub device_notice: String,
    /// Pause before listening again. Default: 1500 ms.
    pub relisten_delay: Duration,
    /// Upper bound on one remote interpretation. Default: 10 s.
    pub remote_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            greeting: "Hi there. I'm listening. Say something like add reverb or stop.".into(),
            follow_up: "What would you like to do next?".into(),
            farewell: "Goodbye!".into(),
            device_notice: "I can't reach your microphone, so I'm stopping now.".into(),
            relisten_delay: Duration::from_millis(1500),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

impl ControllerConfig {
    fn prompt_text(&self, prompt: &Prompt) -> String {
        match prompt {
            Prompt::Greeting => self.greeting.clone(),
            Prompt::Reply(text) => text.clone(),
            Prompt::FollowUp => self.follow_up.clone(),
            Prompt::DeviceNotice => self.device_notice.clone(),
            Prompt::Farewell => self.farewell.clone(),
        }
    }
}

/// Requests a stop from outside the controller task. Cheap to clone.
///
/// A stop requested before the first `run()` starts is honoured as soon as it
/// does. Once a run has finished, stops are ignored until the next `run()`
/// begins.
#[derive(Clone)]
pub struct StopHandle(Arc<StopSignal>);

struct StopSignal {
    state: Mutex<StopState>,
    notify: Notify,
}

struct StopState {
    armed: bool,
    requested: bool,
}

impl Default for StopHandle {
    fn default() -> Self {
        Self(Arc::new(StopSignal {
            state: Mutex::new(StopState {
                armed: true,
                requested: false,
            }),
            notify: Notify::new(),
        }))
    }
}

impl StopHandle {
    pub fn stop(&self) {
        {
            let mut state = self.0.state.lock();
            if !state.armed {
                debug!("stop ignored; assistant not running");
                return;
            }
            state.requested = true;
        }
        self.0.notify.notify_waiters();
    }

    fn arm(&self) {
        self.0.state.lock().armed = true;
    }

    /// Forget any stop not yet consumed and ignore new ones.
    fn disarm(&self) {
        let mut state = self.0.state.lock();
        state.armed = false;
        state.requested = false;
    }

    fn take_request(&self) -> bool {
        std::mem::take(&mut self.0.state.lock().requested)
    }

    /// Resolves once a stop is requested, consuming the request.
    async fn requested(&self) {
        loop {
            // Registered before the check so a concurrent `stop()` is not lost.
            let notified = self.0.notify.notified();
            if self.take_request() {
                return;
            }
            notified.await;
        }
    }
}

/// Work the loop is waiting on besides recognizer events.
#[derive(Default)]
struct Pending {
    utterance: Option<oneshot::Receiver<()>>,
    remote: Option<JoinHandle<String>>,
    relisten: Option<Pin<Box<Sleep>>>,
}

pub struct TurnController {
    config: ControllerConfig,
    machine: TurnMachine,
    session: Session,
    audio: AudioGraphManager,
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    remote: RemoteInterpreter,
    stop: StopHandle,
    pending: Pending,
    status_tx: broadcast::Sender<TurnStatusEvent>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    seq: AtomicU64,
}

impl TurnController {
    /// `remote` keeps its own timeout; `config.remote_timeout` is what hosts
    /// should build it with.
    pub fn new(
        config: ControllerConfig,
        audio: AudioGraphManager,
        recognizer: Arc<dyn SpeechRecognizer>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        remote: RemoteInterpreter,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            machine: TurnMachine::new(config.relisten_delay),
            config,
            session: Session::new(),
            audio,
            recognizer,
            synthesizer,
            remote,
            stop: StopHandle::default(),
            pending: Pending::default(),
            status_tx,
            transcript_tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Use a stop handle created before the controller, e.g. one already
    /// given to a recognizer.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<TurnStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> TurnState {
        self.machine.state()
    }

    /// Run the loop until a stop intent, an external stop, or device loss.
    ///
    /// # Errors
    /// - `SoundverseError::UnsupportedPlatform` if no recognizer exists. No
    ///   state changes in that case.
    /// - `SoundverseError::AlreadyRunning` if a previous `run()` was dropped
    ///   mid-turn and `shutdown()` has not been called since.
    pub async fn run(&mut self) -> Result<()> {
        if !self.recognizer.is_available() {
            return Err(SoundverseError::UnsupportedPlatform(
                "speech recognition is not available on this host".into(),
            ));
        }
        if self.machine.in_progress() {
            return Err(SoundverseError::AlreadyRunning);
        }
        if self.machine.is_finished() {
            self.machine = TurnMachine::new(self.config.relisten_delay);
        }

        info!("assistant started");
        self.stop.arm();
        let mut recognition = self.recognizer.subscribe();
        let mut recognizer_open = true;
        let stop = self.stop.clone();
        self.pending = Pending::default();
        self.dispatch(TurnEvent::Start);

        while !self.machine.is_finished() {
            let event = tokio::select! {
                biased;
                _ = stop.requested() => TurnEvent::StopRequested,
                received = recognition.recv(), if recognizer_open => match received {
                    Ok(event) => recognition_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "recognition events lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("recognizer went away; stopping");
                        recognizer_open = false;
                        TurnEvent::StopRequested
                    }
                },
                reply = wait_remote(&mut self.pending.remote) => TurnEvent::RemoteReply(reply),
                _ = wait_utterance(&mut self.pending.utterance) => TurnEvent::UtteranceFinished,
                _ = wait_relisten(&mut self.pending.relisten) => TurnEvent::RelistenDue,
            };
            self.dispatch(event);
        }

        self.abandon_remote();
        self.stop.disarm();
        info!("assistant finished");
        Ok(())
    }

    /// Release all audio and reset the loop. For hosts that drop a running
    /// `run()` future instead of stopping it.
    pub fn shutdown(&mut self) {
        self.abandon_remote();
        self.pending = Pending::default();
        self.stop.disarm();
        self.recognizer.stop();
        self.synthesizer.cancel();
        self.audio.release_all(&mut self.session);
        self.machine = TurnMachine::new(self.config.relisten_delay);
        self.sync_state(Some("shut down".into()));
    }

    /// Feed `event` to the machine and perform the resulting actions, along
    /// with any events those actions produce.
    fn dispatch(&mut self, event: TurnEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            debug!(?event, state = ?self.machine.state(), "turn event");
            let actions = self.machine.handle(event);
            for action in actions {
                self.perform(action, &mut queue);
            }
            self.sync_state(None);
        }
    }

    fn perform(&mut self, action: TurnAction, queue: &mut VecDeque<TurnEvent>) {
        match action {
            TurnAction::Speak(prompt) => {
                let text = self.config.prompt_text(&prompt);
                info!(text = %text, "speaking");
                self.pending.utterance = Some(self.synthesizer.speak(&text));
            }
            TurnAction::CancelSpeech => {
                self.pending.utterance = None;
                self.synthesizer.cancel();
            }
            TurnAction::StartRecognition => {
                if let Err(e) = self.recognizer.start() {
                    queue.push_back(TurnEvent::RecognitionError(e.to_string()));
                    queue.push_back(TurnEvent::RecognitionEnded);
                }
            }
            TurnAction::StopRecognition => self.recognizer.stop(),
            TurnAction::ScheduleRelisten(after) => {
                self.pending.relisten = Some(Box::pin(tokio::time::sleep(after)));
            }
            TurnAction::CancelRelisten => self.pending.relisten = None,
            TurnAction::InterpretRemotely { transcript, intent } => {
                info!(transcript = %transcript, ?intent, "transcript received");
                let _ = self.transcript_tx.send(TranscriptEvent {
                    seq: self.next_seq(),
                    text: transcript.clone(),
                    intent,
                });
                let remote = self.remote.clone();
                self.pending.remote = Some(tokio::spawn(async move {
                    remote.interpret_remotely(&transcript).await
                }));
            }
            TurnAction::AbandonRemote => self.abandon_remote(),
            TurnAction::ApplyEffect(kind) => queue.push_back(self.apply(kind)),
            TurnAction::ReleaseAll => self.audio.release_all(&mut self.session),
            TurnAction::Finish => {
                self.pending.utterance = None;
                self.pending.relisten = None;
            }
        }
    }

    fn abandon_remote(&mut self) {
        if let Some(remote) = self.pending.remote.take() {
            remote.abort();
            debug!("pending remote call abandoned");
        }
    }

    fn apply(&mut self, kind: EffectKind) -> TurnEvent {
        match self.audio.apply_effect(&mut self.session, kind) {
            Ok(()) => TurnEvent::EffectApplied(kind),
            Err(e @ SoundverseError::DeviceUnavailable(_)) => {
                TurnEvent::DeviceUnavailable(e.to_string())
            }
            Err(e) => TurnEvent::EffectFailed(e.to_string()),
        }
    }

    /// Mirror the machine state into the session and broadcast changes.
    fn sync_state(&mut self, detail: Option<String>) {
        let state = self.machine.state();
        if state == self.session.turn_state() && detail.is_none() {
            return;
        }
        self.session.set_turn_state(state);
        let _ = self.status_tx.send(TurnStatusEvent {
            seq: self.next_seq(),
            state,
            active_effect: self.session.active_effect(),
            detail,
        });
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

fn recognition_event(event: RecognitionEvent) -> TurnEvent {
    match event {
        RecognitionEvent::Started => TurnEvent::RecognitionStarted,
        RecognitionEvent::Result(text) => TurnEvent::RecognitionResult(text),
        RecognitionEvent::Error(code) => TurnEvent::RecognitionError(code),
        RecognitionEvent::Ended => TurnEvent::RecognitionEnded,
    }
}

async fn wait_remote(slot: &mut Option<JoinHandle<String>>) -> String {
    let Some(handle) = slot.as_mut() else {
        return std::future::pending().await;
    };
    let reply = match handle.await {
        Ok(reply) => reply,
        Err(e) => {
            warn!("remote task failed: {e}");
            FALLBACK_REPLY.to_string()
        }
    };
    *slot = None;
    reply
}

async fn wait_utterance(slot: &mut Option<oneshot::Receiver<()>>) {
    let Some(done) = slot.as_mut() else {
        return std::future::pending().await;
    };
    // A dropped sender also means the utterance is over.
    let _ = done.await;
    *slot = None;
}

async fn wait_relisten(slot: &mut Option<Pin<Box<Sleep>>>) {
    let Some(timer) = slot.as_mut() else {
        return std::future::pending().await;
    };
    timer.as_mut().await;
    *slot = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_conversation_script() {
        let config = ControllerConfig::default();
        assert_eq!(config.follow_up, "What would you like to do next?");
        assert_eq!(config.farewell, "Goodbye!");
        assert_eq!(config.relisten_delay, Duration::from_millis(1500));
        assert_eq!(config.remote_timeout, Duration::from_secs(10));
    }

    #[test]
    fn prompts_resolve_to_config_text() {
        let config = ControllerConfig::default();
        assert_eq!(config.prompt_text(&Prompt::Farewell), "Goodbye!");
        assert_eq!(
            config.prompt_text(&Prompt::Reply("Reverb effect added.".into())),
            "Reverb effect added."
        );
    }
}
