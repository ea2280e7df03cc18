//! Pure turn-taking state machine: transitions only, no I/O.
//!
//! ```text
//! Idle ─greeting─► Listening ─transcript─► Interpreting ─reply─► Speaking
//!   ▲                  ▲                                            │ reply spoken
//!   │                  └──── relisten_delay ◄── follow-up ◄──── Acting
//!   └──────────── stop intent, external stop, device loss ──────────┘
//! ```
//!
//! The driver performs every returned [`TurnAction`] and feeds the outcome
//! back as a [`TurnEvent`]. Events the current state does not expect are
//! ignored.

use std::time::Duration;

use tracing::{debug, warn};

use crate::effects::EffectKind;
use crate::intent::{self, Intent};
use crate::session::TurnState;

/// Which fixed or dynamic utterance to speak.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Greeting,
    Reply(String),
    FollowUp,
    DeviceNotice,
    Farewell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Start,
    UtteranceFinished,
    RecognitionStarted,
    RecognitionResult(String),
    RecognitionError(String),
    RecognitionEnded,
    RemoteReply(String),
    EffectApplied(EffectKind),
    /// Applying failed without losing the device.
    EffectFailed(String),
    DeviceUnavailable(String),
    RelistenDue,
    StopRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction {
    Speak(Prompt),
    CancelSpeech,
    StartRecognition,
    StopRecognition,
    ScheduleRelisten(Duration),
    CancelRelisten,
    InterpretRemotely { transcript: String, intent: Intent },
    AbandonRemote,
    ApplyEffect(EffectKind),
    ReleaseAll,
    Finish,
}

/// The utterance whose completion the machine is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Awaiting {
    Greeting,
    Reply,
    FollowUp,
    DeviceNotice,
    Farewell,
}

pub struct TurnMachine {
    state: TurnState,
    relisten_delay: Duration,
    awaiting: Option<Awaiting>,
    pending_intent: Option<Intent>,
    recognizer_active: bool,
    heard_transcript: bool,
    applying: bool,
    started: bool,
    stopped: bool,
    finished: bool,
}

impl TurnMachine {
    pub fn new(relisten_delay: Duration) -> Self {
        Self {
            state: TurnState::Idle,
            relisten_delay,
            awaiting: None,
            pending_intent: None,
            recognizer_active: false,
            heard_transcript: false,
            applying: false,
            started: false,
            stopped: false,
            finished: false,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn pending_intent(&self) -> Option<Intent> {
        self.pending_intent
    }

    /// Started and not yet finished.
    pub fn in_progress(&self) -> bool {
        self.started && !self.finished
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn handle(&mut self, event: TurnEvent) -> Vec<TurnAction> {
        if self.finished {
            debug!(?event, "turn finished; event ignored");
            return Vec::new();
        }
        match event {
            TurnEvent::StopRequested => self.on_stop_requested(),
            _ if self.stopped => self.on_event_while_stopping(event),
            TurnEvent::Start => self.on_start(),
            TurnEvent::UtteranceFinished => self.on_utterance_finished(),
            TurnEvent::RecognitionStarted => {
                debug!("recognizer started");
                Vec::new()
            }
            TurnEvent::RecognitionResult(text) => self.on_transcript(text),
            TurnEvent::RecognitionError(code) => {
                warn!(code = %code, state = ?self.state, "recognition error");
                Vec::new()
            }
            TurnEvent::RecognitionEnded => self.on_recognition_ended(),
            TurnEvent::RemoteReply(reply) => self.on_remote_reply(reply),
            TurnEvent::EffectApplied(kind) => self.on_effect_settled(Some(kind), None),
            TurnEvent::EffectFailed(reason) => self.on_effect_settled(None, Some(reason)),
            TurnEvent::DeviceUnavailable(reason) => self.on_device_unavailable(reason),
            TurnEvent::RelistenDue => self.on_relisten_due(),
        }
    }

    fn on_start(&mut self) -> Vec<TurnAction> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        self.awaiting = Some(Awaiting::Greeting);
        vec![TurnAction::Speak(Prompt::Greeting)]
    }

    fn on_utterance_finished(&mut self) -> Vec<TurnAction> {
        match self.awaiting.take() {
            Some(Awaiting::Greeting) => self.listen(),
            Some(Awaiting::Reply) => self.act(),
            Some(Awaiting::FollowUp) => {
                vec![TurnAction::ScheduleRelisten(self.relisten_delay)]
            }
            Some(Awaiting::DeviceNotice) => {
                self.stopped = true;
                self.finish(vec![TurnAction::ReleaseAll])
            }
            Some(Awaiting::Farewell) | None => Vec::new(),
        }
    }

    fn on_transcript(&mut self, text: String) -> Vec<TurnAction> {
        if self.state != TurnState::Listening || self.heard_transcript {
            debug!(text = %text, "transcript outside a listen cycle ignored");
            return Vec::new();
        }
        self.heard_transcript = true;
        let intent = intent::interpret(&text);
        self.pending_intent = Some(intent);
        self.state = TurnState::Interpreting;

        let mut actions = Vec::new();
        if self.recognizer_active {
            actions.push(TurnAction::StopRecognition);
        }
        actions.push(TurnAction::InterpretRemotely {
            transcript: text,
            intent,
        });
        actions
    }

    fn on_recognition_ended(&mut self) -> Vec<TurnAction> {
        self.recognizer_active = false;
        if self.state == TurnState::Listening && !self.heard_transcript {
            debug!("listen cycle ended without a transcript");
            return vec![TurnAction::ScheduleRelisten(self.relisten_delay)];
        }
        Vec::new()
    }

    fn on_remote_reply(&mut self, reply: String) -> Vec<TurnAction> {
        if self.state != TurnState::Interpreting {
            return Vec::new();
        }
        self.state = TurnState::Speaking;
        self.awaiting = Some(Awaiting::Reply);
        vec![TurnAction::Speak(Prompt::Reply(reply))]
    }

    fn act(&mut self) -> Vec<TurnAction> {
        self.state = TurnState::Acting;
        match self.pending_intent.take().unwrap_or(Intent::Unrecognized) {
            Intent::Stop => {
                self.stopped = true;
                self.finish(vec![TurnAction::ReleaseAll])
            }
            Intent::ApplyEffect(kind) => {
                self.applying = true;
                vec![TurnAction::ApplyEffect(kind)]
            }
            Intent::Unrecognized => self.follow_up(),
        }
    }

    fn on_effect_settled(
        &mut self,
        applied: Option<EffectKind>,
        failure: Option<String>,
    ) -> Vec<TurnAction> {
        if self.state != TurnState::Acting || !self.applying {
            return Vec::new();
        }
        self.applying = false;
        if let Some(reason) = failure {
            warn!(reason = %reason, "effect not applied");
        }
        if let Some(kind) = applied {
            debug!(kind = %kind, "effect settled");
        }
        self.follow_up()
    }

    fn on_device_unavailable(&mut self, reason: String) -> Vec<TurnAction> {
        if self.state != TurnState::Acting || !self.applying {
            return Vec::new();
        }
        self.applying = false;
        warn!(reason = %reason, "audio device lost; ending session");
        self.awaiting = Some(Awaiting::DeviceNotice);
        vec![TurnAction::Speak(Prompt::DeviceNotice)]
    }

    fn on_relisten_due(&mut self) -> Vec<TurnAction> {
        let due = match self.state {
            TurnState::Acting => self.awaiting.is_none() && !self.applying,
            TurnState::Listening => !self.recognizer_active,
            _ => false,
        };
        if due {
            self.listen()
        } else {
            Vec::new()
        }
    }

    fn on_stop_requested(&mut self) -> Vec<TurnAction> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;

        let mut actions = Vec::new();
        if self.recognizer_active {
            self.recognizer_active = false;
            actions.push(TurnAction::StopRecognition);
        }
        if self.awaiting.take().is_some() {
            actions.push(TurnAction::CancelSpeech);
        }
        if self.state == TurnState::Interpreting {
            actions.push(TurnAction::AbandonRemote);
        }
        actions.push(TurnAction::CancelRelisten);
        actions.push(TurnAction::ReleaseAll);
        actions.push(TurnAction::Speak(Prompt::Farewell));

        self.pending_intent = None;
        self.applying = false;
        self.state = TurnState::Idle;
        self.awaiting = Some(Awaiting::Farewell);
        actions
    }

    /// After a stop only the farewell (or device notice) still matters.
    fn on_event_while_stopping(&mut self, event: TurnEvent) -> Vec<TurnAction> {
        match (event, self.awaiting) {
            (TurnEvent::UtteranceFinished, Some(Awaiting::Farewell)) => {
                self.awaiting = None;
                self.finish(Vec::new())
            }
            (TurnEvent::RecognitionEnded, _) => {
                self.recognizer_active = false;
                Vec::new()
            }
            (event, _) => {
                debug!(?event, "event after stop ignored");
                Vec::new()
            }
        }
    }

    fn listen(&mut self) -> Vec<TurnAction> {
        self.state = TurnState::Listening;
        self.recognizer_active = true;
        self.heard_transcript = false;
        vec![TurnAction::StartRecognition]
    }

    fn follow_up(&mut self) -> Vec<TurnAction> {
        self.awaiting = Some(Awaiting::FollowUp);
        vec![TurnAction::Speak(Prompt::FollowUp)]
    }

    fn finish(&mut self, mut actions: Vec<TurnAction>) -> Vec<TurnAction> {
        self.state = TurnState::Idle;
        self.finished = true;
        actions.push(TurnAction::Finish);
        actions
    }
}
