//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};

use soundverse_core::{
    buffering::{AudioConsumer, AudioProducer},
    remote::{CommandService, LocalCommandService, RemoteInterpreter},
    AudioGraphManager, ControllerConfig, EffectParams, MediaDevices, MediaTrack,
    MicrophoneStream, OutputSink, RecognitionEvent, SoundverseError, SpeechRecognizer,
    SpeechSynthesizer, TurnController, TurnState, TurnStatusEvent,
};

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProbeState {
    tracks: Vec<Arc<AtomicBool>>,
    sinks: Vec<Arc<AtomicBool>>,
    deny_microphone: bool,
}

/// Observes what the mock devices have opened.
#[derive(Clone, Default)]
pub struct DeviceProbe(Arc<Mutex<ProbeState>>);

impl DeviceProbe {
    pub fn deny_microphone(&self) {
        self.0.lock().deny_microphone = true;
    }

    pub fn microphone_opens(&self) -> usize {
        self.0.lock().tracks.len()
    }

    pub fn live_tracks(&self) -> usize {
        self.0
            .lock()
            .tracks
            .iter()
            .filter(|t| t.load(Ordering::SeqCst))
            .count()
    }

    pub fn open_sinks(&self) -> usize {
        self.0
            .lock()
            .sinks
            .iter()
            .filter(|s| s.load(Ordering::SeqCst))
            .count()
    }
}

pub struct MockDevices {
    probe: DeviceProbe,
    input_rate: u32,
    output_rate: u32,
}

impl MockDevices {
    pub fn new(probe: DeviceProbe) -> Self {
        Self {
            probe,
            input_rate: 48_000,
            output_rate: 48_000,
        }
    }

    pub fn with_input_rate(mut self, rate: u32) -> Self {
        self.input_rate = rate;
        self
    }
}

struct MockTrack {
    live: Arc<AtomicBool>,
    _producer: AudioProducer,
}

impl MediaTrack for MockTrack {
    fn label(&self) -> &str {
        "mock microphone"
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

struct MockSink {
    open: Arc<AtomicBool>,
    rate: u32,
    _consumer: AudioConsumer,
}

impl OutputSink for MockSink {
    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl MediaDevices for MockDevices {
    fn open_microphone(&mut self, producer: AudioProducer) -> soundverse_core::Result<MicrophoneStream> {
        let mut state = self.probe.0.lock();
        if state.deny_microphone {
            return Err(SoundverseError::DeviceUnavailable("permission denied".into()));
        }
        let live = Arc::new(AtomicBool::new(true));
        state.tracks.push(Arc::clone(&live));
        let track: Box<dyn MediaTrack> = Box::new(MockTrack {
            live,
            _producer: producer,
        });
        Ok(MicrophoneStream::new(vec![track], self.input_rate))
    }

    fn open_output(&mut self, consumer: AudioConsumer) -> soundverse_core::Result<Box<dyn OutputSink>> {
        let open = Arc::new(AtomicBool::new(true));
        self.probe.0.lock().sinks.push(Arc::clone(&open));
        Ok(Box::new(MockSink {
            open,
            rate: self.output_rate,
            _consumer: consumer,
        }))
    }
}

pub fn manager(probe: &DeviceProbe) -> AudioGraphManager {
    AudioGraphManager::new(
        Box::new(MockDevices::new(probe.clone())),
        EffectParams::default(),
    )
}

// ---------------------------------------------------------------------------
// Speech
// ---------------------------------------------------------------------------

/// Hears one scripted transcript per listen cycle. With the script exhausted
/// it keeps listening without ever ending the cycle.
pub struct ScriptedRecognizer {
    available: bool,
    script: Mutex<VecDeque<String>>,
    listening: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
    tx: broadcast::Sender<RecognitionEvent>,
}

impl ScriptedRecognizer {
    pub fn new(script: &[&str]) -> Arc<Self> {
        let (tx, _) = broadcast::channel(32);
        Arc::new(Self {
            available: true,
            script: Mutex::new(script.iter().map(|s| s.to_string()).collect()),
            listening: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            tx,
        })
    }

    pub fn unavailable() -> Arc<Self> {
        let (tx, _) = broadcast::channel(4);
        Arc::new(Self {
            available: false,
            script: Mutex::new(VecDeque::new()),
            listening: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            tx,
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl SpeechRecognizer for ScriptedRecognizer {
    fn is_available(&self) -> bool {
        self.available
    }

    fn start(&self) -> soundverse_core::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.listening.store(true, Ordering::SeqCst);
        let _ = self.tx.send(RecognitionEvent::Started);
        if let Some(text) = self.script.lock().pop_front() {
            let _ = self.tx.send(RecognitionEvent::Result(text));
        }
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.listening.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(RecognitionEvent::Ended);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.tx.subscribe()
    }
}

/// Finishes every utterance immediately and records what was said.
#[derive(Default)]
pub struct RecordingSynthesizer {
    spoken: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }

    pub fn said(&self, text: &str) -> bool {
        self.spoken.lock().iter().any(|s| s == text)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl SpeechSynthesizer for RecordingSynthesizer {
    fn speak(&self, text: &str) -> oneshot::Receiver<()> {
        self.spoken.lock().push(text.to_string());
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        rx
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Command services
// ---------------------------------------------------------------------------

pub struct FailingService;

#[async_trait]
impl CommandService for FailingService {
    async fn process(&self, _transcript: &str) -> soundverse_core::Result<String> {
        Err(SoundverseError::RemoteCallFailure("connection refused".into()))
    }
}

/// Never answers. Records when its call is dropped before finishing.
#[derive(Default)]
pub struct HangingService {
    abandoned: Arc<AtomicBool>,
}

impl HangingService {
    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandService for HangingService {
    async fn process(&self, _transcript: &str) -> soundverse_core::Result<String> {
        let _guard = SetOnDrop(Arc::clone(&self.abandoned));
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("never".into())
    }
}

// ---------------------------------------------------------------------------
// Controller harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub controller: TurnController,
    pub probe: DeviceProbe,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub synthesizer: Arc<RecordingSynthesizer>,
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        relisten_delay: Duration::from_millis(10),
        remote_timeout: Duration::from_secs(5),
        ..ControllerConfig::default()
    }
}

pub fn harness(script: &[&str], service: Arc<dyn CommandService>) -> Harness {
    harness_with(ScriptedRecognizer::new(script), service, DeviceProbe::default())
}

pub fn local_harness(script: &[&str]) -> Harness {
    harness(script, Arc::new(LocalCommandService))
}

pub fn harness_with(
    recognizer: Arc<ScriptedRecognizer>,
    service: Arc<dyn CommandService>,
    probe: DeviceProbe,
) -> Harness {
    let config = test_config();
    let synthesizer = RecordingSynthesizer::new();
    let remote = RemoteInterpreter::new(service, config.remote_timeout);
    let controller = TurnController::new(
        config,
        manager(&probe),
        recognizer.clone(),
        synthesizer.clone(),
        remote,
    );
    Harness {
        controller,
        probe,
        recognizer,
        synthesizer,
    }
}

/// Drive `run()` until `done` accepts a status event, then drop it mid-turn.
pub async fn run_until<F>(controller: &mut TurnController, mut done: F)
where
    F: FnMut(&TurnStatusEvent) -> bool,
{
    let mut status = controller.subscribe_status();
    let run = controller.run();
    tokio::pin!(run);
    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            result = &mut run => panic!("assistant finished early: {result:?}"),
            event = status.recv() => {
                let event = event.expect("status channel open");
                if done(&event) {
                    return;
                }
            }
            _ = &mut deadline => panic!("timed out waiting for status"),
        }
    }
}

/// Run until the loop has gone back to listening after one handled command.
pub async fn run_one_turn(controller: &mut TurnController) {
    let mut listens = 0;
    run_until(controller, |event| {
        if event.state == TurnState::Listening {
            listens += 1;
        }
        listens == 2
    })
    .await;
}
