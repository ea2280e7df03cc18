//! Terminal stand-ins for speech recognition and synthesis.
//!
//! Typed lines are transcripts; spoken text is printed and paced at a
//! reading speed so the turn loop keeps its timing.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use soundverse_core::{
    RecognitionEvent, Result, SoundverseError, SpeechRecognizer, SpeechSynthesizer, StopHandle,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_CAP: usize = 32;

/// Hears lines from a reader, one final transcript per listen cycle.
///
/// Lines typed while not listening are dropped. End of input requests a stop.
pub struct ConsoleRecognizer {
    listening: AtomicBool,
    closed: AtomicBool,
    tx: broadcast::Sender<RecognitionEvent>,
}

impl ConsoleRecognizer {
    /// Read transcripts from stdin.
    pub fn stdin(stop: StopHandle) -> Arc<Self> {
        Self::spawn(BufReader::new(tokio::io::stdin()), stop)
    }

    pub fn spawn<R>(reader: R, stop: StopHandle) -> Arc<Self>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, _) = broadcast::channel(EVENT_CAP);
        let recognizer = Arc::new(Self {
            listening: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            tx,
        });

        let weak = Arc::downgrade(&recognizer);
        tokio::spawn(async move {
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(recognizer) = weak.upgrade() else {
                    return;
                };
                recognizer.hear(line.trim());
            }
            if let Some(recognizer) = weak.upgrade() {
                recognizer.closed.store(true, Ordering::SeqCst);
            }
            info!("console input closed");
            stop.stop();
        });
        recognizer
    }

    fn hear(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        if !self.listening.load(Ordering::SeqCst) {
            debug!(line, "not listening; input dropped");
            return;
        }
        let _ = self.tx.send(RecognitionEvent::Result(line.to_string()));
    }
}

impl SpeechRecognizer for ConsoleRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SoundverseError::RecognitionError("console input closed".into()));
        }
        if !self.listening.swap(true, Ordering::SeqCst) {
            println!("(listening) type a command and press Enter");
            let _ = self.tx.send(RecognitionEvent::Started);
        }
        Ok(())
    }

    fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            let _ = self.tx.send(RecognitionEvent::Ended);
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RecognitionEvent> {
        self.tx.subscribe()
    }
}

/// Prints utterances and finishes them after a reading-speed pause.
pub struct ConsoleSynthesizer {
    words_per_minute: u32,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl ConsoleSynthesizer {
    pub fn new(words_per_minute: u32) -> Self {
        Self {
            words_per_minute: words_per_minute.max(1),
            current: Mutex::new(None),
        }
    }

    pub fn duration_of(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count().max(1) as u64;
        Duration::from_millis(words * 60_000 / self.words_per_minute as u64)
    }
}

impl SpeechSynthesizer for ConsoleSynthesizer {
    fn speak(&self, text: &str) -> oneshot::Receiver<()> {
        self.cancel();
        println!("soundverse> {text}");

        let (done_tx, done_rx) = oneshot::channel();
        let pause = self.duration_of(text);
        *self.current.lock() = Some(tokio::spawn(async move {
            tokio::time::sleep(pause).await;
            let _ = done_tx.send(());
        }));
        done_rx
    }

    fn cancel(&self) {
        if let Some(utterance) = self.current.lock().take() {
            utterance.abort();
        }
    }
}
