//! Audio devices and the live audio context.
//!
//! ```text
//! Microphone ─► input ring ─► MicrophoneSource ─┐
//!                                                ├─ AudioGraph ─► render thread ─► output ring ─► Speaker
//!                       (tone buffers, effects) ─┘
//! ```
//!
//! # Design constraints
//!
//! Device callbacks run on OS audio threads at elevated priority. They only
//! push into or pop from SPSC rings: no locks, no allocation, no I/O. All DSP
//! happens on the render thread owned by [`AudioContext`].
//!
//! Devices are reached through the [`MediaDevices`] capability so the
//! session can be driven by mock devices in tests. The cpal implementation
//! lives in [`cpal_io`] behind the `audio-cpal` feature.

#[cfg(feature = "audio-cpal")]
pub mod cpal_io;
pub mod device;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    buffering::{create_ring, AudioConsumer, AudioProducer, Observer, Producer, OUTPUT_RING_CAPACITY},
    error::{Result, SoundverseError},
    graph::{AudioGraph, SharedGraph, RENDER_QUANTUM},
};

#[cfg(feature = "audio-cpal")]
pub use cpal_io::CpalDevices;

/// Sleep when the output ring has no room for another quantum.
const RENDER_IDLE_MS: u64 = 2;

/// Permission-gated access to the microphone and speaker.
pub trait MediaDevices: Send + 'static {
    /// Open the microphone and start pushing mono f32 frames into `producer`.
    ///
    /// # Errors
    /// `SoundverseError::DeviceUnavailable` when no device exists or access is denied.
    fn open_microphone(&mut self, producer: AudioProducer) -> Result<MicrophoneStream>;

    /// Open the speaker and start playing mono f32 frames popped from `consumer`.
    fn open_output(&mut self, consumer: AudioConsumer) -> Result<Box<dyn OutputSink>>;
}

/// One live capture track of a microphone stream.
pub trait MediaTrack: Send {
    fn label(&self) -> &str;

    fn is_live(&self) -> bool;

    /// Stop capturing. Stopping a stopped track is a no-op.
    fn stop(&mut self);
}

/// An open speaker stream.
pub trait OutputSink: Send {
    fn sample_rate(&self) -> u32;

    /// Stop playback. Closing twice is a no-op.
    fn close(&mut self);
}

/// The tracks captured from the microphone plus their shared sample rate.
pub struct MicrophoneStream {
    tracks: Vec<Box<dyn MediaTrack>>,
    sample_rate: u32,
}

impl MicrophoneStream {
    pub fn new(tracks: Vec<Box<dyn MediaTrack>>, sample_rate: u32) -> Self {
        Self {
            tracks,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn active_tracks(&self) -> usize {
        self.tracks.iter().filter(|t| t.is_live()).count()
    }

    /// Stop every track.
    pub fn stop_all(&mut self) {
        for track in &mut self.tracks {
            if track.is_live() {
                debug!(track = track.label(), "stopping microphone track");
            }
            track.stop();
        }
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// The live audio context: graph, render thread, and speaker.
pub struct AudioContext {
    graph: SharedGraph,
    sample_rate: u32,
    sink: Box<dyn OutputSink>,
    running: Arc<AtomicBool>,
    renderer: Option<JoinHandle<()>>,
}

impl AudioContext {
    /// Open the speaker and start rendering an empty graph at its rate.
    pub fn open(devices: &mut dyn MediaDevices) -> Result<Self> {
        let (producer, consumer) = create_ring(OUTPUT_RING_CAPACITY);
        let sink = devices.open_output(consumer)?;
        let sample_rate = sink.sample_rate();
        let graph = AudioGraph::shared(sample_rate);
        let running = Arc::new(AtomicBool::new(true));

        let renderer = std::thread::Builder::new()
            .name("soundverse-render".into())
            .spawn({
                let graph = Arc::clone(&graph);
                let running = Arc::clone(&running);
                move || run_renderer(graph, producer, running)
            })
            .map_err(|e| SoundverseError::AudioStream(format!("render thread: {e}")))?;

        info!(sample_rate, "audio context opened");
        Ok(Self {
            graph,
            sample_rate,
            sink,
            running,
            renderer: Some(renderer),
        })
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_closed(&self) -> bool {
        self.renderer.is_none()
    }

    /// Stop the render thread and the speaker. Idempotent.
    pub fn close(&mut self) {
        let Some(renderer) = self.renderer.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        if renderer.join().is_err() {
            warn!("render thread panicked");
        }
        self.sink.close();
        info!("audio context closed");
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pull quanta from the graph whenever the output ring has room.
fn run_renderer(graph: SharedGraph, mut producer: AudioProducer, running: Arc<AtomicBool>) {
    debug!("render thread started");
    let mut block = vec![0f32; RENDER_QUANTUM];

    while running.load(Ordering::Relaxed) {
        if producer.vacant_len() < RENDER_QUANTUM {
            std::thread::sleep(Duration::from_millis(RENDER_IDLE_MS));
            continue;
        }
        graph.lock().render(&mut block);
        producer.push_slice(&block);
    }
    debug!("render thread stopped");
}
