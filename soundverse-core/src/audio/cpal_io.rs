//! cpal implementation of [`MediaDevices`].
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). Each stream is therefore built, played, and dropped on its own
//! dedicated thread. The opening call blocks until that thread reports
//! success or failure over a channel, so device errors still surface
//! synchronously to the caller.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use tracing::{error, info, warn};

use super::{MediaDevices, MediaTrack, MicrophoneStream, OutputSink};
use crate::{
    buffering::{AudioConsumer, AudioProducer, Consumer, Producer},
    error::{Result, SoundverseError},
};

/// System microphone and speaker through the default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    preferred_input: Option<String>,
}

impl CpalDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer the input device with this exact name; falls back to the default.
    pub fn with_preferred_input(mut self, name: Option<String>) -> Self {
        self.preferred_input = name;
        self
    }
}

impl MediaDevices for CpalDevices {
    fn open_microphone(&mut self, producer: AudioProducer) -> Result<MicrophoneStream> {
        let preferred = self.preferred_input.clone();
        let thread = StreamThread::spawn("soundverse-mic", move |running| {
            build_input_stream(producer, running, preferred.as_deref())
                .map_err(|e| match e {
                    SoundverseError::DeviceUnavailable(_) => e,
                    other => SoundverseError::DeviceUnavailable(other.to_string()),
                })
        })?;
        let sample_rate = thread.sample_rate;
        let track: Box<dyn MediaTrack> = Box::new(thread);
        Ok(MicrophoneStream::new(vec![track], sample_rate))
    }

    fn open_output(&mut self, consumer: AudioConsumer) -> Result<Box<dyn OutputSink>> {
        let thread = StreamThread::spawn("soundverse-speaker", move |running| {
            build_output_stream(consumer, running)
        })?;
        Ok(Box::new(thread))
    }
}

/// A cpal stream pinned to the thread that created it.
struct StreamThread {
    label: String,
    sample_rate: u32,
    running: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) -> Result<(Stream, u32, String)> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<(u32, String)>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let flag = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                let stream = match build(Arc::clone(&flag)) {
                    Ok((stream, sample_rate, label)) => {
                        let _ = ready_tx.send(Ok((sample_rate, label)));
                        stream
                    }
                    Err(e) => {
                        flag.store(false, Ordering::SeqCst);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Parked until `stop()` sends or drops the sender.
                let _ = stop_rx.recv();
                flag.store(false, Ordering::SeqCst);
                drop(stream);
            })
            .map_err(|e| SoundverseError::AudioStream(format!("spawn {name}: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok((sample_rate, label))) => Ok(Self {
                label,
                sample_rate,
                running,
                stop_tx: Some(stop_tx),
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(SoundverseError::AudioStream(format!(
                    "{name} thread exited before opening its stream"
                )))
            }
        }
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(stream = %self.label, "stream thread panicked");
            }
        }
    }
}

impl MediaTrack for StreamThread {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_live(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.shutdown();
    }
}

impl OutputSink for StreamThread {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn close(&mut self) {
        self.shutdown();
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn select_input_device(host: &cpal::Host, preferred: Option<&str>) -> Result<cpal::Device> {
    if let Some(preferred) = preferred {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == preferred).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred input device '{preferred}' not found, falling back");
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(device) = host.default_input_device() {
        return Ok(device);
    }
    host.input_devices()
        .map_err(|e| SoundverseError::DeviceUnavailable(e.to_string()))?
        .next()
        .ok_or_else(|| SoundverseError::DeviceUnavailable("no input device found".into()))
}

/// Build and start a capture stream that downmixes to mono into `producer`.
fn build_input_stream(
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    preferred: Option<&str>,
) -> Result<(Stream, u32, String)> {
    let host = cpal::default_host();
    let device = select_input_device(&host, preferred)?;
    let label = device.name().unwrap_or_else(|_| "microphone".into());

    let supported = device
        .default_input_config()
        .map_err(|e| SoundverseError::DeviceUnavailable(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    info!(device = %label, sample_rate, channels, "opening microphone");

    let config = StreamConfig {
        channels: channels as u16,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let err_fn = |err: cpal::StreamError| error!("microphone stream error: {err}");

    // Mixdown scratch is sized once here; callbacks only resize within capacity
    // for the device's usual period.
    let mut mono: Vec<f32> = Vec::with_capacity(8_192);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                downmix(data, channels, &mut mono, |s| s);
                push_frames(&mut producer, &mono);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                downmix(data, channels, &mut mono, |s| s as f32 / 32_768.0);
                push_frames(&mut producer, &mono);
            },
            err_fn,
            None,
        ),
        SampleFormat::U8 => device.build_input_stream(
            &config,
            move |data: &[u8], _| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                downmix(data, channels, &mut mono, |s| (s as f32 - 128.0) / 128.0);
                push_frames(&mut producer, &mono);
            },
            err_fn,
            None,
        ),
        fmt => {
            return Err(SoundverseError::AudioStream(format!(
                "unsupported input sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| SoundverseError::DeviceUnavailable(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SoundverseError::DeviceUnavailable(e.to_string()))?;
    Ok((stream, sample_rate, label))
}

fn downmix<T: Copy>(data: &[T], channels: usize, mono: &mut Vec<f32>, convert: impl Fn(T) -> f32) {
    let channels = channels.max(1);
    let frames = data.len() / channels;
    mono.resize(frames, 0.0);
    for (f, out) in mono.iter_mut().enumerate() {
        let base = f * channels;
        let sum: f32 = data[base..base + channels].iter().map(|s| convert(*s)).sum();
        *out = sum / channels as f32;
    }
}

fn push_frames(producer: &mut AudioProducer, frames: &[f32]) {
    let written = producer.push_slice(frames);
    if written < frames.len() {
        warn!("microphone ring full: dropped {} frames", frames.len() - written);
    }
}

/// Build and start a playback stream that duplicates mono frames from
/// `consumer` onto every output channel. Underruns play silence.
fn build_output_stream(
    mut consumer: AudioConsumer,
    running: Arc<AtomicBool>,
) -> Result<(Stream, u32, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| SoundverseError::AudioStream("no output device found".into()))?;
    let label = device.name().unwrap_or_else(|_| "speaker".into());

    let supported = device
        .default_output_config()
        .map_err(|e| SoundverseError::AudioStream(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    info!(device = %label, sample_rate, channels, "opening speaker");

    let config = StreamConfig {
        channels: channels as u16,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let err_fn = |err: cpal::StreamError| error!("speaker stream error: {err}");

    let stream = match supported.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                fill_output(data, channels, &mut consumer, &running, |s| s);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _| {
                fill_output(data, channels, &mut consumer, &running, |s| {
                    (s * i16::MAX as f32) as i16
                });
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_output_stream(
            &config,
            move |data: &mut [u16], _| {
                fill_output(data, channels, &mut consumer, &running, |s| {
                    ((s * 0.5 + 0.5) * u16::MAX as f32) as u16
                });
            },
            err_fn,
            None,
        ),
        fmt => {
            return Err(SoundverseError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| SoundverseError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SoundverseError::AudioStream(e.to_string()))?;
    Ok((stream, sample_rate, label))
}

fn fill_output<T: Copy>(
    data: &mut [T],
    channels: usize,
    consumer: &mut AudioConsumer,
    running: &AtomicBool,
    convert: impl Fn(f32) -> T,
) {
    let live = running.load(Ordering::Relaxed);
    for frame in data.chunks_mut(channels.max(1)) {
        let sample = if live {
            consumer.try_pop().unwrap_or(0.0)
        } else {
            0.0
        };
        let value = convert(sample);
        frame.iter_mut().for_each(|s| *s = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_channels() {
        let mut mono = Vec::new();
        downmix(&[0.2f32, 0.4, -1.0, 1.0], 2, &mut mono, |s| s);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn downmix_converts_integer_samples() {
        let mut mono = Vec::new();
        downmix(&[16_384i16], 1, &mut mono, |s| s as f32 / 32_768.0);
        assert!((mono[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn output_duplicates_mono_and_pads_underruns() {
        let (mut prod, mut cons) = crate::buffering::create_ring(16);
        prod.push_slice(&[0.25]);
        let running = AtomicBool::new(true);
        let mut data = [1.0f32; 4];
        fill_output(&mut data, 2, &mut cons, &running, |s| s);
        assert_eq!(data, [0.25, 0.25, 0.0, 0.0]);
    }
}
