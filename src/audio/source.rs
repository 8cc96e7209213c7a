//! Raw audio producers feeding a capture session
//!
//! A source runs on its own thread for the whole session. It reports its
//! sample rate once through `ready`, then pushes mono `f32` chunks until a
//! stop signal arrives (or the stop sender is dropped), or until it runs dry.

use crate::{MurmurError, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub trait AudioSource: Send + Sync + 'static {
    /// Blocks until the session ends. Returning drops `chunks`, which tells
    /// the consumer no more audio will come.
    fn run(&self, ready: Sender<Result<u32>>, chunks: Sender<Vec<f32>>, stop: Receiver<()>);
}

/// The host's default microphone.
///
/// cpal streams are not `Send`, so the stream is built, played and dropped
/// on the thread that calls [`AudioSource::run`].
#[cfg(feature = "audio-io")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalSource;

#[cfg(feature = "audio-io")]
impl CpalSource {
    fn open(chunks: Sender<Vec<f32>>) -> Result<(cpal::Stream, u32)> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MurmurError::AudioDeviceError("No input device available".into()))?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config: cpal::StreamConfig = device
            .default_input_config()
            .map_err(|e| MurmurError::AudioDeviceError(format!("Failed to get input config: {}", e)))?
            .into();

        let channels = config.channels as usize;
        let sample_rate = config.sample_rate.0;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Average all channels to create mono
                    let samples = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    };

                    if let Err(e) = chunks.try_send(samples) {
                        debug!("Dropping input chunk: {}", e);
                    }
                },
                |err| tracing::error!("Audio input stream error: {}", err),
                None,
            )
            .map_err(|e| MurmurError::AudioDeviceError(format!("Failed to build input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| MurmurError::AudioDeviceError(format!("Failed to start input stream: {}", e)))?;

        Ok((stream, sample_rate))
    }
}

#[cfg(feature = "audio-io")]
impl AudioSource for CpalSource {
    fn run(&self, ready: Sender<Result<u32>>, chunks: Sender<Vec<f32>>, stop: Receiver<()>) {
        let stream = match Self::open(chunks) {
            Ok((stream, rate)) => {
                let _ = ready.send(Ok(rate));
                stream
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        info!("Started audio recording");
        // Either a stop signal or the capture session going away ends the stream
        let _ = stop.recv();
        drop(stream);
        info!("Stopped audio recording");
    }
}

/// Replays a fixed buffer of mono samples as if it were a live microphone.
#[derive(Debug, Clone)]
pub struct BufferSource {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    chunk_len: usize,
    realtime: bool,
}

impl BufferSource {
    /// # Arguments
    /// * `samples` - Mono audio samples
    /// * `sample_rate` - Sample rate of `samples` in Hz
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        // 20ms chunks, similar to what an input callback delivers
        let chunk_len = (sample_rate as usize / 50).max(1);
        Self {
            samples: Arc::new(samples),
            sample_rate,
            chunk_len,
            realtime: false,
        }
    }

    /// Load a WAV file, mixing it down to mono
    pub fn from_wav<P: AsRef<Path>>(path: P) -> Result<Self> {
        let (samples, sample_rate) = super::wav::read_wav_mono(path)?;
        Ok(Self::new(samples, sample_rate))
    }

    /// Pace delivery at the speed a microphone would produce the audio
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

impl AudioSource for BufferSource {
    fn run(&self, ready: Sender<Result<u32>>, chunks: Sender<Vec<f32>>, stop: Receiver<()>) {
        if self.sample_rate == 0 {
            let _ = ready.send(Err(MurmurError::AudioDeviceError(
                "Replay buffer has a zero sample rate".into(),
            )));
            return;
        }
        let _ = ready.send(Ok(self.sample_rate));

        let pause = Duration::from_secs_f64(self.chunk_len as f64 / self.sample_rate as f64);
        for chunk in self.samples.chunks(self.chunk_len) {
            match stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    debug!("Replay stopped early");
                    return;
                }
            }

            if chunks.send(chunk.to_vec()).is_err() {
                return;
            }

            if self.realtime {
                std::thread::sleep(pause);
            }
        }

        debug!("Replay finished after {} samples", self.samples.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};

    #[test]
    fn test_buffer_source_delivers_everything() {
        let source = BufferSource::new(vec![0.25; 1000], 16000);
        let (ready_tx, ready_rx) = bounded(1);
        let (chunk_tx, chunk_rx) = unbounded();
        let (_stop_tx, stop_rx) = bounded::<()>(1);

        source.run(ready_tx, chunk_tx, stop_rx);

        assert_eq!(ready_rx.recv().unwrap().unwrap(), 16000);
        let total: usize = chunk_rx.iter().map(|c| c.len()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_buffer_source_honors_stop() {
        let source = BufferSource::new(vec![0.0; 16000], 16000);
        let (ready_tx, _ready_rx) = bounded(1);
        let (chunk_tx, chunk_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        stop_tx.send(()).unwrap();
        source.run(ready_tx, chunk_tx, stop_rx);

        assert_eq!(chunk_rx.iter().count(), 0);
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let source = BufferSource::new(vec![0.0; 10], 0);
        let (ready_tx, ready_rx) = bounded(1);
        let (chunk_tx, _chunk_rx) = unbounded();
        let (_stop_tx, stop_rx) = bounded::<()>(1);

        source.run(ready_tx, chunk_tx, stop_rx);
        assert!(ready_rx.recv().unwrap().is_err());
    }

    #[test]
    fn test_duration() {
        let source = BufferSource::new(vec![0.0; 8000], 16000);
        assert_eq!(source.duration(), Duration::from_millis(500));
    }
}
