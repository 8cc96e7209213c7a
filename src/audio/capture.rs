//! One recording lifecycle: permission, start, stop, finished file.

use super::permission::MicrophonePermission;
use super::resampler::StreamResampler;
use super::source::AudioSource;
use super::wav;
use crate::{MurmurError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Format every recording is normalized to before it is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

pub const CAPTURE_FORMAT: CaptureFormat = CaptureFormat {
    sample_rate: 16000,
    channels: 1,
    bits_per_sample: 16,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Requesting,
    Recording,
    Stopped,
}

struct ActiveRecording {
    path: PathBuf,
    stop_tx: Sender<()>,
    done_rx: oneshot::Receiver<Result<PathBuf>>,
}

/// Owns at most one recording at a time.
///
/// The recording is resampled to [`CAPTURE_FORMAT`] and written to a WAV file
/// in `recordings_dir`. An optional tap receives the same normalized chunks
/// while they are written.
pub struct AudioCapture {
    permission: Arc<dyn MicrophonePermission>,
    source: Arc<dyn AudioSource>,
    recordings_dir: PathBuf,
    state: RecordingState,
    active: Option<ActiveRecording>,
}

impl AudioCapture {
    pub fn new(
        permission: Arc<dyn MicrophonePermission>,
        source: Arc<dyn AudioSource>,
        recordings_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            permission,
            source,
            recordings_dir: recordings_dir.into(),
            state: RecordingState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    pub async fn start(&mut self) -> Result<()> {
        self.start_with_tap(None).await
    }

    /// Start a new recording, discarding any recording still in progress.
    ///
    /// Fails with [`MurmurError::PermissionDenied`] when microphone access is
    /// refused, leaving the session idle.
    pub async fn start_with_tap(&mut self, tap: Option<Sender<Vec<f32>>>) -> Result<()> {
        if self.active.is_some() {
            warn!("Recording already active, discarding it before starting a new one");
            self.discard().await;
        }

        self.state = RecordingState::Requesting;
        if !self.permission.request().await.is_granted() {
            self.state = RecordingState::Idle;
            return Err(MurmurError::PermissionDenied(
                "microphone access was not granted".into(),
            ));
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.recordings_dir).await {
            self.state = RecordingState::Idle;
            return Err(MurmurError::IOError(format!(
                "Failed to create {:?}: {}",
                self.recordings_dir, e
            )));
        }

        let path = self
            .recordings_dir
            .join(format!("recording-{}.wav", Uuid::new_v4()));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let writer = RecordingWriter {
            source: Arc::clone(&self.source),
            path: path.clone(),
            stop_rx,
            tap,
        };
        let spawned = std::thread::Builder::new()
            .name("murmur-capture".into())
            .spawn(move || writer.run(ready_tx, done_tx));
        if let Err(e) = spawned {
            self.state = RecordingState::Idle;
            return Err(MurmurError::AudioDeviceError(format!(
                "Failed to spawn capture thread: {}",
                e
            )));
        }

        let started = ready_rx.await.unwrap_or_else(|_| {
            Err(MurmurError::ChannelError(
                "capture thread exited before starting".into(),
            ))
        });
        if let Err(e) = started {
            self.state = RecordingState::Idle;
            return Err(e);
        }

        info!("Recording to {:?}", path);
        self.active = Some(ActiveRecording {
            path,
            stop_tx,
            done_rx,
        });
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Finalize the current recording and return its file.
    ///
    /// Returns `Ok(None)` when nothing was recording. The audio device is
    /// released and the file complete by the time this returns.
    pub async fn stop(&mut self) -> Result<Option<PathBuf>> {
        let Some(active) = self.active.take() else {
            return Ok(None);
        };

        // The source may already have run dry, in which case nobody listens
        let _ = active.stop_tx.try_send(());
        drop(active.stop_tx);

        let finished = active.done_rx.await.unwrap_or_else(|_| {
            Err(MurmurError::ChannelError(
                "capture thread exited without finishing".into(),
            ))
        });
        self.state = RecordingState::Stopped;

        match finished {
            Ok(path) => {
                debug!("Recording finalized: {:?}", path);
                Ok(Some(path))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&active.path).await;
                Err(e)
            }
        }
    }

    /// Stop the current recording, if any, and delete its file
    pub async fn discard(&mut self) {
        match self.stop().await {
            Ok(Some(path)) => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!("Failed to remove discarded recording {:?}: {}", path, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Discarded recording failed to finalize: {}", e),
        }
        self.state = RecordingState::Idle;
    }
}

struct RecordingWriter {
    source: Arc<dyn AudioSource>,
    path: PathBuf,
    stop_rx: Receiver<()>,
    tap: Option<Sender<Vec<f32>>>,
}

impl RecordingWriter {
    fn run(
        self,
        ready_tx: oneshot::Sender<Result<()>>,
        done_tx: oneshot::Sender<Result<PathBuf>>,
    ) {
        let (chunk_tx, chunk_rx) = bounded::<Vec<f32>>(256);
        let (src_ready_tx, src_ready_rx) = bounded::<Result<u32>>(1);

        let source = Arc::clone(&self.source);
        let stop_rx = self.stop_rx.clone();
        let source_thread = std::thread::Builder::new()
            .name("murmur-audio-source".into())
            .spawn(move || source.run(src_ready_tx, chunk_tx, stop_rx));
        let source_thread = match source_thread {
            Ok(handle) => handle,
            Err(e) => {
                let _ = ready_tx.send(Err(MurmurError::AudioDeviceError(format!(
                    "Failed to spawn audio source thread: {}",
                    e
                ))));
                return;
            }
        };

        let opened = src_ready_rx
            .recv()
            .unwrap_or_else(|_| {
                Err(MurmurError::AudioDeviceError(
                    "audio source exited before starting".into(),
                ))
            })
            .and_then(|rate| {
                let resampler = StreamResampler::new(rate, CAPTURE_FORMAT.sample_rate)?;
                let writer = wav::create_writer(
                    &self.path,
                    CAPTURE_FORMAT.sample_rate,
                    CAPTURE_FORMAT.channels,
                )?;
                Ok((resampler, writer))
            });

        let (mut resampler, mut writer) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                // The failed start drops the stop sender, which ends the source
                let _ = ready_tx.send(Err(e));
                let _ = source_thread.join();
                return;
            }
        };
        let _ = ready_tx.send(Ok(()));

        let mut written = 0usize;
        let mut result = Ok(());
        for chunk in chunk_rx.iter() {
            let step = resampler
                .process(&chunk)
                .and_then(|out| self.write(&mut writer, out));
            match step {
                Ok(n) => written += n,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        // Stop the source even when the loop ended on a write error
        drop(chunk_rx);
        if source_thread.join().is_err() {
            warn!("Audio source thread panicked");
        }

        let result = result
            .and_then(|_| resampler.flush())
            .and_then(|tail| self.write(&mut writer, tail))
            .and_then(|n| {
                written += n;
                writer
                    .finalize()
                    .map_err(|e| MurmurError::IOError(format!("Failed to finalize WAV file: {}", e)))
            })
            .map(|_| self.path.clone());

        debug!("Capture wrote {} samples", written);
        // Closing the tap tells listeners the recording has ended
        drop(self.tap);
        let _ = done_tx.send(result);
    }

    fn write(
        &self,
        writer: &mut hound::WavWriter<std::io::BufWriter<std::fs::File>>,
        samples: Vec<f32>,
    ) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        wav::write_samples(writer, &samples)?;
        let n = samples.len();
        if let Some(tap) = &self.tap {
            if let Err(e) = tap.try_send(samples) {
                debug!("Dropping tapped chunk: {}", e);
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::permission::StaticPermission;
    use crate::audio::source::BufferSource;

    fn capture(dir: &Path, permission: StaticPermission, source: BufferSource) -> AudioCapture {
        AudioCapture::new(Arc::new(permission), Arc::new(source), dir)
    }

    #[tokio::test]
    async fn test_denied_permission_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture(
            dir.path(),
            StaticPermission::denied(),
            BufferSource::new(vec![0.0; 1600], 16000),
        );

        let err = capture.start().await.unwrap_err();
        assert!(matches!(err, MurmurError::PermissionDenied(_)));
        assert_eq!(capture.state(), RecordingState::Idle);
        assert!(!capture.is_recording());
    }

    #[tokio::test]
    async fn test_records_canonical_wav() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<f32> = (0..48000).map(|i| ((i as f32) * 0.01).sin() * 0.3).collect();
        let mut capture = capture(
            dir.path(),
            StaticPermission::granted(),
            BufferSource::new(samples, 48000),
        );

        capture.start().await.unwrap();
        assert_eq!(capture.state(), RecordingState::Recording);

        let path = capture.stop().await.unwrap().unwrap();
        assert_eq!(capture.state(), RecordingState::Stopped);

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        // The replay may be cut short by the stop, never lengthened
        assert!(reader.duration() <= 16000);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture(
            dir.path(),
            StaticPermission::granted(),
            BufferSource::new(Vec::new(), 16000),
        );
        assert!(capture.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_discards_previous_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture(
            dir.path(),
            StaticPermission::granted(),
            BufferSource::new(vec![0.1; 3200], 16000).with_realtime(true),
        );

        capture.start().await.unwrap();
        capture.start().await.unwrap();
        let path = capture.stop().await.unwrap().unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_tap_sees_audio_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let mut capture = capture(
            dir.path(),
            StaticPermission::granted(),
            BufferSource::new(vec![0.2; 1600], 16000),
        );

        let (tap_tx, tap_rx) = crossbeam_channel::unbounded();
        capture.start_with_tap(Some(tap_tx)).await.unwrap();

        // The replay runs dry on its own, which closes the tap
        let tapped: usize = tap_rx.iter().map(|c| c.len()).sum();
        assert_eq!(tapped, 1600);

        let path = capture.stop().await.unwrap().unwrap();
        let (written, _) = wav::read_wav_mono(&path).unwrap();
        assert_eq!(written.len(), 1600);
    }
}
