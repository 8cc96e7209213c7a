//! Record until stopped, then transcribe the finished file.

use super::recognizer::{
    capture_start_error, finish_utterance, EventSink, RecognitionStrategy, RecognizerEventKind, SpeechRecognizer,
};
use super::transcriber::Transcriber;
use super::vad::VadConfig;
use crate::audio::{read_wav_mono, AudioCapture};
use crate::{MurmurError, RecognitionError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct PendingSession {
    sink: EventSink,
    locale: String,
}

pub struct BatchRecognizer {
    capture: tokio::sync::Mutex<AudioCapture>,
    transcriber: Arc<dyn Transcriber>,
    vad: VadConfig,
    session: Mutex<Option<PendingSession>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BatchRecognizer {
    pub fn new(capture: AudioCapture, transcriber: Arc<dyn Transcriber>, vad: VadConfig) -> Self {
        Self {
            capture: tokio::sync::Mutex::new(capture),
            transcriber,
            vad,
            session: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }
}

async fn transcribe_file(
    transcriber: Arc<dyn Transcriber>,
    path: PathBuf,
    locale: String,
    vad: VadConfig,
    sink: EventSink,
) {
    let read_path = path.clone();
    let samples = tokio::task::spawn_blocking(move || read_wav_mono(read_path))
        .await
        .map_err(|e| MurmurError::IOError(format!("Recording reader panicked: {}", e)))
        .and_then(|read| read);

    match samples {
        Ok((samples, _)) => {
            finish_utterance(transcriber.as_ref(), samples, &locale, &vad, &sink).await;
        }
        Err(e) => {
            warn!("Failed to read recording {:?}: {}", path, e);
            sink.error(RecognitionError::RecognizerUnavailable(e.to_string()));
            sink.ended();
        }
    }

    if let Err(e) = tokio::fs::remove_file(&path).await {
        debug!("Failed to remove recording {:?}: {}", path, e);
    }
}

#[async_trait]
impl SpeechRecognizer for BatchRecognizer {
    fn strategy(&self) -> RecognitionStrategy {
        RecognitionStrategy::Batch
    }

    async fn start(&self, locale: &str, sink: EventSink) -> Result<()> {
        let mut capture = self.capture.lock().await;

        if let Some(previous) = self.session.lock().take() {
            debug!("Discarding batch session {}", previous.sink.session());
        }
        capture.discard().await;
        capture.start().await.map_err(capture_start_error)?;

        info!("Batch recognition started (session {})", sink.session());
        sink.started();
        *self.session.lock() = Some(PendingSession {
            sink,
            locale: locale.to_string(),
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut capture = self.capture.lock().await;
        let Some(pending) = self.session.lock().take() else {
            return Ok(());
        };

        let sink = pending.sink;
        match capture.stop().await {
            Ok(Some(path)) => {
                let handle = tokio::spawn(transcribe_file(
                    Arc::clone(&self.transcriber),
                    path,
                    pending.locale,
                    self.vad.clone(),
                    sink,
                ));
                self.track(handle);
            }
            Ok(None) => {
                sink.emit(RecognizerEventKind::NoSpeech);
                sink.ended();
            }
            Err(e) => {
                warn!("Recording failed to finalize: {}", e);
                sink.error(RecognitionError::RecognizerUnavailable(e.to_string()));
                sink.ended();
            }
        }
        Ok(())
    }

    async fn destroy(&self) {
        let mut capture = self.capture.lock().await;
        self.session.lock().take();
        capture.discard().await;

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        debug!("Batch recognizer destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BufferSource, StaticPermission};
    use crate::speech::recognizer::{RecognizerEvent, SessionId};
    use tokio::sync::mpsc;

    struct EchoTranscriber;

    #[async_trait]
    impl Transcriber for EchoTranscriber {
        async fn transcribe(&self, wav: Vec<u8>, locale: &str) -> Result<String> {
            Ok(format!("{} bytes in {}", wav.len(), locale))
        }
    }

    fn recognizer(dir: &std::path::Path, samples: Vec<f32>) -> BatchRecognizer {
        let capture = AudioCapture::new(
            Arc::new(StaticPermission::granted()),
            Arc::new(BufferSource::new(samples, 16000)),
            dir,
        );
        BatchRecognizer::new(capture, Arc::new(EchoTranscriber), VadConfig::default())
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<RecognizerEvent>) -> Vec<RecognizerEventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = event.kind == RecognizerEventKind::Ended;
            kinds.push(event.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[tokio::test]
    async fn test_stop_transcribes_recording() {
        let dir = tempfile::tempdir().unwrap();
        let speech: Vec<f32> = (0..16000).map(|i| ((i as f32) * 0.09).sin() * 0.5).collect();
        let recognizer = recognizer(dir.path(), speech);
        let (tx, mut rx) = mpsc::unbounded_channel();

        recognizer
            .start("zh-CN", EventSink::new(SessionId::new(), tx))
            .await
            .unwrap();
        // Let the replay finish before stopping
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        recognizer.stop().await.unwrap();

        let kinds = drain(&mut rx).await;
        assert_eq!(kinds[0], RecognizerEventKind::Started);
        assert!(matches!(&kinds[1], RecognizerEventKind::Result(text) if text.ends_with("in zh-CN")));
        assert_eq!(kinds[2], RecognizerEventKind::Ended);
    }

    #[tokio::test]
    async fn test_silent_recording_is_no_speech() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = recognizer(dir.path(), vec![0.0; 8000]);
        let (tx, mut rx) = mpsc::unbounded_channel();

        recognizer
            .start("zh-CN", EventSink::new(SessionId::new(), tx))
            .await
            .unwrap();
        recognizer.stop().await.unwrap();

        let kinds = drain(&mut rx).await;
        assert_eq!(
            kinds,
            vec![
                RecognizerEventKind::Started,
                RecognizerEventKind::NoSpeech,
                RecognizerEventKind::Ended
            ]
        );
    }

    #[tokio::test]
    async fn test_refused_capture_is_no_permission() {
        let dir = tempfile::tempdir().unwrap();
        let capture = AudioCapture::new(
            Arc::new(StaticPermission::denied()),
            Arc::new(BufferSource::new(vec![0.0; 1600], 16000)),
            dir.path(),
        );
        let recognizer =
            BatchRecognizer::new(capture, Arc::new(EchoTranscriber), VadConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = recognizer
            .start("zh-CN", EventSink::new(SessionId::new(), tx))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MurmurError::RecognitionFailed(RecognitionError::NoPermission)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_without_session_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let recognizer = recognizer(dir.path(), Vec::new());
        recognizer.stop().await.unwrap();
        recognizer.destroy().await;
    }
}
