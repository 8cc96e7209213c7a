//! Continuous recognition: listen until the speaker stops talking.
//!
//! The capture tap feeds a VAD worker thread. When the worker detects the
//! end of speech, or the tap closes because the session was stopped, it
//! hands the utterance to a finisher task that stops the capture and
//! transcribes the audio.

use super::recognizer::{
    capture_start_error, finish_utterance, EventSink, RecognitionStrategy, RecognizerEventKind, SessionId,
    SpeechRecognizer,
};
use super::transcriber::Transcriber;
use super::vad::{UtteranceDetector, VadConfig};
use crate::audio::AudioCapture;
use crate::{MurmurError, Result};
use async_trait::async_trait;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct StreamingInner {
    capture: tokio::sync::Mutex<AudioCapture>,
    transcriber: Arc<dyn Transcriber>,
    vad: VadConfig,
    /// Session whose outcome is still wanted; guarded together with `capture`
    current: Mutex<Option<SessionId>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct StreamingRecognizer {
    inner: Arc<StreamingInner>,
}

impl StreamingRecognizer {
    pub fn new(capture: AudioCapture, transcriber: Arc<dyn Transcriber>, vad: VadConfig) -> Self {
        Self {
            inner: Arc::new(StreamingInner {
                capture: tokio::sync::Mutex::new(capture),
                transcriber,
                vad,
                current: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

fn detect_utterance(
    tap: Receiver<Vec<f32>>,
    vad: VadConfig,
    found: oneshot::Sender<Option<Vec<f32>>>,
) {
    let mut detector = UtteranceDetector::new(vad);
    for chunk in tap.iter() {
        if let Some(utterance) = detector.push(&chunk) {
            let _ = found.send(Some(utterance));
            return;
        }
    }
    // Tap closed: the recording was stopped or ran out
    let _ = found.send(detector.finish());
}

async fn finish_session(
    inner: Arc<StreamingInner>,
    found: oneshot::Receiver<Option<Vec<f32>>>,
    locale: String,
    sink: EventSink,
) {
    let utterance = found.await.unwrap_or(None);

    {
        let mut capture = inner.capture.lock().await;
        if *inner.current.lock() != Some(sink.session()) {
            debug!("Session {} superseded, dropping its audio", sink.session());
            return;
        }
        inner.current.lock().take();

        match capture.stop().await {
            Ok(Some(path)) => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!("Failed to remove recording {:?}: {}", path, e);
                }
            }
            Ok(None) => {}
            Err(e) => debug!("Capture finished with error: {}", e),
        }
    }

    match utterance {
        Some(samples) => {
            // Transcription can take a while; the listener is free meanwhile
            sink.speech_ended();
            finish_utterance(inner.transcriber.as_ref(), samples, &locale, &inner.vad, &sink)
                .await;
        }
        None => {
            sink.emit(RecognizerEventKind::NoSpeech);
            sink.ended();
        }
    }
}

#[async_trait]
impl SpeechRecognizer for StreamingRecognizer {
    fn strategy(&self) -> RecognitionStrategy {
        RecognitionStrategy::Streaming
    }

    async fn start(&self, locale: &str, sink: EventSink) -> Result<()> {
        let inner = &self.inner;
        let mut capture = inner.capture.lock().await;

        inner.current.lock().take();
        capture.discard().await;

        let (tap_tx, tap_rx) = bounded::<Vec<f32>>(512);
        capture
            .start_with_tap(Some(tap_tx))
            .await
            .map_err(capture_start_error)?;

        let (found_tx, found_rx) = oneshot::channel();
        let vad = inner.vad.clone();
        let worker = std::thread::Builder::new()
            .name("murmur-vad".into())
            .spawn(move || detect_utterance(tap_rx, vad, found_tx));
        if let Err(e) = worker {
            capture.discard().await;
            return Err(MurmurError::AudioDeviceError(format!(
                "Failed to spawn VAD thread: {}",
                e
            )));
        }

        *inner.current.lock() = Some(sink.session());
        info!("Streaming recognition started (session {})", sink.session());
        sink.started();

        let handle = tokio::spawn(finish_session(
            Arc::clone(inner),
            found_rx,
            locale.to_string(),
            sink,
        ));
        let mut tasks = inner.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut capture = self.inner.capture.lock().await;
        if self.inner.current.lock().is_none() {
            return Ok(());
        }

        // Closing the recording closes the tap; the finisher reports the outcome
        if let Some(path) = capture.stop().await? {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!("Failed to remove recording {:?}: {}", path, e);
            }
        }
        Ok(())
    }

    async fn destroy(&self) {
        let mut capture = self.inner.capture.lock().await;
        self.inner.current.lock().take();
        capture.discard().await;

        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        debug!("Streaming recognizer destroyed");
    }
}
