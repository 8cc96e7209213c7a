//! Energy-based end-of-speech detection
//!
//! Audio is cut into 20ms frames; a frame whose RMS energy exceeds the
//! threshold counts as speech. An utterance ends after enough trailing
//! silence, or when it reaches the maximum length.

use std::time::Duration;
use tracing::debug;

const FRAME_MS: u32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Sample rate of the mono input in Hz
    pub sample_rate: u32,
    /// RMS energy above which a frame is speech
    pub energy_threshold: f32,
    /// Trailing silence that closes an utterance
    pub silence: Duration,
    /// Utterances with less voiced audio than this are dropped
    pub min_speech: Duration,
    pub max_utterance: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            energy_threshold: 0.01,
            silence: Duration::from_millis(800),
            min_speech: Duration::from_millis(300),
            max_utterance: Duration::from_secs(30),
        }
    }
}

impl VadConfig {
    fn frames(&self, duration: Duration) -> usize {
        (duration.as_millis() / FRAME_MS as u128).max(1) as usize
    }

    fn frame_len(&self) -> usize {
        (self.sample_rate * FRAME_MS / 1000).max(1) as usize
    }
}

/// Compute RMS energy of audio samples.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Whether a finished recording holds enough voiced audio to transcribe
pub fn contains_speech(samples: &[f32], config: &VadConfig) -> bool {
    let voiced = samples
        .chunks(config.frame_len())
        .filter(|frame| rms_energy(frame) > config.energy_threshold)
        .count();
    voiced >= config.frames(config.min_speech)
}

/// Streaming utterance segmenter.
pub struct UtteranceDetector {
    config: VadConfig,
    frame: Vec<f32>,
    utterance: Vec<f32>,
    in_speech: bool,
    voiced_frames: usize,
    silent_frames: usize,
    silence_limit: usize,
    min_voiced: usize,
    max_samples: usize,
}

impl UtteranceDetector {
    pub fn new(config: VadConfig) -> Self {
        let silence_limit = config.frames(config.silence);
        let min_voiced = config.frames(config.min_speech);
        let max_samples =
            (config.max_utterance.as_secs_f64() * config.sample_rate as f64) as usize;

        debug!(
            "VAD initialized: threshold={}, silence={} frames, min_speech={} frames",
            config.energy_threshold, silence_limit, min_voiced
        );

        Self {
            frame: Vec::with_capacity(config.frame_len()),
            config,
            utterance: Vec::new(),
            in_speech: false,
            voiced_frames: 0,
            silent_frames: 0,
            silence_limit,
            min_voiced,
            max_samples,
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Feed samples; returns the utterance once its end is detected.
    ///
    /// Samples after the end of an utterance are not retained.
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        let frame_len = self.config.frame_len();
        for &sample in samples {
            self.frame.push(sample);
            if self.frame.len() < frame_len {
                continue;
            }

            let frame = std::mem::take(&mut self.frame);
            if let Some(utterance) = self.push_frame(frame) {
                return Some(utterance);
            }
        }
        None
    }

    /// End of input: whatever speech has been heard so far, if enough
    pub fn finish(&mut self) -> Option<Vec<f32>> {
        if !self.frame.is_empty() {
            let frame = std::mem::take(&mut self.frame);
            if let Some(utterance) = self.push_frame(frame) {
                return Some(utterance);
            }
        }
        self.take_utterance()
    }

    pub fn reset(&mut self) {
        self.frame.clear();
        self.utterance.clear();
        self.in_speech = false;
        self.voiced_frames = 0;
        self.silent_frames = 0;
    }

    fn push_frame(&mut self, frame: Vec<f32>) -> Option<Vec<f32>> {
        let voiced = rms_energy(&frame) > self.config.energy_threshold;

        if voiced {
            if !self.in_speech {
                debug!("Speech started");
                self.in_speech = true;
            }
            self.voiced_frames += 1;
            self.silent_frames = 0;
            self.utterance.extend_from_slice(&frame);
        } else if self.in_speech {
            self.silent_frames += 1;
            // Keep short pauses inside the utterance
            self.utterance.extend_from_slice(&frame);

            if self.silent_frames >= self.silence_limit {
                debug!("Speech ended after {} voiced frames", self.voiced_frames);
                if let Some(utterance) = self.take_utterance() {
                    return Some(utterance);
                }
            }
        }

        if self.utterance.len() >= self.max_samples {
            debug!("Utterance reached maximum length");
            return self.take_utterance();
        }

        None
    }

    fn take_utterance(&mut self) -> Option<Vec<f32>> {
        let enough = self.voiced_frames >= self.min_voiced;
        let utterance = std::mem::take(&mut self.utterance);
        self.reset();
        enough.then_some(utterance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(ms: u32) -> Vec<f32> {
        let len = (16 * ms) as usize;
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16000.0).sin() * 0.4)
            .collect()
    }

    fn silence(ms: u32) -> Vec<f32> {
        vec![0.0; (16 * ms) as usize]
    }

    #[test]
    fn test_rms_energy() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert!((rms_energy(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_utterance_ends_after_silence() {
        let mut vad = UtteranceDetector::new(VadConfig::default());
        assert!(vad.push(&silence(200)).is_none());
        assert!(vad.push(&tone(500)).is_none());
        assert!(vad.in_speech());

        let utterance = vad.push(&silence(1000)).expect("utterance should end");
        // 500ms of speech plus the 800ms silence window
        assert_eq!(utterance.len(), 16 * 1300);
        assert!(!vad.in_speech());
    }

    #[test]
    fn test_short_blip_is_ignored() {
        let mut vad = UtteranceDetector::new(VadConfig::default());
        assert!(vad.push(&tone(100)).is_none());
        assert!(vad.push(&silence(1000)).is_none());
        assert!(vad.finish().is_none());
    }

    #[test]
    fn test_finish_flushes_open_utterance() {
        let mut vad = UtteranceDetector::new(VadConfig::default());
        vad.push(&tone(400));
        let utterance = vad.finish().expect("open utterance");
        assert_eq!(utterance.len(), 16 * 400);
    }

    #[test]
    fn test_max_length_cuts_utterance() {
        let config = VadConfig {
            max_utterance: Duration::from_secs(1),
            ..VadConfig::default()
        };
        let mut vad = UtteranceDetector::new(config);
        let utterance = vad.push(&tone(1500)).expect("cut at max length");
        assert_eq!(utterance.len(), 16000);
    }

    #[test]
    fn test_contains_speech() {
        let config = VadConfig::default();
        assert!(!contains_speech(&silence(2000), &config));
        let mut samples = silence(500);
        samples.extend(tone(600));
        assert!(contains_speech(&samples, &config));
    }
}
