//! Energy-based voice activity detection over 16-bit PCM frames.

use helpline_core::config::Config;

/// Frame length used by the segmenter (20 ms).
pub const FRAME_MS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    SpeechStarted,
    SpeechEnded,
}

pub struct VoiceActivityDetector {
    threshold: f64,
    /// Consecutive silent frames that close an utterance.
    min_silent_frames: usize,
    speech_active: bool,
    silent_count: usize,
}

impl VoiceActivityDetector {
    pub fn new(threshold: f64, min_silent_frames: usize) -> Self {
        Self {
            threshold,
            min_silent_frames: min_silent_frames.max(1),
            speech_active: false,
            silent_count: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.vad_threshold(), config.silence_frames())
    }

    pub fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    pub fn process_frame(&mut self, pcm: &[i16]) -> Option<Transition> {
        let is_speech = Self::rms(pcm) > self.threshold;

        if is_speech {
            self.silent_count = 0;
            if !self.speech_active {
                self.speech_active = true;
                return Some(Transition::SpeechStarted);
            }
        } else if self.speech_active {
            self.silent_count += 1;
            if self.silent_count >= self.min_silent_frames {
                self.speech_active = false;
                self.silent_count = 0;
                return Some(Transition::SpeechEnded);
            }
        }

        None
    }

    pub fn is_active(&self) -> bool {
        self.speech_active
    }

    pub fn reset(&mut self) {
        self.speech_active = false;
        self.silent_count = 0;
    }
}
