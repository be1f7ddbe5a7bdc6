//! Chunked transcription: mu-law audio in, final transcript events out.
//!
//! Audio is decoded, cut into utterances by the VAD, and each utterance is
//! sent to the recognizer as one request. Every recognized utterance becomes
//! one final [`TranscriptEvent`] whose duration is the utterance length.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use helpline_core::types::TranscriptEvent;

use crate::mulaw;
use crate::recognizer::SpeechRecognizer;
use crate::vad::{FRAME_MS, Transition, VoiceActivityDetector};

/// Longest utterance sent in one request.
const MAX_UTTERANCE_SECS: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub pcm: Vec<i16>,
    pub duration_seconds: f64,
}

/// Splits a PCM stream into utterances at VAD speech boundaries.
pub struct UtteranceSegmenter {
    vad: VoiceActivityDetector,
    pending: Vec<i16>,
    speech: Vec<i16>,
    frame_size: usize,
    max_samples: usize,
    sample_rate: u32,
}

impl UtteranceSegmenter {
    pub fn new(vad: VoiceActivityDetector, sample_rate: u32) -> Self {
        Self {
            vad,
            pending: Vec::new(),
            speech: Vec::new(),
            frame_size: (sample_rate * FRAME_MS / 1000) as usize,
            max_samples: (sample_rate * MAX_UTTERANCE_SECS) as usize,
            sample_rate,
        }
    }

    pub fn push(&mut self, samples: &[i16]) -> Vec<Utterance> {
        self.pending.extend_from_slice(samples);
        let mut done = Vec::new();

        while self.pending.len() >= self.frame_size {
            let frame: Vec<i16> = self.pending.drain(..self.frame_size).collect();
            let transition = self.vad.process_frame(&frame);
            if self.vad.is_active() || transition == Some(Transition::SpeechEnded) {
                self.speech.extend_from_slice(&frame);
            }
            if transition == Some(Transition::SpeechEnded) || self.speech.len() >= self.max_samples
            {
                done.extend(self.take());
            }
        }
        done
    }

    /// Whatever speech is still open when the stream ends.
    pub fn flush(&mut self) -> Option<Utterance> {
        self.pending.clear();
        self.vad.reset();
        self.take()
    }

    fn take(&mut self) -> Option<Utterance> {
        if self.speech.is_empty() {
            return None;
        }
        let pcm = std::mem::take(&mut self.speech);
        let duration_seconds = pcm.len() as f64 / self.sample_rate as f64;
        Some(Utterance {
            pcm,
            duration_seconds,
        })
    }
}

/// Sender half handed to the media-stream socket.
pub struct TranscriberHandle {
    audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    pub cancel: CancellationToken,
}

impl TranscriberHandle {
    /// Queue mu-law bytes. Returns false once the transcriber has stopped.
    pub fn push_mulaw(&self, bytes: Vec<u8>) -> bool {
        self.audio_tx.send(bytes).is_ok()
    }

    /// End of audio: the pending utterance is transcribed, then the event
    /// channel closes.
    pub fn finish(self) {}
}

pub struct ChunkedTranscriber {
    recognizer: Arc<dyn SpeechRecognizer>,
    segmenter: UtteranceSegmenter,
    sequence: u64,
}

impl ChunkedTranscriber {
    pub fn start(
        recognizer: Arc<dyn SpeechRecognizer>,
        vad: VoiceActivityDetector,
    ) -> (TranscriberHandle, mpsc::UnboundedReceiver<TranscriptEvent>) {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TranscriptEvent>();
        let cancel = CancellationToken::new();

        let mut transcriber = Self {
            recognizer,
            segmenter: UtteranceSegmenter::new(vad, mulaw::SAMPLE_RATE),
            sequence: 0,
        };
        let token = cancel.clone();
        tokio::spawn(async move {
            transcriber.run(audio_rx, event_tx, token).await;
            debug!("Transcriber stopped");
        });

        (TranscriberHandle { audio_tx, cancel }, event_rx)
    }

    async fn run(
        &mut self,
        mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        event_tx: mpsc::UnboundedSender<TranscriptEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                chunk = audio_rx.recv() => match chunk {
                    Some(bytes) => {
                        let utterances = self.segmenter.push(&mulaw::decode(&bytes));
                        for utterance in utterances {
                            if !self.emit(utterance, &event_tx).await {
                                return;
                            }
                        }
                    }
                    None => break,
                },
            }
        }
        if let Some(utterance) = self.segmenter.flush() {
            self.emit(utterance, &event_tx).await;
        }
    }

    /// Returns false when the consumer has gone away.
    async fn emit(
        &mut self,
        utterance: Utterance,
        event_tx: &mpsc::UnboundedSender<TranscriptEvent>,
    ) -> bool {
        let text = match self
            .recognizer
            .transcribe(&utterance.pcm, mulaw::SAMPLE_RATE)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Transcription failed; utterance discarded");
                return !event_tx.is_closed();
            }
        };
        if text.is_empty() {
            debug!(seconds = utterance.duration_seconds, "Empty transcription");
            return !event_tx.is_closed();
        }
        self.sequence += 1;
        info!(
            sequence = self.sequence,
            seconds = utterance.duration_seconds,
            chars = text.len(),
            "Utterance transcribed"
        );
        event_tx
            .send(TranscriptEvent::final_result(
                text,
                utterance.duration_seconds,
                self.sequence,
            ))
            .is_ok()
    }
}
