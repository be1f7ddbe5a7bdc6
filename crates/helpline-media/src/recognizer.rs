//! Speech-to-text collaborator.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use helpline_core::config::Config;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("no speech API key configured")]
    NotConfigured,

    #[error("speech API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("speech transport error: {0}")]
    Transport(String),
}

/// Turns one utterance of PCM audio into text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String, SpeechError>;
}

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

pub fn provider_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1/audio/transcriptions",
        _ => "https://api.groq.com/openai/v1/audio/transcriptions",
    }
}

/// Whisper-compatible transcription endpoint (Groq or OpenAI).
pub struct WhisperRecognizer {
    url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl WhisperRecognizer {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let speech = config.speech.clone();
        let provider = speech
            .as_ref()
            .map(|s| s.provider.as_str())
            .unwrap_or("groq");
        let model = speech
            .as_ref()
            .and_then(|s| s.model.clone())
            .unwrap_or_else(|| "whisper-large-v3-turbo".into());
        let api_key = speech.as_ref().and_then(|s| s.resolve_api_key());
        Self::new(provider_url(provider), model, api_key)
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    async fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String, SpeechError> {
        let api_key = self.api_key.as_deref().ok_or(SpeechError::NotConfigured)?;
        let wav = pcm_to_wav(pcm, sample_rate, 1, 16);
        debug!(url = %self.url, model = %self.model, wav_bytes = wav.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SpeechError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", part);

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SpeechError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SpeechError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SpeechError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body.trim().to_string())
    }
}
