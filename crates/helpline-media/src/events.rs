//! Media-stream WebSocket events (Twilio Media Streams wire format).

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

/// One inbound frame on the media-stream socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StreamStart,
    },
    Media {
        media: MediaChunk,
    },
    Stop {
        #[serde(default)]
        stop: Option<StreamStop>,
    },
    /// Marks, DTMF and anything newer.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub call_sid: String,
    pub stream_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaChunk {
    /// Base64-encoded 8 kHz mu-law audio.
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStop {
    #[serde(default)]
    pub call_sid: Option<String>,
}

impl StreamEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl MediaChunk {
    /// Raw mu-law bytes. Malformed payloads decode to nothing.
    pub fn audio(&self) -> Vec<u8> {
        STANDARD.decode(self.payload.as_bytes()).unwrap_or_default()
    }

    /// Outbound audio echoed back on the stream is not the caller.
    pub fn is_inbound(&self) -> bool {
        self.track.as_deref().is_none_or(|t| t == "inbound")
    }
}
