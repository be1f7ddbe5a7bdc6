//! Media pipeline: stream events, mu-law decoding, VAD and speech recognition.

pub mod events;
pub mod mulaw;
pub mod recognizer;
pub mod transcriber;
pub mod vad;
