//! HTTP surface of the help desk.
//!
//! Telephony webhooks drive the intake dialogue, the `/media` WebSocket
//! feeds live audio to the transcript consumer, and `/health` reports how
//! many calls are in progress.

pub mod media_stream;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;
pub mod voice;

pub use server::{router, start_server};
pub use state::{AppState, Collaborators};
