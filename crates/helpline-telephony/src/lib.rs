//! Telephony control plane: voice scripts, the call-control client and the
//! liveness gate that guards every audible side effect.

use async_trait::async_trait;
use thiserror::Error;

pub mod gate;
pub mod script;
pub mod twilio;

pub use gate::{Delivery, LivenessGate};
pub use script::VoiceScript;

/// Provider error code for "call is not in progress; cannot redirect".
pub const CALL_NOT_IN_PROGRESS: u32 = 21220;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TelephonyError {
    #[error("telephony credentials are not configured")]
    NotConfigured,

    #[error("call is no longer in progress")]
    NotInProgress,

    #[error("telephony API error {status}: {message}")]
    Http {
        status: u16,
        code: Option<u32>,
        message: String,
    },

    #[error("telephony transport error: {0}")]
    Transport(String),

    #[error("malformed telephony response: {0}")]
    Decode(String),
}

/// Call-control collaborator.
#[async_trait]
pub trait Telephony: Send + Sync {
    /// Current provider status of the call (e.g. "in-progress", "completed").
    async fn call_status(&self, call_id: &str) -> Result<String, TelephonyError>;

    /// Replace what an already-open call is doing with `script`.
    async fn update_call(&self, call_id: &str, script: &VoiceScript) -> Result<(), TelephonyError>;
}
