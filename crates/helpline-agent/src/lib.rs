//! Call dialogue: intake state machine and streaming transcript consumer.
//!
//! The [`dialogue::DialogueEngine`] walks a call through the intake stages
//! (one open question, or identity / issue / severity in turn) and hands
//! the call off to a media stream. From then on the
//! [`consumer::StreamConsumer`] turns each final transcript into one
//! grounded answer spoken back to the caller.

use helpline_core::types::Stage;
use helpline_retrieval::pipeline::AnswerSource;
use helpline_telephony::{Delivery, VoiceScript};

pub mod consumer;
pub mod dialogue;
pub mod extraction;
pub mod prompt;
pub mod severity;

pub use consumer::{ConsumerSummary, StreamConsumer, StreamSettings};
pub use dialogue::{DialogueEngine, DialogueSettings};

/// Result of one intake step (an utterance or a silence).
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The call moved to `stage` and `script` was sent through the gate.
    Responded {
        stage: Stage,
        script: VoiceScript,
        delivery: Delivery,
    },
    /// The caller hung up; the session was discarded without prompting.
    CallInactive,
    /// The call is no longer in an intake stage.
    Ignored { stage: Stage },
    UnknownCall,
}

impl StepOutcome {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Responded { stage, .. } | Self::Ignored { stage } => Some(*stage),
            Self::CallInactive | Self::UnknownCall => None,
        }
    }

    pub fn script(&self) -> Option<&VoiceScript> {
        match self {
            Self::Responded { script, .. } => Some(script),
            _ => None,
        }
    }
}

/// Result of one streaming turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnOutcome {
    Answered {
        source: AnswerSource,
        degraded: bool,
        delivery: Delivery,
    },
    /// The model refused with a rate limit; an apology was sent instead.
    RateLimited { delivery: Delivery },
    /// The call had ended before anything could be said.
    CallInactive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnReport {
    pub sequence: u64,
    pub outcome: TurnOutcome,
}
