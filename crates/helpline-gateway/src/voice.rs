//! Telephony webhooks.
//!
//! Speech and silence webhooks answer at once with a holding script; the
//! dialogue step runs in the background and reaches the caller through the
//! liveness gate.

use std::sync::Arc;

use axum::Form;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{debug, info};

use helpline_agent::StepOutcome;
use helpline_telephony::VoiceScript;

use crate::state::AppState;

/// Provider call statuses after which the call cannot be reached again.
pub const TERMINAL_STATUSES: &[&str] = &["completed", "busy", "failed", "no-answer", "canceled"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IncomingCall {
    pub call_sid: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatherResult {
    pub call_sid: String,
    #[serde(default)]
    pub speech_result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NoInput {
    pub call_sid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusCallback {
    pub call_sid: String,
    pub call_status: String,
}

fn twiml(script: &VoiceScript) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], script.to_xml()).into_response()
}

fn log_outcome(call_id: &str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Responded {
            stage, delivery, ..
        } => {
            debug!(call_id, %stage, delivery = delivery.as_str(), "Dialogue step delivered");
            #[cfg(feature = "metrics")]
            crate::metrics::record_intake_step(stage.as_str(), delivery.as_str());
        }
        StepOutcome::CallInactive => info!(call_id, "Dialogue step skipped; call has ended"),
        StepOutcome::Ignored { stage } => debug!(call_id, %stage, "Dialogue step ignored"),
        StepOutcome::UnknownCall => info!(call_id, "Dialogue step for an unknown call"),
    }
}

pub async fn incoming(State(state): State<Arc<AppState>>, Form(call): Form<IncomingCall>) -> Response {
    #[cfg(feature = "metrics")]
    crate::metrics::record_call_started();

    let script = state.engine.start_call(&call.call_sid, call.from, call.to);
    twiml(&script)
}

pub async fn gather(State(state): State<Arc<AppState>>, Form(form): Form<GatherResult>) -> Response {
    let speech = form.speech_result.unwrap_or_default();
    debug!(call_id = %form.call_sid, chars = speech.len(), "Speech gathered");

    let engine = Arc::clone(&state.engine);
    let call_id = form.call_sid;
    tokio::spawn(async move {
        let outcome = engine.handle_utterance(&call_id, &speech).await;
        log_outcome(&call_id, &outcome);
    });

    twiml(&state.engine.scripts().processing())
}

pub async fn no_input(State(state): State<Arc<AppState>>, Form(form): Form<NoInput>) -> Response {
    let engine = Arc::clone(&state.engine);
    let call_id = form.call_sid;
    tokio::spawn(async move {
        let outcome = engine.handle_no_speech(&call_id).await;
        log_outcome(&call_id, &outcome);
    });

    twiml(&state.engine.scripts().processing())
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Form(form): Form<StatusCallback>,
) -> StatusCode {
    debug!(call_id = %form.call_sid, status = %form.call_status, "Call status callback");
    if TERMINAL_STATUSES.contains(&form.call_status.as_str()) && state.engine.end_call(&form.call_sid)
    {
        #[cfg(feature = "metrics")]
        crate::metrics::record_call_ended();
    }
    StatusCode::NO_CONTENT
}
