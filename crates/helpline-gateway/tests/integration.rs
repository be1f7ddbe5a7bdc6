//! Gateway integration tests: start a real server and drive it over HTTP
//! webhooks and the media WebSocket.
//!
//! Run with: `cargo test -p helpline-gateway --test integration`

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::SinkExt;
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use helpline_core::config::Config;
use helpline_core::store::MemoryCallStore;
use helpline_core::types::Document;
use helpline_gateway::{AppState, Collaborators};
use helpline_media::recognizer::{SpeechError, SpeechRecognizer};
use helpline_providers::{
    Completion, CompletionRequest, Credentials, LlmProvider, ProviderError, Usage,
};
use helpline_retrieval::{DocumentSearch, SearchError};
use helpline_telephony::{Telephony, TelephonyError, VoiceScript};

const ANSWER: &str = "Press the green button on the printer.";

struct CannedModel;

#[async_trait]
impl LlmProvider for CannedModel {
    fn id(&self) -> &str {
        "canned"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> Result<Completion, ProviderError> {
        let prompt = &request.prompt;
        let text = if prompt.contains("Extract from the text above") {
            r#"{"name": "Alice", "role": "Nurse", "department": "Radiology",
                "issue": "the printer is jammed", "severity": "Low"}"#
        } else if prompt.contains("search keywords") {
            "printer, jam"
        } else if prompt.contains("Caller's question") {
            ANSWER
        } else {
            "Medium"
        };
        Ok(Completion {
            text: text.to_string(),
            model: request.model.clone(),
            usage: Usage {
                prompt_tokens: 50,
                completion_tokens: 10,
            },
        })
    }
}

struct OneDocument;

#[async_trait]
impl DocumentSearch for OneDocument {
    async fn query(
        &self,
        _keywords: &[String],
        _department: Option<&str>,
    ) -> Result<Vec<Document>, SearchError> {
        Ok(vec![Document {
            title: "Printer jams".into(),
            content: "Open the tray and press the green button.".into(),
            category: "Radiology".into(),
        }])
    }
}

struct FixedRecognizer;

#[async_trait]
impl SpeechRecognizer for FixedRecognizer {
    async fn transcribe(&self, _pcm: &[i16], _sample_rate: u32) -> Result<String, SpeechError> {
        Ok("the printer is still jammed".into())
    }
}

/// Every call is in progress; updates are recorded.
#[derive(Default)]
struct RecordingTelephony {
    updates: Mutex<Vec<(String, VoiceScript)>>,
    statuses: Mutex<HashMap<String, String>>,
}

impl RecordingTelephony {
    fn spoken(&self, call_id: &str) -> Vec<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == call_id)
            .flat_map(|(_, s)| s.spoken())
            .map(|s| s.to_string())
            .collect()
    }
}

#[async_trait]
impl Telephony for RecordingTelephony {
    async fn call_status(&self, call_id: &str) -> Result<String, TelephonyError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(call_id)
            .cloned()
            .unwrap_or_else(|| "in-progress".into()))
    }

    async fn update_call(&self, call_id: &str, script: &VoiceScript) -> Result<(), TelephonyError> {
        self.updates
            .lock()
            .unwrap()
            .push((call_id.to_string(), script.clone()));
        Ok(())
    }
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server with canned collaborators and return its state, the
/// telephony recorder and the port.
async fn start_test_server() -> (Arc<AppState>, Arc<RecordingTelephony>, u16) {
    let port = find_free_port();

    let config: Config = serde_json::from_value(json!({
        "server": { "port": port, "bind": "127.0.0.1" },
        "models": { "api_keys": ["test-key"], "timeout_ms": 2000 },
        "telephony": { "active_statuses": ["in-progress"] },
        "speech": { "silence_frames": 5 },
    }))
    .unwrap();

    let telephony = Arc::new(RecordingTelephony::default());
    let collaborators = Collaborators {
        provider: Arc::new(CannedModel),
        search: Arc::new(OneDocument),
        telephony: telephony.clone(),
        recognizer: Arc::new(FixedRecognizer),
        store: Arc::new(MemoryCallStore::new()),
    };
    let state = Arc::new(AppState::new(config, collaborators));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = helpline_gateway::start_server(state_clone).await;
    });

    // Wait for the server to be ready
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if reqwest::get(format!("http://127.0.0.1:{port}/health"))
            .await
            .is_ok()
        {
            break;
        }
    }

    (state, telephony, port)
}

async fn post_form(port: u16, path: &str, form: &[(&str, &str)]) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}{path}"))
        .form(form)
        .send()
        .await
        .unwrap()
}

/// Poll until the caller has heard `text`.
async fn wait_for_spoken(telephony: &RecordingTelephony, call_id: &str, text: &str) {
    for _ in 0..50 {
        if telephony.spoken(call_id).iter().any(|s| s == text) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "{call_id} never heard {text:?}; heard {:?}",
        telephony.spoken(call_id)
    );
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_state, _telephony, port) = start_test_server().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["active_calls"], 0);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_incoming_call_greets_with_gather() {
    let (state, _telephony, port) = start_test_server().await;

    let resp = post_form(
        port,
        "/voice/incoming",
        &[("CallSid", "CA100"), ("From", "+15550100"), ("To", "+15550199")],
    )
    .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/xml");

    let xml = resp.text().await.unwrap();
    assert!(xml.contains("<Gather"));
    assert!(xml.contains("/voice/gather"));
    assert!(state.registry.contains("CA100"));

    let health: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{port}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["active_calls"], 1);
}

#[tokio::test]
async fn test_gather_holds_then_hands_off() {
    let (_state, telephony, port) = start_test_server().await;

    post_form(port, "/voice/incoming", &[("CallSid", "CA200")]).await;
    let resp = post_form(
        port,
        "/voice/gather",
        &[
            ("CallSid", "CA200"),
            (
                "SpeechResult",
                "This is Alice, a nurse in Radiology, the printer is jammed",
            ),
        ],
    )
    .await;
    let xml = resp.text().await.unwrap();
    assert!(xml.contains(helpline_agent::prompt::PROCESSING_ACK));

    wait_for_spoken(&telephony, "CA200", helpline_agent::prompt::HANDOFF).await;
    let update = telephony
        .updates
        .lock()
        .unwrap()
        .last()
        .map(|(_, s)| s.clone())
        .unwrap();
    assert!(update.opens_stream());
}

#[tokio::test]
async fn test_terminal_status_ends_call() {
    let (state, _telephony, port) = start_test_server().await;

    post_form(port, "/voice/incoming", &[("CallSid", "CA300")]).await;
    assert!(state.registry.contains("CA300"));

    let resp = post_form(
        port,
        "/voice/status",
        &[("CallSid", "CA300"), ("CallStatus", "ringing")],
    )
    .await;
    assert_eq!(resp.status(), 204);
    assert!(state.registry.contains("CA300"));

    post_form(
        port,
        "/voice/status",
        &[("CallSid", "CA300"), ("CallStatus", "completed")],
    )
    .await;
    assert!(!state.registry.contains("CA300"));
}

#[tokio::test]
async fn test_media_stream_answers_caller() {
    let (state, telephony, port) = start_test_server().await;

    post_form(port, "/voice/incoming", &[("CallSid", "CA400")]).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{port}/media"))
        .await
        .unwrap();

    let loud = STANDARD.encode(vec![0x80u8; 160 * 10]);
    let quiet = STANDARD.encode(vec![0xFFu8; 160 * 10]);
    let frames = [
        json!({"event": "connected", "protocol": "Call", "version": "1.0.0"}),
        json!({"event": "start", "start": {"callSid": "CA400", "streamSid": "MZ1"}}),
        json!({"event": "media", "media": {"payload": loud, "track": "inbound"}}),
        json!({"event": "media", "media": {"payload": quiet, "track": "inbound"}}),
    ];
    for frame in frames {
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }

    wait_for_spoken(&telephony, "CA400", ANSWER).await;

    ws.send(Message::Text(json!({"event": "stop"}).to_string().into()))
        .await
        .unwrap();

    // The call is closed once the stream drains
    for _ in 0..50 {
        if !state.registry.contains("CA400") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!state.registry.contains("CA400"));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_state, _telephony, port) = start_test_server().await;

    let resp = reqwest::get(format!("http://127.0.0.1:{port}/nope"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
