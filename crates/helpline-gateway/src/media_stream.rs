//! Media-stream WebSocket: provider audio in, transcript consumer out.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use helpline_agent::ConsumerSummary;
use helpline_media::events::StreamEvent;
use helpline_media::transcriber::{ChunkedTranscriber, TranscriberHandle};

use crate::state::AppState;

/// A stream that has announced its call.
struct ActiveStream {
    call_id: String,
    transcriber: TranscriberHandle,
    consumer: JoinHandle<ConsumerSummary>,
}

pub async fn media_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(state, socket))
}

pub async fn handle_media_stream(state: Arc<AppState>, mut socket: WebSocket) {
    let mut active: Option<ActiveStream> = None;
    let mut frames: u64 = 0;

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Media stream closed by provider");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "Media stream socket error");
                break;
            }
        };

        match StreamEvent::parse(text.as_str()) {
            Ok(StreamEvent::Connected { protocol }) => {
                debug!(protocol = protocol.as_deref().unwrap_or("-"), "Media stream connected");
            }
            Ok(StreamEvent::Start { start }) => {
                if active.is_some() {
                    warn!(call_id = %start.call_sid, "Second start event on one stream ignored");
                    continue;
                }
                info!(call_id = %start.call_sid, stream_sid = %start.stream_sid, "Media stream started");
                state.engine.stream_started(&start.call_sid);

                let (transcriber, events) =
                    ChunkedTranscriber::start(Arc::clone(&state.recognizer), state.vad());
                let consumer = tokio::spawn(
                    Arc::clone(&state.consumer).run(start.call_sid.clone(), events),
                );
                active = Some(ActiveStream {
                    call_id: start.call_sid,
                    transcriber,
                    consumer,
                });
            }
            Ok(StreamEvent::Media { media }) => {
                let Some(stream) = &active else {
                    continue;
                };
                if !media.is_inbound() {
                    continue;
                }
                let audio = media.audio();
                if !audio.is_empty() && stream.transcriber.push_mulaw(audio) {
                    frames += 1;
                }
            }
            Ok(StreamEvent::Stop { .. }) => {
                debug!(frames, "Media stream stop event");
                break;
            }
            Ok(StreamEvent::Other) => {}
            Err(e) => warn!(error = %e, "Unreadable media stream event"),
        }
    }

    if let Some(stream) = active {
        finish(&state, stream).await;
    }
}

/// Let the last utterance through, wait for the consumer, then close the call.
async fn finish(state: &AppState, stream: ActiveStream) {
    stream.transcriber.finish();
    match stream.consumer.await {
        Ok(summary) => {
            info!(
                call_id = %stream.call_id,
                finals = summary.finals,
                turns = summary.turns.len(),
                dropped = summary.dropped,
                "Media stream finished"
            );
            #[cfg(feature = "metrics")]
            crate::metrics::record_stream(&summary);
        }
        Err(e) => warn!(call_id = %stream.call_id, error = %e, "Transcript consumer failed"),
    }
    if state.engine.end_call(&stream.call_id) {
        #[cfg(feature = "metrics")]
        crate::metrics::record_call_ended();
    }
}
