//! Streaming consumer tests: one turn per final, overlap policies, and
//! what the caller hears when retrieval or the model falls short.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use helpline_agent::prompt::{TURN_APOLOGY, WORKING_ACK};
use helpline_agent::{ConsumerSummary, TurnOutcome};
use helpline_core::config::OverlapPolicy;
use helpline_core::store::{CallStore, CostKind, CostLedgerEntry};
use helpline_core::types::{Slot, TranscriptEvent};
use helpline_providers::gateway::DEGRADED_TEXT;
use helpline_retrieval::pipeline::{AnswerSource, NO_DOCUMENTS_REPLY};
use helpline_telephony::{Delivery, VoiceScript};

use support::{Harness, Options, ScriptedModel};

const KEYWORDS: &str = "search keywords";
const QUESTION: &str = "Caller's question";

fn model() -> ScriptedModel {
    ScriptedModel::new()
        .when(&[KEYWORDS], "epic, login")
        .when(&[QUESTION], "Clear the cache and sign in again.")
}

async fn consume(h: &Harness, call_id: &str, events: Vec<TranscriptEvent>) -> ConsumerSummary {
    let (tx, rx) = mpsc::unbounded_channel();
    for event in events {
        tx.send(event).unwrap();
    }
    drop(tx);
    Arc::clone(&h.consumer).run(call_id.to_string(), rx).await
}

fn finals(texts: &[&str]) -> Vec<TranscriptEvent> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| TranscriptEvent::final_result(*t, 2.0, i as u64 + 1))
        .collect()
}

/// Updates other than the acknowledgement that opens every turn.
fn answers(h: &Harness, call_id: &str) -> Vec<VoiceScript> {
    h.telephony
        .updates_for(call_id)
        .into_iter()
        .filter(|s| s.spoken() != vec![WORKING_ACK])
        .collect()
}

async fn charges(h: &Harness, call_id: &str) -> Vec<CostLedgerEntry> {
    h.ledger.flush().await;
    h.store.charges(call_id).await.unwrap()
}

#[tokio::test]
async fn test_final_is_answered_and_charged() {
    let h = Harness::new(model(), Options::default());
    h.streaming_call("CA1");

    let summary = consume(&h, "CA1", finals(&["I can't log in to Epic"])).await;
    assert_eq!(summary.finals, 1);
    assert_eq!(
        summary.turns[0].outcome,
        TurnOutcome::Answered {
            source: AnswerSource::Generated,
            degraded: false,
            delivery: Delivery::Delivered,
        }
    );

    let updates = h.telephony.updates_for("CA1");
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].spoken(), vec![WORKING_ACK]);
    assert_eq!(updates[1].spoken(), vec!["Clear the cache and sign in again."]);
    assert_eq!(updates[1].gather_timeout(), Some(5));

    let kinds: Vec<CostKind> = charges(&h, "CA1").await.iter().map(|c| c.kind).collect();
    assert_eq!(
        kinds,
        vec![
            CostKind::Speech,
            CostKind::KeywordExtraction,
            CostKind::AnswerGeneration
        ]
    );
    assert!(!h.registry.get("CA1").unwrap().in_flight);
}

#[tokio::test]
async fn test_no_documents_asks_for_clarification() {
    let h = Harness::new(
        model(),
        Options {
            documents: Vec::new(),
            ..Options::default()
        },
    );
    h.streaming_call("CA1");

    let summary = consume(&h, "CA1", finals(&["the thing is broken"])).await;
    assert!(matches!(
        summary.turns[0].outcome,
        TurnOutcome::Answered {
            source: AnswerSource::NoDocuments,
            ..
        }
    ));
    assert_eq!(
        answers(&h, "CA1")[0].spoken(),
        vec![NO_DOCUMENTS_REPLY]
    );
    assert_eq!(h.model.count(QUESTION), 0);
    let kinds: Vec<CostKind> = charges(&h, "CA1").await.iter().map(|c| c.kind).collect();
    assert!(!kinds.contains(&CostKind::AnswerGeneration));
}

#[tokio::test]
async fn test_answer_timeout_speaks_degraded_text() {
    let h = Harness::new(
        model().delay(QUESTION, Duration::from_secs(2)),
        Options {
            model_timeout: Duration::from_millis(200),
            ..Options::default()
        },
    );
    h.streaming_call("CA1");

    let summary = consume(&h, "CA1", finals(&["I can't log in to Epic"])).await;
    assert!(matches!(
        summary.turns[0].outcome,
        TurnOutcome::Answered { degraded: true, .. }
    ));
    assert_eq!(
        answers(&h, "CA1")[0].spoken(),
        vec![DEGRADED_TEXT]
    );

    let answer = charges(&h, "CA1")
        .await
        .into_iter()
        .find(|c| c.kind == CostKind::AnswerGeneration)
        .unwrap();
    assert!(answer.degraded);
    assert_eq!(answer.prompt_tokens, 10);
    assert_eq!(answer.completion_tokens, 10);
}

#[tokio::test]
async fn test_first_turn_answers_intake_issue() {
    let h = Harness::new(
        model(),
        Options {
            overlap: OverlapPolicy::QueueLatest,
            ..Options::default()
        },
    );
    h.streaming_call("CA1");
    h.registry.mutate("CA1", |s| {
        s.slots.merge(Slot::Issue, "Epic login fails after the update");
    });

    let summary = consume(&h, "CA1", finals(&["hello?", "what about the printer"])).await;
    assert_eq!(summary.turns.len(), 2);

    let prompts = h.model.prompts.lock().unwrap().clone();
    let questions: Vec<&String> = prompts.iter().filter(|p| p.contains(QUESTION)).collect();
    assert!(questions[0].contains("Caller's question: Epic login fails after the update\n"));
    assert!(questions[1].contains("Caller's question: what about the printer\n"));
    assert!(h.registry.get("CA1").unwrap().first_interaction_done);
}

#[tokio::test]
async fn test_overlapping_finals_are_dropped() {
    let h = Harness::new(
        model().delay(QUESTION, Duration::from_millis(150)),
        Options::default(),
    );
    h.streaming_call("CA1");

    let summary = consume(&h, "CA1", finals(&["one", "two", "three"])).await;
    assert_eq!(summary.finals, 3);
    assert_eq!(summary.turns.len(), 1);
    assert_eq!(summary.dropped, 2);
    assert_eq!(summary.turns[0].sequence, 1);

    let speech = charges(&h, "CA1")
        .await
        .iter()
        .filter(|c| c.kind == CostKind::Speech)
        .count();
    assert_eq!(speech, 1);
    assert!(!h.registry.get("CA1").unwrap().in_flight);
}

#[tokio::test]
async fn test_queue_latest_keeps_newest_final() {
    let h = Harness::new(
        model().delay(QUESTION, Duration::from_millis(150)),
        Options {
            overlap: OverlapPolicy::QueueLatest,
            ..Options::default()
        },
    );
    h.streaming_call("CA1");

    let summary = consume(&h, "CA1", finals(&["one", "two", "three"])).await;
    let sequences: Vec<u64> = summary.turns.iter().map(|t| t.sequence).collect();
    assert_eq!(sequences, vec![1, 3]);
    assert_eq!(summary.queued, 1);
    assert_eq!(summary.dropped, 1);
    assert_eq!(answers(&h, "CA1").len(), 2);
}

#[tokio::test]
async fn test_rate_limit_apologizes() {
    let h = Harness::new(model(), Options::default());
    h.streaming_call("CA1");
    h.model.rate_limited.store(true, Ordering::SeqCst);

    let summary = consume(&h, "CA1", finals(&["I can't log in"])).await;
    assert_eq!(
        summary.turns[0].outcome,
        TurnOutcome::RateLimited {
            delivery: Delivery::Delivered
        }
    );
    assert_eq!(
        answers(&h, "CA1")[0].spoken(),
        vec![TURN_APOLOGY]
    );
    h.ledger.flush().await;
    assert_eq!(h.store.errors().await[0].context, "answer");
}

#[tokio::test]
async fn test_inactive_call_gets_nothing() {
    let h = Harness::new(model(), Options::default());
    h.streaming_call("CA1");
    h.telephony.set_status("CA1", "completed");

    let summary = consume(&h, "CA1", finals(&["are you there"])).await;
    assert_eq!(summary.turns[0].outcome, TurnOutcome::CallInactive);
    assert!(h.telephony.updates_for("CA1").is_empty());
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 0);
    assert!(h.model.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_interim_text_fills_blank_final() {
    let h = Harness::new(model(), Options::default());
    h.streaming_call("CA1");

    let events = vec![
        TranscriptEvent::interim("my password", 1),
        TranscriptEvent::interim("my password expired", 2),
        TranscriptEvent::final_result("", 1.5, 3),
    ];
    let summary = consume(&h, "CA1", events).await;
    assert_eq!(summary.interims, 2);
    assert_eq!(summary.finals, 1);
    assert_eq!(h.model.count("Caller's question: my password expired"), 1);
}

#[tokio::test]
async fn test_repeated_question_is_served_from_cache() {
    let h = Harness::new(model(), Options::default());
    h.streaming_call("CA1");
    h.streaming_call("CA2");

    consume(&h, "CA1", finals(&["How do I reset my password"])).await;
    consume(&h, "CA2", finals(&["How do I reset my password"])).await;

    assert_eq!(h.model.count(QUESTION), 1);
    assert_eq!(h.model.count(KEYWORDS), 1);
    assert_eq!(answers(&h, "CA1"), answers(&h, "CA2"));
    let model_charges = charges(&h, "CA2")
        .await
        .iter()
        .filter(|c| c.kind != CostKind::Speech)
        .count();
    assert_eq!(model_charges, 0);
}
