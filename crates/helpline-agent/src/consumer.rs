//! Streaming transcript consumer.
//!
//! One consumer task owns the transcript channel of one call. Interim
//! results only refresh the utterance buffer. Each final starts a turn
//! (speech charge, liveness check, grounded answer, gated delivery) unless
//! a turn is already running for the call, in which case the overlap
//! policy decides between dropping the final and holding it as the single
//! queued successor.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use helpline_core::config::{Config, OverlapPolicy};
use helpline_core::ledger::CostLedger;
use helpline_core::session::{CallSessionRegistry, TurnGuard, TurnRefused};
use helpline_core::store::{CostLedgerEntry, ErrorLogEntry};
use helpline_core::types::{Slot, TranscriptEvent};
use helpline_retrieval::pipeline::RetrievalPipeline;
use helpline_telephony::{Delivery, LivenessGate};

use crate::prompt::Scripts;
use crate::{TurnOutcome, TurnReport};

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub overlap: OverlapPolicy,
    pub speech_cost_per_minute: f64,
}

impl StreamSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            overlap: config.overlap_policy(),
            speech_cost_per_minute: config.speech_cost_per_minute(),
        }
    }
}

/// What happened to the transcript stream of one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerSummary {
    pub interims: usize,
    pub finals: usize,
    /// Finals that arrived while a turn was running and were discarded.
    pub dropped: usize,
    /// Finals that waited in the one-deep queue before running.
    pub queued: usize,
    pub turns: Vec<TurnReport>,
}

pub struct StreamConsumer {
    registry: Arc<CallSessionRegistry>,
    pipeline: Arc<RetrievalPipeline>,
    gate: LivenessGate,
    ledger: CostLedger,
    scripts: Arc<Scripts>,
    settings: StreamSettings,
}

impl StreamConsumer {
    pub fn new(
        registry: Arc<CallSessionRegistry>,
        pipeline: Arc<RetrievalPipeline>,
        gate: LivenessGate,
        ledger: CostLedger,
        scripts: Arc<Scripts>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            registry,
            pipeline,
            gate,
            ledger,
            scripts,
            settings,
        }
    }

    /// Consume `events` until the channel closes, then wait for any turn
    /// still running.
    pub async fn run(
        self: Arc<Self>,
        call_id: String,
        mut events: mpsc::UnboundedReceiver<TranscriptEvent>,
    ) -> ConsumerSummary {
        let mut summary = ConsumerSummary::default();
        let mut turns: JoinSet<TurnReport> = JoinSet::new();
        let mut queued: Option<TranscriptEvent> = None;
        let mut buffer = String::new();
        let mut open = true;

        while open || !turns.is_empty() {
            tokio::select! {
                event = events.recv(), if open => match event {
                    Some(event) if !event.is_final => {
                        summary.interims += 1;
                        buffer = event.text;
                    }
                    Some(mut event) => {
                        if event.text.trim().is_empty() {
                            event.text = std::mem::take(&mut buffer);
                        } else {
                            buffer.clear();
                        }
                        if event.text.trim().is_empty() {
                            debug!(call_id = %call_id, sequence = event.sequence, "Blank final ignored");
                            continue;
                        }
                        summary.finals += 1;
                        self.admit(&call_id, event, &mut turns, &mut queued, &mut summary);
                    }
                    None => {
                        debug!(call_id = %call_id, "Transcript stream closed");
                        open = false;
                    }
                },
                Some(joined) = turns.join_next() => {
                    match joined {
                        Ok(report) => summary.turns.push(report),
                        Err(e) => warn!(call_id = %call_id, error = %e, "Turn task failed"),
                    }
                    if let Some(next) = queued.take() {
                        debug!(call_id = %call_id, sequence = next.sequence, "Starting queued final");
                        self.admit(&call_id, next, &mut turns, &mut queued, &mut summary);
                    }
                }
            }
        }

        info!(
            call_id = %call_id,
            finals = summary.finals,
            turns = summary.turns.len(),
            dropped = summary.dropped,
            "Transcript consumer finished"
        );
        summary
    }

    /// Start a turn for `event`, or apply the overlap policy when one is
    /// already running.
    fn admit(
        self: &Arc<Self>,
        call_id: &str,
        event: TranscriptEvent,
        turns: &mut JoinSet<TurnReport>,
        queued: &mut Option<TranscriptEvent>,
        summary: &mut ConsumerSummary,
    ) {
        match self.registry.try_begin_turn(call_id) {
            Ok(guard) => {
                let consumer = Arc::clone(self);
                turns.spawn(async move { consumer.turn(guard, event).await });
            }
            Err(TurnRefused::Busy) => match self.settings.overlap {
                OverlapPolicy::Drop => {
                    info!(call_id, sequence = event.sequence, "Turn in progress; final dropped");
                    summary.dropped += 1;
                }
                OverlapPolicy::QueueLatest => {
                    if let Some(displaced) = queued.replace(event) {
                        info!(call_id, sequence = displaced.sequence, "Queued final replaced by a newer one");
                        summary.dropped += 1;
                    } else {
                        summary.queued += 1;
                    }
                }
            },
            Err(TurnRefused::UnknownCall) => {
                warn!(call_id, sequence = event.sequence, "Final for a call without a session");
                summary.dropped += 1;
            }
        }
    }

    /// One answer turn. The guard releases the call when this returns.
    async fn turn(self: Arc<Self>, guard: TurnGuard, event: TranscriptEvent) -> TurnReport {
        let outcome = self.answer(guard.call_id(), &event).await;
        drop(guard);
        TurnReport {
            sequence: event.sequence,
            outcome,
        }
    }

    async fn answer(&self, call_id: &str, event: &TranscriptEvent) -> TurnOutcome {
        self.ledger.append(CostLedgerEntry::speech(
            call_id,
            event.duration_seconds,
            self.settings.speech_cost_per_minute,
        ));

        match self.gate.update_if_active(call_id, &self.scripts.working()).await {
            Delivery::Skipped => {
                info!(call_id, "Call ended before the answer turn");
                return TurnOutcome::CallInactive;
            }
            Delivery::Failed => debug!(call_id, "Acknowledgement not delivered; answering anyway"),
            Delivery::Delivered => {}
        }

        // The first turn answers the intake issue when one was collected
        let context = self.registry.mutate(call_id, |s| {
            let question = if s.first_interaction_done {
                event.text.clone()
            } else {
                s.first_interaction_done = true;
                s.slots
                    .filled(Slot::Issue)
                    .map(str::to_string)
                    .unwrap_or_else(|| event.text.clone())
            };
            (question, s.slots.clone())
        });
        let Some((question, slots)) = context else {
            return TurnOutcome::CallInactive;
        };

        match self.pipeline.answer(call_id, &question, &slots).await {
            Ok(answer) => {
                let script = self.scripts.answer(&answer.text);
                let delivery = self.gate.update_if_active(call_id, &script).await;
                info!(
                    call_id,
                    sequence = event.sequence,
                    source = ?answer.source,
                    degraded = answer.degraded,
                    delivery = delivery.as_str(),
                    "Answer turn finished"
                );
                TurnOutcome::Answered {
                    source: answer.source,
                    degraded: answer.degraded,
                    delivery,
                }
            }
            Err(e) => {
                warn!(call_id, error = %e, "Answer turn refused by the model");
                self.ledger
                    .log_error(ErrorLogEntry::new(call_id, "answer", e.to_string()));
                let delivery = self
                    .gate
                    .update_if_active(call_id, &self.scripts.apology())
                    .await;
                TurnOutcome::RateLimited { delivery }
            }
        }
    }
}
