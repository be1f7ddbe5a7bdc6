//! Intake dialogue state machine.
//!
//! Each gathered utterance (or silence) advances a call by at most one
//! step. Slots only move from a sentinel to a real value, never back, and
//! every re-prompt counter is bounded by the configured budget, so every
//! call reaches the streaming hand-off.

use std::sync::Arc;

use tracing::{debug, info, warn};

use helpline_core::config::{Config, IntakeMode};
use helpline_core::ledger::CostLedger;
use helpline_core::session::{CallSession, CallSessionRegistry};
use helpline_core::store::{CallRecord, CallUpdate, CostKind, CostLedgerEntry, ErrorLogEntry};
use helpline_core::types::{Severity, Slot, Stage, UNKNOWN, join_slots};
use helpline_providers::gateway::{ModelGateway, RequestTimeout};
use helpline_telephony::{Delivery, LivenessGate, VoiceScript};

use crate::StepOutcome;
use crate::extraction::SlotExtractor;
use crate::prompt::Scripts;
use crate::severity::{keyword_severity, severity_from_reply, severity_prompt};

/// Slots the open intake question asks for.
pub const INTAKE_SLOTS: [Slot; 4] = [Slot::Name, Slot::Role, Slot::Department, Slot::Issue];

/// Slots the staged identity question must fill.
pub const IDENTITY_SLOTS: [Slot; 2] = [Slot::Name, Slot::Department];

const IDENTITY_DONE: &str = "Thank you. I've got that information.";
const ISSUE_DONE: &str = "Thank you for describing your issue.";
const MOVING_ON: &str = "Let's continue.";

#[derive(Debug, Clone)]
pub struct DialogueSettings {
    pub mode: IntakeMode,
    pub max_retries: u8,
    pub no_speech_retries: u8,
    pub severity_with_model: bool,
    pub greeting: String,
    pub model: String,
    pub model_timeout: RequestTimeout,
}

impl DialogueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.intake_mode(),
            max_retries: config.max_retries(),
            no_speech_retries: config.no_speech_retries(),
            severity_with_model: config.severity_with_model(),
            greeting: config.greeting(),
            model: config.extraction_model(),
            model_timeout: RequestTimeout::After(config.model_timeout()),
        }
    }
}

impl Default for DialogueSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The next thing to say and where the call now stands.
struct Step {
    stage: Stage,
    script: VoiceScript,
}

pub struct DialogueEngine {
    registry: Arc<CallSessionRegistry>,
    gateway: Arc<ModelGateway>,
    extractor: SlotExtractor,
    gate: LivenessGate,
    ledger: CostLedger,
    scripts: Arc<Scripts>,
    settings: DialogueSettings,
}

impl DialogueEngine {
    pub fn new(
        registry: Arc<CallSessionRegistry>,
        gateway: Arc<ModelGateway>,
        gate: LivenessGate,
        ledger: CostLedger,
        scripts: Arc<Scripts>,
        settings: DialogueSettings,
    ) -> Self {
        let extractor = SlotExtractor::new(
            Arc::clone(&gateway),
            ledger.clone(),
            settings.model.clone(),
            settings.model_timeout,
        );
        Self {
            registry,
            gateway,
            extractor,
            gate,
            ledger,
            scripts,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<CallSessionRegistry> {
        &self.registry
    }

    pub fn scripts(&self) -> &Arc<Scripts> {
        &self.scripts
    }

    pub fn settings(&self) -> &DialogueSettings {
        &self.settings
    }

    fn first_stage(&self) -> Stage {
        match self.settings.mode {
            IntakeMode::CollectAll => Stage::CollectingAllDetails,
            IntakeMode::Staged => Stage::CollectingIdentity,
        }
    }

    /// Register an inbound call and return the greeting.
    ///
    /// A repeated webhook for a known call re-asks the current question
    /// without touching the stored record.
    pub fn start_call(&self, call_id: &str, from: Option<String>, to: Option<String>) -> VoiceScript {
        let stage = if self.registry.contains(call_id) {
            debug!(call_id, "Incoming webhook repeated for a known call");
            self.registry
                .get(call_id)
                .map(|s| s.stage)
                .unwrap_or_else(|| self.first_stage())
        } else {
            let first = self.first_stage();
            self.registry.create(call_id);
            self.registry.mutate(call_id, |s| s.advance(first));
            self.ledger
                .insert_call(CallRecord::started(call_id, from.clone(), to));
            info!(call_id, from = from.as_deref().unwrap_or("-"), stage = %first, "Call started");
            first
        };
        if stage.is_intake() {
            self.scripts.greeting(&self.settings.greeting, stage)
        } else {
            self.scripts.handoff(true)
        }
    }

    /// Process one gathered utterance. Blank speech counts as silence.
    pub async fn handle_utterance(&self, call_id: &str, speech: &str) -> StepOutcome {
        let speech = speech.trim();
        if speech.is_empty() {
            return self.handle_no_speech(call_id).await;
        }
        let Some(session) = self.registry.get(call_id) else {
            warn!(call_id, "Speech for an unknown call");
            return StepOutcome::UnknownCall;
        };
        if !session.stage.is_intake() {
            debug!(call_id, stage = %session.stage, "Speech outside intake ignored");
            return StepOutcome::Ignored {
                stage: session.stage,
            };
        }
        if !self.gate.is_active(call_id).await {
            self.end_call(call_id);
            return StepOutcome::CallInactive;
        }

        let step = match session.stage {
            Stage::CollectingIdentity => self.identity_step(call_id, speech).await,
            Stage::CollectingIssue => self.issue_step(call_id, speech),
            Stage::CollectingSeverity => self.severity_step(call_id, speech).await,
            _ => self.collect_all_step(call_id, &session, speech).await,
        };
        let Some(step) = step else {
            return StepOutcome::UnknownCall;
        };
        if let Some(session) = self.registry.get(call_id) {
            self.ledger
                .update_call(call_id, CallUpdate::slots(&session.slots));
        }
        self.deliver(call_id, step).await
    }

    /// The caller said nothing before the gather timed out.
    pub async fn handle_no_speech(&self, call_id: &str) -> StepOutcome {
        let Some(session) = self.registry.get(call_id) else {
            return StepOutcome::UnknownCall;
        };
        if !session.stage.is_intake() {
            return StepOutcome::Ignored {
                stage: session.stage,
            };
        }
        if !self.gate.is_active(call_id).await {
            self.end_call(call_id);
            return StepOutcome::CallInactive;
        }

        let budget = self.settings.no_speech_retries;
        let step = self.registry.mutate(call_id, |s| {
            let stage = s.stage;
            if s.silences(stage) < budget {
                *s.no_speech_counts.entry(stage).or_insert(0) += 1;
                debug!(call_id, %stage, silences = s.silences(stage), "No speech; asking again");
                return Step {
                    stage,
                    script: self.scripts.no_speech(stage, &s.pending_fields),
                };
            }
            info!(call_id, %stage, "No speech after re-prompt; moving on");
            match stage {
                Stage::CollectingIdentity => self.next(s, Stage::CollectingIssue, MOVING_ON),
                Stage::CollectingIssue => self.next(s, Stage::CollectingSeverity, MOVING_ON),
                Stage::CollectingSeverity => {
                    s.slots.force(Slot::Severity, Severity::Medium.as_str());
                    self.hand_off(s, "", false)
                }
                _ => self.hand_off(s, "", false),
            }
        });
        let Some(step) = step else {
            return StepOutcome::UnknownCall;
        };
        if step.stage == Stage::Streaming {
            if let Some(session) = self.registry.get(call_id) {
                self.ledger
                    .update_call(call_id, CallUpdate::slots(&session.slots));
            }
        }
        self.deliver(call_id, step).await
    }

    /// The media stream for the call connected.
    pub fn stream_started(&self, call_id: &str) {
        if !self.registry.contains(call_id) {
            warn!(call_id, "Stream opened for a call without a session");
            self.registry.create(call_id);
        }
        self.registry.mutate(call_id, |s| {
            if s.stage != Stage::Streaming {
                s.advance(Stage::Streaming);
            }
        });
        self.ledger
            .update_call(call_id, CallUpdate::stream_started());
        info!(call_id, "Media stream started");
    }

    /// Discard the session and close the call record. Returns false when
    /// the call was already gone.
    pub fn end_call(&self, call_id: &str) -> bool {
        match self.registry.remove(call_id) {
            Some(session) => {
                self.ledger.update_call(call_id, CallUpdate::ended());
                info!(call_id, stage = %session.stage, "Call ended");
                true
            }
            None => false,
        }
    }

    async fn deliver(&self, call_id: &str, step: Step) -> StepOutcome {
        let delivery = self.gate.update_if_active(call_id, &step.script).await;
        if delivery == Delivery::Skipped {
            self.end_call(call_id);
        }
        StepOutcome::Responded {
            stage: step.stage,
            script: step.script,
            delivery,
        }
    }

    async fn collect_all_step(
        &self,
        call_id: &str,
        session: &CallSession,
        speech: &str,
    ) -> Option<Step> {
        let mut requested = if session.stage == Stage::CollectingMissingFields
            && !session.pending_fields.is_empty()
        {
            session.pending_fields.clone()
        } else {
            INTAKE_SLOTS.to_vec()
        };
        if !session.slots.is_filled(Slot::Severity) {
            requested.push(Slot::Severity);
        }
        let result = self.extractor.extract(call_id, speech, &requested).await;
        let budget = self.settings.max_retries;

        self.registry.mutate(call_id, |s| {
            for (slot, value) in &result.values {
                s.slots.merge(*slot, value);
            }
            let missing = s.slots.missing(&INTAKE_SLOTS);
            if missing.is_empty() {
                return self.hand_off(s, speech, true);
            }

            let retry_stage = Stage::CollectingMissingFields;
            if s.retries(retry_stage) < budget {
                *s.retry_counts.entry(retry_stage).or_insert(0) += 1;
                let repeat = s.stage == retry_stage;
                info!(
                    call_id,
                    missing = %join_slots(&missing),
                    attempt = s.retries(retry_stage),
                    "Asking for missing details"
                );
                s.advance(retry_stage);
                s.pending_fields = missing.clone();
                return Step {
                    stage: retry_stage,
                    script: self.scripts.missing_fields(&missing, repeat),
                };
            }

            warn!(call_id, missing = %join_slots(&missing), "Retries exhausted; continuing with unknowns");
            for slot in &missing {
                s.slots.force(*slot, UNKNOWN);
            }
            self.hand_off(s, speech, false)
        })
    }

    async fn identity_step(&self, call_id: &str, speech: &str) -> Option<Step> {
        let requested = [Slot::Name, Slot::Role, Slot::Department];
        let result = self.extractor.extract(call_id, speech, &requested).await;
        let budget = self.settings.max_retries;

        self.registry.mutate(call_id, |s| {
            for (slot, value) in &result.values {
                s.slots.merge(*slot, value);
            }
            let missing = s.slots.missing(&IDENTITY_SLOTS);
            if missing.is_empty() {
                return self.next(s, Stage::CollectingIssue, IDENTITY_DONE);
            }

            let stage = Stage::CollectingIdentity;
            if s.retries(stage) < budget {
                let repeat = s.retries(stage) > 0;
                *s.retry_counts.entry(stage).or_insert(0) += 1;
                s.pending_fields = missing.clone();
                return Step {
                    stage,
                    script: self.scripts.missing_fields(&missing, repeat),
                };
            }

            warn!(call_id, missing = %join_slots(&missing), "Identity retries exhausted");
            for slot in &missing {
                s.slots.force(*slot, UNKNOWN);
            }
            self.next(s, Stage::CollectingIssue, IDENTITY_DONE)
        })
    }

    fn issue_step(&self, call_id: &str, speech: &str) -> Option<Step> {
        self.registry.mutate(call_id, |s| {
            s.slots.merge(Slot::Issue, speech);
            self.next(s, Stage::CollectingSeverity, ISSUE_DONE)
        })
    }

    async fn severity_step(&self, call_id: &str, speech: &str) -> Option<Step> {
        let severity = if self.settings.severity_with_model {
            self.classify_with_model(call_id, speech).await
        } else {
            keyword_severity(speech)
        };
        self.registry.mutate(call_id, |s| {
            s.slots.force(Slot::Severity, severity.as_str());
            self.hand_off(s, speech, true)
        })
    }

    async fn classify_with_model(&self, call_id: &str, speech: &str) -> Severity {
        let prompt = severity_prompt(speech);
        match self
            .gateway
            .request(&prompt, &self.settings.model, self.settings.model_timeout)
            .await
        {
            Ok(response) => {
                if !response.cached {
                    self.ledger.append(CostLedgerEntry::model(
                        call_id,
                        CostKind::PromptExtraction,
                        &response.model,
                        response.usage.prompt_tokens,
                        response.usage.completion_tokens,
                        response.cost,
                        response.degraded,
                    ));
                }
                if response.degraded {
                    Severity::Medium
                } else {
                    severity_from_reply(&response.text)
                }
            }
            Err(e) => {
                warn!(call_id, error = %e, "Severity request refused; using keywords");
                self.ledger
                    .log_error(ErrorLogEntry::new(call_id, "severity", e.to_string()));
                keyword_severity(speech)
            }
        }
    }

    fn next(&self, session: &mut CallSession, stage: Stage, lead: &str) -> Step {
        session.advance(stage);
        Step {
            stage,
            script: self.scripts.next_stage(lead, stage),
        }
    }

    /// Leave intake. A severity nobody stated is read off the issue.
    fn hand_off(&self, session: &mut CallSession, speech: &str, complete: bool) -> Step {
        if !session.slots.is_filled(Slot::Severity) {
            let text = format!("{} {speech}", session.slots.get(Slot::Issue));
            let severity = keyword_severity(&text);
            session.slots.force(Slot::Severity, severity.as_str());
        }
        session.advance(Stage::Streaming);
        info!(
            call_id = %session.id,
            complete,
            severity = session.slots.get(Slot::Severity),
            "Intake finished; opening media stream"
        );
        Step {
            stage: Stage::Streaming,
            script: self.scripts.handoff(complete),
        }
    }
}
