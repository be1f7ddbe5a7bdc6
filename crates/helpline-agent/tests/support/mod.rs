//! Scripted collaborators shared by the dialogue and streaming tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use helpline_agent::consumer::{StreamConsumer, StreamSettings};
use helpline_agent::dialogue::{DialogueEngine, DialogueSettings};
use helpline_agent::prompt::{ScriptSettings, Scripts};
use helpline_core::config::{Config, IntakeMode, OverlapPolicy};
use helpline_core::ledger::CostLedger;
use helpline_core::session::CallSessionRegistry;
use helpline_core::store::MemoryCallStore;
use helpline_core::types::Document;
use helpline_providers::cache::ResponseCache;
use helpline_providers::credentials::CredentialPool;
use helpline_providers::gateway::{ModelGateway, RequestTimeout};
use helpline_providers::pricing::PricingTable;
use helpline_providers::{
    Completion, CompletionRequest, Credentials, LlmProvider, ProviderError, Usage,
};
use helpline_retrieval::pipeline::{RetrievalPipeline, RetrievalSettings};
use helpline_retrieval::{DocumentSearch, SearchError};
use helpline_telephony::{LivenessGate, Telephony, TelephonyError, VoiceScript};

pub const MODEL: &str = "gpt-3.5-turbo";

/// Replies chosen by substring rules; the first rule whose needles all
/// appear in the prompt wins.
pub struct ScriptedModel {
    rules: Vec<(Vec<String>, String)>,
    delays: Vec<(String, Duration)>,
    pub rate_limited: AtomicBool,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            delays: Vec::new(),
            rate_limited: AtomicBool::new(false),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn when(mut self, needles: &[&str], reply: &str) -> Self {
        self.rules.push((
            needles.iter().map(|n| n.to_string()).collect(),
            reply.to_string(),
        ));
        self
    }

    pub fn delay(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    pub fn count(&self, needle: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.contains(needle))
            .count()
    }
}

#[async_trait]
impl LlmProvider for ScriptedModel {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> Result<Completion, ProviderError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(ProviderError::RateLimited("429".into()));
        }
        if let Some((_, delay)) = self
            .delays
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
        {
            tokio::time::sleep(*delay).await;
        }
        let text = self
            .rules
            .iter()
            .find(|(needles, _)| needles.iter().all(|n| request.prompt.contains(n.as_str())))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| "OK".to_string());
        Ok(Completion {
            text,
            model: request.model.clone(),
            usage: Usage {
                prompt_tokens: 120,
                completion_tokens: 30,
            },
        })
    }
}

/// Call statuses set by the test; unknown calls report "completed".
#[derive(Default)]
pub struct FakeTelephony {
    statuses: Mutex<HashMap<String, String>>,
    pub updates: Mutex<Vec<(String, VoiceScript)>>,
    pub lookups: AtomicUsize,
}

impl FakeTelephony {
    pub fn set_status(&self, call_id: &str, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(call_id.to_string(), status.to_string());
    }

    pub fn updates_for(&self, call_id: &str) -> Vec<VoiceScript> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == call_id)
            .map(|(_, s)| s.clone())
            .collect()
    }
}

#[async_trait]
impl Telephony for FakeTelephony {
    async fn call_status(&self, call_id: &str) -> Result<String, TelephonyError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(call_id)
            .cloned()
            .unwrap_or_else(|| "completed".into()))
    }

    async fn update_call(&self, call_id: &str, script: &VoiceScript) -> Result<(), TelephonyError> {
        self.updates
            .lock()
            .unwrap()
            .push((call_id.to_string(), script.clone()));
        Ok(())
    }
}

pub struct FakeSearch {
    pub documents: Vec<Document>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl DocumentSearch for FakeSearch {
    async fn query(
        &self,
        _keywords: &[String],
        _department: Option<&str>,
    ) -> Result<Vec<Document>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.clone())
    }
}

pub fn doc(title: &str, content: &str) -> Document {
    Document {
        title: title.into(),
        content: content.into(),
        category: "Cardiology".into(),
    }
}

pub struct Options {
    pub mode: IntakeMode,
    pub overlap: OverlapPolicy,
    pub severity_with_model: bool,
    pub model_timeout: Duration,
    pub documents: Vec<Document>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: IntakeMode::CollectAll,
            overlap: OverlapPolicy::Drop,
            severity_with_model: true,
            model_timeout: Duration::from_secs(5),
            documents: vec![doc("Epic login", "Clear the browser cache and sign in again.")],
        }
    }
}

pub struct Harness {
    pub registry: Arc<CallSessionRegistry>,
    pub store: Arc<MemoryCallStore>,
    pub ledger: CostLedger,
    pub model: Arc<ScriptedModel>,
    pub telephony: Arc<FakeTelephony>,
    pub search: Arc<FakeSearch>,
    pub engine: DialogueEngine,
    pub consumer: Arc<StreamConsumer>,
}

impl Harness {
    pub fn new(model: ScriptedModel, options: Options) -> Self {
        let config = Config::default();
        let model = Arc::new(model);
        let telephony = Arc::new(FakeTelephony::default());
        let search = Arc::new(FakeSearch {
            documents: options.documents,
            calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryCallStore::new());
        let ledger = CostLedger::spawn(store.clone());
        let registry = Arc::new(CallSessionRegistry::new());

        let gateway = Arc::new(ModelGateway::new(
            model.clone(),
            CredentialPool::from_keys(["k1"]),
            ResponseCache::new(Duration::from_secs(3600), 100),
            PricingTable::default(),
            150,
        ));
        let gate = LivenessGate::new(telephony.clone(), vec!["in-progress".into()]);
        let scripts = Arc::new(Scripts::new(ScriptSettings::from_config(&config)));
        let timeout = RequestTimeout::After(options.model_timeout);

        let engine = DialogueEngine::new(
            registry.clone(),
            gateway.clone(),
            gate.clone(),
            ledger.clone(),
            scripts.clone(),
            DialogueSettings {
                mode: options.mode,
                max_retries: 2,
                no_speech_retries: 1,
                severity_with_model: options.severity_with_model,
                greeting: "Welcome to the help desk.".into(),
                model: MODEL.into(),
                model_timeout: timeout,
            },
        );
        let pipeline = Arc::new(RetrievalPipeline::new(
            gateway,
            search.clone(),
            ledger.clone(),
            RetrievalSettings {
                keyword_model: MODEL.into(),
                answer_model: MODEL.into(),
                model_timeout: timeout,
                search_timeout: Duration::from_secs(3),
                context_token_budget: 1500,
                max_keywords: 5,
            },
        ));
        let consumer = Arc::new(StreamConsumer::new(
            registry.clone(),
            pipeline,
            gate,
            ledger.clone(),
            scripts,
            StreamSettings {
                overlap: options.overlap,
                speech_cost_per_minute: 0.006,
            },
        ));

        Self {
            registry,
            store,
            ledger,
            model,
            telephony,
            search,
            engine,
            consumer,
        }
    }

    /// Start a live call that has finished intake.
    pub fn streaming_call(&self, call_id: &str) {
        self.telephony.set_status(call_id, "in-progress");
        self.engine.start_call(call_id, None, None);
        self.engine.stream_started(call_id);
    }
}
