//! Shared server state.

use std::sync::Arc;

use helpline_agent::consumer::{StreamConsumer, StreamSettings};
use helpline_agent::dialogue::{DialogueEngine, DialogueSettings};
use helpline_agent::prompt::{ScriptSettings, Scripts};
use helpline_core::config::Config;
use helpline_core::jsonl_store::JsonlCallStore;
use helpline_core::ledger::CostLedger;
use helpline_core::session::CallSessionRegistry;
use helpline_core::store::CallStore;
use helpline_media::recognizer::{SpeechRecognizer, WhisperRecognizer};
use helpline_media::vad::VoiceActivityDetector;
use helpline_providers::LlmProvider;
use helpline_providers::gateway::ModelGateway;
use helpline_providers::openai::OpenAiProvider;
use helpline_retrieval::DocumentSearch;
use helpline_retrieval::pipeline::{RetrievalPipeline, RetrievalSettings};
use helpline_retrieval::weaviate::WeaviateClient;
use helpline_telephony::twilio::TwilioClient;
use helpline_telephony::{LivenessGate, Telephony};

/// The external systems a server talks to.
pub struct Collaborators {
    pub provider: Arc<dyn LlmProvider>,
    pub search: Arc<dyn DocumentSearch>,
    pub telephony: Arc<dyn Telephony>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub store: Arc<dyn CallStore>,
}

impl Collaborators {
    /// Real clients built from the config sections.
    pub fn from_config(config: &Config) -> Self {
        let base_url = config.model_base_url();
        Self {
            provider: Arc::new(OpenAiProvider::openai(Some(&base_url))),
            search: Arc::new(WeaviateClient::from_config(config)),
            telephony: Arc::new(TwilioClient::from_config(config)),
            recognizer: Arc::new(WhisperRecognizer::from_config(config)),
            store: Arc::new(JsonlCallStore::new(config.store_dir())),
        }
    }
}

/// Everything the request handlers share.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<CallSessionRegistry>,
    pub engine: Arc<DialogueEngine>,
    pub consumer: Arc<StreamConsumer>,
    pub gateway: Arc<ModelGateway>,
    pub ledger: CostLedger,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    /// Wire the engine together. Must be called inside a Tokio runtime.
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let Collaborators {
            provider,
            search,
            telephony,
            recognizer,
            store,
        } = collaborators;

        let config = Arc::new(config);
        let registry = Arc::new(CallSessionRegistry::new());
        let ledger = CostLedger::spawn(store);
        let gateway = Arc::new(ModelGateway::from_config(&config, provider));
        let gate = LivenessGate::from_config(&config, telephony);
        let scripts = Arc::new(Scripts::new(ScriptSettings::from_config(&config)));

        let engine = Arc::new(DialogueEngine::new(
            Arc::clone(&registry),
            Arc::clone(&gateway),
            gate.clone(),
            ledger.clone(),
            Arc::clone(&scripts),
            DialogueSettings::from_config(&config),
        ));
        let pipeline = Arc::new(RetrievalPipeline::new(
            Arc::clone(&gateway),
            search,
            ledger.clone(),
            RetrievalSettings::from_config(&config),
        ));
        let consumer = Arc::new(StreamConsumer::new(
            Arc::clone(&registry),
            pipeline,
            gate,
            ledger.clone(),
            scripts,
            StreamSettings::from_config(&config),
        ));

        Self {
            config,
            registry,
            engine,
            consumer,
            gateway,
            ledger,
            recognizer,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// A fresh detector for one media stream.
    pub fn vad(&self) -> VoiceActivityDetector {
        VoiceActivityDetector::from_config(&self.config)
    }
}
