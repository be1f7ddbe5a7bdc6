//! Configuration loading and validation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level helpline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<ModelsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<SpeechConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake: Option<IntakeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<StreamingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Public host name used to build the `wss://<host>/media` stream URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_host: Option<String>,
}

// --- Collaborators ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelephonyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,

    /// Voice used for `<Say>` (default: "alice").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Call statuses the liveness gate treats as active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_statuses: Option<Vec<String>>,
}

impl TelephonyConfig {
    pub fn resolve_account_sid(&self) -> Option<String> {
        resolve_secret_field(&self.account_sid, &self.account_sid_env)
    }

    pub fn resolve_auth_token(&self) -> Option<String> {
        resolve_secret_field(&self.auth_token, &self.auth_token_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Credential pool, rotated round-robin on authentication failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,

    /// Environment variables holding additional pool credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_key_envs: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,

    /// Number of prompt characters that make up the cache key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_prefix_chars: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pricing: Vec<PricingOverride>,
}

impl ModelsConfig {
    /// All configured credentials in order: direct keys first, then env references.
    pub fn resolve_api_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .api_keys
            .iter()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect();
        for env in &self.api_key_envs {
            if let Some(key) = resolve_secret_field(&None, &Some(env.clone())) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }
}

/// Per-family rate override, in currency units per 1,000 tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingOverride {
    pub family: String,
    pub prompt: f64,
    pub completion: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Weaviate base URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl SearchConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Provider: "groq" or "openai" (default: "groq").
    #[serde(default = "default_speech_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_minute: Option<f64>,

    /// RMS energy above which a frame counts as speech.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vad_threshold: Option<f64>,

    /// Consecutive silent frames that end an utterance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_frames: Option<usize>,
}

fn default_speech_provider() -> String {
    "groq".into()
}

impl SpeechConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Dialogue behavior ---

/// Which intake dialogue to run before streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeMode {
    /// One open question for every detail, then targeted re-prompts for the missing ones.
    #[default]
    CollectAll,
    /// Identity, issue and severity asked as separate stages.
    Staged,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default)]
    pub mode: IntakeMode,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_speech_retries: Option<u8>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gather_timeout_secs: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_with_model: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

/// What happens to a final transcript that arrives while a turn is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    Drop,
    /// Keep only the most recent overlapping final and run it after the current turn.
    QueueLatest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default)]
    pub overlap: OverlapPolicy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_timeout_secs: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_open_timeout_secs: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_token_budget: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_keywords: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "helpline_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Upper bound on any per-stage retry budget.
pub const MAX_RETRY_BUDGET: u8 = 2;

/// Upper bound on search keywords extracted per question.
pub const MAX_KEYWORDS: usize = 5;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

pub const DEFAULT_GREETING: &str =
    "Hello and welcome to the Epic Clinical Help Desk. I'm your automated support assistant.";

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

static ENV_REF: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("env reference pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_REF
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted)
            .map_err(|e| crate::error::HelplineError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    // --- server ---

    pub fn port(&self) -> u16 {
        self.server.as_ref().and_then(|s| s.port).unwrap_or(3000)
    }

    pub fn bind_addr(&self) -> String {
        self.server
            .as_ref()
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".into())
    }

    /// `wss://` URL the telephony provider should open the media stream to.
    pub fn media_stream_url(&self) -> Option<String> {
        self.server
            .as_ref()
            .and_then(|s| s.public_host.as_deref())
            .filter(|h| !h.is_empty())
            .map(|h| format!("wss://{}/media", h.trim_end_matches('/')))
    }

    // --- telephony ---

    pub fn telephony_base_url(&self) -> String {
        self.telephony
            .as_ref()
            .and_then(|t| t.api_base_url.clone())
            .unwrap_or_else(|| "https://api.twilio.com".into())
    }

    pub fn voice(&self) -> String {
        self.telephony
            .as_ref()
            .and_then(|t| t.voice.clone())
            .unwrap_or_else(|| "alice".into())
    }

    pub fn active_statuses(&self) -> Vec<String> {
        self.telephony
            .as_ref()
            .and_then(|t| t.active_statuses.clone())
            .unwrap_or_else(|| {
                vec!["queued".into(), "ringing".into(), "in-progress".into()]
            })
    }

    // --- models ---

    pub fn model_base_url(&self) -> String {
        self.models
            .as_ref()
            .and_then(|m| m.base_url.clone())
            .unwrap_or_else(|| "https://api.openai.com".into())
    }

    pub fn model_api_keys(&self) -> Vec<String> {
        self.models
            .as_ref()
            .map(ModelsConfig::resolve_api_keys)
            .unwrap_or_default()
    }

    pub fn extraction_model(&self) -> String {
        self.models
            .as_ref()
            .and_then(|m| m.extraction_model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.into())
    }

    pub fn answer_model(&self) -> String {
        self.models
            .as_ref()
            .and_then(|m| m.answer_model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.into())
    }

    pub fn max_tokens(&self) -> u32 {
        self.models.as_ref().and_then(|m| m.max_tokens).unwrap_or(150)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.models.as_ref().and_then(|m| m.timeout_ms).unwrap_or(5000))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(
            self.models
                .as_ref()
                .and_then(|m| m.cache_ttl_secs)
                .unwrap_or(3600),
        )
    }

    pub fn cache_prefix_chars(&self) -> usize {
        self.models
            .as_ref()
            .and_then(|m| m.cache_prefix_chars)
            .unwrap_or(100)
    }

    pub fn pricing_overrides(&self) -> Vec<PricingOverride> {
        self.models
            .as_ref()
            .map(|m| m.pricing.clone())
            .unwrap_or_default()
    }

    // --- search ---

    pub fn search_url(&self) -> String {
        self.search
            .as_ref()
            .and_then(|s| s.url.clone())
            .unwrap_or_else(|| "http://localhost:8080".into())
    }

    pub fn search_class(&self) -> String {
        self.search
            .as_ref()
            .and_then(|s| s.class_name.clone())
            .unwrap_or_else(|| "Documents".into())
    }

    pub fn search_limit(&self) -> usize {
        self.search.as_ref().and_then(|s| s.limit).unwrap_or(10)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search.as_ref().and_then(|s| s.timeout_ms).unwrap_or(3000))
    }

    // --- speech ---

    pub fn speech_cost_per_minute(&self) -> f64 {
        self.speech
            .as_ref()
            .and_then(|s| s.cost_per_minute)
            .unwrap_or(0.006)
    }

    pub fn vad_threshold(&self) -> f64 {
        self.speech.as_ref().and_then(|s| s.vad_threshold).unwrap_or(300.0)
    }

    pub fn silence_frames(&self) -> usize {
        self.speech.as_ref().and_then(|s| s.silence_frames).unwrap_or(15)
    }

    // --- intake ---

    pub fn intake_mode(&self) -> IntakeMode {
        self.intake.as_ref().map(|i| i.mode).unwrap_or_default()
    }

    /// Extraction retry budget per stage, never above [`MAX_RETRY_BUDGET`].
    pub fn max_retries(&self) -> u8 {
        self.intake
            .as_ref()
            .and_then(|i| i.max_retries)
            .unwrap_or(2)
            .min(MAX_RETRY_BUDGET)
    }

    /// Silence re-prompts per stage, never above [`MAX_RETRY_BUDGET`].
    pub fn no_speech_retries(&self) -> u8 {
        self.intake
            .as_ref()
            .and_then(|i| i.no_speech_retries)
            .unwrap_or(1)
            .min(MAX_RETRY_BUDGET)
    }

    pub fn gather_timeout_secs(&self) -> u32 {
        self.intake
            .as_ref()
            .and_then(|i| i.gather_timeout_secs)
            .unwrap_or(7)
    }

    pub fn severity_with_model(&self) -> bool {
        self.intake
            .as_ref()
            .and_then(|i| i.severity_with_model)
            .unwrap_or(true)
    }

    pub fn greeting(&self) -> String {
        self.intake
            .as_ref()
            .and_then(|i| i.greeting.clone())
            .unwrap_or_else(|| DEFAULT_GREETING.into())
    }

    // --- streaming ---

    pub fn overlap_policy(&self) -> OverlapPolicy {
        self.streaming.as_ref().map(|s| s.overlap).unwrap_or_default()
    }

    pub fn listen_timeout_secs(&self) -> u32 {
        self.streaming
            .as_ref()
            .and_then(|s| s.listen_timeout_secs)
            .unwrap_or(5)
    }

    pub fn stream_open_timeout_secs(&self) -> u32 {
        self.streaming
            .as_ref()
            .and_then(|s| s.stream_open_timeout_secs)
            .unwrap_or(30)
    }

    pub fn context_token_budget(&self) -> usize {
        self.streaming
            .as_ref()
            .and_then(|s| s.context_token_budget)
            .unwrap_or(1500)
    }

    /// Search keywords per question, within `1..=`[`MAX_KEYWORDS`].
    pub fn max_keywords(&self) -> usize {
        self.streaming
            .as_ref()
            .and_then(|s| s.max_keywords)
            .unwrap_or(MAX_KEYWORDS)
            .clamp(1, MAX_KEYWORDS)
    }

    // --- store ---

    pub fn store_dir(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.dir.as_ref())
            .map(|d| PathBuf::from(shellexpand::tilde(d).as_ref()))
            .unwrap_or_else(|| data_dir().join("store"))
    }

    /// Get a config value by dotted path (e.g. "server.port", "intake.mode").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.model_api_keys().is_empty() {
            warnings.push(
                "No model API key configured; every model request will degrade".to_string(),
            );
        }

        let telephony = self.telephony.clone().unwrap_or_default();
        if telephony.resolve_account_sid().is_none() || telephony.resolve_auth_token().is_none() {
            warnings.push(
                "Telephony account SID or auth token missing; call updates will be skipped"
                    .to_string(),
            );
        }

        if self.media_stream_url().is_none() {
            warnings.push("server.public_host is not set; the media stream URL falls back to localhost".into());
        }

        if let Some(port) = self.server.as_ref().and_then(|s| s.port) {
            if port == 0 {
                errors.push("Server port cannot be 0".to_string());
            }
        }

        if let Some(intake) = &self.intake {
            for (name, value) in [
                ("max_retries", intake.max_retries),
                ("no_speech_retries", intake.no_speech_retries),
            ] {
                if let Some(v) = value {
                    if v > MAX_RETRY_BUDGET {
                        errors.push(format!(
                            "intake.{name} is {v}; the limit is {MAX_RETRY_BUDGET}"
                        ));
                    }
                }
            }
        }

        if let Some(max) = self.streaming.as_ref().and_then(|s| s.max_keywords) {
            if !(1..=MAX_KEYWORDS).contains(&max) {
                errors.push(format!(
                    "streaming.max_keywords is {max}; it must be between 1 and {MAX_KEYWORDS}"
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for helpline data: `~/.helpline/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".helpline")
}
