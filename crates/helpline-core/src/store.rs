//! Relational store abstraction: call records plus append-only charge, search and error logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{HelplineError, Result};
use crate::types::{Slot, SlotValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Started,
    Ended,
}

/// One row of the `calls` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub slots: SlotValues,
    pub status: CallStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn started(call_id: &str, from: Option<String>, to: Option<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            from,
            to,
            slots: SlotValues::default(),
            status: CallStatus::Started,
            start_time: None,
            end_time: None,
            created_at: Utc::now(),
        }
    }
}

/// Partial update of a call record. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallUpdate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<(Slot, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CallStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl CallUpdate {
    pub fn slots(slots: &SlotValues) -> Self {
        Self {
            slots: slots.iter().map(|(k, v)| (k, v.to_string())).collect(),
            ..Self::default()
        }
    }

    pub fn stream_started() -> Self {
        Self {
            start_time: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn ended() -> Self {
        Self {
            status: Some(CallStatus::Ended),
            end_time: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn apply(&self, record: &mut CallRecord) {
        for (slot, value) in &self.slots {
            record.slots.force(*slot, value);
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(t) = self.start_time {
            record.start_time = Some(t);
        }
        if let Some(t) = self.end_time {
            record.end_time = Some(t);
        }
    }
}

/// Billable operation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostKind {
    Speech,
    PromptExtraction,
    KeywordExtraction,
    AnswerGeneration,
}

impl CostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostKind::Speech => "speech",
            CostKind::PromptExtraction => "prompt_extraction",
            CostKind::KeywordExtraction => "keyword_extraction",
            CostKind::AnswerGeneration => "answer_generation",
        }
    }
}

/// Immutable charge row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub call_id: String,
    pub kind: CostKind,
    pub amount: f64,
    pub tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    /// Charged at nominal figures because the response was a canned fallback.
    #[serde(default)]
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_seconds: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl CostLedgerEntry {
    /// Speech-to-text charge, billed per minute of audio. A zero duration bills one second.
    pub fn speech(call_id: &str, seconds: f64, cost_per_minute: f64) -> Self {
        let seconds = if seconds > 0.0 { seconds } else { 1.0 };
        Self {
            call_id: call_id.to_string(),
            kind: CostKind::Speech,
            amount: seconds / 60.0 * cost_per_minute,
            tokens: 0,
            model: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            degraded: false,
            audio_seconds: Some(seconds),
            timestamp: Utc::now(),
        }
    }

    /// Language-model charge.
    pub fn model(
        call_id: &str,
        kind: CostKind,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        amount: f64,
        degraded: bool,
    ) -> Self {
        Self {
            call_id: call_id.to_string(),
            kind,
            amount,
            tokens: prompt_tokens + completion_tokens,
            model: Some(model.to_string()),
            prompt_tokens,
            completion_tokens,
            degraded,
            audio_seconds: None,
            timestamp: Utc::now(),
        }
    }
}

/// Search analytics row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchLogEntry {
    pub call_id: String,
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub result_count: usize,
    pub truncated: bool,
    pub timestamp: DateTime<Utc>,
}

/// Failure absorbed on the voice path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub call_id: String,
    pub context: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn new(call_id: &str, context: &str, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            context: context.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Persistent store of call records and append-only logs.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn insert_call(&self, record: CallRecord) -> Result<()>;

    async fn update_call(&self, call_id: &str, update: CallUpdate) -> Result<()>;

    async fn append_charge(&self, entry: CostLedgerEntry) -> Result<()>;

    async fn append_search(&self, entry: SearchLogEntry) -> Result<()>;

    async fn append_error(&self, entry: ErrorLogEntry) -> Result<()>;

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>>;

    /// Charges recorded for a call, in append order.
    async fn charges(&self, call_id: &str) -> Result<Vec<CostLedgerEntry>>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    calls: Vec<CallRecord>,
    charges: Vec<CostLedgerEntry>,
    searches: Vec<SearchLogEntry>,
    errors: Vec<ErrorLogEntry>,
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCallStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn searches(&self) -> Vec<SearchLogEntry> {
        self.tables.lock().await.searches.clone()
    }

    pub async fn errors(&self) -> Vec<ErrorLogEntry> {
        self.tables.lock().await.errors.clone()
    }

    pub async fn all_charges(&self) -> Vec<CostLedgerEntry> {
        self.tables.lock().await.charges.clone()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn insert_call(&self, record: CallRecord) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if tables.calls.iter().any(|c| c.call_id == record.call_id) {
            return Err(HelplineError::Store(format!(
                "call {} already recorded",
                record.call_id
            )));
        }
        tables.calls.push(record);
        Ok(())
    }

    async fn update_call(&self, call_id: &str, update: CallUpdate) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .calls
            .iter_mut()
            .find(|c| c.call_id == call_id)
            .ok_or_else(|| HelplineError::Store(format!("unknown call {call_id}")))?;
        update.apply(record);
        Ok(())
    }

    async fn append_charge(&self, entry: CostLedgerEntry) -> Result<()> {
        self.tables.lock().await.charges.push(entry);
        Ok(())
    }

    async fn append_search(&self, entry: SearchLogEntry) -> Result<()> {
        self.tables.lock().await.searches.push(entry);
        Ok(())
    }

    async fn append_error(&self, entry: ErrorLogEntry) -> Result<()> {
        self.tables.lock().await.errors.push(entry);
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables.calls.iter().find(|c| c.call_id == call_id).cloned())
    }

    async fn charges(&self, call_id: &str) -> Result<Vec<CostLedgerEntry>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .charges
            .iter()
            .filter(|c| c.call_id == call_id)
            .cloned()
            .collect())
    }
}
