//! Retrieval augmentation pipeline: keywords → search → budgeted context → grounded answer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use helpline_core::config::Config;
use helpline_core::ledger::CostLedger;
use helpline_core::store::{CostKind, CostLedgerEntry, ErrorLogEntry, SearchLogEntry};
use helpline_core::types::{Document, Slot, SlotValues};
use helpline_providers::gateway::{GatewayError, ModelGateway, ModelResponse, RequestTimeout};

use crate::DocumentSearch;
use crate::context::{grounded_prompt, pack_documents};
use crate::keywords::{keyword_prompt, parse_keywords};

/// Spoken when the knowledge base has nothing for the caller's question.
pub const NO_DOCUMENTS_REPLY: &str = "I couldn't find any information about that in our \
     knowledge base. Could you describe the problem in a little more detail?";

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub keyword_model: String,
    pub answer_model: String,
    pub model_timeout: RequestTimeout,
    pub search_timeout: Duration,
    pub context_token_budget: usize,
    pub max_keywords: usize,
}

impl RetrievalSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            keyword_model: config.extraction_model(),
            answer_model: config.answer_model(),
            model_timeout: RequestTimeout::After(config.model_timeout()),
            search_timeout: config.search_timeout(),
            context_token_budget: config.context_token_budget(),
            max_keywords: config.max_keywords(),
        }
    }
}

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerSource {
    /// Model answer grounded in retrieved documents.
    Generated,
    /// Fixed clarification; no answer-generation call was made.
    NoDocuments,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundedAnswer {
    pub text: String,
    pub source: AnswerSource,
    pub keywords: Vec<String>,
    pub document_count: usize,
    pub truncated: bool,
    pub degraded: bool,
}

pub struct RetrievalPipeline {
    gateway: Arc<ModelGateway>,
    search: Arc<dyn DocumentSearch>,
    ledger: CostLedger,
    settings: RetrievalSettings,
}

impl RetrievalPipeline {
    pub fn new(
        gateway: Arc<ModelGateway>,
        search: Arc<dyn DocumentSearch>,
        ledger: CostLedger,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            gateway,
            search,
            ledger,
            settings,
        }
    }

    /// Answer `question` for the caller described by `slots`.
    ///
    /// Only a model rate limit is returned as an error; search failures count
    /// as zero results and model failures come back as degraded text.
    pub async fn answer(
        &self,
        call_id: &str,
        question: &str,
        slots: &SlotValues,
    ) -> Result<GroundedAnswer, GatewayError> {
        let keywords = self.extract_keywords(call_id, question).await?;
        let department = slots.filled(Slot::Department);

        let documents = self.search(call_id, &keywords, department).await;
        let packed = pack_documents(&documents, self.settings.context_token_budget);

        self.ledger.log_search(SearchLogEntry {
            call_id: call_id.to_string(),
            keywords: keywords.clone(),
            department: department.map(str::to_string),
            result_count: documents.len(),
            truncated: packed.truncated,
            timestamp: Utc::now(),
        });

        if documents.is_empty() {
            info!(call_id, ?keywords, "No documents found; asking caller to clarify");
            return Ok(GroundedAnswer {
                text: NO_DOCUMENTS_REPLY.to_string(),
                source: AnswerSource::NoDocuments,
                keywords,
                document_count: 0,
                truncated: false,
                degraded: false,
            });
        }

        let prompt = grounded_prompt(question, slots, &packed);
        let response = self
            .gateway
            .request(
                &prompt,
                &self.settings.answer_model,
                self.settings.model_timeout,
            )
            .await?;
        self.charge(call_id, CostKind::AnswerGeneration, &response);

        debug!(
            call_id,
            documents = packed.documents.len(),
            truncated = packed.truncated,
            degraded = response.degraded,
            "Grounded answer ready"
        );

        Ok(GroundedAnswer {
            text: response.text,
            source: AnswerSource::Generated,
            keywords,
            document_count: packed.documents.len(),
            truncated: packed.truncated,
            degraded: response.degraded,
        })
    }

    async fn extract_keywords(
        &self,
        call_id: &str,
        question: &str,
    ) -> Result<Vec<String>, GatewayError> {
        let response = self
            .gateway
            .request(
                &keyword_prompt(question, self.settings.max_keywords),
                &self.settings.keyword_model,
                self.settings.model_timeout,
            )
            .await?;
        self.charge(call_id, CostKind::KeywordExtraction, &response);

        // A canned fallback says nothing about the issue; search on its own words instead
        let source = if response.degraded {
            question
        } else {
            response.text.as_str()
        };
        Ok(parse_keywords(source, self.settings.max_keywords))
    }

    async fn search(
        &self,
        call_id: &str,
        keywords: &[String],
        department: Option<&str>,
    ) -> Vec<Document> {
        if keywords.is_empty() {
            return Vec::new();
        }
        match tokio::time::timeout(
            self.settings.search_timeout,
            self.search.query(keywords, department),
        )
        .await
        {
            Ok(Ok(docs)) => docs,
            Ok(Err(e)) => {
                warn!(call_id, error = %e, "Document search failed");
                self.ledger
                    .log_error(ErrorLogEntry::new(call_id, "search", e.to_string()));
                Vec::new()
            }
            Err(_) => {
                warn!(call_id, "Document search timed out");
                self.ledger
                    .log_error(ErrorLogEntry::new(call_id, "search", "timed out"));
                Vec::new()
            }
        }
    }

    fn charge(&self, call_id: &str, kind: CostKind, response: &ModelResponse) {
        if response.cached {
            return;
        }
        self.ledger.append(CostLedgerEntry::model(
            call_id,
            kind,
            &response.model,
            response.usage.prompt_tokens,
            response.usage.completion_tokens,
            response.cost,
            response.degraded,
        ));
    }
}
