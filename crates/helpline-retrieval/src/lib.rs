//! Retrieval augmentation: keyword extraction, department-scoped document
//! search, context budgeting and grounded answer generation.

use async_trait::async_trait;
use thiserror::Error;

use helpline_core::types::Document;

pub mod context;
pub mod keywords;
pub mod pipeline;
pub mod weaviate;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("search API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("search transport error: {0}")]
    Transport(String),

    #[error("malformed search response: {0}")]
    Decode(String),

    #[error("search query rejected: {0}")]
    Query(String),
}

/// Document-search collaborator.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    /// Documents matching ANY keyword, restricted to `department` when given.
    async fn query(
        &self,
        keywords: &[String],
        department: Option<&str>,
    ) -> Result<Vec<Document>, SearchError>;
}
