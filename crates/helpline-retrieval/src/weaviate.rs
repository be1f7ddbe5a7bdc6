//! Weaviate GraphQL document search.
//!
//! Queries `Get { <class>(where: ..., limit: N) { title content category filename } }`
//! where the filter is `category Like <department>` AND (`manual_tags Like k1` OR ...).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use helpline_core::config::Config;
use helpline_core::types::Document;

use crate::{DocumentSearch, SearchError};

pub struct WeaviateClient {
    base_url: String,
    class_name: String,
    limit: usize,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl WeaviateClient {
    pub fn new(base_url: &str, class_name: &str, limit: usize, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            class_name: class_name.to_string(),
            limit,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.search_url(),
            &config.search_class(),
            config.search_limit(),
            config.search.as_ref().and_then(|s| s.resolve_api_key()),
        )
    }

    /// The GraphQL document sent for a query.
    pub fn build_query(&self, keywords: &[String], department: Option<&str>) -> String {
        let tag_filters: Vec<String> = keywords
            .iter()
            .map(|k| like_operand("manual_tags", k))
            .collect();
        let any_tag = if tag_filters.len() == 1 {
            tag_filters[0].clone()
        } else {
            format!("{{operator: Or, operands: [{}]}}", tag_filters.join(", "))
        };

        let filter = match department {
            Some(dept) => format!(
                "{{operator: And, operands: [{}, {}]}}",
                like_operand("category", dept),
                any_tag
            ),
            None => any_tag,
        };

        format!(
            "{{ Get {{ {class}(where: {filter}, limit: {limit}) {{ title content category filename }} }} }}",
            class = self.class_name,
            limit = self.limit,
        )
    }
}

/// `{path: ["<field>"], operator: Like, valueText: "<value>"}` with the value escaped.
fn like_operand(field: &str, value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    format!("{{path: [\"{field}\"], operator: Like, valueText: {quoted}}}")
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

fn parse_documents(body: &str, class_name: &str) -> Result<Vec<Document>, SearchError> {
    let parsed: GraphqlResponse =
        serde_json::from_str(body).map_err(|e| SearchError::Decode(e.to_string()))?;
    if let Some(errors) = parsed.errors.filter(|e| !e.is_empty()) {
        let msg = errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SearchError::Query(msg));
    }

    let Some(list) = parsed
        .data
        .as_ref()
        .and_then(|d| d.get("Get"))
        .and_then(|g| g.get(class_name))
        .filter(|v| !v.is_null())
    else {
        return Ok(Vec::new());
    };

    let raw: Vec<RawDocument> =
        serde_json::from_value(list.clone()).map_err(|e| SearchError::Decode(e.to_string()))?;
    Ok(raw
        .into_iter()
        .map(|r| Document {
            title: r
                .title
                .filter(|t| !t.is_empty())
                .or(r.filename)
                .unwrap_or_else(|| "Untitled".into()),
            content: r.content.unwrap_or_default(),
            category: r.category.unwrap_or_default(),
        })
        .collect())
}

#[async_trait]
impl DocumentSearch for WeaviateClient {
    async fn query(
        &self,
        keywords: &[String],
        department: Option<&str>,
    ) -> Result<Vec<Document>, SearchError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.build_query(keywords, department);
        debug!(?keywords, ?department, "Weaviate search");

        let mut req = self
            .client
            .post(format!("{}/v1/graphql", self.base_url))
            .json(&json!({ "query": query }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(SearchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let docs = parse_documents(&body, &self.class_name)?;
        debug!(results = docs.len(), "Weaviate search complete");
        Ok(docs)
    }
}
