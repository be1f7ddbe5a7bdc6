//! Model orchestration gateway.
//!
//! Every language-model request in the system goes through [`ModelGateway::request`]:
//!
//! 1. A cache lookup keyed by `(model, prompt prefix)`.
//! 2. The inference call, optionally raced against a timeout.
//! 3. One retry with the next credential after an authentication failure.
//! 4. Rate limits surface as [`GatewayError::RateLimited`]; timeouts and all other
//!    failures become a degraded canned response instead of an error.
//!
//! Degraded responses are never cached.

use std::sync::Arc;
use std::time::Duration;

use helpline_core::config::Config;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::credentials::CredentialPool;
use crate::pricing::PricingTable;
use crate::{Completion, CompletionRequest, LlmProvider, ProviderError, Usage};

/// Text substituted for a real answer after a timeout or model error.
pub const DEGRADED_TEXT: &str = "I'm processing your request. Could you please repeat that?";

/// Nominal usage attributed to a degraded response.
pub const DEGRADED_USAGE: Usage = Usage {
    prompt_tokens: 10,
    completion_tokens: 10,
};

/// How long a request may run before it degrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTimeout {
    After(Duration),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("model rate limit reached: {0}")]
    RateLimited(String),
}

/// Outcome of a gateway request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub model: String,
    pub usage: Usage,
    /// Charge for this response. Zero when served from the cache.
    pub cost: f64,
    /// Produced by the fallback path rather than a real inference.
    pub degraded: bool,
    pub cached: bool,
}

pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    credentials: CredentialPool,
    cache: ResponseCache,
    pricing: PricingTable,
    max_tokens: u32,
}

impl ModelGateway {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        credentials: CredentialPool,
        cache: ResponseCache,
        pricing: PricingTable,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            credentials,
            cache,
            pricing,
            max_tokens,
        }
    }

    /// Build a gateway from the `models` config section.
    pub fn from_config(config: &Config, provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(
            provider,
            CredentialPool::from_keys(config.model_api_keys()),
            ResponseCache::new(config.cache_ttl(), config.cache_prefix_chars()),
            PricingTable::with_overrides(&config.pricing_overrides()),
            config.max_tokens(),
        )
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn request(
        &self,
        prompt: &str,
        model: &str,
        timeout: RequestTimeout,
    ) -> Result<ModelResponse, GatewayError> {
        let key = self.cache.key(model, prompt);
        if let Some(mut hit) = self.cache.get(&key) {
            debug!(model, "Model response served from cache");
            hit.cached = true;
            hit.cost = 0.0;
            return Ok(hit);
        }

        let request = CompletionRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            max_tokens: self.max_tokens,
            temperature: None,
        };

        let outcome = match timeout {
            RequestTimeout::After(limit) => {
                match tokio::time::timeout(limit, self.call_with_rotation(&request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(model, timeout_ms = limit.as_millis() as u64, "Model request timed out");
                        return Ok(self.degraded(model));
                    }
                }
            }
            RequestTimeout::Disabled => self.call_with_rotation(&request).await,
        };

        match outcome {
            Ok(completion) => {
                let response = self.priced(completion);
                self.cache.insert(key, response.clone());
                Ok(response)
            }
            Err(ProviderError::RateLimited(msg)) => {
                warn!(model, "Model rate limit reached");
                Err(GatewayError::RateLimited(msg))
            }
            Err(e) => {
                warn!(model, error = %e, "Model request failed; degrading");
                Ok(self.degraded(model))
            }
        }
    }

    /// One cheap request so the first caller does not pay connection setup.
    pub async fn warm_up(&self, model: &str) {
        match self
            .request("Hello", model, RequestTimeout::After(Duration::from_secs(10)))
            .await
        {
            Ok(r) if !r.degraded => info!(model, "Model connection pre-warmed"),
            Ok(_) => warn!(model, "Model warm-up degraded"),
            Err(e) => warn!(model, error = %e, "Model warm-up failed"),
        }
    }

    async fn call_with_rotation(
        &self,
        request: &CompletionRequest,
    ) -> Result<Completion, ProviderError> {
        let Some((slot, creds)) = self.credentials.current() else {
            return Err(ProviderError::Auth("no API credentials configured".into()));
        };

        match self.provider.complete(request, creds).await {
            Err(ProviderError::Auth(msg)) if self.credentials.len() > 1 => {
                warn!(provider = self.provider.id(), slot, %msg, "Auth failed, rotating credential");
                let Some((_, next)) = self.credentials.rotate_from(slot) else {
                    return Err(ProviderError::Auth(msg));
                };
                self.provider.complete(request, next).await
            }
            other => other,
        }
    }

    fn priced(&self, completion: Completion) -> ModelResponse {
        let cost = self.pricing.cost(
            &completion.model,
            completion.usage.prompt_tokens,
            completion.usage.completion_tokens,
        );
        ModelResponse {
            text: completion.text,
            model: completion.model,
            usage: completion.usage,
            cost,
            degraded: false,
            cached: false,
        }
    }

    fn degraded(&self, model: &str) -> ModelResponse {
        ModelResponse {
            text: DEGRADED_TEXT.to_string(),
            model: model.to_string(),
            usage: DEGRADED_USAGE,
            cost: self.pricing.cost(
                model,
                DEGRADED_USAGE.prompt_tokens,
                DEGRADED_USAGE.completion_tokens,
            ),
            degraded: true,
            cached: false,
        }
    }
}
