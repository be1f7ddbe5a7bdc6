//! TTL response cache shared by every call.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::gateway::ModelResponse;

struct CacheEntry {
    response: ModelResponse,
    expires_at: Instant,
}

/// Responses keyed by `model:prompt-prefix`. Entries leave only by TTL expiry;
/// there is no capacity bound.
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    ttl: Duration,
    prefix_chars: usize,
}

impl ResponseCache {
    /// Create a cache. When called inside a Tokio runtime, a background task
    /// sweeps expired entries until the cache is dropped.
    pub fn new(ttl: Duration, prefix_chars: usize) -> Self {
        let cache = Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            prefix_chars,
        };

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let entries = Arc::downgrade(&cache.entries);
            let period = ttl.clamp(Duration::from_secs(1), Duration::from_secs(60));
            handle.spawn(async move {
                let mut tick = tokio::time::interval(period);
                tick.tick().await;
                loop {
                    tick.tick().await;
                    let Some(entries) = entries.upgrade() else {
                        break;
                    };
                    let now = Instant::now();
                    entries.retain(|_, e| e.expires_at > now);
                    debug!(entries = entries.len(), "Response cache sweep");
                }
            });
        }

        cache
    }

    pub fn key(&self, model: &str, prompt: &str) -> String {
        let prefix: String = prompt.chars().take(self.prefix_chars).collect();
        format!("{model}:{prefix}")
    }

    /// Unexpired response for `key`.
    pub fn get(&self, key: &str) -> Option<ModelResponse> {
        let entry = self.entries.get(key)?;
        if entry.expires_at > Instant::now() {
            Some(entry.response.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: String, response: ModelResponse) {
        self.entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
