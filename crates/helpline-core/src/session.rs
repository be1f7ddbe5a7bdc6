//! Call session registry: per-call ephemeral dialogue state keyed by call id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Slot, SlotValues, Stage};

/// Ephemeral state of one live call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: String,
    pub stage: Stage,
    pub slots: SlotValues,
    /// Extraction re-prompts issued per stage.
    #[serde(default)]
    pub retry_counts: HashMap<Stage, u8>,
    /// Silence re-prompts issued per stage.
    #[serde(default)]
    pub no_speech_counts: HashMap<Stage, u8>,
    /// Slots the current re-prompt asked for.
    #[serde(default)]
    pub pending_fields: Vec<Slot>,
    pub in_flight: bool,
    pub first_interaction_done: bool,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            stage: Stage::Greeting,
            slots: SlotValues::default(),
            retry_counts: HashMap::new(),
            no_speech_counts: HashMap::new(),
            pending_fields: Vec::new(),
            in_flight: false,
            first_interaction_done: false,
            created_at: Utc::now(),
        }
    }

    pub fn retries(&self, stage: Stage) -> u8 {
        self.retry_counts.get(&stage).copied().unwrap_or(0)
    }

    pub fn silences(&self, stage: Stage) -> u8 {
        self.no_speech_counts.get(&stage).copied().unwrap_or(0)
    }

    /// Move to `stage`, clearing any pending re-prompt.
    pub fn advance(&mut self, stage: Stage) {
        debug!(call_id = %self.id, from = %self.stage, to = %stage, "Stage transition");
        self.stage = stage;
        self.pending_fields.clear();
    }
}

/// Why a streaming turn could not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRefused {
    /// Another final is already being processed for this call.
    Busy,
    UnknownCall,
}

/// Concurrency-safe map of live calls.
///
/// Each session sits behind its own shard lock, so `mutate` is atomic for one
/// call and never blocks callers working on another.
#[derive(Debug, Default)]
pub struct CallSessionRegistry {
    sessions: DashMap<String, CallSession>,
}

impl CallSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh session. An existing session with the same id is kept.
    pub fn create(&self, id: &str) -> CallSession {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| CallSession::new(id))
            .clone()
    }

    /// Snapshot of a session.
    pub fn get(&self, id: &str) -> Option<CallSession> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Apply `f` to the session while holding its lock.
    pub fn mutate<R>(&self, id: &str, f: impl FnOnce(&mut CallSession) -> R) -> Option<R> {
        self.sessions.get_mut(id).map(|mut s| f(&mut s))
    }

    pub fn remove(&self, id: &str) -> Option<CallSession> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Claim the call's single processing slot.
    ///
    /// The returned guard clears `in_flight` when dropped, on every path.
    pub fn try_begin_turn(self: &Arc<Self>, id: &str) -> Result<TurnGuard, TurnRefused> {
        let mut session = self.sessions.get_mut(id).ok_or(TurnRefused::UnknownCall)?;
        if session.in_flight {
            return Err(TurnRefused::Busy);
        }
        session.in_flight = true;
        Ok(TurnGuard {
            registry: Arc::clone(self),
            call_id: id.to_string(),
        })
    }
}

/// Holds a call's `in_flight` flag for the duration of one turn.
#[derive(Debug)]
pub struct TurnGuard {
    registry: Arc<CallSessionRegistry>,
    call_id: String,
}

impl TurnGuard {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.registry.mutate(&self.call_id, |s| s.in_flight = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_idempotent() {
        let registry = CallSessionRegistry::new();
        registry.create("CA1");
        registry.mutate("CA1", |s| s.advance(Stage::CollectingAllDetails));
        let again = registry.create("CA1");
        assert_eq!(again.stage, Stage::CollectingAllDetails);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_mutate_unknown_returns_none() {
        let registry = CallSessionRegistry::new();
        assert!(registry.mutate("nope", |s| s.stage).is_none());
    }

    #[test]
    fn test_turn_guard_excludes_second_turn() {
        let registry = Arc::new(CallSessionRegistry::new());
        registry.create("CA1");

        let guard = registry.try_begin_turn("CA1").unwrap();
        assert_eq!(
            registry.try_begin_turn("CA1").unwrap_err(),
            TurnRefused::Busy
        );
        assert!(registry.get("CA1").unwrap().in_flight);

        drop(guard);
        assert!(!registry.get("CA1").unwrap().in_flight);
        assert!(registry.try_begin_turn("CA1").is_ok());
    }

    #[test]
    fn test_turn_guard_unknown_call() {
        let registry = Arc::new(CallSessionRegistry::new());
        assert_eq!(
            registry.try_begin_turn("missing").unwrap_err(),
            TurnRefused::UnknownCall
        );
    }

    #[test]
    fn test_guard_survives_session_removal() {
        let registry = Arc::new(CallSessionRegistry::new());
        registry.create("CA1");
        let guard = registry.try_begin_turn("CA1").unwrap();
        registry.remove("CA1");
        drop(guard);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_turns_single_winner() {
        let registry = Arc::new(CallSessionRegistry::new());
        registry.create("CA1");

        let barrier = Arc::new(tokio::sync::Barrier::new(16));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                registry.try_begin_turn("CA1").ok()
            }));
        }

        let mut guards = Vec::new();
        for h in handles {
            if let Some(g) = h.await.unwrap() {
                guards.push(g);
            }
        }
        assert_eq!(guards.len(), 1);
    }
}
