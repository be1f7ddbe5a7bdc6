//! Credential pool — round-robin over a fixed set of API keys.
//!
//! On an authentication failure the gateway rotates to the next key and
//! retries once.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::Credentials;

pub struct CredentialPool {
    credentials: Vec<Credentials>,
    index: AtomicUsize,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credentials>) -> Self {
        Self {
            credentials,
            index: AtomicUsize::new(0),
        }
    }

    /// Build a pool from raw API keys, skipping empty ones.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            keys.into_iter()
                .map(|k| -> String { k.into() })
                .filter(|k| !k.is_empty())
                .map(Credentials::api_key)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// The current credential and the slot it was read from.
    pub fn current(&self) -> Option<(usize, &Credentials)> {
        if self.credentials.is_empty() {
            return None;
        }
        let slot = self.index.load(Ordering::Relaxed) % self.credentials.len();
        Some((slot, &self.credentials[slot]))
    }

    /// Move past `failed_slot`. If another task already rotated away from it,
    /// the pool is left where that task put it.
    pub fn rotate_from(&self, failed_slot: usize) -> Option<(usize, &Credentials)> {
        if self.credentials.is_empty() {
            return None;
        }
        let len = self.credentials.len();
        let next = (failed_slot + 1) % len;
        let observed = self.index.load(Ordering::Relaxed) % len;
        if observed == failed_slot
            && self
                .index
                .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            info!(from = failed_slot, to = next, "Rotated API credential");
        }
        self.current()
    }
}
