//! Liveness gate.
//!
//! Every mid-call side effect that reaches the caller goes through
//! [`LivenessGate::update_if_active`]. A hung-up caller never hears
//! anything, and a failed status lookup counts as "not active".

use std::sync::Arc;

use tracing::{debug, info, warn};

use helpline_core::config::Config;

use crate::{Telephony, TelephonyError, VoiceScript};

/// Outcome of a gated delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The call was not active; nothing was sent.
    Skipped,
    /// The call looked active but the update itself failed.
    Failed,
}

impl Delivery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone)]
pub struct LivenessGate {
    telephony: Arc<dyn Telephony>,
    active_statuses: Vec<String>,
}

impl LivenessGate {
    pub fn new(telephony: Arc<dyn Telephony>, active_statuses: Vec<String>) -> Self {
        Self {
            telephony,
            active_statuses,
        }
    }

    pub fn from_config(config: &Config, telephony: Arc<dyn Telephony>) -> Self {
        Self::new(telephony, config.active_statuses())
    }

    /// Whether the provider reports the call in one of the active statuses.
    pub async fn is_active(&self, call_id: &str) -> bool {
        if call_id.is_empty() {
            return false;
        }
        match self.telephony.call_status(call_id).await {
            Ok(status) => {
                let active = self.active_statuses.iter().any(|s| *s == status);
                debug!(call_id, status = %status, active, "Liveness check");
                active
            }
            Err(e) => {
                warn!(call_id, error = %e, "Liveness check failed; treating call as inactive");
                false
            }
        }
    }

    /// Deliver `script` to the call only if it is still active.
    pub async fn update_if_active(&self, call_id: &str, script: &VoiceScript) -> Delivery {
        if !self.is_active(call_id).await {
            info!(call_id, "Call is no longer active; skipping update");
            return Delivery::Skipped;
        }
        match self.telephony.update_call(call_id, script).await {
            Ok(()) => Delivery::Delivered,
            // Hung up between the check and the update
            Err(TelephonyError::NotInProgress) => {
                info!(call_id, "Call ended before update landed");
                Delivery::Skipped
            }
            Err(e) => {
                warn!(call_id, error = %e, "Failed to update call");
                Delivery::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    struct FakeTelephony {
        status: Result<String, TelephonyError>,
        update_error: Option<TelephonyError>,
        status_calls: Mutex<usize>,
        updates: Mutex<Vec<String>>,
    }

    impl FakeTelephony {
        fn with_status(status: Result<&str, TelephonyError>) -> Self {
            Self {
                status: status.map(str::to_string),
                update_error: None,
                status_calls: Mutex::new(0),
                updates: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Telephony for FakeTelephony {
        async fn call_status(&self, _call_id: &str) -> Result<String, TelephonyError> {
            *self.status_calls.lock().unwrap() += 1;
            self.status.clone()
        }

        async fn update_call(
            &self,
            _call_id: &str,
            script: &VoiceScript,
        ) -> Result<(), TelephonyError> {
            if let Some(e) = &self.update_error {
                return Err(e.clone());
            }
            self.updates.lock().unwrap().push(script.to_xml());
            Ok(())
        }
    }

    fn gate(fake: Arc<FakeTelephony>) -> LivenessGate {
        LivenessGate::new(
            fake,
            vec!["queued".into(), "ringing".into(), "in-progress".into()],
        )
    }

    #[tokio::test]
    async fn test_active_statuses() {
        for status in ["queued", "ringing", "in-progress"] {
            let g = gate(Arc::new(FakeTelephony::with_status(Ok(status))));
            assert!(g.is_active("CA1").await, "{status} should be active");
        }
        for status in ["completed", "busy", "failed", "no-answer", "canceled"] {
            let g = gate(Arc::new(FakeTelephony::with_status(Ok(status))));
            assert!(!g.is_active("CA1").await, "{status} should be inactive");
        }
    }

    #[tokio::test]
    async fn test_lookup_error_is_inactive() {
        let g = gate(Arc::new(FakeTelephony::with_status(Err(
            TelephonyError::Transport("refused".into()),
        ))));
        assert!(!g.is_active("CA1").await);
    }

    #[tokio::test]
    async fn test_empty_call_id_skips_lookup() {
        let fake = Arc::new(FakeTelephony::with_status(Ok("in-progress")));
        let g = gate(fake.clone());
        assert!(!g.is_active("").await);
        assert_eq!(*fake.status_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ended_call_receives_nothing() {
        let fake = Arc::new(FakeTelephony::with_status(Ok("completed")));
        let g = gate(fake.clone());
        let script = VoiceScript::new().say("hello");
        assert_eq!(g.update_if_active("CA1", &script).await, Delivery::Skipped);
        assert_eq!(g.update_if_active("CA1", &script).await, Delivery::Skipped);
        assert!(fake.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_call_receives_script() {
        let fake = Arc::new(FakeTelephony::with_status(Ok("in-progress")));
        let g = gate(fake.clone());
        let script = VoiceScript::new().say("hello");
        assert_eq!(
            g.update_if_active("CA1", &script).await,
            Delivery::Delivered
        );
        assert_eq!(fake.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_race_with_hangup_is_skipped() {
        let mut fake = FakeTelephony::with_status(Ok("in-progress"));
        fake.update_error = Some(TelephonyError::NotInProgress);
        let g = gate(Arc::new(fake));
        let script = VoiceScript::new().say("hello");
        assert_eq!(g.update_if_active("CA1", &script).await, Delivery::Skipped);
    }

    #[tokio::test]
    async fn test_update_failure() {
        let mut fake = FakeTelephony::with_status(Ok("in-progress"));
        fake.update_error = Some(TelephonyError::Transport("reset".into()));
        let g = gate(Arc::new(fake));
        let script = VoiceScript::new().say("hello");
        assert_eq!(g.update_if_active("CA1", &script).await, Delivery::Failed);
    }
}
