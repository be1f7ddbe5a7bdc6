//! Cost ledger: fire-and-forget writer for charges and other voice-path records.
//!
//! All writes are funneled through one background task so that they reach the
//! store in the order they were issued, and so that a slow or failing store
//! never stalls a caller. Failures are logged and dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::store::{CallRecord, CallStore, CallUpdate, CostLedgerEntry, ErrorLogEntry, SearchLogEntry};

enum LedgerMsg {
    Charge(CostLedgerEntry),
    Search(SearchLogEntry),
    Error(ErrorLogEntry),
    InsertCall(CallRecord),
    UpdateCall(String, CallUpdate),
    Flush(oneshot::Sender<()>),
}

/// Append-only ledger handle. Cheap to clone.
#[derive(Clone)]
pub struct CostLedger {
    tx: mpsc::UnboundedSender<LedgerMsg>,
}

impl CostLedger {
    /// Start the writer task. Must be called inside a Tokio runtime.
    pub fn spawn(store: Arc<dyn CallStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LedgerMsg>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let (what, result) = match msg {
                    LedgerMsg::Charge(entry) => {
                        debug!(
                            call_id = %entry.call_id,
                            kind = entry.kind.as_str(),
                            amount = entry.amount,
                            "Charge recorded"
                        );
                        ("charge", store.append_charge(entry).await)
                    }
                    LedgerMsg::Search(entry) => ("search log", store.append_search(entry).await),
                    LedgerMsg::Error(entry) => ("error log", store.append_error(entry).await),
                    LedgerMsg::InsertCall(record) => {
                        ("call insert", store.insert_call(record).await)
                    }
                    LedgerMsg::UpdateCall(id, update) => {
                        ("call update", store.update_call(&id, update).await)
                    }
                    LedgerMsg::Flush(done) => {
                        let _ = done.send(());
                        continue;
                    }
                };
                if let Err(e) = result {
                    warn!(error = %e, "Store write failed ({what})");
                }
            }
            debug!("Ledger writer stopped");
        });

        Self { tx }
    }

    fn send(&self, msg: LedgerMsg) {
        if self.tx.send(msg).is_err() {
            warn!("Ledger writer is gone; record dropped");
        }
    }

    /// Append a charge. Never blocks, never fails.
    pub fn append(&self, entry: CostLedgerEntry) {
        self.send(LedgerMsg::Charge(entry));
    }

    pub fn log_search(&self, entry: SearchLogEntry) {
        self.send(LedgerMsg::Search(entry));
    }

    pub fn log_error(&self, entry: ErrorLogEntry) {
        self.send(LedgerMsg::Error(entry));
    }

    pub fn insert_call(&self, record: CallRecord) {
        self.send(LedgerMsg::InsertCall(record));
    }

    pub fn update_call(&self, call_id: &str, update: CallUpdate) {
        self.send(LedgerMsg::UpdateCall(call_id.to_string(), update));
    }

    /// Wait until every record sent before this call has been handed to the store.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(LedgerMsg::Flush(done_tx));
        let _ = done_rx.await;
    }
}
