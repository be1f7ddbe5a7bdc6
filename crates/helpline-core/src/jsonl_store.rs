//! JSONL-based call store — call records in one JSON index, logs as append-only JSONL.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{HelplineError, Result};
use crate::store::{
    CallRecord, CallStore, CallUpdate, CostLedgerEntry, ErrorLogEntry, SearchLogEntry,
};

/// File-based call store.
///
/// Layout:
/// - `<base>/calls.json` — array of `CallRecord`
/// - `<base>/charges.jsonl` — one `CostLedgerEntry` per line
/// - `<base>/searches.jsonl` — one `SearchLogEntry` per line
/// - `<base>/errors.jsonl` — one `ErrorLogEntry` per line
pub struct JsonlCallStore {
    base: PathBuf,
    /// Serializes read-modify-write cycles on `calls.json`.
    calls_lock: Mutex<()>,
}

impl JsonlCallStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            calls_lock: Mutex::new(()),
        }
    }

    /// Default store location: `~/.helpline/store/`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("store")
    }

    fn calls_path(&self) -> PathBuf {
        self.base.join("calls.json")
    }

    fn charges_path(&self) -> PathBuf {
        self.base.join("charges.jsonl")
    }

    fn searches_path(&self) -> PathBuf {
        self.base.join("searches.jsonl")
    }

    fn errors_path(&self) -> PathBuf {
        self.base.join("errors.jsonl")
    }

    async fn load_calls(&self) -> Result<Vec<CallRecord>> {
        let path = self.calls_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&data)?)
    }

    async fn save_calls(&self, calls: &[CallRecord]) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let data = serde_json::to_string_pretty(calls)?;
        let path = self.calls_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn append_line<T: Serialize>(&self, path: &Path, row: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let mut line = serde_json::to_string(row)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_lines<T: DeserializeOwned>(&self, path: &Path) -> Result<Vec<T>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(path).await?;
        let mut rows = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str(line).map_err(|e| {
                HelplineError::Store(format!("corrupt line in {}: {e}", path.display()))
            })?;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Search analytics rows, in append order.
    pub async fn searches(&self) -> Result<Vec<SearchLogEntry>> {
        self.read_lines(&self.searches_path()).await
    }

    /// Error log rows, in append order.
    pub async fn errors(&self) -> Result<Vec<ErrorLogEntry>> {
        self.read_lines(&self.errors_path()).await
    }
}

#[async_trait]
impl CallStore for JsonlCallStore {
    async fn insert_call(&self, record: CallRecord) -> Result<()> {
        let _lock = self.calls_lock.lock().await;
        let mut calls = self.load_calls().await?;
        if calls.iter().any(|c| c.call_id == record.call_id) {
            return Err(HelplineError::Store(format!(
                "call {} already recorded",
                record.call_id
            )));
        }
        debug!(call_id = %record.call_id, "Inserted call record");
        calls.push(record);
        self.save_calls(&calls).await
    }

    async fn update_call(&self, call_id: &str, update: CallUpdate) -> Result<()> {
        let _lock = self.calls_lock.lock().await;
        let mut calls = self.load_calls().await?;
        let record = calls
            .iter_mut()
            .find(|c| c.call_id == call_id)
            .ok_or_else(|| HelplineError::Store(format!("unknown call {call_id}")))?;
        update.apply(record);
        self.save_calls(&calls).await?;
        debug!(call_id, "Updated call record");
        Ok(())
    }

    async fn append_charge(&self, entry: CostLedgerEntry) -> Result<()> {
        self.append_line(&self.charges_path(), &entry).await
    }

    async fn append_search(&self, entry: SearchLogEntry) -> Result<()> {
        self.append_line(&self.searches_path(), &entry).await
    }

    async fn append_error(&self, entry: ErrorLogEntry) -> Result<()> {
        self.append_line(&self.errors_path(), &entry).await
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<CallRecord>> {
        let calls = self.load_calls().await?;
        Ok(calls.into_iter().find(|c| c.call_id == call_id))
    }

    async fn charges(&self, call_id: &str) -> Result<Vec<CostLedgerEntry>> {
        let all: Vec<CostLedgerEntry> = self.read_lines(&self.charges_path()).await?;
        Ok(all.into_iter().filter(|c| c.call_id == call_id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CallStatus, CostKind};
    use crate::types::{Slot, SlotValues};

    #[tokio::test]
    async fn test_insert_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlCallStore::new(dir.path().to_path_buf());

        store
            .insert_call(CallRecord::started("CA1", Some("+1555".into()), Some("+1666".into())))
            .await
            .unwrap();
        let loaded = store.get_call("CA1").await.unwrap().unwrap();
        assert_eq!(loaded.from.as_deref(), Some("+1555"));
        assert_eq!(loaded.status, CallStatus::Started);
        assert!(store.get_call("CA2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_persists_slots_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlCallStore::new(dir.path().to_path_buf());
        store
            .insert_call(CallRecord::started("CA1", None, None))
            .await
            .unwrap();

        let mut slots = SlotValues::default();
        slots.merge(Slot::Department, "Cardiology");
        store.update_call("CA1", CallUpdate::slots(&slots)).await.unwrap();
        store
            .update_call("CA1", CallUpdate::stream_started())
            .await
            .unwrap();
        store.update_call("CA1", CallUpdate::ended()).await.unwrap();

        // Reopen to make sure everything hit disk
        let reopened = JsonlCallStore::new(dir.path().to_path_buf());
        let record = reopened.get_call("CA1").await.unwrap().unwrap();
        assert_eq!(record.slots.get(Slot::Department), "Cardiology");
        assert_eq!(record.status, CallStatus::Ended);
        assert!(record.start_time.is_some());
        assert!(record.end_time.is_some());
    }

    #[tokio::test]
    async fn test_charges_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlCallStore::new(dir.path().to_path_buf());

        store
            .append_charge(CostLedgerEntry::speech("CA1", 2.0, 0.006))
            .await
            .unwrap();
        store
            .append_charge(CostLedgerEntry::model(
                "CA1",
                CostKind::AnswerGeneration,
                "gpt-3.5-turbo",
                100,
                50,
                0.0002,
                false,
            ))
            .await
            .unwrap();
        store
            .append_charge(CostLedgerEntry::speech("CA2", 2.0, 0.006))
            .await
            .unwrap();

        let charges = store.charges("CA1").await.unwrap();
        assert_eq!(charges.len(), 2);
        assert_eq!(charges[0].kind, CostKind::Speech);
        assert_eq!(charges[1].kind, CostKind::AnswerGeneration);
        assert_eq!(charges[1].tokens, 150);
    }

    #[tokio::test]
    async fn test_search_and_error_logs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlCallStore::new(dir.path().to_path_buf());

        store
            .append_search(SearchLogEntry {
                call_id: "CA1".into(),
                keywords: vec!["printer".into()],
                department: Some("Radiology".into()),
                result_count: 3,
                truncated: false,
                timestamp: chrono::Utc::now(),
            })
            .await
            .unwrap();
        store
            .append_error(ErrorLogEntry::new("CA1", "search", "timed out"))
            .await
            .unwrap();

        assert_eq!(store.searches().await.unwrap()[0].result_count, 3);
        assert_eq!(store.errors().await.unwrap()[0].message, "timed out");
    }

    #[tokio::test]
    async fn test_corrupt_line_reports_store_error() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("charges.jsonl"), b"{not json}\n")
            .await
            .unwrap();
        let store = JsonlCallStore::new(dir.path().to_path_buf());
        let err = store.charges("CA1").await.unwrap_err();
        assert!(matches!(err, HelplineError::Store(_)));
    }
}
