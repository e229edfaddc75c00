//! In-memory checkpoint store for tests and single-shot runs.

use super::{CheckpointRecord, CheckpointStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;

/// A non-durable store backed by a concurrent map.
///
/// Offers the same overwrite semantics as durable backends, which makes
/// it a faithful stand-in under test, but provides no crash safety.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    records: DashMap<(String, String), CheckpointRecord>,
}

impl MemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(
        &self,
        run_id: &str,
        stage: &str,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        let key = (run_id.to_string(), stage.to_string());
        Ok(self.records.get(&key).map(|entry| entry.clone()))
    }

    async fn put(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        let key = (record.run_id.clone(), record.stage.clone());
        self.records.insert(key, record);
        Ok(())
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use crate::stage::StageResult;

    fn succeeded(run: &str, stage: &str) -> CheckpointRecord {
        CheckpointRecord::from_result(run, stage, &StageResult::success(serde_json::json!(1)))
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = MemoryCheckpointStore::new();
        assert!(store.get("r1", "script").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryCheckpointStore::new();
        store.put(succeeded("r1", "script")).await.unwrap();

        let record = store.get("r1", "script").await.unwrap().unwrap();
        assert_eq!(record.status, CheckpointStatus::Succeeded);
    }

    #[tokio::test]
    async fn put_overwrites_prior_record() {
        let store = MemoryCheckpointStore::new();
        store.put(succeeded("r1", "script")).await.unwrap();

        let failed = CheckpointRecord::from_result(
            "r1",
            "script",
            &StageResult::failure(crate::errors::StageError::fatal("boom")),
        );
        store.put(failed).await.unwrap();

        assert_eq!(store.len(), 1);
        let record = store.get("r1", "script").await.unwrap().unwrap();
        assert_eq!(record.status, CheckpointStatus::Failed);
    }

    #[tokio::test]
    async fn list_filters_by_run() {
        let store = MemoryCheckpointStore::new();
        store.put(succeeded("r1", "script")).await.unwrap();
        store.put(succeeded("r1", "voice")).await.unwrap();
        store.put(succeeded("r2", "script")).await.unwrap();

        let records = store.list("r1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.run_id == "r1"));
    }
}
