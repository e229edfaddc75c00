//! File-backed checkpoint store.
//!
//! Layout: `<root>/<run_id>/<stage>.json`, one file per (run, stage)
//! key. Writes go to a `.tmp` sibling first and are renamed into place,
//! so a reader racing a crash sees either the previous record or the
//! fully written new one.

use super::{CheckpointRecord, CheckpointStore};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// A durable store keeping one JSON file per checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at the given directory.
    ///
    /// The directory is created lazily on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(escape_name(run_id))
    }

    fn record_path(&self, run_id: &str, stage: &str) -> PathBuf {
        self.run_dir(run_id)
            .join(format!("{}.json", escape_name(stage)))
    }
}

// Stage and run names come from pipeline definitions, but keep them from
// escaping the store root or colliding with the temp suffix. The escape
// is injective: any byte outside [a-zA-Z0-9-], '_' included, becomes
// `_` plus two hex digits, so distinct names never share a file.
fn escape_name(name: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(char::from(byte)),
            _ => {
                out.push('_');
                out.push(char::from(HEX[usize::from(byte >> 4)]));
                out.push(char::from(HEX[usize::from(byte & 0x0f)]));
            }
        }
    }
    out
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get(
        &self,
        run_id: &str,
        stage: &str,
    ) -> Result<Option<CheckpointRecord>, StoreError> {
        let path = self.record_path(run_id, stage);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, record: CheckpointRecord) -> Result<(), StoreError> {
        let dir = self.run_dir(&record.run_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.record_path(&record.run_id, &record.stage);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&record)?;

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn list(&self, run_id: &str) -> Result<Vec<CheckpointRecord>, StoreError> {
        let dir = self.run_dir(run_id);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use crate::stage::StageResult;

    fn succeeded(run: &str, stage: &str) -> CheckpointRecord {
        CheckpointRecord::from_result(run, stage, &StageResult::success(serde_json::json!("out")))
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.get("r1", "script").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.put(succeeded("r1", "script")).await.unwrap();
        let record = store.get("r1", "script").await.unwrap().unwrap();

        assert_eq!(record.status, CheckpointStatus::Succeeded);
        assert_eq!(record.output, Some(serde_json::json!("out")));
    }

    #[tokio::test]
    async fn put_overwrites_without_leaving_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.put(succeeded("r1", "script")).await.unwrap();
        store.put(succeeded("r1", "script")).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("r1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["script.json".to_string()]);
    }

    #[tokio::test]
    async fn list_returns_all_records_for_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.put(succeeded("r1", "script")).await.unwrap();
        store.put(succeeded("r1", "voice")).await.unwrap();
        store.put(succeeded("r2", "script")).await.unwrap();

        let mut stages: Vec<_> = store
            .list("r1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.stage)
            .collect();
        stages.sort();
        assert_eq!(stages, vec!["script".to_string(), "voice".to_string()]);
    }

    #[tokio::test]
    async fn names_are_escaped_into_the_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.put(succeeded("../evil", "a/b")).await.unwrap();
        let record = store.get("../evil", "a/b").await.unwrap().unwrap();
        assert_eq!(record.stage, "a/b");
        assert!(dir.path().join("_2e_2e_2fevil").join("a_2fb.json").exists());
    }

    #[tokio::test]
    async fn similar_names_do_not_share_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        for stage in ["a.b", "a_b", "a/b"] {
            store.put(succeeded("r1", stage)).await.unwrap();
        }

        let records = store.list("r1").await.unwrap();
        assert_eq!(records.len(), 3);
        for stage in ["a.b", "a_b", "a/b"] {
            let record = store.get("r1", stage).await.unwrap().unwrap();
            assert_eq!(record.stage, stage);
        }
    }
}
