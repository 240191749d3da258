//! JSON file RecordStore
//!
//! All origins live in one JSON object keyed by origin. Each write rewrites
//! the file through a temporary sibling and a rename, so readers never see a
//! half-written file.

use super::changes::{ChangeFeed, RecordChange};
use super::traits::RecordStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes whole-file read-modify-write within this process
    lock: Mutex<()>,
    feed: ChangeFeed,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_feed(path, ChangeFeed::default())
    }

    pub fn with_feed(path: impl Into<PathBuf>, feed: ChangeFeed) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            feed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Map::new());
        }
        let value: Value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        match value {
            Value::Object(map) => Ok(map),
            other => anyhow::bail!(
                "{} must contain a JSON object, found {}",
                self.path.display(),
                type_name(&other)
            ),
        }
    }

    async fn save(&self, records: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(records)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        debug!(path = %self.path.display(), origins = records.len(), "Record file saved");
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get(&self, origin: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(origin))
    }

    async fn set(&self, origin: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        let old = records.insert(origin.to_string(), value.clone());
        self.save(&records).await?;
        self.feed.publish(RecordChange::new(origin, old, Some(value)));
        Ok(())
    }

    async fn remove(&self, origin: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.load().await?;
        if let Some(old) = records.remove(origin) {
            self.save(&records).await?;
            self.feed.publish(RecordChange::new(origin, Some(old), None));
        }
        Ok(())
    }

    async fn origins(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        let mut origins: Vec<String> = self.load().await?.keys().cloned().collect();
        origins.sort();
        Ok(origins)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("records.json"));
        assert!(store.get("a.com").await.unwrap().is_none());
        assert!(store.origins().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.json");

        let store = JsonFileStore::new(&path);
        store.set("b.com", json!({"notes": [{"id": "n1"}]})).await.unwrap();
        store.set("a.com", json!({"notes": []})).await.unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.origins().await.unwrap(), vec!["a.com", "b.com"]);
        assert_eq!(
            reopened.get("b.com").await.unwrap(),
            Some(json!({"notes": [{"id": "n1"}]}))
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_remove_publishes_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("records.json"));
        let mut rx = store.subscribe();

        store.remove("a.com").await.unwrap();
        assert!(rx.try_recv().is_err());

        store.set("a.com", json!({})).await.unwrap();
        store.remove("a.com").await.unwrap();
        assert!(rx.recv().await.unwrap().new_value.is_some());
        let removed = rx.recv().await.unwrap();
        assert_eq!(removed.old_value, Some(json!({})));
        assert!(removed.new_value.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.get("a.com").await.is_err());
    }
}
