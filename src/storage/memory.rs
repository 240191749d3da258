//! In-memory RecordStore
//!
//! Backs the tests and any host that keeps records in process. Supports a byte
//! quota and an availability switch so failure paths can be exercised.

use super::changes::{ChangeFeed, RecordChange};
use super::traits::RecordStore;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, RwLock};

/// Records held in a `HashMap` behind a tokio `RwLock`.
///
/// # Example
///
/// ```rust
/// use page_annotator::storage::{MemoryRecordStore, RecordStore};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let store = MemoryRecordStore::new();
/// let mut changes = store.subscribe();
///
/// store.set("example.com", json!({"notes": []})).await.unwrap();
/// assert_eq!(store.origins().await.unwrap(), vec!["example.com".to_string()]);
///
/// let change = changes.recv().await.unwrap();
/// assert!(change.old_value.is_none());
/// assert_eq!(change.new_value, Some(json!({"notes": []})));
/// # });
/// ```
#[derive(Debug)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, Value>>,
    quota_bytes: Option<usize>,
    available: AtomicBool,
    writes: AtomicUsize,
    feed: ChangeFeed,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::default())
    }

    pub fn with_feed(feed: ChangeFeed) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            quota_bytes: None,
            available: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
            feed,
        }
    }

    /// Reject writes whose serialized record exceeds `bytes`
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// While unavailable every read and write fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Successful `set`/`remove` calls so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            bail!("storage unavailable");
        }
        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, origin: &str) -> Result<Option<Value>> {
        self.check_available()?;
        Ok(self.records.read().await.get(origin).cloned())
    }

    async fn set(&self, origin: &str, value: Value) -> Result<()> {
        self.check_available()?;
        if let Some(quota) = self.quota_bytes {
            let size = serde_json::to_vec(&value)?.len();
            if size > quota {
                bail!("quota exceeded: record for {origin} is {size} bytes, limit {quota}");
            }
        }
        let old = self
            .records
            .write()
            .await
            .insert(origin.to_string(), value.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.feed.publish(RecordChange::new(origin, old, Some(value)));
        Ok(())
    }

    async fn remove(&self, origin: &str) -> Result<()> {
        self.check_available()?;
        let old = self.records.write().await.remove(origin);
        if old.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.feed.publish(RecordChange::new(origin, old, None));
        }
        Ok(())
    }

    async fn origins(&self) -> Result<Vec<String>> {
        self.check_available()?;
        let mut origins: Vec<String> = self.records.read().await.keys().cloned().collect();
        origins.sort();
        Ok(origins)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.feed.subscribe()
    }
}
