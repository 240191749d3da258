//! RecordStore trait definition

use super::changes::RecordChange;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Key-value persistence of per-origin records.
///
/// Values are raw JSON: parsing and validation belong to the reader, so a
/// store never rejects or rewrites data it does not understand. Every
/// successful `set`/`remove` publishes a [`RecordChange`] to subscribers.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read an origin's record, `None` when absent
    async fn get(&self, origin: &str) -> Result<Option<Value>>;

    /// Replace an origin's record
    async fn set(&self, origin: &str, value: Value) -> Result<()>;

    /// Delete an origin's record
    async fn remove(&self, origin: &str) -> Result<()>;

    /// All origins that currently have a record, sorted
    async fn origins(&self) -> Result<Vec<String>>;

    /// Watch every write to any origin
    fn subscribe(&self) -> broadcast::Receiver<RecordChange>;
}
