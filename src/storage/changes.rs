//! Change broadcast for persisted records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
pub const DEFAULT_CAPACITY: usize = 256;

/// One write to an origin's record, with the full before and after values.
///
/// `new_value == None` means the record was removed, i.e. every entity for
/// the origin is gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordChange {
    pub origin: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl RecordChange {
    pub fn new(
        origin: impl Into<String>,
        old_value: Option<Value>,
        new_value: Option<Value>,
    ) -> Self {
        Self {
            origin: origin.into(),
            old_value,
            new_value,
            timestamp: Utc::now(),
        }
    }
}

/// Fan-out of [`RecordChange`]s to every watching context.
///
/// Fire-and-forget: publishing never blocks; without subscribers the change
/// is dropped.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<RecordChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, change: RecordChange) {
        let origin = change.origin.clone();
        if let Ok(n) = self.sender.send(change) {
            debug!(origin = %origin, subscribers = n, "Record change published");
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
