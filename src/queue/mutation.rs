//! Single-flight serialized read-modify-write over one origin's record.
//!
//! ## Design
//!
//! Uses an mpsc channel + a single background worker:
//! 1. `enqueue(mutator)` pushes the job and returns immediately
//! 2. The worker takes jobs strictly in FIFO order
//! 3. For each job it reads the record fresh from storage, applies the
//!    mutator, and writes the result back before touching the next job
//! 4. A failed read or write, or a panicking mutator, is reported to that
//!    job's handle and the worker moves on
//!
//! Only one cycle is ever in flight, so two near-simultaneous writers (a drag
//! release and a visibility toggle, say) both land in the final record.
//!
//! ## Usage
//!
//! ```ignore
//! let queue = MutationQueue::new(store, "example.com");
//! queue.enqueue(|record| record.remove_note("note-1")); // non-blocking
//! queue.flush().await;
//! ```

use crate::annotations::{Record, RecordLoad};
use crate::storage::RecordStore;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// A read-modify-write intent against the whole record
pub type Mutator = Box<dyn FnOnce(&mut Record) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read record for {origin}: {message}")]
    Read { origin: String, message: String },

    #[error("failed to write record for {origin}: {message}")]
    Write { origin: String, message: String },

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("mutator panicked for {origin}: {message}")]
    Mutator { origin: String, message: String },

    #[error("mutation queue closed")]
    QueueClosed,
}

enum Job {
    Mutate {
        mutator: Mutator,
        reply: oneshot::Sender<Result<Record, PersistenceError>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Handle to one enqueued mutation. Dropping it is fine; the mutation still
/// runs.
#[derive(Debug)]
pub struct MutationHandle {
    rx: oneshot::Receiver<Result<Record, PersistenceError>>,
}

impl MutationHandle {
    /// Wait for the cycle to finish and get the record as persisted
    pub async fn wait(self) -> Result<Record, PersistenceError> {
        self.rx.await.unwrap_or(Err(PersistenceError::QueueClosed))
    }
}

/// Cloneable front end of the per-origin worker
#[derive(Clone)]
pub struct MutationQueue {
    origin: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue")
            .field("origin", &self.origin)
            .field("pending", &self.pending())
            .finish()
    }
}

impl MutationQueue {
    /// Spawn the worker for `origin`. It lives until every clone of the queue
    /// is dropped. Must be called from within a tokio runtime.
    pub fn new(store: Arc<dyn RecordStore>, origin: impl Into<String>) -> Self {
        let origin: Arc<str> = Arc::from(origin.into());
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(Self::run_loop(store, origin.clone(), rx, pending.clone()));
        Self {
            origin,
            tx,
            pending,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Mutations enqueued but not yet finished
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a mutator. Returns immediately.
    pub fn enqueue<F>(&self, mutator: F) -> MutationHandle
    where
        F: FnOnce(&mut Record) + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.pending.fetch_add(1, Ordering::SeqCst);
        let job = Job::Mutate {
            mutator: Box::new(mutator),
            reply,
        };
        if self.tx.send(job).is_err() {
            // Worker gone: the reply sender was dropped with the job, so
            // wait() reports QueueClosed
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        MutationHandle { rx }
    }

    /// Resolves once every mutation enqueued before this call has finished
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(Job::Flush(done)).is_ok() {
            let _ = rx.await;
        }
    }

    async fn run_loop(
        store: Arc<dyn RecordStore>,
        origin: Arc<str>,
        mut rx: mpsc::UnboundedReceiver<Job>,
        pending: Arc<AtomicUsize>,
    ) {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Mutate { mutator, reply } => {
                    let result = run_cycle(store.as_ref(), &origin, mutator).await;
                    if let Err(e) = &result {
                        warn!(origin = %origin, error = %e, "Record mutation abandoned");
                    }
                    pending.fetch_sub(1, Ordering::SeqCst);
                    // Caller may have dropped the handle
                    let _ = reply.send(result);
                }
                Job::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!(origin = %origin, "Mutation queue closed");
    }
}

async fn run_cycle(
    store: &dyn RecordStore,
    origin: &str,
    mutator: Mutator,
) -> Result<Record, PersistenceError> {
    let stored = store
        .get(origin)
        .await
        .map_err(|e| PersistenceError::Read {
            origin: origin.to_string(),
            message: format!("{e:#}"),
        })?;

    let RecordLoad {
        mut record,
        migrated,
        skipped,
    } = Record::from_stored(stored);
    let before = record.clone();
    // Nothing is written for a panicking mutator; the partially mutated copy
    // is discarded
    panic::catch_unwind(AssertUnwindSafe(|| mutator(&mut record))).map_err(|payload| {
        PersistenceError::Mutator {
            origin: origin.to_string(),
            message: panic_message(payload.as_ref()),
        }
    })?;

    if !migrated && record == before {
        debug!(origin, skipped, "Record unchanged, skipping write");
        return Ok(record);
    }

    let value = record
        .to_value()
        .map_err(|e| PersistenceError::Encode(e.to_string()))?;
    store
        .set(origin, value)
        .await
        .map_err(|e| PersistenceError::Write {
            origin: origin.to_string(),
            message: format!("{e:#}"),
        })?;
    debug!(
        origin,
        notes = record.notes.len(),
        highlights = record.highlights.len(),
        migrated,
        "Record persisted"
    );
    Ok(record)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
