//! The on-page agent: one cooperative event loop per context.
//!
//! ## Design
//!
//! A `PageAgent` owns its context's [`AnnotationStore`] outright. Everything
//! that touches the store arrives through one `tokio::select!` loop:
//! 1. control requests from a control surface, answered over a oneshot
//! 2. page signals (scroll, resize, structural change, clicks, page edits)
//! 3. record changes from the storage broadcast
//! 4. a frame clock that runs at most one pending position pass per tick
//! 5. a `CancellationToken` for shutdown
//!
//! Persistence never runs on the loop itself; the mutation queue's worker
//! does the I/O and replies are sent from small spawned tasks.
//!
//! ## Usage
//!
//! ```ignore
//! let (agent, handle) = PageAgent::new(store, records.subscribe());
//! let task = tokio::spawn(agent.run());
//! handle.signal(PageSignal::Scroll);
//! let response = handle.request(ControlMessage::CancelPlacement).await;
//! handle.shutdown();
//! let store = task.await?;
//! ```

use super::messages::{AgentEvent, ControlMessage, ControlResponse};
use crate::annotations::{AnnotationStore, Record};
use crate::dom::{Document, Point};
use crate::overlay::OverlaySurface;
use crate::queue::MutationHandle;
use crate::reconcile::Trigger;
use crate::storage::RecordChange;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Roughly one display refresh
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

const CONTROL_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 64;

/// Something the host page did
pub enum PageSignal<D> {
    Scroll,
    Resize,
    /// Subtree or id/class attribute change somewhere in the page
    Structural,
    Click {
        at: Point,
        on_overlay: bool,
    },
    /// Edit the page in place; implies a structural change
    Edit(Box<dyn FnOnce(&mut D) + Send + 'static>),
}

impl<D> std::fmt::Debug for PageSignal<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scroll => f.write_str("Scroll"),
            Self::Resize => f.write_str("Resize"),
            Self::Structural => f.write_str("Structural"),
            Self::Click { at, on_overlay } => f
                .debug_struct("Click")
                .field("at", at)
                .field("on_overlay", on_overlay)
                .finish(),
            Self::Edit(_) => f.write_str("Edit(..)"),
        }
    }
}

struct ControlRequest {
    message: ControlMessage,
    reply: oneshot::Sender<ControlResponse>,
}

/// Cloneable sender side of a running [`PageAgent`]
pub struct AgentHandle<D> {
    control: mpsc::Sender<ControlRequest>,
    signals: mpsc::UnboundedSender<PageSignal<D>>,
    events: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl<D> Clone for AgentHandle<D> {
    fn clone(&self) -> Self {
        Self {
            control: self.control.clone(),
            signals: self.signals.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<D> AgentHandle<D> {
    /// Send a control message and wait for the agent's answer. For writes
    /// the answer arrives once the change is persisted.
    pub async fn request(&self, message: ControlMessage) -> ControlResponse {
        let (reply, rx) = oneshot::channel();
        if self.control.send(ControlRequest { message, reply }).await.is_err() {
            return ControlResponse::failed("agent stopped");
        }
        rx.await
            .unwrap_or_else(|_| ControlResponse::failed("agent dropped the request"))
    }

    /// Fire-and-forget page signal. False once the agent has stopped.
    pub fn signal(&self, signal: PageSignal<D>) -> bool {
        self.signals.send(signal).is_ok()
    }

    /// Edit the page and schedule a structural re-resolution
    pub fn edit_page<F>(&self, edit: F) -> bool
    where
        F: FnOnce(&mut D) + Send + 'static,
    {
        self.signal(PageSignal::Edit(Box::new(edit)))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.control.is_closed()
    }
}

pub struct PageAgent<D: Document, S: OverlaySurface> {
    store: AnnotationStore<D, S>,
    changes: broadcast::Receiver<RecordChange>,
    control: mpsc::Receiver<ControlRequest>,
    signals: mpsc::UnboundedReceiver<PageSignal<D>>,
    events: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
    frame_interval: Duration,
}

impl<D, S> PageAgent<D, S>
where
    D: Document + Send + 'static,
    S: OverlaySurface + Send + 'static,
{
    /// Wrap `store`. `changes` should be subscribed before any write this
    /// context cares about.
    pub fn new(
        store: AnnotationStore<D, S>,
        changes: broadcast::Receiver<RecordChange>,
    ) -> (Self, AgentHandle<D>) {
        let (control_tx, control) = mpsc::channel(CONTROL_CAPACITY);
        let (signals_tx, signals) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let cancel = CancellationToken::new();

        let handle = AgentHandle {
            control: control_tx,
            signals: signals_tx,
            events: events.clone(),
            cancel: cancel.clone(),
        };
        let agent = Self {
            store,
            changes,
            control,
            signals,
            events,
            cancel,
            frame_interval: DEFAULT_FRAME_INTERVAL,
        };
        (agent, handle)
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Load the record, then serve until cancelled or every handle is
    /// dropped. Gives the store back on exit.
    pub async fn run(mut self) -> AnnotationStore<D, S> {
        if let Err(e) = self.store.load().await {
            warn!(origin = %self.store.origin(), error = %e, "Initial load failed");
        }

        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut changes_open = true;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(origin = %self.store.origin(), "Agent cancelled");
                    break;
                }
                request = self.control.recv() => match request {
                    Some(request) => self.handle_control(request),
                    None => {
                        debug!(origin = %self.store.origin(), "All agent handles dropped");
                        break;
                    }
                },
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
                change = self.changes.recv(), if changes_open => match change {
                    Ok(change) => {
                        if let Some(report) = self.store.apply_change(&change) {
                            trace!(?report, "Applied record change");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Record changes lagged, reloading");
                        if let Err(e) = self.store.load().await {
                            warn!(error = %e, "Reload after lag failed");
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!("Record change feed closed");
                        changes_open = false;
                    }
                },
                _ = frames.tick() => {
                    if let Some(report) = self.store.on_frame() {
                        trace!(?report, "Position pass");
                    }
                }
            }
        }

        self.store.cancel_placement();
        info!(origin = %self.store.origin(), "Agent stopped");
        self.store
    }

    fn handle_control(&mut self, request: ControlRequest) {
        let ControlRequest { message, reply } = request;
        debug!(action = message.action(), "Control message");

        match message {
            ControlMessage::StartPlacement { style } => {
                self.store.start_placement(style);
                let _ = reply.send(ControlResponse::ok());
            }
            ControlMessage::CancelPlacement => {
                self.store.cancel_placement();
                let _ = reply.send(ControlResponse::ok());
            }
            ControlMessage::CreateNoteAtPosition { x, y, note_data } => {
                let (id, handle) = self.store.create_at(Point::new(x, y), &note_data);
                reply_when_persisted(handle, reply, move |_| ControlResponse::created(id));
            }
            ControlMessage::DeleteNote { note_id } => {
                let handle = self.store.delete(&note_id);
                reply_when_persisted(handle, reply, |_| ControlResponse::ok());
            }
            ControlMessage::UpdateNote { note_id, note_data } => {
                let handle = self.store.edit(&note_id, note_data);
                reply_when_persisted(handle, reply, move |record| {
                    if record.note(&note_id).is_some() {
                        ControlResponse::ok()
                    } else {
                        ControlResponse::failed(format!("note not found: {note_id}"))
                    }
                });
            }
        }
    }

    fn handle_signal(&mut self, signal: PageSignal<D>) {
        trace!(?signal, "Page signal");
        match signal {
            PageSignal::Scroll => {
                self.store.schedule(Trigger::Scroll);
            }
            PageSignal::Resize => {
                self.store.schedule(Trigger::Resize);
            }
            PageSignal::Structural => {
                self.store.schedule(Trigger::Structural);
            }
            PageSignal::Edit(edit) => {
                edit(self.store.document_mut());
                self.store.schedule(Trigger::Structural);
            }
            PageSignal::Click { at, on_overlay } => {
                if let Some((note_id, handle)) = self.store.handle_click(at, on_overlay) {
                    let events = self.events.clone();
                    tokio::spawn(async move {
                        match handle.wait().await {
                            Ok(_) => {
                                // No subscribers is fine
                                let _ = events.send(AgentEvent::NoteCreated { note_id });
                            }
                            Err(e) => warn!(%note_id, error = %e, "Placed note not persisted"),
                        }
                    });
                }
            }
        }
    }
}

fn reply_when_persisted<F>(
    handle: MutationHandle,
    reply: oneshot::Sender<ControlResponse>,
    on_success: F,
) where
    F: FnOnce(&Record) -> ControlResponse + Send + 'static,
{
    tokio::spawn(async move {
        let response = match handle.wait().await {
            Ok(record) => on_success(&record),
            Err(e) => ControlResponse::failed(e.to_string()),
        };
        let _ = reply.send(response);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::{Position, SelectorCodec};
    use crate::annotations::NotePatch;
    use crate::dom::MemoryDocument;
    use crate::overlay::{Cursor, RecordingSurface};
    use crate::storage::RecordStore;
    use crate::test_helpers::*;
    use serde_json::json;

    type TestAgent = PageAgent<MemoryDocument, RecordingSurface>;

    fn spawn_agent() -> (
        std::sync::Arc<crate::storage::MemoryRecordStore>,
        AgentHandle<MemoryDocument>,
        tokio::task::JoinHandle<TestStore>,
    ) {
        let (records, store) = test_store(sample_page().doc);
        let (agent, handle): (TestAgent, _) = PageAgent::new(store, records.subscribe());
        let task = tokio::spawn(agent.with_frame_interval(Duration::from_millis(5)).run());
        (records, handle, task)
    }

    #[tokio::test]
    async fn test_create_and_delete_over_control_messages() {
        let (records, handle, task) = spawn_agent();

        let response = handle
            .request(ControlMessage::CreateNoteAtPosition {
                x: 100.0,
                y: 50.0,
                note_data: NotePatch::text("from popup"),
            })
            .await;
        assert!(response.success);
        let id = response.note_id.unwrap();

        let persisted = records.get(ORIGIN).await.unwrap().unwrap();
        assert_eq!(persisted["notes"][0]["id"], id.as_str());
        assert_eq!(persisted["notes"][0]["anchor"]["selector"], "#card");

        let response = handle
            .request(ControlMessage::DeleteNote {
                note_id: id.clone(),
            })
            .await;
        assert_eq!(response, ControlResponse::ok());

        handle.shutdown();
        let store = task.await.unwrap();
        assert!(!store.is_tracked(&id));
    }

    #[tokio::test]
    async fn test_update_missing_note_fails() {
        let (_records, handle, task) = spawn_agent();
        let response = handle
            .request(ControlMessage::UpdateNote {
                note_id: "note-missing".into(),
                note_data: NotePatch::text("x"),
            })
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("note-missing"));
        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_placement_click_emits_note_created() {
        let (records, handle, task) = spawn_agent();
        let mut events = handle.subscribe();

        let response = handle
            .request(ControlMessage::StartPlacement { style: None })
            .await;
        assert!(response.success);
        assert!(handle.signal(PageSignal::Click {
            at: Point::new(100.0, 50.0),
            on_overlay: false,
        }));

        let AgentEvent::NoteCreated { note_id } = events.recv().await.unwrap();
        let persisted = records.get(ORIGIN).await.unwrap().unwrap();
        assert_eq!(persisted["notes"][0]["id"], note_id.as_str());

        handle.shutdown();
        let store = task.await.unwrap();
        assert!(!store.placement().is_armed());
        assert_eq!(store.surface().cursor(), Cursor::Default);
    }

    #[tokio::test]
    async fn test_external_change_is_reconciled() {
        let (records, handle, task) = spawn_agent();
        // Answered only after the initial load
        handle.request(ControlMessage::CancelPlacement).await;
        records
            .set(
                ORIGIN,
                json!({"notes": [{"id": "remote", "anchor": {"selector": "#card"}}]}),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        handle.shutdown();
        let store = task.await.unwrap();
        assert!(store.is_tracked("remote"));
        assert_eq!(
            store.surface().by_id("remote").unwrap().position,
            Some(Position::new(80.0, 40.0))
        );
    }

    #[tokio::test]
    async fn test_page_edit_triggers_re_resolution() {
        let (_records, handle, task) = spawn_agent();
        let response = handle
            .request(ControlMessage::CreateNoteAtPosition {
                x: 100.0,
                y: 50.0,
                note_data: Default::default(),
            })
            .await;
        let id = response.note_id.unwrap();

        handle.edit_page(|doc: &mut MemoryDocument| {
            if let Some(card) = SelectorCodec::decode(doc, "#card") {
                doc.move_by(card, 0.0, 100.0);
            }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;

        handle.shutdown();
        let store = task.await.unwrap();
        assert_eq!(
            store.surface().by_id(&id).unwrap().position,
            Some(Position::new(100.0, 150.0))
        );
    }

    #[tokio::test]
    async fn test_stops_when_handles_dropped() {
        let (_records, handle, task) = spawn_agent();
        drop(handle);
        let store = task.await.unwrap();
        assert!(store.tracked_note_ids().is_empty());
    }
}
