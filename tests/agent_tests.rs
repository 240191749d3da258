//! On-page agent driven the way a control surface drives it: JSON control
//! messages in, JSON responses and events out.
//!
//! Run with: cargo test --test agent_tests

use page_annotator::agent::{AgentEvent, AgentHandle, ControlMessage, PageAgent, PageSignal};
use page_annotator::annotations::{AnnotationStore, Record};
use page_annotator::dom::{Document, ElementSpec, MemoryDocument, Point};
use page_annotator::overlay::{Cursor, RecordingSurface};
use page_annotator::queue::MutationQueue;
use page_annotator::storage::{MemoryRecordStore, RecordStore};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const ORIGIN: &str = "docs.example.net";

type Store = AnnotationStore<MemoryDocument, RecordingSurface>;

fn start() -> (
    Arc<MemoryRecordStore>,
    AgentHandle<MemoryDocument>,
    JoinHandle<Store>,
) {
    start_with(MemoryRecordStore::new())
}

fn start_with(
    records: MemoryRecordStore,
) -> (
    Arc<MemoryRecordStore>,
    AgentHandle<MemoryDocument>,
    JoinHandle<Store>,
) {
    let mut doc = MemoryDocument::default();
    let body = doc.body();
    doc.append(
        body,
        ElementSpec::new("section").id("intro").rect(0.0, 100.0, 1280.0, 400.0),
    );

    let records = Arc::new(records);
    let store = AnnotationStore::new(
        doc,
        RecordingSurface::new(),
        MutationQueue::new(records.clone(), ORIGIN),
    );
    let (agent, handle) = PageAgent::new(store, records.subscribe());
    let task = tokio::spawn(agent.with_frame_interval(Duration::from_millis(5)).run());
    (records, handle, task)
}

async fn send(handle: &AgentHandle<MemoryDocument>, wire: Value) -> Value {
    let message: ControlMessage = serde_json::from_value(wire).unwrap();
    serde_json::to_value(handle.request(message).await).unwrap()
}

async fn stored(records: &MemoryRecordStore) -> Record {
    Record::from_stored(records.get(ORIGIN).await.unwrap()).record
}

#[tokio::test]
async fn test_popup_round_trip() {
    let (records, handle, task) = start();

    let response = send(
        &handle,
        json!({
            "action": "createNoteAtPosition",
            "x": 40,
            "y": 130,
            "noteData": {"text": "check this", "style": {"bg": "#c3f0ca", "type": "mint"}}
        }),
    )
    .await;
    assert_eq!(response["success"], true);
    let id = response["noteId"].as_str().unwrap().to_string();

    let record = stored(&records).await;
    let note = record.note(&id).unwrap();
    assert_eq!(note.anchor.selector, "#intro");
    assert_eq!(note.style.background, "#c3f0ca");
    assert_eq!(note.style.preset.as_deref(), Some("mint"));

    let response = send(
        &handle,
        json!({
            "action": "updateNote",
            "noteId": id,
            "noteData": {"text": "checked", "minimized": true}
        }),
    )
    .await;
    assert_eq!(response, json!({"success": true}));
    let record = stored(&records).await;
    assert_eq!(record.note(&id).unwrap().text, "checked");
    assert!(record.note(&id).unwrap().minimized);

    let response = send(&handle, json!({"action": "deleteNote", "noteId": id})).await;
    assert_eq!(response["success"], true);
    assert!(stored(&records).await.notes.is_empty());

    handle.shutdown();
    let store = task.await.unwrap();
    assert!(store.tracked_note_ids().is_empty());
}

#[tokio::test]
async fn test_placement_then_cancel() {
    let (records, handle, task) = start();
    let mut events = handle.subscribe();

    send(&handle, json!({"action": "startPlacement", "style": {"bg": "#ffffff"}})).await;
    // A click on note chrome does not place
    handle.signal(PageSignal::Click {
        at: Point::new(10.0, 10.0),
        on_overlay: true,
    });
    handle.signal(PageSignal::Click {
        at: Point::new(60.0, 160.0),
        on_overlay: false,
    });

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    let AgentEvent::NoteCreated { note_id } = event;
    let record = stored(&records).await;
    assert_eq!(record.notes.len(), 1);
    assert_eq!(record.notes[0].id, note_id);
    assert_eq!(record.notes[0].style.background, "#ffffff");

    // Disarmed after the commit: further clicks do nothing
    send(&handle, json!({"action": "startPlacement"})).await;
    let response = send(&handle, json!({"action": "cancelPlacement"})).await;
    assert_eq!(response["success"], true);
    handle.signal(PageSignal::Click {
        at: Point::new(60.0, 160.0),
        on_overlay: false,
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    handle.shutdown();
    let store = task.await.unwrap();
    assert_eq!(store.surface().cursor(), Cursor::Default);
    assert_eq!(stored(&records).await.notes.len(), 1);
}

#[tokio::test]
async fn test_note_hidden_when_anchor_removed() {
    let (_records, handle, task) = start();
    let response = send(
        &handle,
        json!({"action": "createNoteAtPosition", "x": 40, "y": 130, "noteData": {}}),
    )
    .await;
    let id = response["noteId"].as_str().unwrap().to_string();

    handle.edit_page(|doc: &mut MemoryDocument| {
        let body = doc.body();
        if let Some(intro) = doc.children(body).first().copied() {
            doc.remove(intro);
        }
    });
    tokio::time::sleep(Duration::from_millis(40)).await;

    handle.shutdown();
    let store = task.await.unwrap();
    let state = store.surface().by_id(&id).unwrap();
    assert!(!state.displayed);
    assert!(state.position.is_none());
    // Still tracked; comes back if the element does
    assert!(store.is_tracked(&id));
}

#[tokio::test]
async fn test_storage_failure_is_reported_to_caller() {
    let (records, handle, task) = start();
    let response = send(
        &handle,
        json!({"action": "createNoteAtPosition", "x": 40, "y": 130, "noteData": {}}),
    )
    .await;
    let id = response["noteId"].as_str().unwrap().to_string();

    records.set_available(false);
    let response = send(
        &handle,
        json!({"action": "updateNote", "noteId": id, "noteData": {"text": "lost"}}),
    )
    .await;
    assert_eq!(response["success"], false);
    assert!(response["error"]
        .as_str()
        .unwrap()
        .contains("storage unavailable"));

    // The queue keeps going once storage is back
    records.set_available(true);
    let response = send(
        &handle,
        json!({"action": "updateNote", "noteId": id, "noteData": {"text": "kept"}}),
    )
    .await;
    assert_eq!(response, json!({"success": true}));
    assert_eq!(stored(&records).await.note(&id).unwrap().text, "kept");

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_quota_failure_on_create() {
    let (records, handle, task) = start_with(MemoryRecordStore::new().with_quota(64));
    let response = send(
        &handle,
        json!({"action": "createNoteAtPosition", "x": 40, "y": 130, "noteData": {"text": "hi"}}),
    )
    .await;
    assert_eq!(response["success"], false);
    assert!(response.get("noteId").is_none());
    assert!(response["error"].as_str().unwrap().contains("quota exceeded"));
    assert!(records.get(ORIGIN).await.unwrap().is_none());

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test]
async fn test_requests_after_shutdown_fail_cleanly() {
    let (_records, handle, task) = start();
    handle.shutdown();
    task.await.unwrap();

    let response = send(&handle, json!({"action": "cancelPlacement"})).await;
    assert_eq!(response["success"], false);
    assert!(handle.is_stopped());
}
