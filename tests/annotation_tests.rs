//! Cross-module annotation scenarios over in-memory pages and stores
//!
//! Run with: cargo test --test annotation_tests

use page_annotator::anchor::{Offset, Position};
use page_annotator::annotations::{AnnotationStore, NotePatch, Record};
use page_annotator::dom::{Document, ElementSpec, MemoryDocument, NodeId, Point};
use page_annotator::overlay::RecordingSurface;
use page_annotator::queue::MutationQueue;
use page_annotator::reconcile::Trigger;
use page_annotator::storage::{JsonFileStore, MemoryRecordStore, RecordStore};
use serde_json::json;
use std::sync::Arc;

const ORIGIN: &str = "news.example.org";

type Store = AnnotationStore<MemoryDocument, RecordingSurface>;

/// `<body><main#content><article.story/></main></body>`
fn page() -> (MemoryDocument, NodeId) {
    let mut doc = MemoryDocument::default();
    let body = doc.body();
    let main = doc.append(
        body,
        ElementSpec::new("main").id("content").rect(80.0, 40.0, 800.0, 600.0),
    );
    doc.append(
        main,
        ElementSpec::new("article").class("story").rect(100.0, 300.0, 600.0, 200.0),
    );
    (doc, main)
}

fn context(records: Arc<MemoryRecordStore>) -> Store {
    let (doc, _) = page();
    AnnotationStore::new(
        doc,
        RecordingSurface::new(),
        MutationQueue::new(records, ORIGIN),
    )
}

#[tokio::test]
async fn test_note_follows_reflowed_anchor() {
    let records = Arc::new(MemoryRecordStore::new());
    let (doc, main) = page();
    let mut store = AnnotationStore::new(
        doc,
        RecordingSurface::new(),
        MutationQueue::new(records.clone(), ORIGIN),
    );

    let (id, handle) = store.create_at(Point::new(100.0, 50.0), &NotePatch::text("remember"));
    let record = handle.wait().await.unwrap();
    assert_eq!(record.note(&id).unwrap().anchor.offset, Offset::new(20.0, 10.0));

    store.document_mut().move_by(main, 0.0, 100.0);
    store.schedule(Trigger::Resize);
    // Extra triggers before the frame are coalesced
    assert!(!store.schedule(Trigger::Scroll));
    let report = store.on_frame().unwrap();
    assert_eq!(report.placed, 1);
    assert_eq!(
        store.surface().by_id(&id).unwrap().position,
        Some(Position::new(100.0, 150.0))
    );
    assert!(store.on_frame().is_none());
}

#[tokio::test]
async fn test_two_writers_sharing_a_queue_do_not_lose_updates() {
    let records = Arc::new(MemoryRecordStore::new());
    let (doc, _) = page();
    let queue = MutationQueue::new(records.clone(), ORIGIN);
    let mut page_context = AnnotationStore::new(doc, RecordingSurface::new(), queue.clone());

    let (id, handle) = page_context.create_at(Point::new(300.0, 350.0), &NotePatch::default());
    handle.wait().await.unwrap();

    // Drag release on the page and a visibility toggle from the control surface
    let drag = page_context.move_note(&id, Offset::new(5.0, 5.0));
    let toggle = queue.enqueue({
        let id = id.clone();
        move |record| {
            if let Some(note) = record.note_mut(&id) {
                note.apply(&NotePatch::visible(false));
            }
        }
    });
    drag.wait().await.unwrap();
    let last = toggle.wait().await.unwrap();

    let note = last.note(&id).unwrap();
    assert_eq!(note.anchor.offset, Offset::new(5.0, 5.0));
    assert!(!note.visible);

    let persisted = records.get(ORIGIN).await.unwrap().unwrap();
    assert_eq!(persisted["notes"][0]["visible"], false);
    assert_eq!(persisted["notes"][0]["anchor"]["offset"]["x"], 5.0);
}

#[tokio::test]
async fn test_change_broadcast_reaches_other_context() {
    let records = Arc::new(MemoryRecordStore::new());
    let mut changes = records.subscribe();
    let mut first = context(records.clone());
    let mut second = context(records.clone());

    let (id, handle) = first.create_at(Point::new(150.0, 350.0), &NotePatch::text("shared"));
    handle.wait().await.unwrap();

    let change = changes.recv().await.unwrap();
    assert_eq!(change.origin, ORIGIN);
    assert!(change.old_value.is_none());

    let report = second.apply_change(&change).unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(second.note(&id).unwrap().anchor.selector, "article.story");
    assert_eq!(
        second.surface().by_id(&id).unwrap().position,
        first.surface().by_id(&id).unwrap().position
    );

    // The writer's own notification is a no-op for it
    assert!(first.apply_change(&change).unwrap().is_noop());

    records.remove(ORIGIN).await.unwrap();
    let removal = changes.recv().await.unwrap();
    assert!(removal.new_value.is_none());
    assert_eq!(second.apply_change(&removal).unwrap().removed, 1);
    assert!(second.surface().is_empty());
}

#[tokio::test]
async fn test_malformed_entities_are_skipped_and_kept() {
    let records = Arc::new(MemoryRecordStore::new());
    records
        .set(
            ORIGIN,
            json!({
                "notes": [
                    {"id": "ok", "text": "fine", "anchor": {"selector": "#content"}},
                    {"text": "no id"},
                    42
                ],
                "highlights": [{"id": "hl-bad", "type": "area"}],
                "version": 3
            }),
        )
        .await
        .unwrap();

    let mut store = context(records.clone());
    let report = store.load().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(store.tracked_note_ids(), vec!["ok"]);

    store.edit("ok", NotePatch::text("edited")).wait().await.unwrap();
    let persisted = records.get(ORIGIN).await.unwrap().unwrap();
    let notes = persisted["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 3);
    assert_eq!(notes[0]["text"], "edited");
    assert_eq!(notes[2], 42);
    assert_eq!(persisted["highlights"][0]["id"], "hl-bad");
    assert_eq!(persisted["version"], 3);
}

#[tokio::test]
async fn test_legacy_record_becomes_single_note() {
    let records = Arc::new(MemoryRecordStore::new());
    records
        .set(ORIGIN, json!({"text": "abc", "visible": true}))
        .await
        .unwrap();

    let mut store = context(records.clone());
    store.load().await.unwrap();

    let persisted = records.get(ORIGIN).await.unwrap().unwrap();
    let notes = persisted["notes"].as_array().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["text"], "abc");
    assert!(notes[0]["id"].as_str().unwrap().starts_with("note-"));
    assert!(persisted.get("text").is_none());

    let ids = store.tracked_note_ids();
    assert_eq!(ids.len(), 1);
    assert_eq!(ids[0], notes[0]["id"].as_str().unwrap());
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.json");

    let id = {
        let records = Arc::new(JsonFileStore::new(&path));
        let (doc, _) = page();
        let mut store = AnnotationStore::new(
            doc,
            RecordingSurface::new(),
            MutationQueue::new(records, ORIGIN),
        );
        let (id, handle) =
            store.create_at(Point::new(150.0, 350.0), &NotePatch::text("persist me"));
        handle.wait().await.unwrap();
        id
    };

    let reopened = JsonFileStore::new(&path);
    assert_eq!(reopened.origins().await.unwrap(), vec![ORIGIN.to_string()]);
    let record = Record::from_stored(reopened.get(ORIGIN).await.unwrap()).record;
    assert_eq!(record.note(&id).unwrap().text, "persist me");
}
