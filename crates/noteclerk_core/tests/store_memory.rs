mod common;

use noteclerk_core::{fixture_notes, InMemoryNoteStore, NoteStore};
use std::sync::Arc;

#[tokio::test]
async fn add_note_assigns_ids_and_round_trips() {
    common::add_note_assigns_ids_and_round_trips(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn pre_assigned_fragment_id_survives() {
    common::pre_assigned_fragment_id_survives(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn missing_note_reads_as_absent() {
    common::missing_note_reads_as_absent(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn find_note_and_combines_terms() {
    common::find_note_and_combines_terms(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn update_note_replaces_children() {
    common::update_note_replaces_children(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn update_and_delete_report_missing_rows() {
    common::update_and_delete_report_missing_rows(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn delete_note_removes_only_the_note_row() {
    common::delete_note_removes_only_the_note_row(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn duplicate_note_guid_is_rejected() {
    common::duplicate_note_guid_is_rejected(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn fragment_reads_follow_the_note() {
    common::fragment_reads_follow_the_note(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn fragments_read_back_in_id_order() {
    common::fragments_read_back_in_id_order(&InMemoryNoteStore::new()).await;
}

#[tokio::test]
async fn fixture_store_exposes_first_note_at_position_zero() {
    let store = InMemoryNoteStore::with_fixtures().unwrap();
    let notes = store.all_notes().await.unwrap();
    assert_eq!(notes.len(), fixture_notes().len());
    assert_eq!(notes[0].note_guid, fixture_notes()[0].note_guid);
    assert_eq!(store.all_note_fragments().await.unwrap().len(), 2);
}

#[tokio::test]
async fn concurrent_creates_get_distinct_ids() {
    let store = Arc::new(InMemoryNoteStore::new());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut note = common::sample_note();
            store.add_note(&mut note).await.unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    assert_eq!(store.all_notes().await.unwrap().len(), 16);
}
