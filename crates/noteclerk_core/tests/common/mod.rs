//! Store contract checks shared by every backend.
//!
//! Each check creates its own notes with fresh guids, so it can run against a
//! database that already holds rows from earlier runs.

use noteclerk_core::{
    FragmentType, Note, NoteFilter, NoteFragment, NoteFragmentFilter, NoteStore, NoteType,
    RecordPriority, RecordStatus, StoreError,
};

pub fn sample_note() -> Note {
    let mut note = Note::new();
    note.visit_guid = noteclerk_core::new_guid();
    note.author_guid = noteclerk_core::new_guid();
    note.patient_guid = noteclerk_core::new_guid();
    note.note_type = NoteType::Consultation;
    note.status = RecordStatus::Incomplete;
    note.tags = vec!["cardiology".into(), "follow-up".into(), "follow-up".into()];

    let mut assessment = NoteFragment::new();
    assessment.icd_10_code = "I10".into();
    assessment.icd_10_long = "Essential (primary) hypertension".into();
    assessment.description = "Blood pressure review".into();
    assessment.topic = FragmentType::Assessment;
    assessment.priority = RecordPriority::High;
    assessment.content = "BP 152/94 on two readings.".into();
    assessment.tags = vec!["bp".into()];

    let mut plan = NoteFragment::new();
    plan.icd_10_code = "I10".into();
    plan.topic = FragmentType::Plan;
    plan.content = "Start lisinopril 10mg.".into();
    plan.tags = vec!["medication".into(), "review-2w".into()];

    note.fragments = vec![assessment, plan];
    note
}

fn by_id(mut note: Note) -> Note {
    note.fragments.sort_by_key(|fragment| fragment.id);
    note
}

pub async fn add_note_assigns_ids_and_round_trips(store: &dyn NoteStore) {
    let mut note = sample_note();
    let id = store.add_note(&mut note).await.unwrap();

    assert!(id > 0);
    assert_eq!(note.id, id);
    for fragment in &note.fragments {
        assert!(fragment.id > 0);
        assert_eq!(fragment.note_guid, note.note_guid);
    }

    let stored = store.get_note_by_id(id).await.unwrap().expect("note stored");
    assert_eq!(by_id(stored), by_id(note));
}

pub async fn pre_assigned_fragment_id_survives(store: &dyn NoteStore) {
    let highest = store
        .all_note_fragments()
        .await
        .unwrap()
        .iter()
        .map(|fragment| fragment.id)
        .max()
        .unwrap_or(0);
    let explicit_id = highest + 1_000;

    let mut note = sample_note();
    note.fragments[0].id = explicit_id;
    store.add_note(&mut note).await.unwrap();
    assert_eq!(note.fragments[0].id, explicit_id);
    assert!(note.fragments[1].id > 0);

    let mut later = sample_note();
    store.add_note(&mut later).await.unwrap();
    assert!(later
        .fragments
        .iter()
        .all(|fragment| fragment.id > explicit_id));
}

pub async fn missing_note_reads_as_absent(store: &dyn NoteStore) {
    assert!(store.get_note_by_id(-1).await.unwrap().is_none());
    let found = store
        .find_note(&NoteFilter::by_guid(noteclerk_core::new_guid()))
        .await
        .unwrap();
    assert!(found.is_empty());
}

pub async fn find_note_and_combines_terms(store: &dyn NoteStore) {
    let mut first = sample_note();
    store.add_note(&mut first).await.unwrap();
    let mut second = sample_note();
    second.visit_guid = first.visit_guid.clone();
    store.add_note(&mut second).await.unwrap();

    let by_visit = store
        .find_note(&NoteFilter {
            visit_guid: Some(first.visit_guid.clone()),
            ..NoteFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_visit.len(), 2);

    let by_visit_and_patient = store
        .find_note(&NoteFilter {
            visit_guid: Some(first.visit_guid.clone()),
            patient_guid: Some(second.patient_guid.clone()),
            ..NoteFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_visit_and_patient.len(), 1);
    assert_eq!(by_visit_and_patient[0].note_guid, second.note_guid);
}

pub async fn update_note_replaces_children(store: &dyn NoteStore) {
    let mut note = sample_note();
    let id = store.add_note(&mut note).await.unwrap();
    let original_guid = note.note_guid.clone();

    let mut edited = note.clone();
    edited.status = RecordStatus::Amended;
    edited.note_guid = noteclerk_core::new_guid();
    edited.tags = vec!["amended".into()];
    edited.fragments.truncate(1);
    edited.fragments[0].content = "BP 138/88 after correction.".into();
    edited.fragments[0].id = 0;
    store.update_note(&edited).await.unwrap();

    let stored = store.get_note_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.note_guid, original_guid);
    assert_eq!(stored.date_created, note.date_created);
    assert_eq!(stored.status, RecordStatus::Amended);
    assert_eq!(stored.tags, vec!["amended"]);
    assert_eq!(stored.fragments.len(), 1);
    assert_eq!(stored.fragments[0].content, "BP 138/88 after correction.");
    assert_eq!(stored.fragments[0].tags, vec!["bp"]);
    assert_eq!(stored.fragments[0].note_guid, original_guid);
}

pub async fn update_and_delete_report_missing_rows(store: &dyn NoteStore) {
    let mut ghost = sample_note();
    ghost.id = -1;
    assert!(matches!(
        store.update_note(&ghost).await,
        Err(StoreError::NotFound(-1))
    ));
    assert!(matches!(
        store.delete_note(-1).await,
        Err(StoreError::NotFound(-1))
    ));
}

pub async fn delete_note_removes_only_the_note_row(store: &dyn NoteStore) {
    let mut note = sample_note();
    let id = store.add_note(&mut note).await.unwrap();

    store.delete_note(id).await.unwrap();
    assert!(store.get_note_by_id(id).await.unwrap().is_none());
    assert!(matches!(
        store.delete_note(id).await,
        Err(StoreError::NotFound(_))
    ));

    let orphans = store
        .find_note_fragments(&NoteFragmentFilter {
            note_guid: Some(note.note_guid.clone()),
            ..NoteFragmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(orphans.len(), 2);
}

pub async fn duplicate_note_guid_is_rejected(store: &dyn NoteStore) {
    let mut note = sample_note();
    store.add_note(&mut note).await.unwrap();

    let mut clone = sample_note();
    clone.note_guid = note.note_guid.clone();
    let err = store.add_note(&mut clone).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)), "got {err}");
}

pub async fn fragment_reads_follow_the_note(store: &dyn NoteStore) {
    let mut note = sample_note();
    store.add_note(&mut note).await.unwrap();
    let plan = note.fragments[1].clone();

    let fetched = store
        .get_note_fragment_by_id(plan.id)
        .await
        .unwrap()
        .expect("fragment stored");
    assert_eq!(fetched, plan);

    let by_parent = store
        .find_note_fragments(&NoteFragmentFilter {
            note_guid: Some(note.note_guid.clone()),
            icd_10_code: Some("I10".into()),
            ..NoteFragmentFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_parent.len(), 2);

    assert!(matches!(
        store.delete_note_fragment(plan.id).await,
        Err(StoreError::NotImplemented(_))
    ));
}

pub async fn fragments_read_back_in_id_order(store: &dyn NoteStore) {
    let mut note = sample_note();
    let id = store.add_note(&mut note).await.unwrap();
    let kept = note.fragments[0].clone();

    let mut edited = note.clone();
    edited.fragments = vec![NoteFragment::new(), kept.clone()];
    store.update_note(&edited).await.unwrap();

    let stored = store.get_note_by_id(id).await.unwrap().unwrap();
    let ids: Vec<_> = stored.fragments.iter().map(|fragment| fragment.id).collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], kept.id);
    assert!(ids[1] > kept.id);

    let listed: Vec<_> = store
        .find_note_fragments(&NoteFragmentFilter {
            note_guid: Some(note.note_guid.clone()),
            ..NoteFragmentFilter::default()
        })
        .await
        .unwrap()
        .iter()
        .map(|fragment| fragment.id)
        .collect();
    assert_eq!(listed, ids);
}
