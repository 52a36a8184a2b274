//! In-memory note store.
//!
//! # Responsibility
//! - Provide a deterministic `NoteStore` for service tests without a backend.
//! - Mirror the relational layout (note, note_tag, note_fragment,
//!   note_fragment_tag rows with their own id sequences) so observable
//!   behavior matches `PostgresNoteStore`.
//!
//! # Invariants
//! - Every contract call takes the table lock on its own; `add_note` releases
//!   it between the note row, each fragment and each tag, exactly like the
//!   relational store's separate statements.
//! - `update_note` stages changes on a copy and swaps it in on success, the
//!   equivalent of the relational store's transaction.
//! - Pre-assigned positive fragment ids advance the fragment sequence.
//! - Fragment reads return rows in id order, whatever order they were written.

use super::{
    NoteFilter, NoteFragmentFilter, NoteStore, StoreError, StoreResult, WriteStage,
};
use crate::model::note::{
    new_guid, FragmentType, Note, NoteFragment, NoteType, RecordId, RecordPriority, RecordStatus,
    Timestamp,
};
use async_trait::async_trait;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct TagRow {
    id: RecordId,
    owner_guid: String,
    tag: String,
}

#[derive(Debug, Clone)]
struct Tables {
    // Rows keep empty `fragments`/`tags`; those live in their own tables.
    notes: Vec<Note>,
    note_tags: Vec<TagRow>,
    fragments: Vec<NoteFragment>,
    fragment_tags: Vec<TagRow>,
    next_note_id: RecordId,
    next_note_tag_id: RecordId,
    next_fragment_id: RecordId,
    next_fragment_tag_id: RecordId,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            notes: Vec::new(),
            note_tags: Vec::new(),
            fragments: Vec::new(),
            fragment_tags: Vec::new(),
            next_note_id: 1,
            next_note_tag_id: 1,
            next_fragment_id: 1,
            next_fragment_tag_id: 1,
        }
    }
}

impl Tables {
    fn insert_note_row(&mut self, note: &Note) -> StoreResult<RecordId> {
        if self.notes.iter().any(|row| row.note_guid == note.note_guid) {
            return Err(StoreError::Duplicate(format!(
                "note_guid {} already exists",
                note.note_guid
            )));
        }
        let id = self.next_note_id;
        self.next_note_id += 1;
        self.notes.push(Note {
            id,
            fragments: Vec::new(),
            tags: Vec::new(),
            ..note.clone()
        });
        Ok(id)
    }

    fn insert_fragment_row(&mut self, fragment: &NoteFragment) -> StoreResult<RecordId> {
        if self
            .fragments
            .iter()
            .any(|row| row.note_fragment_guid == fragment.note_fragment_guid)
        {
            return Err(StoreError::Duplicate(format!(
                "fragment_guid {} already exists",
                fragment.note_fragment_guid
            )));
        }

        let id = if fragment.id != 0 {
            if self.fragments.iter().any(|row| row.id == fragment.id) {
                return Err(StoreError::Duplicate(format!(
                    "fragment id {} already exists",
                    fragment.id
                )));
            }
            if fragment.id >= self.next_fragment_id {
                self.next_fragment_id = fragment.id + 1;
            }
            fragment.id
        } else {
            let id = self.next_fragment_id;
            self.next_fragment_id += 1;
            id
        };

        self.fragments.push(NoteFragment {
            id,
            tags: Vec::new(),
            ..fragment.clone()
        });
        Ok(id)
    }

    fn insert_note_tag(&mut self, note_guid: &str, tag: &str) -> RecordId {
        let id = self.next_note_tag_id;
        self.next_note_tag_id += 1;
        self.note_tags.push(TagRow {
            id,
            owner_guid: note_guid.to_string(),
            tag: tag.to_string(),
        });
        id
    }

    fn insert_fragment_tag(&mut self, fragment_guid: &str, tag: &str) -> RecordId {
        let id = self.next_fragment_tag_id;
        self.next_fragment_tag_id += 1;
        self.fragment_tags.push(TagRow {
            id,
            owner_guid: fragment_guid.to_string(),
            tag: tag.to_string(),
        });
        id
    }

    fn assemble_fragment(&self, row: &NoteFragment) -> NoteFragment {
        NoteFragment {
            tags: tags_for(&self.fragment_tags, &row.note_fragment_guid),
            ..row.clone()
        }
    }

    fn assemble_note(&self, row: &Note) -> Note {
        let mut owned: Vec<&NoteFragment> = self
            .fragments
            .iter()
            .filter(|fragment| fragment.note_guid == row.note_guid)
            .collect();
        owned.sort_by_key(|fragment| fragment.id);
        let fragments = owned
            .into_iter()
            .map(|fragment| self.assemble_fragment(fragment))
            .collect();
        Note {
            fragments,
            tags: tags_for(&self.note_tags, &row.note_guid),
            ..row.clone()
        }
    }

    fn replace_children(&mut self, note_guid: &str, note: &Note) -> StoreResult<()> {
        let stale_fragments: Vec<String> = self
            .fragments
            .iter()
            .filter(|fragment| fragment.note_guid == note_guid)
            .map(|fragment| fragment.note_fragment_guid.clone())
            .collect();
        self.fragment_tags
            .retain(|row| !stale_fragments.contains(&row.owner_guid));
        self.fragments
            .retain(|fragment| fragment.note_guid != note_guid);
        self.note_tags.retain(|row| row.owner_guid != note_guid);

        for tag in &note.tags {
            self.insert_note_tag(note_guid, tag);
        }
        for fragment in &note.fragments {
            let mut fragment = fragment.clone();
            fragment.note_guid = note_guid.to_string();
            if fragment.note_fragment_guid.is_empty() {
                fragment.note_fragment_guid = new_guid();
            }
            self.insert_fragment_row(&fragment)?;
            for tag in &fragment.tags {
                self.insert_fragment_tag(&fragment.note_fragment_guid, tag);
            }
        }
        Ok(())
    }

    fn seed(&mut self, note: &mut Note) -> StoreResult<()> {
        note.id = self.insert_note_row(note)?;
        for fragment in &mut note.fragments {
            fragment.note_guid = note.note_guid.clone();
            fragment.id = self.insert_fragment_row(fragment)?;
            for tag in &fragment.tags {
                self.insert_fragment_tag(&fragment.note_fragment_guid, tag);
            }
        }
        for tag in &note.tags {
            self.insert_note_tag(&note.note_guid, tag);
        }
        Ok(())
    }
}

fn tags_for(rows: &[TagRow], owner_guid: &str) -> Vec<String> {
    let mut owned: Vec<&TagRow> = rows.iter().filter(|row| row.owner_guid == owner_guid).collect();
    owned.sort_by_key(|row| row.id);
    owned.into_iter().map(|row| row.tag.clone()).collect()
}

/// Mutex-guarded in-memory backend.
#[derive(Debug, Default)]
pub struct InMemoryNoteStore {
    tables: Mutex<Tables>,
}

impl InMemoryNoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with `fixture_notes()`, in order.
    pub fn with_fixtures() -> StoreResult<Self> {
        let mut tables = Tables::default();
        for mut note in fixture_notes() {
            tables.seed(&mut note)?;
        }
        Ok(Self {
            tables: Mutex::new(tables),
        })
    }
}

#[async_trait]
impl NoteStore for InMemoryNoteStore {
    async fn add_note(&self, note: &mut Note) -> StoreResult<RecordId> {
        if note.note_guid.is_empty() {
            note.note_guid = new_guid();
        }
        let id = self.tables.lock().await.insert_note_row(note)?;
        note.id = id;

        for fragment in &mut note.fragments {
            fragment.note_guid = note.note_guid.clone();
            if let Err(err) = self.add_note_fragment(fragment).await {
                let stage = WriteStage::Fragment {
                    fragment_guid: fragment.note_fragment_guid.clone(),
                };
                return Err(StoreError::partial(&note.note_guid, stage, err));
            }
        }

        for tag in &note.tags {
            self.add_note_tag(&note.note_guid, tag)
                .await
                .map_err(|err| StoreError::partial(&note.note_guid, WriteStage::NoteTag, err))?;
        }

        Ok(id)
    }

    async fn all_notes(&self) -> StoreResult<Vec<Note>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notes
            .iter()
            .map(|row| tables.assemble_note(row))
            .collect())
    }

    async fn get_note_by_id(&self, id: RecordId) -> StoreResult<Option<Note>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notes
            .iter()
            .find(|row| row.id == id)
            .map(|row| tables.assemble_note(row)))
    }

    async fn find_note(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .notes
            .iter()
            .filter(|row| filter.matches(row))
            .map(|row| tables.assemble_note(row))
            .collect())
    }

    async fn update_note(&self, note: &Note) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();

        let row = staged
            .notes
            .iter_mut()
            .find(|row| row.id == note.id)
            .ok_or(StoreError::NotFound(note.id))?;
        row.visit_guid = note.visit_guid.clone();
        row.author_guid = note.author_guid.clone();
        row.patient_guid = note.patient_guid.clone();
        row.note_type = note.note_type;
        row.status = note.status;
        let note_guid = row.note_guid.clone();

        staged.replace_children(&note_guid, note)?;
        *tables = staged;
        Ok(())
    }

    async fn delete_note(&self, id: RecordId) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let before = tables.notes.len();
        tables.notes.retain(|row| row.id != id);
        if tables.notes.len() == before {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn add_note_fragment(
        &self,
        fragment: &mut NoteFragment,
    ) -> StoreResult<(RecordId, String)> {
        if fragment.note_fragment_guid.is_empty() {
            fragment.note_fragment_guid = new_guid();
        }
        let id = self.tables.lock().await.insert_fragment_row(fragment)?;
        fragment.id = id;

        for tag in &fragment.tags {
            self.add_note_fragment_tag(&fragment.note_fragment_guid, tag)
                .await
                .map_err(|err| {
                    let stage = WriteStage::FragmentTag {
                        fragment_guid: fragment.note_fragment_guid.clone(),
                    };
                    StoreError::partial(&fragment.note_guid, stage, err)
                })?;
        }

        Ok((id, fragment.note_fragment_guid.clone()))
    }

    async fn add_note_tag(&self, note_guid: &str, tag: &str) -> StoreResult<RecordId> {
        Ok(self.tables.lock().await.insert_note_tag(note_guid, tag))
    }

    async fn add_note_fragment_tag(
        &self,
        fragment_guid: &str,
        tag: &str,
    ) -> StoreResult<RecordId> {
        Ok(self
            .tables
            .lock()
            .await
            .insert_fragment_tag(fragment_guid, tag))
    }

    async fn all_note_fragments(&self) -> StoreResult<Vec<NoteFragment>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<&NoteFragment> = tables.fragments.iter().collect();
        rows.sort_by_key(|row| row.id);
        Ok(rows
            .into_iter()
            .map(|row| tables.assemble_fragment(row))
            .collect())
    }

    async fn get_note_fragment_by_id(&self, id: RecordId) -> StoreResult<Option<NoteFragment>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .fragments
            .iter()
            .find(|row| row.id == id)
            .map(|row| tables.assemble_fragment(row)))
    }

    async fn find_note_fragments(
        &self,
        filter: &NoteFragmentFilter,
    ) -> StoreResult<Vec<NoteFragment>> {
        let tables = self.tables.lock().await;
        let mut found: Vec<&NoteFragment> = tables
            .fragments
            .iter()
            .filter(|row| filter.matches(row))
            .collect();
        found.sort_by_key(|row| row.id);
        Ok(found
            .into_iter()
            .map(|row| tables.assemble_fragment(row))
            .collect())
    }
}

/// Fixed dataset used to seed `InMemoryNoteStore::with_fixtures`.
///
/// The first note carries two tagged fragments; all three notes share no
/// correlation guid, so a search by any of them returns exactly one note.
pub fn fixture_notes() -> Vec<Note> {
    let created = Timestamp {
        seconds: 1_530_000_000,
        nanos: 0,
    };

    let first = Note {
        date_created: created,
        note_guid: "5d8f0c7e-2f43-4a39-9a0e-0b1d6c3f9a01".to_string(),
        visit_guid: "0c4b3e52-8d9a-4f1e-b6a2-7e1f2d3c4b01".to_string(),
        author_guid: "9a7e6d5c-4b3a-4928-8170-6f5e4d3c2b01".to_string(),
        patient_guid: "1f2e3d4c-5b6a-4798-8a7b-6c5d4e3f2a01".to_string(),
        note_type: NoteType::ContinuedCareDocumentation,
        status: RecordStatus::Incomplete,
        fragments: vec![
            NoteFragment {
                date_created: created,
                note_fragment_guid: "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c01".to_string(),
                issue_guid: "b2c3d4e5-f6a7-4b8c-9d0e-1f2a3b4c5d01".to_string(),
                icd_10_code: "J45.909".to_string(),
                icd_10_long: "Unspecified asthma, uncomplicated".to_string(),
                description: "Asthma follow-up".to_string(),
                status: RecordStatus::Complete,
                priority: RecordPriority::Medium,
                topic: FragmentType::Subjective,
                content: "Reports fewer night-time symptoms since last visit.".to_string(),
                tags: vec!["frag1Tag1".to_string(), "frag1Tag2".to_string()],
                ..NoteFragment::default()
            },
            NoteFragment {
                date_created: created,
                note_fragment_guid: "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c02".to_string(),
                issue_guid: "b2c3d4e5-f6a7-4b8c-9d0e-1f2a3b4c5d01".to_string(),
                icd_10_code: "J45.909".to_string(),
                icd_10_long: "Unspecified asthma, uncomplicated".to_string(),
                description: "Asthma plan".to_string(),
                status: RecordStatus::Incomplete,
                priority: RecordPriority::Medium,
                topic: FragmentType::Plan,
                content: "Continue inhaled corticosteroid, review in 3 months.".to_string(),
                tags: vec!["frag2Tag1".to_string(), "frag2Tag2".to_string()],
                ..NoteFragment::default()
            },
        ],
        tags: vec!["note1Tag1".to_string(), "note1Tag2".to_string()],
        ..Note::default()
    };

    let second = Note {
        date_created: created,
        note_guid: "5d8f0c7e-2f43-4a39-9a0e-0b1d6c3f9a02".to_string(),
        visit_guid: "0c4b3e52-8d9a-4f1e-b6a2-7e1f2d3c4b02".to_string(),
        author_guid: "9a7e6d5c-4b3a-4928-8170-6f5e4d3c2b02".to_string(),
        patient_guid: "1f2e3d4c-5b6a-4798-8a7b-6c5d4e3f2a02".to_string(),
        note_type: NoteType::InitialEvaluation,
        status: RecordStatus::Complete,
        tags: vec!["intake".to_string()],
        ..Note::default()
    };

    let third = Note {
        date_created: created,
        note_guid: "5d8f0c7e-2f43-4a39-9a0e-0b1d6c3f9a03".to_string(),
        visit_guid: "0c4b3e52-8d9a-4f1e-b6a2-7e1f2d3c4b03".to_string(),
        author_guid: "9a7e6d5c-4b3a-4928-8170-6f5e4d3c2b03".to_string(),
        patient_guid: "1f2e3d4c-5b6a-4798-8a7b-6c5d4e3f2a03".to_string(),
        note_type: NoteType::Discharge,
        status: RecordStatus::Amended,
        ..Note::default()
    };

    vec![first, second, third]
}

#[cfg(test)]
mod tests {
    use super::{fixture_notes, InMemoryNoteStore};
    use crate::model::note::{Note, NoteFragment};
    use crate::store::{NoteStore, StoreError, WriteStage};

    #[tokio::test]
    async fn fixtures_seed_in_order_with_assigned_ids() {
        let store = InMemoryNoteStore::with_fixtures().unwrap();
        let notes = store.all_notes().await.unwrap();
        let fixtures = fixture_notes();

        assert_eq!(notes.len(), fixtures.len());
        assert_eq!(notes[0].note_guid, fixtures[0].note_guid);
        assert_eq!(notes[0].id, 1);
        assert_eq!(notes[0].fragments.len(), 2);
        assert_eq!(notes[0].tags, vec!["note1Tag1", "note1Tag2"]);
        assert!(notes[0]
            .fragments
            .iter()
            .all(|fragment| fragment.note_guid == notes[0].note_guid && fragment.id > 0));
    }

    #[tokio::test]
    async fn pre_assigned_fragment_id_advances_sequence() {
        let store = InMemoryNoteStore::new();
        let mut note = Note::new();
        let mut explicit = NoteFragment::new();
        explicit.id = 44;
        note.fragments = vec![explicit, NoteFragment::new()];

        store.add_note(&mut note).await.unwrap();
        assert_eq!(note.fragments[0].id, 44);
        assert_eq!(note.fragments[1].id, 45);
    }

    #[tokio::test]
    async fn failing_fragment_leaves_note_row_behind() {
        let store = InMemoryNoteStore::new();
        let mut note = Note::new();
        note.tags = vec!["never-written".to_string()];
        let mut first = NoteFragment::new();
        first.id = 9;
        let mut clash = NoteFragment::new();
        clash.id = 9;
        note.fragments = vec![first, clash];

        let err = store.add_note(&mut note).await.unwrap_err();
        match err {
            StoreError::PartialWrite { stage, source, .. } => {
                assert!(matches!(stage, WriteStage::Fragment { .. }));
                assert!(matches!(*source, StoreError::Duplicate(_)));
            }
            other => panic!("unexpected error: {other}"),
        }

        let stored = store.get_note_by_id(note.id).await.unwrap().unwrap();
        assert_eq!(stored.fragments.len(), 1);
        assert!(stored.tags.is_empty());
    }

    #[tokio::test]
    async fn note_fragments_read_back_in_id_order() {
        let store = InMemoryNoteStore::with_fixtures().unwrap();
        let mut edited = store.get_note_by_id(1).await.unwrap().unwrap();
        let kept = edited.fragments[0].clone();
        edited.fragments = vec![NoteFragment::new(), kept.clone()];
        store.update_note(&edited).await.unwrap();

        let stored = store.get_note_by_id(1).await.unwrap().unwrap();
        let ids: Vec<_> = stored.fragments.iter().map(|fragment| fragment.id).collect();
        assert_eq!(ids, vec![kept.id, 3]);

        let all: Vec<_> = store
            .all_note_fragments()
            .await
            .unwrap()
            .iter()
            .map(|fragment| fragment.id)
            .collect();
        assert_eq!(all, vec![kept.id, 3]);
    }

    #[tokio::test]
    async fn failed_update_leaves_tables_untouched() {
        let store = InMemoryNoteStore::with_fixtures().unwrap();
        let before = store.get_note_by_id(1).await.unwrap().unwrap();

        let mut edited = before.clone();
        edited.tags.push("extra".to_string());
        let mut clash = NoteFragment::new();
        clash.id = 7;
        let mut clash_again = NoteFragment::new();
        clash_again.id = 7;
        edited.fragments = vec![clash, clash_again];

        let err = store.update_note(&edited).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.get_note_by_id(1).await.unwrap().unwrap(), before);
    }
}
