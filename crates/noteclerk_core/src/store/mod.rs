//! Record store contract shared by every persistence backend.
//!
//! # Responsibility
//! - Define the capability set the note service relies on.
//! - Define the error taxonomy stores report, independent of technology.
//!
//! # Invariants
//! - A store assigns a note id exactly once, when the note row is inserted.
//! - True absence is reported as `Ok(None)`, `Ok(vec![])` or
//!   `StoreError::NotFound`, never as a backend failure.
//! - Aggregate writes are NOT atomic: when a fragment or tag insert fails
//!   after the note row was written, rows already inserted stay in place and
//!   the call returns `StoreError::PartialWrite` wrapping the first failure.
//!   Callers must re-read to learn what was persisted.
//! - Both backends return the same variants for the same situation.

use crate::model::note::{Note, NoteFragment, RecordId, UnknownCode};
use async_trait::async_trait;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory;
pub mod postgres;

pub use memory::{fixture_notes, InMemoryNoteStore};
pub use postgres::PostgresNoteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Which part of an aggregate write failed after earlier rows were stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteStage {
    Fragment { fragment_guid: String },
    NoteTag,
    FragmentTag { fragment_guid: String },
}

impl Display for WriteStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fragment { fragment_guid } => write!(f, "fragment {fragment_guid}"),
            Self::NoteTag => write!(f, "note tag"),
            Self::FragmentTag { fragment_guid } => write!(f, "tag of fragment {fragment_guid}"),
        }
    }
}

/// Store-level error.
#[derive(Debug)]
pub enum StoreError {
    /// Backend transport or statement failure.
    Db(sqlx::Error),
    /// No note row has this id.
    NotFound(RecordId),
    /// A unique key (guid or pre-assigned id) is already taken.
    Duplicate(String),
    /// Stored data cannot be mapped back into the model.
    InvalidData(String),
    /// The backend does not offer this operation.
    NotImplemented(&'static str),
    /// An aggregate write failed part way; earlier rows were kept.
    PartialWrite {
        note_guid: String,
        stage: WriteStage,
        source: Box<StoreError>,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "database error: {err}"),
            Self::NotFound(id) => write!(f, "note not found: {id}"),
            Self::Duplicate(details) => write!(f, "duplicate record: {details}"),
            Self::InvalidData(details) => write!(f, "invalid persisted note data: {details}"),
            Self::NotImplemented(operation) => write!(f, "operation not implemented: {operation}"),
            Self::PartialWrite {
                note_guid,
                stage,
                source,
            } => write!(
                f,
                "note {note_guid} partially written; failed at {stage}: {source}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::PartialWrite { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &value {
            if db_err.is_unique_violation() {
                return Self::Duplicate(db_err.message().to_string());
            }
        }
        Self::Db(value)
    }
}

impl From<UnknownCode> for StoreError {
    fn from(value: UnknownCode) -> Self {
        Self::InvalidData(value.to_string())
    }
}

impl StoreError {
    /// Short stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "store_db_failed",
            Self::NotFound(_) => "store_not_found",
            Self::Duplicate(_) => "store_duplicate",
            Self::InvalidData(_) => "store_invalid_data",
            Self::NotImplemented(_) => "store_not_implemented",
            Self::PartialWrite { .. } => "store_partial_write",
        }
    }

    pub(crate) fn partial(note_guid: &str, stage: WriteStage, source: StoreError) -> Self {
        Self::PartialWrite {
            note_guid: note_guid.to_string(),
            stage,
            source: Box::new(source),
        }
    }
}

/// AND-combined note lookup; `None` and empty strings are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteFilter {
    pub id: Option<RecordId>,
    pub note_guid: Option<String>,
    pub visit_guid: Option<String>,
    pub author_guid: Option<String>,
    pub patient_guid: Option<String>,
}

impl NoteFilter {
    pub fn by_guid(guid: impl Into<String>) -> Self {
        Self {
            note_guid: Some(guid.into()),
            ..Self::default()
        }
    }

    /// Returns the guid constraints actually supplied, as `(column, value)`.
    pub(crate) fn guid_terms(&self) -> Vec<(&'static str, &str)> {
        [
            ("note_guid", &self.note_guid),
            ("visit_guid", &self.visit_guid),
            ("author_guid", &self.author_guid),
            ("patient_guid", &self.patient_guid),
        ]
        .into_iter()
        .filter_map(|(column, value)| supplied(value).map(|value| (column, value)))
        .collect()
    }

    /// Returns whether no constraint was supplied at all.
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.guid_terms().is_empty()
    }

    /// Checks a fully loaded note against the filter.
    pub fn matches(&self, note: &Note) -> bool {
        if self.id.is_some_and(|id| id != note.id) {
            return false;
        }
        self.guid_terms().into_iter().all(|(column, value)| {
            let actual = match column {
                "note_guid" => &note.note_guid,
                "visit_guid" => &note.visit_guid,
                "author_guid" => &note.author_guid,
                _ => &note.patient_guid,
            };
            actual == value
        })
    }
}

/// AND-combined fragment lookup; `None` and empty strings are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteFragmentFilter {
    pub id: Option<RecordId>,
    pub note_fragment_guid: Option<String>,
    pub note_guid: Option<String>,
    pub issue_guid: Option<String>,
    pub icd_10_code: Option<String>,
}

impl NoteFragmentFilter {
    pub(crate) fn text_terms(&self) -> Vec<(&'static str, &str)> {
        [
            ("fragment_guid", &self.note_fragment_guid),
            ("note_guid", &self.note_guid),
            ("issue_guid", &self.issue_guid),
            ("icd10_code", &self.icd_10_code),
        ]
        .into_iter()
        .filter_map(|(column, value)| supplied(value).map(|value| (column, value)))
        .collect()
    }

    pub fn matches(&self, fragment: &NoteFragment) -> bool {
        if self.id.is_some_and(|id| id != fragment.id) {
            return false;
        }
        self.text_terms().into_iter().all(|(column, value)| {
            let actual = match column {
                "fragment_guid" => &fragment.note_fragment_guid,
                "note_guid" => &fragment.note_guid,
                "issue_guid" => &fragment.issue_guid,
                _ => &fragment.icd_10_code,
            };
            actual == value
        })
    }
}

fn supplied(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Persistence contract for note aggregates.
///
/// Held by the service as `Arc<dyn NoteStore>`; implementations must be safe
/// to call from many tasks at once.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Inserts the note row, then each fragment, then each note tag.
    ///
    /// Assigned ids (and any guids the store had to generate) are written
    /// back into `note`. Fragments are re-parented to `note.note_guid`.
    async fn add_note(&self, note: &mut Note) -> StoreResult<RecordId>;

    /// Returns every note aggregate in id order.
    async fn all_notes(&self) -> StoreResult<Vec<Note>>;

    async fn get_note_by_id(&self, id: RecordId) -> StoreResult<Option<Note>>;

    async fn find_note(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>>;

    /// Replaces the mutable columns, tags and fragments of the note with
    /// `note.id`. Guid and creation time are kept from storage.
    async fn update_note(&self, note: &Note) -> StoreResult<()>;

    /// Removes the note row only; fragment and tag rows are left in place.
    async fn delete_note(&self, id: RecordId) -> StoreResult<()>;

    /// Inserts a fragment row and then its tags.
    ///
    /// A non-zero `fragment.id` is kept as the row id.
    async fn add_note_fragment(&self, fragment: &mut NoteFragment)
        -> StoreResult<(RecordId, String)>;

    async fn add_note_tag(&self, note_guid: &str, tag: &str) -> StoreResult<RecordId>;

    async fn add_note_fragment_tag(&self, fragment_guid: &str, tag: &str)
        -> StoreResult<RecordId>;

    async fn all_note_fragments(&self) -> StoreResult<Vec<NoteFragment>> {
        Err(StoreError::NotImplemented("all_note_fragments"))
    }

    async fn get_note_fragment_by_id(&self, _id: RecordId) -> StoreResult<Option<NoteFragment>> {
        Err(StoreError::NotImplemented("get_note_fragment_by_id"))
    }

    async fn find_note_fragments(
        &self,
        _filter: &NoteFragmentFilter,
    ) -> StoreResult<Vec<NoteFragment>> {
        Err(StoreError::NotImplemented("find_note_fragments"))
    }

    /// Fragments are only ever written as part of their note.
    async fn update_note_fragment(&self, _fragment: &NoteFragment) -> StoreResult<()> {
        Err(StoreError::NotImplemented("update_note_fragment"))
    }

    async fn delete_note_fragment(&self, _id: RecordId) -> StoreResult<()> {
        Err(StoreError::NotImplemented("delete_note_fragment"))
    }
}
