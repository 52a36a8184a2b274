//! Note use-case service.
//!
//! # Responsibility
//! - Validate requests and apply the id/guid policy before any store access.
//! - Map store outcomes to status envelopes.
//!
//! # Invariants
//! - Create never reaches the store when the note already carries an id.
//! - Not-found, conflict and not-modified are `Ok` responses with that status;
//!   `Err` is reserved for validation failures, wiring errors and store faults.
//! - Retrieve and delete resolve a non-empty guid before the numeric id.
//! - Update checks id agreement before existence.

use super::status::{ResponseStatus, StatusCode};
use crate::config::Config;
use crate::logging::sanitize_for_log;
use crate::model::note::{new_guid, Note, NoteFragment, RecordId, Timestamp};
use crate::store::{NoteFilter, NoteFragmentFilter, NoteStore, StoreError};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Service error for note use-cases.
#[derive(Debug)]
pub enum NoteServiceError {
    /// The builder was not given a configuration.
    MissingConfig,
    /// The builder was not given a store.
    MissingStore,
    /// The request is malformed; nothing was sent to the store.
    Validation(String),
    /// Persistence-layer failure.
    Store(StoreError),
    /// A write succeeded but its read-back did not.
    InconsistentState(&'static str),
}

impl Display for NoteServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingConfig => write!(f, "note service requires a configuration"),
            Self::MissingStore => write!(f, "note service requires a note store"),
            Self::Validation(details) => write!(f, "invalid request: {details}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => write!(f, "inconsistent note state: {details}"),
        }
    }
}

impl Error for NoteServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for NoteServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl NoteServiceError {
    /// Best-effort status to report alongside this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BadRequest,
            _ => StatusCode::InternalServerError,
        }
    }

    /// Short stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingConfig => "service_missing_config",
            Self::MissingStore => "service_missing_store",
            Self::Validation(_) => "service_validation",
            Self::Store(err) => err.code(),
            Self::InconsistentState(_) => "service_inconsistent_state",
        }
    }
}

pub type ServiceResult<T> = Result<T, NoteServiceError>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateNoteRequest {
    pub note: Note,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateNoteResponse {
    pub status: ResponseStatus,
    pub note: Note,
}

/// Identifies one note; a non-empty `guid` takes precedence over `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveNoteRequest {
    pub id: RecordId,
    pub guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveNoteResponse {
    pub status: ResponseStatus,
    pub note: Option<Note>,
}

/// `id` must equal `note.id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateNoteRequest {
    pub id: RecordId,
    pub note: Note,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateNoteResponse {
    pub status: ResponseStatus,
    pub note: Option<Note>,
}

/// Same addressing rule as `RetrieveNoteRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteNoteRequest {
    pub id: RecordId,
    pub guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteNoteResponse {
    pub status: ResponseStatus,
}

/// AND-combined correlation lookup; at least one guid is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchNotesRequest {
    pub visit_guid: String,
    pub author_guid: String,
    pub patient_guid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchNotesResponse {
    pub status: ResponseStatus,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFragmentsResponse {
    pub status: ResponseStatus,
    pub fragments: Vec<NoteFragment>,
}

/// Collects the service's required collaborators.
#[derive(Default)]
pub struct NoteServiceBuilder {
    config: Option<Arc<Config>>,
    store: Option<Arc<dyn NoteStore>>,
}

impl NoteServiceBuilder {
    pub fn config(mut self, config: impl Into<Arc<Config>>) -> Self {
        self.config = Some(config.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn NoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Fails when either collaborator is missing.
    pub fn build(self) -> ServiceResult<NoteService> {
        let config = self.config.ok_or(NoteServiceError::MissingConfig)?;
        let store = self.store.ok_or(NoteServiceError::MissingStore)?;
        Ok(NoteService { config, store })
    }
}

/// Note service facade over any `NoteStore`.
#[derive(Clone)]
pub struct NoteService {
    config: Arc<Config>,
    store: Arc<dyn NoteStore>,
}

impl Debug for NoteService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NoteService {
    pub fn builder() -> NoteServiceBuilder {
        NoteServiceBuilder::default()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Persists a new note and returns it with ids, guids and timestamps set.
    ///
    /// Fragments with id 0 get a fresh guid and timestamp; fragments with a
    /// pre-assigned id keep it.
    pub async fn create_note(&self, request: CreateNoteRequest) -> ServiceResult<CreateNoteResponse> {
        let started_at = Instant::now();
        let mut note = request.note;
        if note.is_persisted() {
            warn!(
                "event=note_create module=service status=rejected error_code=service_validation note_id={}",
                note.id
            );
            return Err(NoteServiceError::Validation(format!(
                "note id must be 0 on create, got {}",
                note.id
            )));
        }

        note.date_created = Timestamp::now();
        note.note_guid = new_guid();
        for fragment in &mut note.fragments {
            if fragment.id == 0 {
                fragment.date_created = Timestamp::now();
                fragment.note_fragment_guid = new_guid();
            }
            fragment.note_guid = note.note_guid.clone();
        }

        let result = self
            .store
            .add_note(&mut note)
            .await
            .map_err(NoteServiceError::from);
        log_outcome("note_create", started_at, &result);
        result?;

        Ok(CreateNoteResponse {
            status: StatusCode::Ok.into(),
            note,
        })
    }

    /// Looks up one note by guid, or by id when the guid is empty.
    pub async fn retrieve_note(
        &self,
        request: RetrieveNoteRequest,
    ) -> ServiceResult<RetrieveNoteResponse> {
        let started_at = Instant::now();
        let result = self.resolve(request.id, &request.guid).await;
        log_outcome("note_retrieve", started_at, &result);

        let note = result?;
        let status = if note.is_some() {
            StatusCode::Ok
        } else {
            StatusCode::NotFound
        };
        Ok(RetrieveNoteResponse {
            status: status.into(),
            note,
        })
    }

    /// Returns every note matching all supplied correlation guids.
    pub async fn search_notes(
        &self,
        request: SearchNotesRequest,
    ) -> ServiceResult<SearchNotesResponse> {
        let started_at = Instant::now();
        let filter = NoteFilter {
            visit_guid: Some(request.visit_guid),
            author_guid: Some(request.author_guid),
            patient_guid: Some(request.patient_guid),
            ..NoteFilter::default()
        };
        if filter.is_empty() {
            return Err(NoteServiceError::Validation(
                "search requires a visit, author or patient guid".to_string(),
            ));
        }

        let result = self.store.find_note(&filter).await.map_err(NoteServiceError::from);
        log_outcome("note_search", started_at, &result);

        let notes = result?;
        let status = if notes.is_empty() {
            StatusCode::NotFound
        } else {
            StatusCode::Ok
        };
        Ok(SearchNotesResponse {
            status: status.into(),
            notes,
        })
    }

    /// Replaces the stored note whose id is `request.id`.
    pub async fn update_note(
        &self,
        request: UpdateNoteRequest,
    ) -> ServiceResult<UpdateNoteResponse> {
        let started_at = Instant::now();
        if request.id != request.note.id {
            info!(
                "event=note_update module=service status=conflict request_id={} note_id={}",
                request.id, request.note.id
            );
            return Ok(UpdateNoteResponse {
                status: StatusCode::Conflict.into(),
                note: None,
            });
        }

        match self.store.update_note(&request.note).await {
            Ok(()) => {}
            Err(StoreError::NotFound(id)) => {
                info!("event=note_update module=service status=not_found note_id={id}");
                return Ok(UpdateNoteResponse {
                    status: StatusCode::NotFound.into(),
                    note: None,
                });
            }
            Err(err) => {
                let err = NoteServiceError::from(err);
                log_failure("note_update", started_at, &err);
                return Err(err);
            }
        }

        let stored = self
            .store
            .get_note_by_id(request.id)
            .await?
            .ok_or(NoteServiceError::InconsistentState(
                "updated note not found in read-back",
            ))?;
        log_success("note_update", started_at);
        Ok(UpdateNoteResponse {
            status: StatusCode::Ok.into(),
            note: Some(stored),
        })
    }

    /// Deletes one note by guid, or by id when the guid is empty.
    ///
    /// An unknown target yields `NotModified`.
    pub async fn delete_note(
        &self,
        request: DeleteNoteRequest,
    ) -> ServiceResult<DeleteNoteResponse> {
        let started_at = Instant::now();
        let target = if request.guid.is_empty() {
            if request.id == 0 {
                return Err(NoteServiceError::Validation(
                    "delete requires a note id or guid".to_string(),
                ));
            }
            Some(request.id)
        } else {
            self.resolve(0, &request.guid).await?.map(|note| note.id)
        };

        let outcome = match target {
            Some(id) => self.store.delete_note(id).await,
            None => Err(StoreError::NotFound(request.id)),
        };
        match outcome {
            Ok(()) => {
                log_success("note_delete", started_at);
                Ok(DeleteNoteResponse {
                    status: StatusCode::Ok.into(),
                })
            }
            Err(StoreError::NotFound(_)) => {
                info!("event=note_delete module=service status=not_modified");
                Ok(DeleteNoteResponse {
                    status: StatusCode::NotModified.into(),
                })
            }
            Err(err) => {
                let err = NoteServiceError::from(err);
                log_failure("note_delete", started_at, &err);
                Err(err)
            }
        }
    }

    /// Lists every fragment the store holds.
    pub async fn all_note_fragments(&self) -> ServiceResult<NoteFragmentsResponse> {
        let fragments = self.store.all_note_fragments().await?;
        Ok(fragments_response(fragments))
    }

    /// Lists fragments matching `filter`; no match yields `NotFound`.
    pub async fn find_note_fragments(
        &self,
        filter: NoteFragmentFilter,
    ) -> ServiceResult<NoteFragmentsResponse> {
        let fragments = self.store.find_note_fragments(&filter).await?;
        Ok(fragments_response(fragments))
    }

    async fn resolve(&self, id: RecordId, guid: &str) -> ServiceResult<Option<Note>> {
        if !guid.is_empty() {
            let mut found = self.store.find_note(&NoteFilter::by_guid(guid)).await?;
            return Ok(if found.is_empty() {
                None
            } else {
                Some(found.swap_remove(0))
            });
        }
        if id == 0 {
            return Err(NoteServiceError::Validation(
                "a note id or guid is required".to_string(),
            ));
        }
        Ok(self.store.get_note_by_id(id).await?)
    }
}

fn fragments_response(fragments: Vec<NoteFragment>) -> NoteFragmentsResponse {
    let status = if fragments.is_empty() {
        StatusCode::NotFound
    } else {
        StatusCode::Ok
    };
    NoteFragmentsResponse {
        status: status.into(),
        fragments,
    }
}

fn log_outcome<T>(event: &str, started_at: Instant, result: &ServiceResult<T>) {
    match result {
        Ok(_) => log_success(event, started_at),
        Err(err) => log_failure(event, started_at, err),
    }
}

fn log_success(event: &str, started_at: Instant) {
    info!(
        "event={event} module=service status=ok duration_ms={}",
        started_at.elapsed().as_millis()
    );
}

fn log_failure(event: &str, started_at: Instant, err: &NoteServiceError) {
    error!(
        "event={event} module=service status=error duration_ms={} error_code={} error={}",
        started_at.elapsed().as_millis(),
        err.code(),
        sanitize_for_log(&err.to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::{NoteService, NoteServiceError};
    use crate::config::Config;
    use crate::service::status::StatusCode;
    use crate::store::{InMemoryNoteStore, StoreError};
    use std::sync::Arc;

    #[test]
    fn builder_requires_config_and_store() {
        let missing_config = NoteService::builder()
            .store(Arc::new(InMemoryNoteStore::new()))
            .build()
            .unwrap_err();
        assert!(matches!(missing_config, NoteServiceError::MissingConfig));

        let missing_store = NoteService::builder()
            .config(Config::default())
            .build()
            .unwrap_err();
        assert!(matches!(missing_store, NoteServiceError::MissingStore));
    }

    #[test]
    fn error_status_separates_validation_from_faults() {
        assert_eq!(
            NoteServiceError::Validation("id".to_string()).status(),
            StatusCode::BadRequest
        );
        let fault = NoteServiceError::from(StoreError::NotImplemented("delete_note_fragment"));
        assert_eq!(fault.status(), StatusCode::InternalServerError);
        assert_eq!(fault.code(), "store_not_implemented");
    }
}
