//! Core record-management logic for NoteClerk.
//! This crate is the single source of truth for note aggregate invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod service;
pub mod store;

pub use config::{environment_config_path, Config, ConfigError, DbSettings, ENVIRONMENT_VAR};
pub use db::{DbError, DbResult};
pub use logging::{default_log_level, init_logging, logging_status, LogSettings, LoggingError};
pub use model::note::{
    new_guid, FragmentType, Note, NoteFragment, NoteType, RecordId, RecordPriority, RecordStatus,
    Timestamp, UnknownCode,
};
pub use service::note_service::{
    CreateNoteRequest, CreateNoteResponse, DeleteNoteRequest, DeleteNoteResponse,
    NoteFragmentsResponse, NoteService, NoteServiceBuilder, NoteServiceError,
    RetrieveNoteRequest, RetrieveNoteResponse, SearchNotesRequest, SearchNotesResponse,
    ServiceResult, UpdateNoteRequest, UpdateNoteResponse,
};
pub use service::status::{ResponseStatus, StatusCode};
pub use store::{
    fixture_notes, InMemoryNoteStore, NoteFilter, NoteFragmentFilter, NoteStore,
    PostgresNoteStore, StoreError, StoreResult, WriteStage,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
