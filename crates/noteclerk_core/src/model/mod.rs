//! Clinical note domain model.
//!
//! # Responsibility
//! - Define the `Note` aggregate and its owned `NoteFragment` records.
//! - Define the enum codes persisted as integers by storage backends.
//!
//! # Invariants
//! - Aggregates are navigated by guid, never by numeric id.
//! - A numeric id of `0` means "not yet assigned by a store".

pub mod note;
