//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate store calls into request/response level APIs.
//! - Keep the excluded transport layer decoupled from storage details.

pub mod note_service;
pub mod status;
