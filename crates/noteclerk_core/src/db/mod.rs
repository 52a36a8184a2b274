//! PostgreSQL bootstrap and schema entry points.
//!
//! # Responsibility
//! - Turn configuration into connection options without touching the network.
//! - Open a pool, prove liveness with a ping and ensure the note schema.
//!
//! # Invariants
//! - Incomplete connection settings fail before any network activity.
//! - Core code must not read/write note data before `ensure_schema` succeeds.

use std::error::Error;
use std::fmt::{Display, Formatter};

mod open;
pub mod schema;

pub use open::{connect_options, open_pool};
pub use schema::ensure_schema;

pub type DbResult<T> = Result<T, DbError>;

/// Failures while bringing up the relational backend.
#[derive(Debug)]
pub enum DbError {
    /// Connection settings are empty or malformed.
    InvalidConfig(String),
    /// No connection could be opened.
    Connect(sqlx::Error),
    /// A connection was opened but the backend did not answer a ping.
    Ping(sqlx::Error),
    /// A table could not be created for a reason other than pre-existence.
    Schema {
        table: &'static str,
        source: sqlx::Error,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(details) => write!(f, "invalid database config: {details}"),
            Self::Connect(err) => write!(f, "failed to open database connection: {err}"),
            Self::Ping(err) => write!(f, "failed to ping database: {err}"),
            Self::Schema { table, source } => {
                write!(f, "failed to create table `{table}`: {source}")
            }
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidConfig(_) => None,
            Self::Connect(err) | Self::Ping(err) => Some(err),
            Self::Schema { source, .. } => Some(source),
        }
    }
}

impl DbError {
    /// Short stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "db_invalid_config",
            Self::Connect(_) => "db_connect_failed",
            Self::Ping(_) => "db_ping_failed",
            Self::Schema { .. } => "db_schema_failed",
        }
    }
}
