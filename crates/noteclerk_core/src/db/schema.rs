//! Note schema definition and idempotent bootstrap.
//!
//! # Invariants
//! - Tables are created in dependency order: note, note_tag, note_fragment,
//!   note_fragment_tag.
//! - A table that already exists is reported as a warning, not an error.
//! - Columns added after a table's first release are backfilled by
//!   `COLUMN_UPGRADES` on every bootstrap, so older tables stay readable.

use super::{DbError, DbResult};
use log::{debug, info, warn};
use sqlx::PgPool;

const DUPLICATE_TABLE: &str = "42P07";
const DUPLICATE_OBJECT: &str = "42710";

/// One schema table and its creation statement.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub create_sql: &'static str,
}

/// Tables owned by the note store, in creation order.
pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "note",
        create_sql: "CREATE TABLE note (
            id BIGSERIAL PRIMARY KEY,
            created_sec BIGINT NOT NULL,
            created_nsec INTEGER NOT NULL,
            note_guid VARCHAR(100) NOT NULL UNIQUE,
            visit_guid VARCHAR(100) NOT NULL,
            author_guid VARCHAR(100) NOT NULL,
            patient_guid VARCHAR(100) NOT NULL,
            type INTEGER NOT NULL,
            status INTEGER NOT NULL
        );",
    },
    TableDef {
        name: "note_tag",
        create_sql: "CREATE TABLE note_tag (
            id BIGSERIAL PRIMARY KEY,
            note_guid VARCHAR(100) NOT NULL,
            tag TEXT NOT NULL
        );",
    },
    TableDef {
        name: "note_fragment",
        create_sql: "CREATE TABLE note_fragment (
            id BIGSERIAL PRIMARY KEY,
            created_sec BIGINT NOT NULL,
            created_nsec INTEGER NOT NULL,
            fragment_guid VARCHAR(100) NOT NULL UNIQUE,
            note_guid VARCHAR(100) NOT NULL,
            icd10_code VARCHAR(20) NOT NULL,
            icd10_long TEXT NOT NULL,
            description TEXT NOT NULL,
            status INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            topic INTEGER NOT NULL,
            content TEXT NOT NULL,
            issue_guid VARCHAR(100) NOT NULL
        );",
    },
    TableDef {
        name: "note_fragment_tag",
        create_sql: "CREATE TABLE note_fragment_tag (
            id BIGSERIAL PRIMARY KEY,
            fragment_guid VARCHAR(100) NOT NULL,
            tag TEXT NOT NULL
        );",
    },
];

/// A column added to an existing table; the statement must be idempotent.
#[derive(Debug, Clone, Copy)]
pub struct ColumnUpgrade {
    pub table: &'static str,
    pub column: &'static str,
    pub alter_sql: &'static str,
}

/// Columns a pre-existing table may lack, applied after table creation.
pub const COLUMN_UPGRADES: &[ColumnUpgrade] = &[ColumnUpgrade {
    table: "note_fragment",
    column: "issue_guid",
    alter_sql: "ALTER TABLE note_fragment \
        ADD COLUMN IF NOT EXISTS issue_guid VARCHAR(100) NOT NULL DEFAULT ''",
}];

/// Outcome of creating one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOutcome {
    Created,
    AlreadyExisted,
}

/// Creates every missing note table.
///
/// Returns the per-table outcome in creation order.
pub async fn ensure_schema(pool: &PgPool) -> DbResult<Vec<(&'static str, TableOutcome)>> {
    let mut outcomes = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let outcome = match sqlx::query(table.create_sql).execute(pool).await {
            Ok(_) => {
                info!(
                    "event=schema_table module=db status=ok table={} outcome=created",
                    table.name
                );
                TableOutcome::Created
            }
            Err(err) if is_already_exists(&err) => {
                warn!(
                    "event=schema_table module=db status=ok table={} outcome=already_exists",
                    table.name
                );
                TableOutcome::AlreadyExisted
            }
            Err(source) => {
                return Err(DbError::Schema {
                    table: table.name,
                    source,
                })
            }
        };
        outcomes.push((table.name, outcome));
    }

    for upgrade in COLUMN_UPGRADES {
        sqlx::query(upgrade.alter_sql)
            .execute(pool)
            .await
            .map_err(|source| DbError::Schema {
                table: upgrade.table,
                source,
            })?;
        debug!(
            "event=schema_column module=db status=ok table={} column={}",
            upgrade.table, upgrade.column
        );
    }
    Ok(outcomes)
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| is_duplicate_object_code(&code)),
        _ => false,
    }
}

fn is_duplicate_object_code(code: &str) -> bool {
    code == DUPLICATE_TABLE || code == DUPLICATE_OBJECT
}
