//! PostgreSQL note store.
//!
//! # Responsibility
//! - Persist note aggregates across the four normalized note tables.
//! - Rebuild aggregates on read by joining tags and fragments through guids.
//!
//! # Invariants
//! - `add_note` issues independent statements; a failure after the note row
//!   surfaces as `StoreError::PartialWrite` and nothing is rolled back.
//! - `update_note` runs in one transaction.
//! - A pre-assigned positive fragment id advances `note_fragment_id_seq`
//!   before the row is inserted.

use super::{
    NoteFilter, NoteFragmentFilter, NoteStore, StoreError, StoreResult, WriteStage,
};
use crate::config::Config;
use crate::db::{open_pool, DbResult};
use crate::logging::sanitize_for_log;
use crate::model::note::{
    new_guid, FragmentType, Note, NoteFragment, NoteType, RecordId, RecordPriority, RecordStatus,
    Timestamp,
};
use async_trait::async_trait;
use log::{debug, warn};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Executor, PgPool, Postgres, QueryBuilder, Row};
use std::collections::HashMap;

const NOTE_COLUMNS: &str = "SELECT id, created_sec, created_nsec, note_guid, visit_guid, \
     author_guid, patient_guid, type, status FROM note";

const FRAGMENT_COLUMNS: &str = "SELECT id, created_sec, created_nsec, fragment_guid, note_guid, \
     issue_guid, icd10_code, icd10_long, description, status, priority, topic, content \
     FROM note_fragment";

const INSERT_NOTE_SQL: &str = "INSERT INTO note \
     (created_sec, created_nsec, note_guid, visit_guid, author_guid, patient_guid, type, status) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id";

const INSERT_FRAGMENT_SQL: &str = "INSERT INTO note_fragment \
     (created_sec, created_nsec, fragment_guid, note_guid, issue_guid, icd10_code, icd10_long, \
     description, status, priority, topic, content) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING id";

const INSERT_FRAGMENT_WITH_ID_SQL: &str = "INSERT INTO note_fragment \
     (id, created_sec, created_nsec, fragment_guid, note_guid, issue_guid, icd10_code, icd10_long, \
     description, status, priority, topic, content) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING id";

const ADVANCE_FRAGMENT_SEQUENCE_SQL: &str = "SELECT setval('note_fragment_id_seq', \
     GREATEST($1, (SELECT last_value FROM note_fragment_id_seq)))";

const INSERT_NOTE_TAG_SQL: &str =
    "INSERT INTO note_tag (note_guid, tag) VALUES ($1, $2) RETURNING id";

const INSERT_FRAGMENT_TAG_SQL: &str =
    "INSERT INTO note_fragment_tag (fragment_guid, tag) VALUES ($1, $2) RETURNING id";

/// `NoteStore` backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresNoteStore {
    pool: PgPool,
}

impl PostgresNoteStore {
    /// Opens the pool described by `config`, pings it and ensures the schema.
    pub async fn initialize(config: &Config) -> DbResult<Self> {
        let pool = open_pool(config).await?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps a pool whose schema is already in place.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load_notes(&self, rows: Vec<Note>) -> StoreResult<Vec<Note>> {
        if rows.is_empty() {
            return Ok(rows);
        }
        let guids: Vec<String> = rows.iter().map(|note| note.note_guid.clone()).collect();

        let tag_rows = sqlx::query(
            "SELECT note_guid AS owner, tag FROM note_tag WHERE note_guid = ANY($1) ORDER BY id",
        )
        .bind(&guids)
        .fetch_all(&self.pool)
        .await?;
        let mut tags = group_tags(&tag_rows)?;

        let fragment_rows = sqlx::query(&format!(
            "{FRAGMENT_COLUMNS} WHERE note_guid = ANY($1) ORDER BY id"
        ))
        .bind(&guids)
        .fetch_all(&self.pool)
        .await?;
        let fragments = fragment_rows
            .iter()
            .map(fragment_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        let mut by_note: HashMap<String, Vec<NoteFragment>> = HashMap::new();
        for fragment in self.load_fragment_tags(fragments).await? {
            by_note
                .entry(fragment.note_guid.clone())
                .or_default()
                .push(fragment);
        }

        Ok(rows
            .into_iter()
            .map(|mut note| {
                note.tags = tags.remove(&note.note_guid).unwrap_or_default();
                note.fragments = by_note.remove(&note.note_guid).unwrap_or_default();
                note
            })
            .collect())
    }

    async fn load_fragment_tags(
        &self,
        fragments: Vec<NoteFragment>,
    ) -> StoreResult<Vec<NoteFragment>> {
        if fragments.is_empty() {
            return Ok(fragments);
        }
        let guids: Vec<String> = fragments
            .iter()
            .map(|fragment| fragment.note_fragment_guid.clone())
            .collect();

        let tag_rows = sqlx::query(
            "SELECT fragment_guid AS owner, tag FROM note_fragment_tag \
             WHERE fragment_guid = ANY($1) ORDER BY id",
        )
        .bind(&guids)
        .fetch_all(&self.pool)
        .await?;
        let mut tags = group_tags(&tag_rows)?;

        Ok(fragments
            .into_iter()
            .map(|mut fragment| {
                fragment.tags = tags
                    .remove(&fragment.note_fragment_guid)
                    .unwrap_or_default();
                fragment
            })
            .collect())
    }
}

#[async_trait]
impl NoteStore for PostgresNoteStore {
    async fn add_note(&self, note: &mut Note) -> StoreResult<RecordId> {
        if note.note_guid.is_empty() {
            note.note_guid = new_guid();
        }
        let id = insert_note_row(&self.pool, note).await?;
        note.id = id;

        for fragment in &mut note.fragments {
            fragment.note_guid = note.note_guid.clone();
            if let Err(err) = self.add_note_fragment(fragment).await {
                warn!(
                    "event=note_add module=store status=partial note_id={} error_code={}",
                    id,
                    err.code()
                );
                let stage = WriteStage::Fragment {
                    fragment_guid: fragment.note_fragment_guid.clone(),
                };
                return Err(StoreError::partial(&note.note_guid, stage, err));
            }
        }

        for tag in &note.tags {
            if let Err(err) = self.add_note_tag(&note.note_guid, tag).await {
                warn!(
                    "event=note_add module=store status=partial note_id={} error_code={}",
                    id,
                    err.code()
                );
                return Err(StoreError::partial(&note.note_guid, WriteStage::NoteTag, err));
            }
        }

        debug!(
            "event=note_add module=store status=ok note_id={} fragments={} tags={}",
            id,
            note.fragments.len(),
            note.tags.len()
        );
        Ok(id)
    }

    async fn all_notes(&self) -> StoreResult<Vec<Note>> {
        let rows = sqlx::query(&format!("{NOTE_COLUMNS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        let notes = rows.iter().map(note_from_row).collect::<StoreResult<_>>()?;
        self.load_notes(notes).await
    }

    async fn get_note_by_id(&self, id: RecordId) -> StoreResult<Option<Note>> {
        let row = sqlx::query(&format!("{NOTE_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let note = note_from_row(&row)?;
        Ok(self.load_notes(vec![note]).await?.pop())
    }

    async fn find_note(&self, filter: &NoteFilter) -> StoreResult<Vec<Note>> {
        let mut builder = note_query(filter);
        let rows = builder.build().fetch_all(&self.pool).await?;
        let notes = rows.iter().map(note_from_row).collect::<StoreResult<_>>()?;
        self.load_notes(notes).await
    }

    async fn update_note(&self, note: &Note) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE note SET visit_guid = $2, author_guid = $3, patient_guid = $4, \
             type = $5, status = $6 WHERE id = $1 RETURNING note_guid",
        )
        .bind(note.id)
        .bind(&note.visit_guid)
        .bind(&note.author_guid)
        .bind(&note.patient_guid)
        .bind(note.note_type.code())
        .bind(note.status.code())
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound(note.id));
        };
        let note_guid: String = row.try_get("note_guid")?;

        sqlx::query(
            "DELETE FROM note_fragment_tag WHERE fragment_guid IN \
             (SELECT fragment_guid FROM note_fragment WHERE note_guid = $1)",
        )
        .bind(&note_guid)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM note_fragment WHERE note_guid = $1")
            .bind(&note_guid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM note_tag WHERE note_guid = $1")
            .bind(&note_guid)
            .execute(&mut *tx)
            .await?;

        for tag in &note.tags {
            insert_note_tag(&mut *tx, &note_guid, tag).await?;
        }
        for fragment in &note.fragments {
            let mut fragment = fragment.clone();
            fragment.note_guid = note_guid.clone();
            if fragment.note_fragment_guid.is_empty() {
                fragment.note_fragment_guid = new_guid();
            }
            place_fragment_row(&mut tx, &fragment).await?;
            for tag in &fragment.tags {
                insert_fragment_tag(&mut *tx, &fragment.note_fragment_guid, tag).await?;
            }
        }

        tx.commit().await?;
        debug!(
            "event=note_update module=store status=ok note_id={} fragments={} tags={}",
            note.id,
            note.fragments.len(),
            note.tags.len()
        );
        Ok(())
    }

    async fn delete_note(&self, id: RecordId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM note WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
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
        let id = {
            let mut conn = self.pool.acquire().await?;
            place_fragment_row(&mut conn, fragment).await?
        };
        fragment.id = id;

        let tagged = async {
            for tag in &fragment.tags {
                insert_fragment_tag(&self.pool, &fragment.note_fragment_guid, tag).await?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        if let Err(err) = tagged {
            warn!(
                "event=fragment_add module=store status=partial fragment_id={} error={}",
                id,
                sanitize_for_log(&err.to_string())
            );
            let stage = WriteStage::FragmentTag {
                fragment_guid: fragment.note_fragment_guid.clone(),
            };
            return Err(StoreError::partial(&fragment.note_guid, stage, err));
        }

        Ok((id, fragment.note_fragment_guid.clone()))
    }

    async fn add_note_tag(&self, note_guid: &str, tag: &str) -> StoreResult<RecordId> {
        Ok(insert_note_tag(&self.pool, note_guid, tag).await?)
    }

    async fn add_note_fragment_tag(
        &self,
        fragment_guid: &str,
        tag: &str,
    ) -> StoreResult<RecordId> {
        Ok(insert_fragment_tag(&self.pool, fragment_guid, tag).await?)
    }

    async fn all_note_fragments(&self) -> StoreResult<Vec<NoteFragment>> {
        let rows = sqlx::query(&format!("{FRAGMENT_COLUMNS} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        let fragments = rows
            .iter()
            .map(fragment_from_row)
            .collect::<StoreResult<_>>()?;
        self.load_fragment_tags(fragments).await
    }

    async fn get_note_fragment_by_id(&self, id: RecordId) -> StoreResult<Option<NoteFragment>> {
        let row = sqlx::query(&format!("{FRAGMENT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let fragment = fragment_from_row(&row)?;
        Ok(self.load_fragment_tags(vec![fragment]).await?.pop())
    }

    async fn find_note_fragments(
        &self,
        filter: &NoteFragmentFilter,
    ) -> StoreResult<Vec<NoteFragment>> {
        let mut builder = fragment_query(filter);
        let rows = builder.build().fetch_all(&self.pool).await?;
        let fragments = rows
            .iter()
            .map(fragment_from_row)
            .collect::<StoreResult<_>>()?;
        self.load_fragment_tags(fragments).await
    }
}

fn note_query(filter: &NoteFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(NOTE_COLUMNS);
    builder.push(" WHERE TRUE");
    if let Some(id) = filter.id {
        builder.push(" AND id = ").push_bind(id);
    }
    for (column, value) in filter.guid_terms() {
        builder
            .push(format!(" AND {column} = "))
            .push_bind(value.to_string());
    }
    builder.push(" ORDER BY id");
    builder
}

fn fragment_query(filter: &NoteFragmentFilter) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(FRAGMENT_COLUMNS);
    builder.push(" WHERE TRUE");
    if let Some(id) = filter.id {
        builder.push(" AND id = ").push_bind(id);
    }
    for (column, value) in filter.text_terms() {
        builder
            .push(format!(" AND {column} = "))
            .push_bind(value.to_string());
    }
    builder.push(" ORDER BY id");
    builder
}

async fn insert_note_row<'e, E>(executor: E, note: &Note) -> Result<RecordId, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(INSERT_NOTE_SQL)
        .bind(note.date_created.seconds)
        .bind(note.date_created.nanos)
        .bind(&note.note_guid)
        .bind(&note.visit_guid)
        .bind(&note.author_guid)
        .bind(&note.patient_guid)
        .bind(note.note_type.code())
        .bind(note.status.code())
        .fetch_one(executor)
        .await?;
    row.try_get("id")
}

fn fragment_insert_sql(explicit_id: bool) -> &'static str {
    if explicit_id {
        INSERT_FRAGMENT_WITH_ID_SQL
    } else {
        INSERT_FRAGMENT_SQL
    }
}

async fn insert_fragment_row<'e, E>(
    executor: E,
    fragment: &NoteFragment,
) -> Result<RecordId, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let explicit_id = fragment.id != 0;
    let mut query = sqlx::query(fragment_insert_sql(explicit_id));
    if explicit_id {
        query = query.bind(fragment.id);
    }
    let row = query
        .bind(fragment.date_created.seconds)
        .bind(fragment.date_created.nanos)
        .bind(&fragment.note_fragment_guid)
        .bind(&fragment.note_guid)
        .bind(&fragment.issue_guid)
        .bind(&fragment.icd_10_code)
        .bind(&fragment.icd_10_long)
        .bind(&fragment.description)
        .bind(fragment.status.code())
        .bind(fragment.priority.code())
        .bind(fragment.topic.code())
        .bind(&fragment.content)
        .fetch_one(executor)
        .await?;
    row.try_get("id")
}

/// One statement in writing a fragment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FragmentStep {
    AdvanceSequence(RecordId),
    InsertRow,
}

// The sequence moves first so a concurrent generated insert cannot draw a
// pre-assigned id that is about to be written.
fn fragment_steps(fragment: &NoteFragment) -> Vec<FragmentStep> {
    if fragment.id > 0 {
        vec![FragmentStep::AdvanceSequence(fragment.id), FragmentStep::InsertRow]
    } else {
        vec![FragmentStep::InsertRow]
    }
}

async fn place_fragment_row(
    conn: &mut PgConnection,
    fragment: &NoteFragment,
) -> Result<RecordId, sqlx::Error> {
    let mut id = fragment.id;
    for step in fragment_steps(fragment) {
        match step {
            FragmentStep::AdvanceSequence(floor) => {
                advance_fragment_sequence(&mut *conn, floor).await?
            }
            FragmentStep::InsertRow => id = insert_fragment_row(&mut *conn, fragment).await?,
        }
    }
    Ok(id)
}

async fn advance_fragment_sequence<'e, E>(executor: E, id: RecordId) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(ADVANCE_FRAGMENT_SEQUENCE_SQL)
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

async fn insert_note_tag<'e, E>(executor: E, note_guid: &str, tag: &str) -> Result<RecordId, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(INSERT_NOTE_TAG_SQL)
        .bind(note_guid)
        .bind(tag)
        .fetch_one(executor)
        .await?;
    row.try_get("id")
}

async fn insert_fragment_tag<'e, E>(
    executor: E,
    fragment_guid: &str,
    tag: &str,
) -> Result<RecordId, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let row = sqlx::query(INSERT_FRAGMENT_TAG_SQL)
        .bind(fragment_guid)
        .bind(tag)
        .fetch_one(executor)
        .await?;
    row.try_get("id")
}

fn note_from_row(row: &PgRow) -> StoreResult<Note> {
    Ok(Note {
        id: row.try_get("id")?,
        date_created: Timestamp {
            seconds: row.try_get("created_sec")?,
            nanos: row.try_get("created_nsec")?,
        },
        note_guid: row.try_get("note_guid")?,
        visit_guid: row.try_get("visit_guid")?,
        author_guid: row.try_get("author_guid")?,
        patient_guid: row.try_get("patient_guid")?,
        note_type: NoteType::try_from(row.try_get::<i32, _>("type")?)?,
        status: RecordStatus::try_from(row.try_get::<i32, _>("status")?)?,
        fragments: Vec::new(),
        tags: Vec::new(),
    })
}

fn fragment_from_row(row: &PgRow) -> StoreResult<NoteFragment> {
    Ok(NoteFragment {
        id: row.try_get("id")?,
        date_created: Timestamp {
            seconds: row.try_get("created_sec")?,
            nanos: row.try_get("created_nsec")?,
        },
        note_fragment_guid: row.try_get("fragment_guid")?,
        note_guid: row.try_get("note_guid")?,
        issue_guid: row.try_get("issue_guid")?,
        icd_10_code: row.try_get("icd10_code")?,
        icd_10_long: row.try_get("icd10_long")?,
        description: row.try_get("description")?,
        status: RecordStatus::try_from(row.try_get::<i32, _>("status")?)?,
        priority: RecordPriority::try_from(row.try_get::<i32, _>("priority")?)?,
        topic: FragmentType::try_from(row.try_get::<i32, _>("topic")?)?,
        content: row.try_get("content")?,
        tags: Vec::new(),
    })
}

// Rows arrive in id order, so each owner's tag list keeps insertion order.
fn group_tags(rows: &[PgRow]) -> StoreResult<HashMap<String, Vec<String>>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let owner: String = row.try_get("owner")?;
        let tag: String = row.try_get("tag")?;
        grouped.entry(owner).or_default().push(tag);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::{
        fragment_insert_sql, fragment_query, fragment_steps, note_query, FragmentStep,
        PostgresNoteStore,
    };
    use crate::config::Config;
    use crate::db::DbError;
    use crate::model::note::NoteFragment;
    use crate::store::{NoteFilter, NoteFragmentFilter};

    #[test]
    fn note_query_binds_only_supplied_terms() {
        let filter = NoteFilter {
            visit_guid: Some("visit-1".to_string()),
            author_guid: Some(String::new()),
            patient_guid: Some("patient-1".to_string()),
            ..NoteFilter::default()
        };
        let builder = note_query(&filter);
        assert!(builder
            .sql()
            .ends_with(" WHERE TRUE AND visit_guid = $1 AND patient_guid = $2 ORDER BY id"));
    }

    #[test]
    fn empty_note_query_selects_everything() {
        let builder = note_query(&NoteFilter::default());
        assert!(builder.sql().ends_with("FROM note WHERE TRUE ORDER BY id"));
    }

    #[test]
    fn fragment_query_maps_fields_to_columns() {
        let filter = NoteFragmentFilter {
            id: Some(3),
            icd_10_code: Some("J45.909".to_string()),
            ..NoteFragmentFilter::default()
        };
        let builder = fragment_query(&filter);
        assert!(builder
            .sql()
            .ends_with(" WHERE TRUE AND id = $1 AND icd10_code = $2 ORDER BY id"));
    }

    #[test]
    fn explicit_fragment_id_uses_wider_insert() {
        assert!(fragment_insert_sql(true).contains("(id, created_sec"));
        assert!(fragment_insert_sql(true).contains("$13"));
        assert!(!fragment_insert_sql(false).contains("$13"));
    }

    #[test]
    fn pre_assigned_fragment_moves_sequence_before_insert() {
        let mut fragment = NoteFragment::new();
        fragment.id = 11;
        assert_eq!(
            fragment_steps(&fragment),
            vec![FragmentStep::AdvanceSequence(11), FragmentStep::InsertRow]
        );
    }

    #[test]
    fn generated_fragment_id_skips_sequence_step() {
        assert_eq!(
            fragment_steps(&NoteFragment::new()),
            vec![FragmentStep::InsertRow]
        );
    }

    #[tokio::test]
    async fn initialize_rejects_incomplete_config() {
        let err = PostgresNoteStore::initialize(&Config::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig(_)));
    }
}
