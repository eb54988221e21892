//! Append and query helpers for historical records.
//!
//! All functions take a shared `&Connection` (a `Transaction` derefs to
//! one) and return `anyhow::Result<T>` with typed records. Ordering is
//! always by `id`, never by timestamp: ids follow insertion order while
//! timestamps can collide.

use super::schema::RECORD_COLUMNS;
use crate::diff::{change_summary, diff, diff_untyped};
use crate::model::{ChangeKind, ExtraData, HistoricalRecord, NewRecord, Snapshot};
use crate::registry::Registry;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Which record table a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTable {
    Live,
    Archive,
}

impl StoreTable {
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Live => "historical_records",
            Self::Archive => "archived_historical_records",
        }
    }
}

struct RawRecord {
    id: i64,
    entity_type: String,
    object_id: String,
    created_at_us: i64,
    change_kind: String,
    actor_name: Option<String>,
    actor_id: Option<i64>,
    changed_fields_json: Option<String>,
    data_json: String,
    extra_data_json: String,
    related_record_id: Option<i64>,
}

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        object_id: row.get(2)?,
        created_at_us: row.get(3)?,
        change_kind: row.get(4)?,
        actor_name: row.get(5)?,
        actor_id: row.get(6)?,
        changed_fields_json: row.get(7)?,
        data_json: row.get(8)?,
        extra_data_json: row.get(9)?,
        related_record_id: row.get(10)?,
    })
}

impl RawRecord {
    fn decode(self) -> Result<HistoricalRecord> {
        let id = self.id;
        let changed_fields = self
            .changed_fields_json
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()
            .with_context(|| format!("decode changed_fields of record {id}"))?;
        let data: Snapshot = serde_json::from_str(&self.data_json)
            .with_context(|| format!("decode data of record {id}"))?;
        let extra_data: ExtraData = serde_json::from_str(&self.extra_data_json)
            .with_context(|| format!("decode extra_data of record {id}"))?;

        Ok(HistoricalRecord {
            id,
            entity_type: self.entity_type,
            object_id: self.object_id,
            created_at: micros_to_datetime(self.created_at_us)?,
            change_kind: self
                .change_kind
                .parse()
                .with_context(|| format!("decode change_kind of record {id}"))?,
            actor_name: self.actor_name,
            actor_id: self.actor_id,
            changed_fields,
            data,
            extra_data,
            related_record_id: self.related_record_id,
        })
    }
}

fn micros_to_datetime(us: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(us).ok_or_else(|| anyhow!("timestamp {us}us out of range"))
}

pub(super) fn query_records(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<HistoricalRecord>> {
    let mut stmt = conn.prepare(sql).context("prepare record query")?;
    let raws = stmt
        .query_map(params, read_raw)
        .context("run record query")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("read record rows")?;
    raws.into_iter().map(RawRecord::decode).collect()
}

/// Append a record stamped with the current time.
///
/// # Errors
///
/// Returns an error if encoding or the insert fails.
pub fn insert_record(conn: &Connection, new: &NewRecord) -> Result<HistoricalRecord> {
    insert_record_at(conn, new, Utc::now())
}

/// Append a record with an explicit `created_at`. Timestamps are kept at
/// microsecond resolution.
///
/// # Errors
///
/// Returns an error if encoding or the insert fails.
pub fn insert_record_at(conn: &Connection, new: &NewRecord, created_at: DateTime<Utc>) -> Result<HistoricalRecord> {
    let created_at_us = created_at.timestamp_micros();
    let changed_fields_json = new
        .changed_fields
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("encode changed_fields")?;
    let data_json = serde_json::to_string(&new.data).context("encode data")?;
    let extra_data_json = serde_json::to_string(&new.extra_data).context("encode extra_data")?;

    conn.execute(
        "INSERT INTO historical_records (
            entity_type, object_id, created_at_us, change_kind, actor_name, actor_id,
            changed_fields_json, data_json, extra_data_json, related_record_id
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.entity_type,
            new.object_id,
            created_at_us,
            new.change_kind.as_str(),
            new.attribution.name,
            new.attribution.id,
            changed_fields_json,
            data_json,
            extra_data_json,
            new.related_record_id,
        ],
    )
    .with_context(|| format!("insert {} record for {}#{}", new.change_kind, new.entity_type, new.object_id))?;

    Ok(HistoricalRecord {
        id: conn.last_insert_rowid(),
        entity_type: new.entity_type.clone(),
        object_id: new.object_id.clone(),
        created_at: micros_to_datetime(created_at_us)?,
        change_kind: new.change_kind,
        actor_name: new.attribution.name.clone(),
        actor_id: new.attribution.id,
        changed_fields: new.changed_fields.clone(),
        data: new.data.clone(),
        extra_data: new.extra_data.clone(),
        related_record_id: new.related_record_id,
    })
}

/// Fetch one record by id.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn get_record(conn: &Connection, table: StoreTable, id: i64) -> Result<Option<HistoricalRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM {} WHERE id = ?1",
        table.table_name()
    );
    let raw = conn
        .query_row(&sql, params![id], read_raw)
        .optional()
        .with_context(|| format!("get record {id}"))?;
    raw.map(RawRecord::decode).transpose()
}

/// All records of one instance, newest first.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn by_entity_and_id(conn: &Connection, entity_type: &str, object_id: &str) -> Result<Vec<HistoricalRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM historical_records
         WHERE entity_type = ?1 AND object_id = ?2
         ORDER BY id DESC"
    );
    query_records(conn, &sql, params![entity_type, object_id])
        .with_context(|| format!("history of {entity_type}#{object_id}"))
}

/// All records of one entity type, newest first.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn by_entity_type(conn: &Connection, entity_type: &str) -> Result<Vec<HistoricalRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM historical_records
         WHERE entity_type = ?1
         ORDER BY id DESC"
    );
    query_records(conn, &sql, params![entity_type]).with_context(|| format!("history of type {entity_type}"))
}

/// The newest record of one instance.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn most_recent_for(conn: &Connection, entity_type: &str, object_id: &str) -> Result<Option<HistoricalRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM historical_records
         WHERE entity_type = ?1 AND object_id = ?2
         ORDER BY id DESC
         LIMIT 1"
    );
    let raw = conn
        .query_row(&sql, params![entity_type, object_id], read_raw)
        .optional()
        .with_context(|| format!("most recent record of {entity_type}#{object_id}"))?;
    raw.map(RawRecord::decode).transpose()
}

/// The record of the same instance written just before `record`.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn previous_version(conn: &Connection, record: &HistoricalRecord) -> Result<Option<HistoricalRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM historical_records
         WHERE entity_type = ?1 AND object_id = ?2 AND id < ?3
         ORDER BY id DESC
         LIMIT 1"
    );
    let raw = conn
        .query_row(
            &sql,
            params![record.entity_type, record.object_id, record.id],
            read_raw,
        )
        .optional()
        .with_context(|| format!("previous version of record {}", record.id))?;
    raw.map(RawRecord::decode).transpose()
}

/// Records generated by propagation from `origin_id`, oldest first.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn related_to(conn: &Connection, origin_id: i64) -> Result<Vec<HistoricalRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM historical_records
         WHERE related_record_id = ?1
         ORDER BY id ASC"
    );
    query_records(conn, &sql, params![origin_id]).with_context(|| format!("records related to {origin_id}"))
}

/// Whether any live record exists for `entity_type`.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn has_history_for_type(conn: &Connection, entity_type: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM historical_records WHERE entity_type = ?1)",
        params![entity_type],
        |row| row.get(0),
    )
    .with_context(|| format!("check history for {entity_type}"))
}

/// Exact row count of a record table.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn count_records(conn: &Connection, table: StoreTable) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.table_name());
    let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("count {}", table.table_name()))?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Fast, possibly stale row estimate for display only.
///
/// Uses `sqlite_stat1` when `ANALYZE` has populated it, otherwise the id
/// span of the table (an upper bound once rows have been deleted).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn approximate_count(conn: &Connection, table: StoreTable) -> Result<u64> {
    let has_stats: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_stat1')",
            [],
            |row| row.get(0),
        )
        .context("probe sqlite_stat1")?;

    if has_stats {
        let stat: Option<String> = conn
            .query_row(
                "SELECT stat FROM sqlite_stat1 WHERE tbl = ?1 LIMIT 1",
                params![table.table_name()],
                |row| row.get(0),
            )
            .optional()
            .context("read sqlite_stat1")?;
        if let Some(rows) = stat
            .as_deref()
            .and_then(|raw| raw.split_whitespace().next())
            .and_then(|first| first.parse::<u64>().ok())
        {
            return Ok(rows);
        }
    }

    let sql = format!(
        "SELECT COALESCE(MAX(id) - MIN(id) + 1, 0) FROM {}",
        table.table_name()
    );
    let span: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("estimate {}", table.table_name()))?;
    Ok(u64::try_from(span).unwrap_or_default())
}

/// Store a computed diff on a record whose `changed_fields` is still unset.
///
/// Returns `false` when the record already had a value (or is gone).
///
/// # Errors
///
/// Returns an error if encoding or the update fails.
pub fn backfill_changed_fields(conn: &Connection, id: i64, fields: &[String]) -> Result<bool> {
    let json = serde_json::to_string(fields).context("encode changed_fields")?;
    let updated = conn
        .execute(
            "UPDATE historical_records SET changed_fields_json = ?1
             WHERE id = ?2 AND changed_fields_json IS NULL",
            params![json, id],
        )
        .with_context(|| format!("backfill changed_fields of record {id}"))?;
    Ok(updated == 1)
}

/// Human summary of a record, computing and persisting its diff on first
/// read when it was never computed.
///
/// Types missing from `registry` are diffed without field metadata, by
/// exact value comparison.
///
/// # Errors
///
/// Returns an error if a query or the backfill fails.
pub fn describe_record(conn: &Connection, registry: &Registry, record: &HistoricalRecord) -> Result<String> {
    let changed = if record.change_kind == ChangeKind::Update && record.changed_fields.is_none() {
        match previous_version(conn, record)? {
            None => None,
            Some(previous) => {
                let fields = match registry.get(&record.entity_type) {
                    Some(tracked) => diff(&tracked.meta, &record.data, Some(&previous.data), &tracked.excluded),
                    None => diff_untyped(&record.data, Some(&previous.data)),
                }
                .unwrap_or_default();
                backfill_changed_fields(conn, record.id, &fields)?;
                Some(fields)
            }
        }
    } else {
        record.changed_fields.clone()
    };

    Ok(change_summary(
        record.change_kind,
        &record.entity_type,
        changed.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::model::Attribution;
    use chrono::Duration;

    fn new_record(object_id: &str, kind: ChangeKind, question: &str) -> NewRecord {
        NewRecord {
            entity_type: "Poll".into(),
            object_id: object_id.into(),
            change_kind: kind,
            attribution: Attribution {
                name: Some("jdoe".into()),
                id: Some(7),
            },
            changed_fields: Some(Vec::new()),
            data: Snapshot::from([("question".to_string(), Some(question.to_string()))]),
            extra_data: ExtraData::from([("where_from".to_string(), "Import".to_string())]),
            related_record_id: None,
        }
    }

    #[test]
    fn insert_round_trips_every_column() -> Result<()> {
        let conn = open_in_memory()?;
        let mut new = new_record("1", ChangeKind::Create, "Q");
        new.data.insert("pub_date".into(), None);

        let written = insert_record(&conn, &new)?;
        let read = get_record(&conn, StoreTable::Live, written.id)?.expect("record exists");
        assert_eq!(read, written);
        assert_eq!(read.data["pub_date"], None);
        assert_eq!(read.actor_name.as_deref(), Some("jdoe"));
        assert!(get_record(&conn, StoreTable::Archive, written.id)?.is_none());
        Ok(())
    }

    #[test]
    fn ordering_follows_ids_even_with_equal_timestamps() -> Result<()> {
        let conn = open_in_memory()?;
        let at = Utc::now();
        let first = insert_record_at(&conn, &new_record("1", ChangeKind::Create, "Q"), at)?;
        let second = insert_record_at(&conn, &new_record("1", ChangeKind::Update, "Q2"), at)?;
        let other = insert_record_at(&conn, &new_record("2", ChangeKind::Create, "R"), at)?;

        let history = by_entity_and_id(&conn, "Poll", "1")?;
        assert_eq!(
            history.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(most_recent_for(&conn, "Poll", "1")?.map(|r| r.id), Some(second.id));
        assert_eq!(previous_version(&conn, &second)?.map(|r| r.id), Some(first.id));
        assert!(previous_version(&conn, &first)?.is_none());
        assert_eq!(
            by_entity_type(&conn, "Poll")?.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![other.id, second.id, first.id]
        );
        assert!(most_recent_for(&conn, "Poll", "404")?.is_none());
        Ok(())
    }

    #[test]
    fn counts_exact_and_approximate() -> Result<()> {
        let conn = open_in_memory()?;
        assert_eq!(count_records(&conn, StoreTable::Live)?, 0);
        assert_eq!(approximate_count(&conn, StoreTable::Live)?, 0);

        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(insert_record(&conn, &new_record(&n.to_string(), ChangeKind::Create, "Q"))?.id);
        }
        conn.execute("DELETE FROM historical_records WHERE id = ?1", params![ids[2]])?;

        assert_eq!(count_records(&conn, StoreTable::Live)?, 4);
        assert!(approximate_count(&conn, StoreTable::Live)? >= 4);

        conn.execute_batch("ANALYZE")?;
        assert_eq!(approximate_count(&conn, StoreTable::Live)?, 4);
        Ok(())
    }

    #[test]
    fn has_history_for_type_checks_live_rows() -> Result<()> {
        let conn = open_in_memory()?;
        assert!(!has_history_for_type(&conn, "Poll")?);
        insert_record(&conn, &new_record("1", ChangeKind::Create, "Q"))?;
        assert!(has_history_for_type(&conn, "Poll")?);
        assert!(!has_history_for_type(&conn, "Choice")?);
        Ok(())
    }

    #[test]
    fn describe_backfills_missing_diff_once() -> Result<()> {
        let conn = open_in_memory()?;
        let registry = Registry::default();
        let t0 = Utc::now() - Duration::minutes(5);

        let created = insert_record_at(&conn, &new_record("1", ChangeKind::Create, "Q"), t0)?;
        let mut update = new_record("1", ChangeKind::Update, "Q2");
        update.changed_fields = None;
        let updated = insert_record(&conn, &update)?;

        assert_eq!(describe_record(&conn, &registry, &created)?, "Created Poll");
        assert_eq!(describe_record(&conn, &registry, &updated)?, "Updated question");

        let stored = get_record(&conn, StoreTable::Live, updated.id)?.expect("record");
        assert_eq!(stored.changed_fields, Some(vec!["question".to_string()]));
        assert!(!backfill_changed_fields(&conn, updated.id, &[])?);

        let mut orphan = new_record("9", ChangeKind::Update, "Q");
        orphan.changed_fields = None;
        let orphan = insert_record(&conn, &orphan)?;
        assert_eq!(
            describe_record(&conn, &registry, &orphan)?,
            "No prior information available."
        );
        Ok(())
    }

    #[test]
    fn related_to_lists_propagated_records() -> Result<()> {
        let conn = open_in_memory()?;
        let origin = insert_record(&conn, &new_record("1", ChangeKind::Update, "Q"))?;
        let mut dependent = new_record("2", ChangeKind::Update, "R");
        dependent.related_record_id = Some(origin.id);
        let dependent = insert_record(&conn, &dependent)?;

        let related = related_to(&conn, origin.id)?;
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, dependent.id);
        Ok(())
    }
}
