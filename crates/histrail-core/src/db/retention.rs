//! Retention-window queries and the archive/delete batch jobs.

use super::records::StoreTable;
use super::schema::RECORD_COLUMNS;
use crate::error::RetentionError;
use crate::model::HistoricalRecord;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use std::fmt;
use tracing::info;

/// Age threshold for retention jobs. Exactly one unit is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "unit", content = "count", rename_all = "lowercase")]
pub enum RetentionWindow {
    Days(u32),
    Weeks(u32),
}

impl RetentionWindow {
    /// Build a window from optional `days`/`weeks` arguments.
    ///
    /// Zero counts as not supplied. When both are given, `weeks` is used
    /// and the discarded `days` value is logged.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::MissingWindow`] when neither is supplied.
    pub fn from_args(days: Option<u32>, weeks: Option<u32>) -> Result<Self, RetentionError> {
        match (days.filter(|d| *d > 0), weeks.filter(|w| *w > 0)) {
            (Some(days), Some(weeks)) => {
                info!(days, weeks, "both days and weeks supplied; using weeks");
                Ok(Self::Weeks(weeks))
            }
            (None, Some(weeks)) => Ok(Self::Weeks(weeks)),
            (Some(days), None) => Ok(Self::Days(days)),
            (None, None) => Err(RetentionError::MissingWindow),
        }
    }

    #[must_use]
    pub fn duration(self) -> Duration {
        match self {
            Self::Days(days) => Duration::days(i64::from(days)),
            Self::Weeks(weeks) => Duration::weeks(i64::from(weeks)),
        }
    }

    /// Records created at or before this instant fall inside the window.
    #[must_use]
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Days(days) => write!(f, "{days} days"),
            Self::Weeks(weeks) => write!(f, "{weeks} weeks"),
        }
    }
}

/// Outcome of an archive run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    /// Rows newly written to the archive table.
    pub copied: usize,
    /// Rows removed from the live table.
    pub archived: usize,
}

/// Records created at or before `now - window`, newest first.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn older_than(conn: &Connection, table: StoreTable, window: RetentionWindow) -> Result<Vec<HistoricalRecord>> {
    older_than_at(conn, table, window.cutoff(Utc::now()))
}

/// Records created at or before `cutoff`, newest first.
///
/// # Errors
///
/// Returns an error if the query or decoding fails.
pub fn older_than_at(conn: &Connection, table: StoreTable, cutoff: DateTime<Utc>) -> Result<Vec<HistoricalRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM {}
         WHERE created_at_us <= ?1
         ORDER BY id DESC",
        table.table_name()
    );
    super::records::query_records(conn, &sql, params![cutoff.timestamp_micros()])
        .with_context(|| format!("records older than {cutoff}"))
}

/// Move live records older than `window` into the archive table.
///
/// # Errors
///
/// Returns an error if the copy or delete fails; the transaction is rolled
/// back and the live table is left untouched.
pub fn archive_older_than(conn: &mut Connection, window: RetentionWindow) -> Result<ArchiveReport> {
    archive_older_than_at(conn, window.cutoff(Utc::now()))
}

/// Move live records created at or before `cutoff` into the archive table.
///
/// The copy keeps ids and uses `INSERT OR IGNORE`, and the delete only
/// removes rows whose id is present in the archive. A rerun after an
/// interrupted job therefore neither duplicates nor loses records.
///
/// # Errors
///
/// Returns an error if the copy or delete fails.
pub fn archive_older_than_at(conn: &mut Connection, cutoff: DateTime<Utc>) -> Result<ArchiveReport> {
    let cutoff_us = cutoff.timestamp_micros();
    let tx = conn.transaction().context("begin archive transaction")?;

    let copied = tx
        .execute(
            &format!(
                "INSERT OR IGNORE INTO archived_historical_records ({RECORD_COLUMNS})
                 SELECT {RECORD_COLUMNS} FROM historical_records
                 WHERE created_at_us <= ?1"
            ),
            params![cutoff_us],
        )
        .context("copy records into archive")?;

    let archived = tx
        .execute(
            "DELETE FROM historical_records
             WHERE created_at_us <= ?1
               AND id IN (SELECT id FROM archived_historical_records)",
            params![cutoff_us],
        )
        .context("delete archived records from live table")?;

    tx.commit().context("commit archive transaction")?;
    info!(copied, archived, "archived historical records");
    Ok(ArchiveReport { copied, archived })
}

/// Permanently delete records older than `window` from `table`.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_older_than(conn: &Connection, table: StoreTable, window: RetentionWindow) -> Result<usize> {
    delete_older_than_at(conn, table, window.cutoff(Utc::now()))
}

/// Permanently delete records created at or before `cutoff` from `table`.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_older_than_at(conn: &Connection, table: StoreTable, cutoff: DateTime<Utc>) -> Result<usize> {
    let deleted = conn
        .execute(
            &format!("DELETE FROM {} WHERE created_at_us <= ?1", table.table_name()),
            params![cutoff.timestamp_micros()],
        )
        .with_context(|| format!("delete old rows from {}", table.table_name()))?;
    info!(deleted, table = table.table_name(), "deleted historical records");
    Ok(deleted)
}
