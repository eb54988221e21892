//! SQLite-backed history record store.
//!
//! Every connection runs with `foreign_keys = ON`, since `related_record_id`
//! relies on `ON DELETE SET NULL` to survive the deletion of its origin.
//! File stores additionally use WAL with `synchronous = NORMAL` and a
//! busy timeout, so admin commands can run next to a live writer.

pub mod migrations;
pub mod records;
pub mod retention;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::{path::Path, time::Duration};

/// Busy timeout used for file store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backing {
    File,
    Memory,
}

/// Open (or create) the store at `path` and migrate it to the latest
/// schema version. Missing parent directories are created.
///
/// # Errors
///
/// Returns an error if opening, configuring or migrating the database fails.
pub fn open_store(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create history store directory {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("open history store {}", path.display()))?;
    prepare(conn, Backing::File)
}

/// Open a store that must already exist. Nothing is created on disk when
/// `path` is missing.
///
/// # Errors
///
/// Returns an error if the file does not exist, or opening, configuring or
/// migrating it fails.
pub fn open_existing(path: &Path) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("open existing history store {}", path.display()))?;
    prepare(conn, Backing::File)
}

/// Migrated in-memory store, for embedding and tests.
///
/// # Errors
///
/// Returns an error if configuring or migrating the database fails.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("open in-memory history store")?;
    prepare(conn, Backing::Memory)
}

fn prepare(mut conn: Connection, backing: Backing) -> Result<Connection> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("enable foreign keys")?;
    if backing == Backing::File {
        let _journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("switch to WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("set synchronous")?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .context("set busy timeout")?;
    }
    migrations::migrate(&mut conn).context("apply history store migrations")?;
    Ok(conn)
}
