//! `htr delete`: permanently drop old records from the live or archive table.

use super::{CmdContext, WindowArgs, open_existing_store, resolve_window};
use crate::output::{pretty_kv, pretty_section, render_mode};
use chrono::{DateTime, Utc};
use clap::Args;
use histrail_core::db::records::StoreTable;
use histrail_core::db::retention::{RetentionWindow, delete_older_than_at};
use serde::Serialize;
use tracing::info;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub window: WindowArgs,

    /// Delete from the archive table instead of the live table.
    #[arg(long)]
    pub archived: bool,
}

#[derive(Debug, Serialize)]
struct DeleteOutput {
    table: &'static str,
    window: RetentionWindow,
    cutoff: DateTime<Utc>,
    deleted: usize,
}

/// Execute `htr delete`.
pub fn run_delete(args: &DeleteArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let window = resolve_window(args.window, ctx)?;
    let conn = open_existing_store(&ctx.store_path, ctx.output)?;

    let table = if args.archived {
        StoreTable::Archive
    } else {
        StoreTable::Live
    };
    let cutoff = window.cutoff(Utc::now());
    let deleted = delete_older_than_at(&conn, table, cutoff)?;
    info!(table = table.table_name(), %window, deleted, "delete run finished");

    let payload = DeleteOutput {
        table: table.table_name(),
        window,
        cutoff,
        deleted,
    };
    render_mode(
        ctx.output,
        &payload,
        |p, w| writeln!(w, "{} deleted.", p.deleted),
        |p, w| {
            pretty_section(w, "Delete")?;
            pretty_kv(w, "table", p.table)?;
            pretty_kv(w, "older than", p.window.to_string())?;
            pretty_kv(w, "cutoff", p.cutoff.to_rfc3339())?;
            writeln!(w)?;
            writeln!(w, "{} deleted.", p.deleted)
        },
    )
}
