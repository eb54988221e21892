//! `htr archive`: move old records from the live table to the archive.

use super::{CmdContext, WindowArgs, open_existing_store, resolve_window};
use crate::output::{pretty_kv, pretty_section, render_mode};
use chrono::{DateTime, Utc};
use clap::Args;
use histrail_core::db::retention::{RetentionWindow, archive_older_than_at};
use serde::Serialize;
use tracing::info;

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Debug, Serialize)]
struct ArchiveOutput {
    window: RetentionWindow,
    cutoff: DateTime<Utc>,
    copied: usize,
    archived: usize,
}

/// Execute `htr archive`.
pub fn run_archive(args: &ArchiveArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let window = resolve_window(args.window, ctx)?;
    let mut conn = open_existing_store(&ctx.store_path, ctx.output)?;

    let cutoff = window.cutoff(Utc::now());
    let report = archive_older_than_at(&mut conn, cutoff)?;
    info!(%window, copied = report.copied, archived = report.archived, "archive run finished");

    let payload = ArchiveOutput {
        window,
        cutoff,
        copied: report.copied,
        archived: report.archived,
    };
    render_mode(
        ctx.output,
        &payload,
        |p, w| writeln!(w, "{} archived.", p.archived),
        |p, w| {
            pretty_section(w, "Archive")?;
            pretty_kv(w, "older than", p.window.to_string())?;
            pretty_kv(w, "cutoff", p.cutoff.to_rfc3339())?;
            pretty_kv(w, "copied", p.copied.to_string())?;
            writeln!(w)?;
            writeln!(w, "{} archived.", p.archived)
        },
    )
}
