//! `htr count`: number of records in the live or archive table.

use super::{CmdContext, open_existing_store};
use crate::output::{pretty_kv, pretty_section, render_mode};
use clap::Args;
use histrail_core::db::records::{StoreTable, approximate_count, count_records};
use serde::Serialize;

#[derive(Args, Debug)]
pub struct CountArgs {
    /// Count the archive table instead of the live table.
    #[arg(long)]
    pub archived: bool,

    /// Use a fast estimate instead of an exact count.
    #[arg(long)]
    pub approximate: bool,
}

#[derive(Debug, Serialize)]
struct CountOutput {
    table: &'static str,
    count: u64,
    approximate: bool,
}

/// Execute `htr count`.
pub fn run_count(args: &CountArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let conn = open_existing_store(&ctx.store_path, ctx.output)?;
    let table = if args.archived {
        StoreTable::Archive
    } else {
        StoreTable::Live
    };
    let count = if args.approximate {
        approximate_count(&conn, table)?
    } else {
        count_records(&conn, table)?
    };

    let payload = CountOutput {
        table: table.table_name(),
        count,
        approximate: args.approximate,
    };
    render_mode(
        ctx.output,
        &payload,
        |p, w| writeln!(w, "{}", p.count),
        |p, w| {
            pretty_section(w, "Records")?;
            pretty_kv(w, "table", p.table)?;
            let label = if p.approximate { "~count" } else { "count" };
            pretty_kv(w, label, p.count.to_string())
        },
    )
}
