//! `htr history`: list records of a type or of one instance, newest first.

use super::{CmdContext, open_existing_store};
use crate::output::{pretty_kv, pretty_rule, render_mode};
use chrono::{DateTime, Utc};
use clap::Args;
use histrail_core::db::records::{StoreTable, by_entity_and_id, by_entity_type, describe_record, get_record};
use histrail_core::model::{ChangeKind, ExtraData};
use histrail_core::registry::Registry;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Entity type name, e.g. `Episode`.
    pub entity_type: String,

    /// Restrict to one instance.
    pub object_id: Option<String>,

    /// Maximum number of records to show.
    #[arg(short = 'n', long, default_value_t = 20)]
    pub limit: usize,
}

#[derive(Debug, Serialize)]
struct HistoryEntry {
    id: i64,
    entity_type: String,
    object_id: String,
    created_at: DateTime<Utc>,
    change_kind: ChangeKind,
    actor: Option<String>,
    summary: String,
    changed_fields: Option<Vec<String>>,
    related_record_id: Option<i64>,
    extra_data: ExtraData,
}

/// Execute `htr history`.
pub fn run_history(args: &HistoryArgs, ctx: &CmdContext) -> anyhow::Result<()> {
    let conn = open_existing_store(&ctx.store_path, ctx.output)?;
    let records = match &args.object_id {
        Some(object_id) => by_entity_and_id(&conn, &args.entity_type, object_id)?,
        None => by_entity_type(&conn, &args.entity_type)?,
    };

    // No host metadata here: records written without a diff are backfilled
    // by exact comparison, so a reordered id list counts as a change.
    let registry = Registry::default();
    let mut entries = Vec::with_capacity(records.len().min(args.limit));
    for record in records.into_iter().take(args.limit) {
        let summary = describe_record(&conn, &registry, &record)?;
        // describe_record may have just stored a computed diff.
        let changed_fields = match record.changed_fields {
            Some(fields) => Some(fields),
            None => get_record(&conn, StoreTable::Live, record.id)?.and_then(|r| r.changed_fields),
        };
        entries.push(HistoryEntry {
            id: record.id,
            actor: record.actor_name,
            summary,
            entity_type: record.entity_type,
            object_id: record.object_id,
            created_at: record.created_at,
            change_kind: record.change_kind,
            changed_fields,
            related_record_id: record.related_record_id,
            extra_data: record.extra_data,
        });
    }

    render_mode(
        ctx.output,
        &entries,
        |entries, w| {
            for e in entries {
                writeln!(
                    w,
                    "{}  {}  {}#{}  {}  {}  {}",
                    e.id,
                    e.created_at.to_rfc3339(),
                    e.entity_type,
                    e.object_id,
                    e.change_kind,
                    e.actor.as_deref().unwrap_or("-"),
                    e.summary
                )?;
            }
            Ok(())
        },
        |entries, w| {
            if entries.is_empty() {
                return writeln!(w, "No history for {}.", args.entity_type);
            }
            for e in entries {
                writeln!(w, "#{}  {}#{}  {}", e.id, e.entity_type, e.object_id, e.summary)?;
                pretty_rule(w)?;
                pretty_kv(w, "when", e.created_at.to_rfc3339())?;
                pretty_kv(w, "actor", e.actor.as_deref().unwrap_or("(anonymous)"))?;
                if let Some(origin) = e.related_record_id {
                    pretty_kv(w, "via record", origin.to_string())?;
                }
                for (key, value) in &e.extra_data {
                    pretty_kv(w, key, value)?;
                }
                writeln!(w)?;
            }
            Ok(())
        },
    )
}
