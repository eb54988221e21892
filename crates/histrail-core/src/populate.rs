//! Bulk seeding of initial `CREATE` records for pre-existing instances.

use crate::db::records::{has_history_for_type, insert_record};
use crate::model::{Attribution, ChangeKind, NewRecord};
use crate::registry::{Registry, TrackedType};
use crate::snapshot::serialize;
use crate::source::{EntitySource, ObjectRef};
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info};

/// Skip reason reported for types that already have history.
pub const ALREADY_POPULATED: &str = "history already exists, skipping";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PopulateOutcome {
    Seeded { count: usize },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeOutcome {
    pub entity_type: String,
    #[serde(flatten)]
    pub outcome: PopulateOutcome,
}

/// Per-type results, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    pub types: Vec<TypeOutcome>,
}

impl PopulateReport {
    #[must_use]
    pub fn outcome(&self, entity_type: &str) -> Option<&PopulateOutcome> {
        self.types
            .iter()
            .find(|entry| entry.entity_type == entity_type)
            .map(|entry| &entry.outcome)
    }

    #[must_use]
    pub fn seeded(&self) -> usize {
        self.types
            .iter()
            .map(|entry| match entry.outcome {
                PopulateOutcome::Seeded { count } => count,
                _ => 0,
            })
            .sum()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.types
            .iter()
            .any(|entry| matches!(entry.outcome, PopulateOutcome::Failed { .. }))
    }
}

/// Seed one anonymous `CREATE` record per existing instance of every
/// registered type that has no history yet.
///
/// Each type is written in its own transaction; a failing type is rolled
/// back and reported without stopping the others.
pub fn populate_initial_history(
    conn: &mut Connection,
    registry: &Registry,
    source: &dyn EntitySource,
) -> PopulateReport {
    let mut report = PopulateReport::default();

    for tracked in registry.iter() {
        let outcome = match populate_type(conn, tracked, source) {
            Ok(Some(count)) => {
                info!(entity_type = tracked.name(), count, "seeded initial history");
                PopulateOutcome::Seeded { count }
            }
            Ok(None) => {
                info!(entity_type = tracked.name(), reason = ALREADY_POPULATED, "skipped type");
                PopulateOutcome::Skipped {
                    reason: ALREADY_POPULATED.to_string(),
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(entity_type = tracked.name(), error = %message, "failed to seed initial history");
                PopulateOutcome::Failed { error: message }
            }
        };
        report.types.push(TypeOutcome {
            entity_type: tracked.name().to_string(),
            outcome,
        });
    }

    report
}

fn populate_type(conn: &mut Connection, tracked: &TrackedType, source: &dyn EntitySource) -> Result<Option<usize>> {
    let entity_type = tracked.name();
    let tx = conn
        .transaction()
        .with_context(|| format!("begin population of {entity_type}"))?;
    if has_history_for_type(&tx, entity_type)? {
        return Ok(None);
    }

    let ids = source
        .object_ids(entity_type)
        .with_context(|| format!("list instances of {entity_type}"))?;
    for id in &ids {
        let object = ObjectRef::new(entity_type, id.as_str());
        insert_record(
            &tx,
            &NewRecord {
                entity_type: entity_type.to_string(),
                object_id: id.clone(),
                change_kind: ChangeKind::Create,
                attribution: Attribution::anonymous(),
                changed_fields: Some(Vec::new()),
                data: serialize(source, &tracked.meta, &object, &tracked.excluded),
                extra_data: tracked.additional_data(source, &object),
                related_record_id: None,
            },
        )?;
    }

    tx.commit()
        .with_context(|| format!("commit population of {entity_type}"))?;
    Ok(Some(ids.len()))
}
