//! History logging controller.
//!
//! [`HistoryLogger`] is the [`LifecycleListener`] a host subscribes. Every
//! event runs inline on the caller's connection: serialize, diff against the
//! newest stored snapshot, append, then propagate one hop. The controller
//! never opens a transaction of its own, so history commits or rolls back
//! together with the caller's write.

use crate::db::records::{insert_record, most_recent_for};
use crate::diff::diff;
use crate::hooks::{ChangeContext, HookPhase, LifecycleListener, MembershipAction, MembershipEvent};
use crate::model::{Actor, ChangeKind, HistoricalRecord, NewRecord};
use crate::propagate::{FieldDelta, MembershipDelta, Propagator, inverse_field_name};
use crate::registry::Registry;
use crate::snapshot::serialize;
use crate::source::{EntitySource, ObjectRef};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

type ClearKey = (ObjectRef, String);

/// Membership captured by a pre-clear/pre-set event, consumed by the
/// matching post event.
#[derive(Debug, Default)]
struct ClearedMembers {
    entries: Mutex<HashMap<ClearKey, Vec<ObjectRef>>>,
}

impl ClearedMembers {
    fn capture(&self, key: ClearKey, members: Vec<ObjectRef>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, members);
    }

    fn take(&self, key: &ClearKey) -> Option<Vec<ObjectRef>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct HistoryLogger {
    registry: Arc<Registry>,
    cleared: ClearedMembers,
}

impl HistoryLogger {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            cleared: ClearedMembers::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Memberships captured before a clear or set whose post event has not
    /// fired yet. Zero between operations.
    #[must_use]
    pub fn pending_cleared(&self) -> usize {
        self.cleared.len()
    }

    /// Record one change of `object` and propagate it.
    ///
    /// Returns `None` when nothing was written: the type is untracked, the
    /// actor is ignored, or an update changed nothing material.
    ///
    /// # Errors
    ///
    /// Store failures are returned unchanged; nothing is retried.
    pub fn record_change(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        object: &ObjectRef,
        kind: ChangeKind,
        context: &ChangeContext,
        delta: Option<&FieldDelta>,
    ) -> Result<Option<HistoricalRecord>> {
        let Some(tracked) = self.registry.get(&object.entity_type) else {
            return Ok(None);
        };

        let attribution = context.actor().map(Actor::attribution).unwrap_or_default();
        if tracked.ignored.matches(&attribution) {
            info!(
                %object,
                actor = ?attribution.name,
                actor_id = ?attribution.id,
                "ignored actor, not recording history"
            );
            return Ok(None);
        }

        let data = serialize(source, &tracked.meta, object, &tracked.excluded);
        let previous = most_recent_for(conn, &object.entity_type, &object.object_id)?;
        let previous_data = previous.as_ref().map(|record| &record.data);

        let changed_fields = match kind {
            ChangeKind::Update => {
                let changed = diff(&tracked.meta, &data, previous_data, &tracked.excluded);
                if changed.as_ref().is_some_and(Vec::is_empty) {
                    debug!(%object, "no material change, skipping");
                    return Ok(None);
                }
                changed
            }
            ChangeKind::Create | ChangeKind::Delete => Some(Vec::new()),
        };

        let extra_data = context
            .extra_data
            .clone()
            .unwrap_or_else(|| tracked.additional_data(source, object));

        let record = insert_record(
            conn,
            &NewRecord {
                entity_type: object.entity_type.clone(),
                object_id: object.object_id.clone(),
                change_kind: kind,
                attribution,
                changed_fields,
                data,
                extra_data,
                related_record_id: None,
            },
        )?;
        debug!(%object, record = record.id, kind = %kind, fields = ?record.changed_fields, "recorded change");

        Propagator::new(&self.registry, source).propagate(conn, &record, previous_data, delta)?;
        Ok(Some(record))
    }

    fn membership_settled(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        event: &MembershipEvent<'_>,
    ) -> Result<()> {
        let captured = self
            .cleared
            .take(&(event.owner.clone(), event.field.to_string()))
            .unwrap_or_default();

        if let Some(owner) = self.registry.get(&event.owner.entity_type)
            && !owner.excluded.contains(event.field)
        {
            let delta = match event.action {
                MembershipAction::Add => MembershipDelta::Added(event.members.to_vec()),
                MembershipAction::Remove => MembershipDelta::Removed(event.members.to_vec()),
                MembershipAction::Clear | MembershipAction::Set => {
                    MembershipDelta::Replaced { previous: captured }
                }
            };
            self.record_change(
                conn,
                source,
                event.owner,
                ChangeKind::Update,
                event.context,
                Some(&FieldDelta::new(event.field, delta)),
            )?;
            return Ok(());
        }

        // The owner side records nothing, so tracked members are updated
        // through their own inverse field.
        let Some(field) = source
            .meta(&event.owner.entity_type)
            .and_then(|meta| meta.get(event.field))
        else {
            warn!(owner = %event.owner, field = event.field, "membership change on unknown field");
            return Ok(());
        };

        let (added, removed): (Vec<&ObjectRef>, Vec<&ObjectRef>) = match event.action {
            MembershipAction::Add => (event.members.iter().collect(), Vec::new()),
            MembershipAction::Remove => (Vec::new(), event.members.iter().collect()),
            MembershipAction::Clear => (Vec::new(), captured.iter().collect()),
            MembershipAction::Set => (
                event.members.iter().filter(|m| !captured.contains(*m)).collect(),
                captured.iter().filter(|m| !event.members.contains(*m)).collect(),
            ),
        };

        let affected = added
            .into_iter()
            .map(|member| (member, true))
            .chain(removed.into_iter().map(|member| (member, false)));
        for (member, joined) in affected {
            if !self.registry.is_tracked(&member.entity_type) {
                continue;
            }
            let inverse = inverse_field_name(source, field, &event.owner.entity_type, &member.entity_type);
            let owner = vec![event.owner.clone()];
            let delta = if joined {
                MembershipDelta::Added(owner)
            } else {
                MembershipDelta::Removed(owner)
            };
            self.record_change(
                conn,
                source,
                member,
                ChangeKind::Update,
                event.context,
                Some(&FieldDelta::new(inverse, delta)),
            )?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for HistoryLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLogger")
            .field("tracked", &self.registry.len())
            .field("pending_cleared", &self.pending_cleared())
            .finish()
    }
}

impl LifecycleListener for HistoryLogger {
    fn after_save(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        object: &ObjectRef,
        created: bool,
        context: &ChangeContext,
    ) -> Result<()> {
        let kind = if created {
            ChangeKind::Create
        } else {
            ChangeKind::Update
        };
        self.record_change(conn, source, object, kind, context, None)?;
        Ok(())
    }

    fn before_delete(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        object: &ObjectRef,
        context: &ChangeContext,
    ) -> Result<()> {
        self.record_change(conn, source, object, ChangeKind::Delete, context, None)?;
        Ok(())
    }

    fn membership_changed(
        &self,
        conn: &Connection,
        source: &dyn EntitySource,
        event: &MembershipEvent<'_>,
    ) -> Result<()> {
        match (event.phase, event.action) {
            (HookPhase::Pre, MembershipAction::Clear | MembershipAction::Set) => {
                let members = source
                    .related_members(event.owner, event.field)
                    .with_context(|| format!("capture '{}' of {} before {:?}", event.field, event.owner, event.action))?;
                self.cleared
                    .capture((event.owner.clone(), event.field.to_string()), members);
                Ok(())
            }
            (HookPhase::Pre, MembershipAction::Add | MembershipAction::Remove) => Ok(()),
            (HookPhase::Post, _) => self.membership_settled(conn, source, event),
        }
    }
}
