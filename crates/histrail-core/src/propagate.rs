//! Relationship propagation: one-hop history for related tracked objects.
//!
//! When a tracked object A gets a new record, every tracked object B that A
//! gained, lost or (for interested relations) still holds through a relation
//! field receives one `UPDATE` record pointing back at A's record. Those
//! records are written directly and never propagate further.

use crate::db::records::insert_record;
use crate::error::PropagationError;
use crate::model::{ChangeKind, FieldKind, FieldMeta, HistoricalRecord, NewRecord, Snapshot, snake_case};
use crate::registry::{Registry, TrackedType};
use crate::snapshot::{format_id_list, parse_id_list, serialize};
use crate::source::{EntitySource, FieldValue, ObjectRef, SourceError};
use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info, warn};

/// How a related object's membership changed between two points in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Added,
    Removed,
    Unmodified,
}

/// Explicit membership change of one multi-valued field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipDelta {
    Added(Vec<ObjectRef>),
    Removed(Vec<ObjectRef>),
    /// Clear or set: the membership captured before the change.
    Replaced { previous: Vec<ObjectRef> },
}

/// A [`MembershipDelta`] bound to the field it happened on. When present it
/// replaces the prior snapshot as the source of the previous membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDelta {
    pub field: String,
    pub delta: MembershipDelta,
}

impl FieldDelta {
    #[must_use]
    pub fn new(field: impl Into<String>, delta: MembershipDelta) -> Self {
        Self {
            field: field.into(),
            delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Direct,
    Interested,
}

impl Pass {
    fn keeps(self, membership: Membership) -> bool {
        match self {
            Self::Direct => membership != Membership::Unmodified,
            Self::Interested => true,
        }
    }
}

/// One pending related record, merged across fields and passes.
#[derive(Debug)]
struct Notice {
    object: ObjectRef,
    inverse_names: Vec<String>,
    membership: Membership,
}

pub struct Propagator<'a> {
    registry: &'a Registry,
    source: &'a dyn EntitySource,
}

impl<'a> Propagator<'a> {
    #[must_use]
    pub fn new(registry: &'a Registry, source: &'a dyn EntitySource) -> Self {
        Self { registry, source }
    }

    /// Write the related records caused by `origin`.
    ///
    /// `previous` is the snapshot `origin` was diffed against. Failures to
    /// resolve a single relation are logged and that relation is skipped.
    ///
    /// Records are written in discovery order: objects that joined or left
    /// through a changed field come first, then unchanged members picked up
    /// by interested fields.
    ///
    /// # Errors
    ///
    /// Returns an error only when writing a related record fails.
    pub fn propagate(
        &self,
        conn: &Connection,
        origin: &HistoricalRecord,
        previous: Option<&Snapshot>,
        delta: Option<&FieldDelta>,
    ) -> Result<Vec<HistoricalRecord>> {
        let Some(tracked) = self.registry.get(&origin.entity_type) else {
            return Ok(Vec::new());
        };
        let origin_ref = ObjectRef::new(&origin.entity_type, &origin.object_id);

        let passes = candidate_fields(tracked, origin, delta)
            .into_iter()
            .map(|field| (field, Pass::Direct))
            .chain(tracked.interested.iter().map(|field| (field, Pass::Interested)));

        let mut notices: Vec<Notice> = Vec::new();
        for (field, pass) in passes {
            let related = match self.related_changes(field, &origin_ref, origin.change_kind, previous, delta) {
                Ok(related) => related,
                Err(err) => {
                    warn!(
                        origin = %origin_ref,
                        field = %field.name,
                        code = %err.code(),
                        error = %err,
                        "cannot resolve relation, skipping propagation for it"
                    );
                    continue;
                }
            };
            for (object, membership) in related {
                if pass.keeps(membership) && object != origin_ref {
                    self.note(&mut notices, field, &origin_ref, object, membership);
                }
            }
        }

        let mut written = Vec::with_capacity(notices.len());
        for notice in &notices {
            if let Some(record) = self.write_notice(conn, origin, tracked, notice)? {
                written.push(record);
            }
        }
        Ok(written)
    }

    fn related_changes(
        &self,
        field: &FieldMeta,
        origin: &ObjectRef,
        kind: ChangeKind,
        previous: Option<&Snapshot>,
        delta: Option<&FieldDelta>,
    ) -> Result<Vec<(ObjectRef, Membership)>, PropagationError> {
        if let Some(target) = field.target() {
            if self.source.meta(target).is_none() {
                return Err(PropagationError::UnknownTarget {
                    entity_type: origin.entity_type.clone(),
                    field: field.name.clone(),
                    target: target.to_string(),
                });
            }
            if !self.registry.is_tracked(target) {
                debug!(%origin, field = %field.name, target, "related type is not tracked");
                return Ok(Vec::new());
            }
        }

        let current = self.current_members(origin, field)?;
        let delta = delta.filter(|d| d.field == field.name).map(|d| &d.delta);

        let mut related = match (delta, kind) {
            (None, ChangeKind::Delete) => current
                .into_iter()
                .map(|object| (object, Membership::Removed))
                .collect(),
            (Some(delta), _) => {
                let before = previous_from_delta(&current, delta);
                self.classify(current, &before)
            }
            (None, ChangeKind::Create) => self.classify(current, &[]),
            (None, ChangeKind::Update) => {
                let before = match (previous.and_then(|snap| snap.get(&field.name)), field.target()) {
                    (Some(raw), Some(target)) => raw
                        .as_deref()
                        .map(parse_id_list)
                        .unwrap_or_default()
                        .into_iter()
                        .map(|id| ObjectRef::new(target, id))
                        .collect(),
                    _ => current.clone(),
                };
                self.classify(current, &before)
            }
        };

        related.retain(|(object, _)| {
            let tracked = self.registry.is_tracked(&object.entity_type);
            if !tracked {
                debug!(%origin, field = %field.name, %object, "related object is not tracked");
            }
            tracked
        });
        Ok(related)
    }

    fn current_members(&self, origin: &ObjectRef, field: &FieldMeta) -> Result<Vec<ObjectRef>, SourceError> {
        if field.is_multi_valued() {
            return self.source.related_members(origin, &field.name);
        }
        match self.source.read_field(origin, &field.name)? {
            FieldValue::One(target) => Ok(target.into_iter().collect()),
            FieldValue::Scalar(_) => Err(SourceError::WrongShape {
                object: origin.clone(),
                field: field.name.clone(),
                expected: "a reference",
            }),
        }
    }

    /// Set difference between `current` and `previous`. Removed objects
    /// that no longer exist are dropped.
    fn classify(&self, current: Vec<ObjectRef>, previous: &[ObjectRef]) -> Vec<(ObjectRef, Membership)> {
        let mut related = Vec::with_capacity(current.len() + previous.len());
        for object in previous {
            if current.contains(object) || related.iter().any(|(seen, _)| seen == object) {
                continue;
            }
            if self.source.exists(object) {
                related.push((object.clone(), Membership::Removed));
            } else {
                debug!(%object, "removed object no longer exists");
            }
        }
        for object in current {
            let membership = if previous.contains(&object) {
                Membership::Unmodified
            } else {
                Membership::Added
            };
            related.push((object, membership));
        }
        related
    }

    fn note(
        &self,
        notices: &mut Vec<Notice>,
        field: &FieldMeta,
        origin: &ObjectRef,
        object: ObjectRef,
        membership: Membership,
    ) {
        let inverse = inverse_field_name(self.source, field, &origin.entity_type, &object.entity_type);
        if let Some(related) = self.registry.get(&object.entity_type)
            && related.excluded.contains(&inverse)
        {
            debug!(%object, field = %inverse, "inverse field is excluded, no related record");
            return;
        }

        match notices.iter_mut().find(|notice| notice.object == object) {
            Some(existing) => {
                if !existing.inverse_names.contains(&inverse) {
                    existing.inverse_names.push(inverse);
                }
                if existing.membership == Membership::Unmodified {
                    existing.membership = membership;
                }
            }
            None => notices.push(Notice {
                object,
                inverse_names: vec![inverse],
                membership,
            }),
        }
    }

    fn write_notice(
        &self,
        conn: &Connection,
        origin: &HistoricalRecord,
        origin_type: &TrackedType,
        notice: &Notice,
    ) -> Result<Option<HistoricalRecord>> {
        let Some(related) = self.registry.get(&notice.object.entity_type) else {
            return Ok(None);
        };
        let attribution = origin.attribution();
        if related.ignored.matches(&attribution) {
            info!(object = %notice.object, actor = ?attribution.name, "ignored actor, no related record");
            return Ok(None);
        }

        let mut data = serialize(self.source, &related.meta, &notice.object, &related.excluded);
        if origin.change_kind == ChangeKind::Delete {
            strip_reference(&mut data, related, &notice.inverse_names, &origin.object_id);
        }

        let action = match (origin.change_kind, notice.membership) {
            (ChangeKind::Update, Membership::Added) => "Added",
            (ChangeKind::Update, Membership::Removed) => "Removed",
            (kind, _) => kind.verb(),
        };
        let mut extra_data = origin.extra_data.clone();
        extra_data.insert(
            origin_type.meta.snake_name(),
            format!("{action} {}", origin.entity_type),
        );

        let record = insert_record(
            conn,
            &NewRecord {
                entity_type: notice.object.entity_type.clone(),
                object_id: notice.object.object_id.clone(),
                change_kind: ChangeKind::Update,
                attribution,
                changed_fields: Some(notice.inverse_names.clone()),
                data,
                extra_data,
                related_record_id: Some(origin.id),
            },
        )?;
        debug!(
            object = %notice.object,
            record = record.id,
            origin = origin.id,
            fields = ?notice.inverse_names,
            "wrote related record"
        );
        Ok(Some(record))
    }
}

/// Fields of the origin type the direct pass inspects.
fn candidate_fields<'t>(
    tracked: &'t TrackedType,
    origin: &HistoricalRecord,
    delta: Option<&FieldDelta>,
) -> Vec<&'t FieldMeta> {
    let changed = match origin.change_kind {
        ChangeKind::Update => origin.changed_fields.as_deref(),
        ChangeKind::Create | ChangeKind::Delete => None,
    };
    tracked
        .meta
        .relations()
        .filter(|field| {
            let name = field.name.as_str();
            let touched = changed.map_or_else(
                || origin.data.contains_key(name),
                |changed| changed.iter().any(|c| c == name),
            );
            touched || tracked.excluded.contains(name) || delta.is_some_and(|d| d.field == name)
        })
        .collect()
}

fn previous_from_delta(current: &[ObjectRef], delta: &MembershipDelta) -> Vec<ObjectRef> {
    match delta {
        MembershipDelta::Added(added) => current
            .iter()
            .filter(|object| !added.contains(object))
            .cloned()
            .collect(),
        MembershipDelta::Removed(removed) => {
            let mut before = current.to_vec();
            for object in removed {
                if !before.contains(object) {
                    before.push(object.clone());
                }
            }
            before
        }
        MembershipDelta::Replaced { previous } => previous.clone(),
    }
}

/// Name under which `related_type` sees `field` of `origin_type`.
///
/// Resolution order: the field's declared inverse, a relation on the
/// related type that names this field as its inverse, a generic collection
/// on the related type targeting the origin type (for polymorphic
/// pointers), and finally the origin type's snake-case name.
#[must_use]
pub fn inverse_field_name(
    source: &dyn EntitySource,
    field: &FieldMeta,
    origin_type: &str,
    related_type: &str,
) -> String {
    if let Some(inverse) = field.declared_inverse() {
        return inverse.to_string();
    }
    let Some(meta) = source.meta(related_type) else {
        return snake_case(origin_type);
    };

    let by_inverse = meta.fields.iter().find(|candidate| {
        matches!(
            &candidate.kind,
            FieldKind::Relation { target, inverse: Some(inverse), .. }
                if target == origin_type && *inverse == field.name
        )
    });
    let by_collection = || {
        meta.fields.iter().find(|candidate| {
            matches!(field.kind, FieldKind::GenericReference)
                && matches!(&candidate.kind, FieldKind::GenericCollection { target } if target == origin_type)
        })
    };

    by_inverse
        .or_else(by_collection)
        .map_or_else(|| snake_case(origin_type), |candidate| candidate.name.clone())
}

/// Drop `origin_id` from the serialized inverse fields of a related object
/// whose origin is being deleted.
fn strip_reference(data: &mut Snapshot, related: &TrackedType, fields: &[String], origin_id: &str) {
    for name in fields {
        let multi = related.meta.get(name).is_some_and(FieldMeta::is_multi_valued);
        let Some(slot) = data.get_mut(name) else {
            continue;
        };
        let Some(value) = slot.as_ref() else {
            continue;
        };
        *slot = if multi {
            let ids = parse_id_list(value);
            Some(format_id_list(
                ids.iter().map(String::as_str).filter(|id| *id != origin_id),
            ))
        } else if value == origin_id {
            None
        } else {
            continue;
        };
    }
}
