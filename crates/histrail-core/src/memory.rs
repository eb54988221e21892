//! In-memory reference host.
//!
//! `MemoryHost` stores entities for embedding applications and tests that do
//! not bring their own persistence layer. It implements [`EntitySource`] and
//! dispatches lifecycle events to subscribed [`LifecycleListener`]s exactly
//! where a database-backed host would:
//!
//! - `after_save` once the row has been written,
//! - `before_delete` while the row and its relations are still readable,
//! - membership events in a pre and a post phase around the mutation.
//!
//! Forward single-valued relations and polymorphic pointers live on the row.
//! Many-to-many memberships live in an edge set shared by both ends of the
//! relation, so a change through either end is visible from the other.
//! One-to-many, reverse one-to-one and generic collections are derived by
//! scanning the owning side. Deleting an object drops its edges and nulls
//! pointers at it without firing further hooks.

use crate::hooks::{ChangeContext, HookPhase, LifecycleListener, MembershipAction, MembershipEvent};
use crate::model::{Cardinality, EntityMeta, FieldKind, FieldMeta};
use crate::snapshot::sort_ids;
use crate::source::{EntitySource, FieldValue, ObjectRef, ScalarValue, SourceError};
use anyhow::{Result, anyhow, bail};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Scalar(Option<ScalarValue>),
    Ref(Option<ObjectRef>),
}

type Row = BTreeMap<String, Slot>;

/// Canonical end of a many-to-many relation: `(entity_type, field)`.
type RelationKey = (String, String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Edge {
    relation: RelationKey,
    /// Id on the canonical end.
    left: String,
    /// Id on the partner end.
    right: String,
}

#[derive(Default)]
pub struct MemoryHost {
    types: BTreeMap<String, EntityMeta>,
    rows: BTreeMap<ObjectRef, Row>,
    edges: BTreeSet<Edge>,
    next_id: BTreeMap<String, u64>,
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an entity type.
    #[must_use]
    pub fn with_type(mut self, meta: EntityMeta) -> Self {
        self.types.insert(meta.name.clone(), meta);
        self
    }

    pub fn subscribe(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    /// Insert a row without firing any hook.
    ///
    /// # Errors
    ///
    /// Fails for unknown types, unknown fields, or values whose shape does
    /// not match the field.
    pub fn insert_raw(&mut self, entity_type: &str, values: &[(&str, FieldValue)]) -> Result<ObjectRef> {
        let meta = self
            .types
            .get(entity_type)
            .ok_or_else(|| anyhow!(SourceError::UnknownEntityType(entity_type.to_string())))?;

        let mut row = Row::new();
        for field in &meta.fields {
            match &field.kind {
                FieldKind::Scalar(_) => {
                    row.insert(field.name.clone(), Slot::Scalar(None));
                }
                FieldKind::GenericReference => {
                    row.insert(field.name.clone(), Slot::Ref(None));
                }
                FieldKind::Relation { cardinality, .. } if cardinality.is_single() => {
                    row.insert(field.name.clone(), Slot::Ref(None));
                }
                FieldKind::Relation { .. } | FieldKind::GenericCollection { .. } => {}
            }
        }
        for (name, value) in values {
            let slot = slot_for(meta, name, value.clone())?;
            row.insert((*name).to_string(), slot);
        }

        let counter = self.next_id.entry(entity_type.to_string()).or_insert(0);
        *counter += 1;
        let object = ObjectRef::new(entity_type, counter.to_string());
        self.rows.insert(object.clone(), row);
        Ok(object)
    }

    /// Overwrite fields without firing any hook.
    ///
    /// # Errors
    ///
    /// Fails when the object is missing or a value does not fit its field.
    pub fn set_raw(&mut self, object: &ObjectRef, values: &[(&str, FieldValue)]) -> Result<()> {
        let meta = self.meta_or_err(&object.entity_type)?;
        let mut slots = Vec::with_capacity(values.len());
        for (name, value) in values {
            slots.push(((*name).to_string(), slot_for(meta, name, value.clone())?));
        }
        let row = self
            .rows
            .get_mut(object)
            .ok_or_else(|| anyhow!(SourceError::ObjectNotFound(object.clone())))?;
        row.extend(slots);
        Ok(())
    }

    /// Create an instance and fire `after_save(created = true)`.
    ///
    /// # Errors
    ///
    /// Fails on invalid values or when a listener fails.
    pub fn create(
        &mut self,
        conn: &Connection,
        entity_type: &str,
        values: &[(&str, FieldValue)],
        context: &ChangeContext,
    ) -> Result<ObjectRef> {
        let object = self.insert_raw(entity_type, values)?;
        let host: &Self = self;
        host.dispatch(|listener| listener.after_save(conn, host, &object, true, context))?;
        Ok(object)
    }

    /// Apply field changes and fire `after_save(created = false)`.
    ///
    /// # Errors
    ///
    /// Fails on invalid values or when a listener fails.
    pub fn update(
        &mut self,
        conn: &Connection,
        object: &ObjectRef,
        values: &[(&str, FieldValue)],
        context: &ChangeContext,
    ) -> Result<()> {
        self.set_raw(object, values)?;
        self.save(conn, object, context)
    }

    /// Re-save an instance unchanged.
    ///
    /// # Errors
    ///
    /// Fails when the object is missing or a listener fails.
    pub fn save(&self, conn: &Connection, object: &ObjectRef, context: &ChangeContext) -> Result<()> {
        if !self.rows.contains_key(object) {
            bail!(SourceError::ObjectNotFound(object.clone()));
        }
        self.dispatch(|listener| listener.after_save(conn, self, object, false, context))
    }

    /// Fire `before_delete`, then remove the row.
    ///
    /// # Errors
    ///
    /// Fails when the object is missing or a listener fails; the row is
    /// left in place when a listener fails.
    pub fn delete(&mut self, conn: &Connection, object: &ObjectRef, context: &ChangeContext) -> Result<()> {
        if !self.rows.contains_key(object) {
            bail!(SourceError::ObjectNotFound(object.clone()));
        }
        let host: &Self = self;
        host.dispatch(|listener| listener.before_delete(conn, host, object, context))?;

        self.rows.remove(object);
        let relations: Vec<(RelationKey, bool)> = self
            .m2m_fields_of(&object.entity_type)
            .into_iter()
            .map(|(field, key)| {
                let on_left = key.0 == object.entity_type && key.1 == field;
                (key, on_left)
            })
            .collect();
        self.edges.retain(|edge| {
            !relations.iter().any(|(key, on_left)| {
                edge.relation == *key
                    && if *on_left {
                        edge.left == object.object_id
                    } else {
                        edge.right == object.object_id
                    }
            })
        });
        for row in self.rows.values_mut() {
            for slot in row.values_mut() {
                if matches!(slot, Slot::Ref(Some(target)) if target == object) {
                    *slot = Slot::Ref(None);
                }
            }
        }
        Ok(())
    }

    /// Add members to a many-to-many field.
    ///
    /// Objects that are already members are ignored; no events fire when
    /// nothing would change.
    ///
    /// # Errors
    ///
    /// Fails when the field is not many-to-many or a listener fails.
    pub fn add_members(
        &mut self,
        conn: &Connection,
        owner: &ObjectRef,
        field: &str,
        members: &[ObjectRef],
        context: &ChangeContext,
    ) -> Result<()> {
        let current = self.m2m_members(owner, field)?;
        let mut added: Vec<ObjectRef> = Vec::new();
        for member in members {
            if !current.contains(member) && !added.contains(member) {
                added.push(member.clone());
            }
        }
        if added.is_empty() {
            return Ok(());
        }

        self.fire_membership(conn, owner, field, MembershipAction::Add, HookPhase::Pre, &added, context)?;
        for member in &added {
            self.link(owner, field, member)?;
        }
        self.fire_membership(conn, owner, field, MembershipAction::Add, HookPhase::Post, &added, context)
    }

    /// Remove members from a many-to-many field.
    ///
    /// # Errors
    ///
    /// Fails when the field is not many-to-many or a listener fails.
    pub fn remove_members(
        &mut self,
        conn: &Connection,
        owner: &ObjectRef,
        field: &str,
        members: &[ObjectRef],
        context: &ChangeContext,
    ) -> Result<()> {
        let current = self.m2m_members(owner, field)?;
        let removed: Vec<ObjectRef> = members
            .iter()
            .filter(|member| current.contains(member))
            .cloned()
            .collect();
        if removed.is_empty() {
            return Ok(());
        }

        self.fire_membership(conn, owner, field, MembershipAction::Remove, HookPhase::Pre, &removed, context)?;
        for member in &removed {
            self.unlink(owner, field, member)?;
        }
        self.fire_membership(conn, owner, field, MembershipAction::Remove, HookPhase::Post, &removed, context)
    }

    /// Empty a many-to-many field in one call.
    ///
    /// # Errors
    ///
    /// Fails when the field is not many-to-many or a listener fails.
    pub fn clear_members(
        &mut self,
        conn: &Connection,
        owner: &ObjectRef,
        field: &str,
        context: &ChangeContext,
    ) -> Result<()> {
        let current = self.m2m_members(owner, field)?;
        self.fire_membership(conn, owner, field, MembershipAction::Clear, HookPhase::Pre, &[], context)?;
        for member in &current {
            self.unlink(owner, field, member)?;
        }
        self.fire_membership(conn, owner, field, MembershipAction::Clear, HookPhase::Post, &[], context)
    }

    /// Replace the membership of a many-to-many field.
    ///
    /// # Errors
    ///
    /// Fails when the field is not many-to-many or a listener fails.
    pub fn set_members(
        &mut self,
        conn: &Connection,
        owner: &ObjectRef,
        field: &str,
        members: &[ObjectRef],
        context: &ChangeContext,
    ) -> Result<()> {
        let current = self.m2m_members(owner, field)?;
        self.fire_membership(conn, owner, field, MembershipAction::Set, HookPhase::Pre, members, context)?;
        for member in &current {
            self.unlink(owner, field, member)?;
        }
        for member in members {
            self.link(owner, field, member)?;
        }
        self.fire_membership(conn, owner, field, MembershipAction::Set, HookPhase::Post, members, context)
    }

    fn dispatch(&self, mut call: impl FnMut(&dyn LifecycleListener) -> Result<()>) -> Result<()> {
        for listener in &self.listeners {
            call(listener.as_ref())?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn fire_membership(
        &self,
        conn: &Connection,
        owner: &ObjectRef,
        field: &str,
        action: MembershipAction,
        phase: HookPhase,
        members: &[ObjectRef],
        context: &ChangeContext,
    ) -> Result<()> {
        let event = MembershipEvent {
            owner,
            field,
            action,
            phase,
            members,
            context,
        };
        self.dispatch(|listener| listener.membership_changed(conn, self, &event))
    }

    fn meta_or_err(&self, entity_type: &str) -> Result<&EntityMeta, SourceError> {
        self.types
            .get(entity_type)
            .ok_or_else(|| SourceError::UnknownEntityType(entity_type.to_string()))
    }

    fn field_or_err(&self, object: &ObjectRef, field: &str) -> Result<&FieldMeta, SourceError> {
        self.meta_or_err(&object.entity_type)?
            .get(field)
            .ok_or_else(|| SourceError::UnknownField {
                entity_type: object.entity_type.clone(),
                field: field.to_string(),
            })
    }

    /// Partner end of a many-to-many field, if one is declared on either side.
    fn m2m_partner(&self, entity_type: &str, field: &FieldMeta) -> Option<RelationKey> {
        let target = field.target()?;
        let target_meta = self.types.get(target)?;
        if let Some(inverse) = field.declared_inverse()
            && target_meta.get(inverse).is_some()
        {
            return Some((target.to_string(), inverse.to_string()));
        }
        target_meta
            .fields
            .iter()
            .find(|candidate| {
                matches!(
                    &candidate.kind,
                    FieldKind::Relation {
                        cardinality: Cardinality::ManyToMany,
                        target: back,
                        inverse: Some(inverse),
                    } if back == entity_type && *inverse == field.name
                )
            })
            .map(|candidate| (target.to_string(), candidate.name.clone()))
    }

    fn canonical_key(&self, entity_type: &str, field: &FieldMeta) -> RelationKey {
        let own = (entity_type.to_string(), field.name.clone());
        match self.m2m_partner(entity_type, field) {
            Some(partner) if partner < own => partner,
            _ => own,
        }
    }

    fn m2m_fields_of(&self, entity_type: &str) -> Vec<(String, RelationKey)> {
        self.types.get(entity_type).map_or_else(Vec::new, |meta| {
            meta.fields
                .iter()
                .filter(|field| {
                    matches!(
                        field.kind,
                        FieldKind::Relation {
                            cardinality: Cardinality::ManyToMany,
                            ..
                        }
                    )
                })
                .map(|field| (field.name.clone(), self.canonical_key(entity_type, field)))
                .collect()
        })
    }

    fn m2m_field(&self, owner: &ObjectRef, field: &str) -> Result<(FieldMeta, RelationKey, bool)> {
        let meta = self.field_or_err(owner, field)?;
        let FieldKind::Relation {
            cardinality: Cardinality::ManyToMany,
            ..
        } = &meta.kind
        else {
            bail!("'{field}' on {owner} is not a many-to-many field");
        };
        let key = self.canonical_key(&owner.entity_type, meta);
        let on_left = key.0 == owner.entity_type && key.1 == field;
        Ok((meta.clone(), key, on_left))
    }

    fn m2m_members(&self, owner: &ObjectRef, field: &str) -> Result<Vec<ObjectRef>> {
        if !self.rows.contains_key(owner) {
            bail!(SourceError::ObjectNotFound(owner.clone()));
        }
        let (meta, key, on_left) = self.m2m_field(owner, field)?;
        let target = meta.target().unwrap_or_default();
        Ok(self
            .edges
            .iter()
            .filter(|edge| edge.relation == key)
            .filter_map(|edge| {
                if on_left && edge.left == owner.object_id {
                    Some(ObjectRef::new(target, edge.right.clone()))
                } else if !on_left && edge.right == owner.object_id {
                    Some(ObjectRef::new(target, edge.left.clone()))
                } else {
                    None
                }
            })
            .collect())
    }

    fn edge_for(&self, owner: &ObjectRef, field: &str, member: &ObjectRef) -> Result<Edge> {
        let (meta, relation, on_left) = self.m2m_field(owner, field)?;
        if meta.target() != Some(member.entity_type.as_str()) {
            bail!("{member} cannot be a member of '{field}' on {owner}");
        }
        if !self.rows.contains_key(member) {
            bail!(SourceError::ObjectNotFound(member.clone()));
        }
        let (left, right) = if on_left {
            (owner.object_id.clone(), member.object_id.clone())
        } else {
            (member.object_id.clone(), owner.object_id.clone())
        };
        Ok(Edge {
            relation,
            left,
            right,
        })
    }

    fn link(&mut self, owner: &ObjectRef, field: &str, member: &ObjectRef) -> Result<()> {
        let edge = self.edge_for(owner, field, member)?;
        self.edges.insert(edge);
        Ok(())
    }

    fn unlink(&mut self, owner: &ObjectRef, field: &str, member: &ObjectRef) -> Result<()> {
        let edge = self.edge_for(owner, field, member)?;
        self.edges.remove(&edge);
        Ok(())
    }

    /// Objects of `source_type` whose slot `via` points at `object`.
    fn pointing_at(&self, source_type: &str, via: impl Fn(&str) -> bool, object: &ObjectRef) -> Vec<ObjectRef> {
        self.rows
            .iter()
            .filter(|(candidate, _)| candidate.entity_type == source_type)
            .filter(|(_, row)| {
                row.iter().any(|(name, slot)| {
                    via(name) && matches!(slot, Slot::Ref(Some(target)) if target == object)
                })
            })
            .map(|(candidate, _)| candidate.clone())
            .collect()
    }

    /// Name of the to-one field on `target` that backs the reverse `field`.
    fn owning_field(&self, owner_type: &str, field: &FieldMeta, target: &str) -> Option<String> {
        let target_meta = self.types.get(target)?;
        if let Some(inverse) = field.declared_inverse()
            && target_meta.get(inverse).is_some()
        {
            return Some(inverse.to_string());
        }
        target_meta
            .fields
            .iter()
            .find(|candidate| {
                matches!(
                    &candidate.kind,
                    FieldKind::Relation { cardinality, target: back, inverse: Some(inverse) }
                        if cardinality.is_single() && back == owner_type && *inverse == field.name
                )
            })
            .map(|candidate| candidate.name.clone())
    }
}

fn slot_for(meta: &EntityMeta, name: &str, value: FieldValue) -> Result<Slot> {
    let field = meta.get(name).ok_or_else(|| {
        anyhow!(SourceError::UnknownField {
            entity_type: meta.name.clone(),
            field: name.to_string(),
        })
    })?;
    match (&field.kind, value) {
        (FieldKind::Scalar(_), FieldValue::Scalar(value)) => Ok(Slot::Scalar(value)),
        (FieldKind::GenericReference, FieldValue::One(target)) => Ok(Slot::Ref(target)),
        (FieldKind::Relation { cardinality, target, .. }, FieldValue::One(value))
            if cardinality.is_single() =>
        {
            if let Some(given) = &value
                && given.entity_type != *target
            {
                bail!("'{name}' on {} expects {target}, got {given}", meta.name);
            }
            Ok(Slot::Ref(value))
        }
        _ => bail!("'{name}' on {} cannot be assigned directly", meta.name),
    }
}

impl EntitySource for MemoryHost {
    fn meta(&self, entity_type: &str) -> Option<&EntityMeta> {
        self.types.get(entity_type)
    }

    fn read_field(&self, object: &ObjectRef, field: &str) -> Result<FieldValue, SourceError> {
        let meta = self.field_or_err(object, field)?;
        let row = self
            .rows
            .get(object)
            .ok_or_else(|| SourceError::ObjectNotFound(object.clone()))?;
        match (row.get(field), &meta.kind) {
            (Some(Slot::Scalar(value)), _) => Ok(FieldValue::Scalar(value.clone())),
            (Some(Slot::Ref(Some(target))), _) if !self.rows.contains_key(target) => {
                Err(SourceError::Dangling {
                    object: object.clone(),
                    field: field.to_string(),
                    target: target.clone(),
                })
            }
            (Some(Slot::Ref(target)), _) => Ok(FieldValue::One(target.clone())),
            (None, FieldKind::Scalar(_)) => Ok(FieldValue::Scalar(None)),
            (None, _) => Err(SourceError::WrongShape {
                object: object.clone(),
                field: field.to_string(),
                expected: "a single value",
            }),
        }
    }

    fn related_members(
        &self,
        object: &ObjectRef,
        field: &str,
    ) -> Result<Vec<ObjectRef>, SourceError> {
        let meta = self.field_or_err(object, field)?;
        if !self.rows.contains_key(object) {
            return Err(SourceError::ObjectNotFound(object.clone()));
        }
        let wrong_shape = || SourceError::WrongShape {
            object: object.clone(),
            field: field.to_string(),
            expected: "a collection",
        };

        let mut members = match &meta.kind {
            FieldKind::Relation {
                cardinality: Cardinality::ManyToMany,
                ..
            } => self.m2m_members(object, field).map_err(|_| wrong_shape())?,
            FieldKind::Relation {
                cardinality: Cardinality::OneToMany | Cardinality::ReverseOneToOne,
                target,
                ..
            } => match self.owning_field(&object.entity_type, meta, target) {
                Some(owning) => self.pointing_at(target, |name| name == owning, object),
                None => Vec::new(),
            },
            FieldKind::GenericCollection { target } => {
                let pointers: Vec<String> = self
                    .types
                    .get(target)
                    .map(|target_meta| {
                        target_meta
                            .fields
                            .iter()
                            .filter(|f| matches!(f.kind, FieldKind::GenericReference))
                            .map(|f| f.name.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                self.pointing_at(target, |name| pointers.iter().any(|p| p == name), object)
            }
            FieldKind::Scalar(_) | FieldKind::GenericReference | FieldKind::Relation { .. } => {
                return Err(wrong_shape());
            }
        };
        members.sort_by(|a, b| sort_ids(&a.object_id, &b.object_id));
        Ok(members)
    }

    fn exists(&self, object: &ObjectRef) -> bool {
        self.rows.contains_key(object)
    }

    fn object_ids(&self, entity_type: &str) -> Result<Vec<String>, SourceError> {
        self.meta_or_err(entity_type)?;
        let mut ids: Vec<String> = self
            .rows
            .keys()
            .filter(|object| object.entity_type == entity_type)
            .map(|object| object.object_id.clone())
            .collect();
        ids.sort_by(|a, b| sort_ids(a, b));
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldMeta, ValueKind};
    use std::sync::Mutex;

    fn host() -> MemoryHost {
        MemoryHost::new()
            .with_type(
                EntityMeta::new("Episode")
                    .field(FieldMeta::scalar("title", ValueKind::Text))
                    .field(
                        FieldMeta::relation("show", Cardinality::ManyToOne, "Show")
                            .with_inverse("specials"),
                    )
                    .field(
                        FieldMeta::relation("cast", Cardinality::ManyToMany, "Actor")
                            .with_inverse("filmography"),
                    ),
            )
            .with_type(
                EntityMeta::new("Show")
                    .field(FieldMeta::scalar("title", ValueKind::Text))
                    .field(
                        FieldMeta::relation("specials", Cardinality::OneToMany, "Episode")
                            .with_inverse("show"),
                    )
                    .field(FieldMeta::generic_collection("links", "Link")),
            )
            .with_type(
                EntityMeta::new("Actor")
                    .field(FieldMeta::scalar("name", ValueKind::Text))
                    .field(
                        FieldMeta::relation("filmography", Cardinality::ManyToMany, "Episode")
                            .with_inverse("cast"),
                    ),
            )
            .with_type(
                EntityMeta::new("Link")
                    .field(FieldMeta::scalar("url", ValueKind::Text))
                    .field(FieldMeta::generic_reference("related_object")),
            )
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl LifecycleListener for Recorder {
        fn after_save(
            &self,
            _conn: &Connection,
            _source: &dyn EntitySource,
            object: &ObjectRef,
            created: bool,
            _context: &ChangeContext,
        ) -> Result<()> {
            self.seen
                .lock()
                .expect("lock")
                .push(format!("save {object} created={created}"));
            Ok(())
        }

        fn before_delete(
            &self,
            _conn: &Connection,
            source: &dyn EntitySource,
            object: &ObjectRef,
            _context: &ChangeContext,
        ) -> Result<()> {
            let alive = source.exists(object);
            self.seen
                .lock()
                .expect("lock")
                .push(format!("delete {object} alive={alive}"));
            Ok(())
        }

        fn membership_changed(
            &self,
            _conn: &Connection,
            source: &dyn EntitySource,
            event: &MembershipEvent<'_>,
        ) -> Result<()> {
            let live = source.related_members(event.owner, event.field).expect("members").len();
            self.seen.lock().expect("lock").push(format!(
                "{:?} {:?} {} live={live}",
                event.phase, event.action, event.field
            ));
            Ok(())
        }
    }

    fn text(value: &str) -> FieldValue {
        FieldValue::Scalar(Some(ScalarValue::text(value)))
    }

    #[test]
    fn reverse_relations_are_derived_from_the_owning_side() {
        let mut host = host();
        let show = host.insert_raw("Show", &[("title", text("Mercy"))]).expect("show");
        let episode = host
            .insert_raw("Episode", &[("show", FieldValue::One(Some(show.clone())))])
            .expect("episode");
        let link = host
            .insert_raw("Link", &[("related_object", FieldValue::One(Some(show.clone())))])
            .expect("link");

        let specials = host.related_members(&show, "specials").expect("specials");
        assert_eq!(specials, vec![episode]);

        let links = host.related_members(&show, "links").expect("links");
        assert_eq!(links, vec![link]);
    }

    #[test]
    fn many_to_many_is_visible_from_both_ends() {
        let conn = Connection::open_in_memory().expect("conn");
        let mut host = host();
        let episode = host.insert_raw("Episode", &[]).expect("episode");
        let actor = host.insert_raw("Actor", &[]).expect("actor");

        host.add_members(&conn, &actor, "filmography", &[episode.clone()], &ChangeContext::anonymous())
            .expect("add");
        assert_eq!(
            host.related_members(&episode, "cast").expect("cast"),
            vec![actor.clone()]
        );

        host.clear_members(&conn, &episode, "cast", &ChangeContext::anonymous())
            .expect("clear");
        assert!(
            host.related_members(&actor, "filmography").expect("filmography").is_empty()
        );
    }

    #[test]
    fn hooks_fire_in_lifecycle_order() {
        let conn = Connection::open_in_memory().expect("conn");
        let mut host = host();
        let recorder = Arc::new(Recorder::default());
        host.subscribe(recorder.clone());
        let ctx = ChangeContext::anonymous();

        let episode = host.create(&conn, "Episode", &[("title", text("Pilot"))], &ctx).expect("create");
        let actor = host.create(&conn, "Actor", &[], &ctx).expect("actor");
        host.add_members(&conn, &episode, "cast", &[actor.clone()], &ctx).expect("add");
        host.add_members(&conn, &episode, "cast", &[actor], &ctx).expect("re-add is silent");
        host.clear_members(&conn, &episode, "cast", &ctx).expect("clear");
        host.delete(&conn, &episode, &ctx).expect("delete");

        let seen = recorder.seen.lock().expect("lock").clone();
        assert_eq!(
            seen,
            vec![
                "save Episode#1 created=true",
                "save Actor#1 created=true",
                "Pre Add cast live=0",
                "Post Add cast live=1",
                "Pre Clear cast live=1",
                "Post Clear cast live=0",
                "delete Episode#1 alive=true",
            ]
        );
        assert!(!host.exists(&ObjectRef::new("Episode", "1")));
    }

    #[test]
    fn delete_nulls_pointers_and_drops_edges() {
        let conn = Connection::open_in_memory().expect("conn");
        let mut host = host();
        let ctx = ChangeContext::anonymous();
        let show = host.insert_raw("Show", &[]).expect("show");
        let episode = host
            .insert_raw("Episode", &[("show", FieldValue::One(Some(show.clone())))])
            .expect("episode");
        let actor = host.insert_raw("Actor", &[]).expect("actor");
        host.add_members(&conn, &episode, "cast", &[actor.clone()], &ctx).expect("add");

        host.delete(&conn, &show, &ctx).expect("delete show");
        assert_eq!(host.read_field(&episode, "show"), Ok(FieldValue::One(None)));

        host.delete(&conn, &episode, &ctx).expect("delete episode");
        assert!(
            host.related_members(&actor, "filmography").expect("filmography").is_empty()
        );
    }

    #[test]
    fn dangling_pointer_is_a_read_error() {
        let mut host = host();
        let episode = host
            .insert_raw(
                "Episode",
                &[("show", FieldValue::One(Some(ObjectRef::new("Show", "99"))))],
            )
            .expect("episode");
        assert!(matches!(
            host.read_field(&episode, "show"),
            Err(SourceError::Dangling { .. })
        ));
    }

    #[test]
    fn rejects_mistyped_assignments() {
        let mut host = host();
        let actor = host.insert_raw("Actor", &[]).expect("actor");
        assert!(
            host.insert_raw("Episode", &[("show", FieldValue::One(Some(actor)))])
                .is_err()
        );
        assert!(host.insert_raw("Episode", &[("cast", text("1"))]).is_err());
        assert!(host.insert_raw("Nope", &[]).is_err());
    }

    #[test]
    fn object_ids_sort_numerically() {
        let mut host = host();
        for _ in 0..11 {
            host.insert_raw("Actor", &[]).expect("actor");
        }
        let ids = host.object_ids("Actor").expect("ids");
        assert_eq!(ids.first().map(String::as_str), Some("1"));
        assert_eq!(ids.last().map(String::as_str), Some("11"));
    }
}
