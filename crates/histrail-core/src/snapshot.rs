//! Snapshot serializer: entity state to a flat `field -> string|null` map.

use crate::model::{EntityMeta, FieldKind, Snapshot};
use crate::source::{EntitySource, FieldValue, ObjectRef};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::warn;

/// Serialize `object` using `meta`'s declared fields minus `excluded`.
///
/// - scalars: `None` stays `None`, everything else is its canonical string
/// - to-one relations: the referenced id, or `None`
/// - multi-valued relations and generic collections: ascending id list
///   joined with `", "`; an empty relation is `""`, never `None`
/// - polymorphic pointers are omitted
///
/// A field that cannot be read is logged and stored as `None`; the rest of
/// the snapshot is still produced.
#[must_use]
pub fn serialize(
    source: &dyn EntitySource,
    meta: &EntityMeta,
    object: &ObjectRef,
    excluded: &BTreeSet<String>,
) -> Snapshot {
    let mut data = Snapshot::new();

    for field in &meta.fields {
        if excluded.contains(&field.name) {
            continue;
        }

        let value = match &field.kind {
            FieldKind::GenericReference => continue,
            FieldKind::Scalar(_) => match source.read_field(object, &field.name) {
                Ok(FieldValue::Scalar(value)) => value.map(|v| v.canonical()),
                Ok(other) => {
                    warn!(%object, field = %field.name, ?other, "unexpected value shape, storing null");
                    None
                }
                Err(err) => {
                    warn!(%object, field = %field.name, error = %err, "unreadable field, storing null");
                    None
                }
            },
            _ if !field.is_multi_valued() => match source.read_field(object, &field.name) {
                Ok(FieldValue::One(target)) => target.map(|t| t.object_id),
                Ok(other) => {
                    warn!(%object, field = %field.name, ?other, "unexpected value shape, storing null");
                    None
                }
                Err(err) => {
                    warn!(%object, field = %field.name, error = %err, "unreadable relation, storing null");
                    None
                }
            },
            _ => match source.related_members(object, &field.name) {
                Ok(members) => Some(format_id_list(members.iter().map(|m| m.object_id.as_str()))),
                Err(err) => {
                    warn!(%object, field = %field.name, error = %err, "unreadable collection, storing null");
                    None
                }
            },
        };

        data.insert(field.name.clone(), value);
    }

    data
}

/// Order ids numerically when both parse as integers, textually otherwise.
/// Integers sort before non-integers.
#[must_use]
pub fn sort_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// `["103", "12", "45"]` -> `"12, 45, 103"`. Duplicates collapse.
#[must_use]
pub fn format_id_list<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = ids.into_iter().collect();
    ids.sort_by(|a, b| sort_ids(a, b));
    ids.dedup();
    ids.join(", ")
}

/// Split a serialized id list back into tokens. Blank input yields nothing.
#[must_use]
pub fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
