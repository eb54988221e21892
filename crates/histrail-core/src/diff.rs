//! Pure field-level diff between two snapshots.
//!
//! No I/O happens here: everything needed comes in through the arguments.

use crate::model::{ChangeKind, EntityMeta, FieldMeta, Snapshot, ValueKind};
use crate::snapshot::parse_id_list;
use std::collections::BTreeSet;

/// Fields of `current` whose value differs from `previous`.
///
/// - `None`: there is no previous snapshot, the caller always records.
/// - `Some([])`: nothing material changed, the caller skips the write.
/// - `Some(fields)`: changed field names in declaration order.
///
/// Fields listed in `excluded` never count as changed.
#[must_use]
pub fn diff(
    meta: &EntityMeta,
    current: &Snapshot,
    previous: Option<&Snapshot>,
    excluded: &BTreeSet<String>,
) -> Option<Vec<String>> {
    let previous = previous?;

    let changed = meta
        .fields
        .iter()
        .filter(|field| !excluded.contains(&field.name))
        .filter_map(|field| {
            let now = current.get(&field.name)?;
            let differs = match previous.get(&field.name) {
                Some(before) => !values_equal(field, now.as_deref(), before.as_deref()),
                None => !is_intrinsic_default(field, now.as_deref()),
            };
            differs.then(|| field.name.clone())
        })
        .collect();

    Some(changed)
}

/// [`diff`] for snapshots whose type metadata is unavailable: keys of
/// `current` compared by exact value, in key order. A key missing from
/// `previous` counts only when its current value is non-empty.
#[must_use]
pub fn diff_untyped(current: &Snapshot, previous: Option<&Snapshot>) -> Option<Vec<String>> {
    let previous = previous?;
    Some(
        current
            .iter()
            .filter(|(name, now)| match previous.get(*name) {
                Some(before) => before != *now,
                None => now.as_deref().is_some_and(|value| !value.is_empty()),
            })
            .map(|(name, _)| name.clone())
            .collect(),
    )
}

fn values_equal(field: &FieldMeta, now: Option<&str>, before: Option<&str>) -> bool {
    let (Some(now), Some(before)) = (now, before) else {
        return now == before;
    };
    if field.is_multi_valued() || field.value_kind() == Some(ValueKind::Array) {
        return token_set(now) == token_set(before);
    }
    if field.value_kind() == Some(ValueKind::Json) {
        return json_equal(now, before);
    }
    now == before
}

/// A field missing from an older snapshot only counts as changed when its
/// current value is something other than the value a new column would get.
fn is_intrinsic_default(field: &FieldMeta, now: Option<&str>) -> bool {
    let Some(now) = now else {
        return true;
    };
    if field.is_multi_valued() {
        return now.trim().is_empty();
    }
    match field.value_kind() {
        Some(ValueKind::Json) => json_equal(now, "{}"),
        Some(kind) => kind.intrinsic_default() == Some(now),
        None => false,
    }
}

fn token_set(raw: &str) -> BTreeSet<String> {
    parse_id_list(raw).into_iter().collect()
}

fn json_equal(a: &str, b: &str) -> bool {
    match (parse_lenient_json(a), parse_lenient_json(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Parse JSON text, falling back to the single-quoted literal form some
/// hosts emit for native structures (`{'a': True, 'b': None}`).
#[must_use]
pub fn parse_lenient_json(raw: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Some(value);
    }
    let normalized = normalize_native_literal(raw);
    serde_json::from_str(&normalized).ok()
}

fn normalize_native_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut word = String::new();
    let mut in_string = false;

    let flush = |word: &mut String, out: &mut String| {
        match word.as_str() {
            "True" => out.push_str("true"),
            "False" => out.push_str("false"),
            "None" => out.push_str("null"),
            _ => out.push_str(word),
        }
        word.clear();
    };

    for ch in raw.chars() {
        if in_string {
            match ch {
                '\'' => {
                    in_string = false;
                    out.push('"');
                }
                '"' => out.push_str("\\\""),
                _ => out.push(ch),
            }
            continue;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' {
            word.push(ch);
            continue;
        }
        flush(&mut word, &mut out);
        if ch == '\'' {
            in_string = true;
            out.push('"');
        } else {
            out.push(ch);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Human summary of a record's change, as shown in history listings.
#[must_use]
pub fn change_summary(kind: ChangeKind, type_name: &str, changed_fields: Option<&[String]>) -> String {
    match kind {
        ChangeKind::Create | ChangeKind::Delete => format!("{} {type_name}", kind.verb()),
        ChangeKind::Update => match changed_fields {
            None => "No prior information available.".to_string(),
            Some([]) => "Updated with no change".to_string(),
            Some(fields) => {
                let mut sorted: Vec<&str> = fields.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                format!("Updated {}", sorted.join(", "))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cardinality, FieldMeta};

    fn episode() -> EntityMeta {
        EntityMeta::new("Episode")
            .field(FieldMeta::scalar("title", ValueKind::Text))
            .field(FieldMeta::scalar("is_published", ValueKind::Boolean))
            .field(FieldMeta::scalar("metadata", ValueKind::Json))
            .field(FieldMeta::scalar("keywords", ValueKind::Array))
            .field(FieldMeta::relation("show", Cardinality::ManyToOne, "Show"))
            .field(FieldMeta::relation("cast", Cardinality::ManyToMany, "Actor"))
    }

    fn snap(pairs: &[(&str, Option<&str>)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn no_previous_snapshot_is_none() {
        let current = snap(&[("title", Some("Pilot"))]);
        assert_eq!(diff(&episode(), &current, None, &BTreeSet::new()), None);
    }

    #[test]
    fn identical_snapshots_yield_empty_list() {
        let current = snap(&[("title", Some("Pilot")), ("cast", Some("1, 2"))]);
        assert_eq!(
            diff(&episode(), &current, Some(&current.clone()), &BTreeSet::new()),
            Some(vec![])
        );
    }

    #[test]
    fn reports_changed_fields_in_declaration_order() {
        let before = snap(&[("title", Some("Pilot")), ("show", None), ("cast", Some(""))]);
        let after = snap(&[("title", Some("Pilot 2")), ("show", Some("4")), ("cast", Some("7"))]);
        assert_eq!(
            diff(&episode(), &after, Some(&before), &BTreeSet::new()),
            Some(vec!["title".to_string(), "show".to_string(), "cast".to_string()])
        );
    }

    #[test]
    fn excluded_fields_never_change() {
        let before = snap(&[("title", Some("Pilot")), ("show", Some("1"))]);
        let after = snap(&[("title", Some("Pilot 2")), ("show", Some("2"))]);
        let excluded = BTreeSet::from(["title".to_string()]);
        assert_eq!(
            diff(&episode(), &after, Some(&before), &excluded),
            Some(vec!["show".to_string()])
        );
    }

    #[test]
    fn reordered_collections_are_equal() {
        let before = snap(&[("cast", Some("3, 2")), ("keywords", Some("war, drama"))]);
        let after = snap(&[("cast", Some("2, 3")), ("keywords", Some("drama, war"))]);
        assert_eq!(
            diff(&episode(), &after, Some(&before), &BTreeSet::new()),
            Some(vec![])
        );
    }

    #[test]
    fn empty_collection_differs_from_null() {
        let before = snap(&[("cast", None)]);
        let after = snap(&[("cast", Some(""))]);
        assert_eq!(
            diff(&episode(), &after, Some(&before), &BTreeSet::new()),
            Some(vec!["cast".to_string()])
        );
    }

    #[test]
    fn json_compares_structurally() {
        let before = snap(&[("metadata", Some(r#"{"b": 1, "a": [1, 2]}"#))]);
        let after = snap(&[("metadata", Some(r#"{"a":[1,2],"b":1}"#))]);
        assert_eq!(
            diff(&episode(), &after, Some(&before), &BTreeSet::new()),
            Some(vec![])
        );

        let native = snap(&[("metadata", Some("{'a': [1, 2], 'b': 1}"))]);
        assert_eq!(
            diff(&episode(), &after, Some(&native), &BTreeSet::new()),
            Some(vec![])
        );

        let changed = snap(&[("metadata", Some(r#"{"a":[2,1],"b":1}"#))]);
        assert_eq!(
            diff(&episode(), &changed, Some(&before), &BTreeSet::new()),
            Some(vec!["metadata".to_string()])
        );
    }

    #[test]
    fn new_field_at_default_is_not_a_change() {
        let before = snap(&[("title", Some("Pilot"))]);
        let after = snap(&[
            ("title", Some("Pilot")),
            ("is_published", Some("false")),
            ("metadata", Some("{}")),
            ("keywords", Some("")),
            ("cast", Some("")),
            ("show", None),
        ]);
        assert_eq!(
            diff(&episode(), &after, Some(&before), &BTreeSet::new()),
            Some(vec![])
        );

        let published = snap(&[("title", Some("Pilot")), ("is_published", Some("true"))]);
        assert_eq!(
            diff(&episode(), &published, Some(&before), &BTreeSet::new()),
            Some(vec!["is_published".to_string()])
        );
    }

    #[test]
    fn untyped_diff_compares_exact_values() {
        let before = snap(&[("a", Some("1")), ("b", Some("x"))]);
        let after = snap(&[("a", Some("1")), ("b", Some("y")), ("c", Some("")), ("d", Some("new"))]);
        assert_eq!(
            diff_untyped(&after, Some(&before)),
            Some(vec!["b".to_string(), "d".to_string()])
        );
        assert_eq!(diff_untyped(&after, None), None);
    }

    #[test]
    fn lenient_json_handles_native_literals() {
        assert_eq!(
            parse_lenient_json("{'ok': True, 'gone': None, 'name': 'it\"s'}"),
            Some(serde_json::json!({"ok": true, "gone": null, "name": "it\"s"}))
        );
        assert_eq!(parse_lenient_json("not json"), None);
    }

    #[test]
    fn summaries() {
        assert_eq!(change_summary(ChangeKind::Create, "Poll", Some(&[])), "Created Poll");
        assert_eq!(change_summary(ChangeKind::Delete, "Poll", Some(&[])), "Deleted Poll");
        assert_eq!(
            change_summary(ChangeKind::Update, "Poll", None),
            "No prior information available."
        );
        assert_eq!(
            change_summary(ChangeKind::Update, "Poll", Some(&[])),
            "Updated with no change"
        );
        let fields = ["question".to_string(), "choices".to_string()];
        assert_eq!(
            change_summary(ChangeKind::Update, "Poll", Some(&fields)),
            "Updated choices, question"
        );
    }
}
