use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

/// Serialized full-state copy of an entity: field name to string-or-null.
pub type Snapshot = BTreeMap<String, Option<String>>;

/// Caller-supplied contextual metadata attached to a record.
pub type ExtraData = BTreeMap<String, String>;

/// The closed set of change kinds a record can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Past-tense verb used in summaries and propagation messages.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Create => "Created",
            Self::Update => "Updated",
            Self::Delete => "Deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`ChangeKind`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid change kind: '{0}'")]
pub struct ParseChangeKindError(pub String);

impl FromStr for ChangeKind {
    type Err = ParseChangeKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" | "+" => Ok(Self::Create),
            "update" | "~" => Ok(Self::Update),
            "delete" | "-" => Ok(Self::Delete),
            _ => Err(ParseChangeKindError(s.to_string())),
        }
    }
}

/// A user or system principal that caused a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<i64>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
}

impl Actor {
    #[must_use]
    pub fn named(id: i64, username: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// First non-empty of full name, email, username.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        [&self.full_name, &self.email, &self.username]
            .into_iter()
            .filter_map(|value| value.as_deref())
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    #[must_use]
    pub fn attribution(&self) -> Attribution {
        Attribution {
            name: self.display_name().map(str::to_string),
            id: self.id,
        }
    }
}

/// Who a record is attributed to. Both halves are optional and independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: Option<String>,
    pub id: Option<i64>,
}

impl Attribution {
    #[must_use]
    pub const fn anonymous() -> Self {
        Self { name: None, id: None }
    }
}

/// One persisted history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalRecord {
    pub id: i64,
    pub entity_type: String,
    pub object_id: String,
    pub created_at: DateTime<Utc>,
    pub change_kind: ChangeKind,
    pub actor_name: Option<String>,
    pub actor_id: Option<i64>,
    /// `None` = not computed yet, `Some([])` = computed, nothing differs.
    pub changed_fields: Option<Vec<String>>,
    pub data: Snapshot,
    pub extra_data: ExtraData,
    pub related_record_id: Option<i64>,
}

impl HistoricalRecord {
    #[must_use]
    pub fn attribution(&self) -> Attribution {
        Attribution {
            name: self.actor_name.clone(),
            id: self.actor_id,
        }
    }
}

/// Insert payload for a [`HistoricalRecord`]; id and timestamp are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub entity_type: String,
    pub object_id: String,
    pub change_kind: ChangeKind,
    pub attribution: Attribution,
    pub changed_fields: Option<Vec<String>>,
    pub data: Snapshot,
    pub extra_data: ExtraData,
    pub related_record_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_kind_parses_words_and_symbols() {
        assert_eq!("create".parse::<ChangeKind>(), Ok(ChangeKind::Create));
        assert_eq!(" Update ".parse::<ChangeKind>(), Ok(ChangeKind::Update));
        assert_eq!("-".parse::<ChangeKind>(), Ok(ChangeKind::Delete));
        assert!("merge".parse::<ChangeKind>().is_err());
        assert_eq!(ChangeKind::Delete.to_string(), "delete");
        assert_eq!(ChangeKind::Create.verb(), "Created");
    }

    #[test]
    fn display_name_prefers_full_name_then_email() {
        let mut actor = Actor::named(7, "jdoe");
        assert_eq!(actor.display_name(), Some("jdoe"));

        actor.email = Some("jdoe@example.com".into());
        assert_eq!(actor.display_name(), Some("jdoe@example.com"));

        actor.full_name = Some("Jane Doe".into());
        assert_eq!(actor.display_name(), Some("Jane Doe"));

        actor.full_name = Some("   ".into());
        assert_eq!(actor.display_name(), Some("jdoe@example.com"));
    }

    #[test]
    fn attribution_keeps_halves_independent() {
        let actor = Actor {
            id: Some(3),
            ..Actor::default()
        };
        assert_eq!(
            actor.attribution(),
            Attribution {
                name: None,
                id: Some(3)
            }
        );
        assert_eq!(Attribution::anonymous(), Attribution::default());
    }
}
