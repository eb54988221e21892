//! Read-side contract the host persistence layer implements.
//!
//! The engine reads entity state only through [`EntitySource`]; it never
//! touches host storage directly.

use crate::model::EntityMeta;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one entity instance: type name plus string id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub entity_type: String,
    pub object_id: String,
}

impl ObjectRef {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.object_id)
    }
}

/// A non-null scalar value as held by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ScalarValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
    Array(Vec<String>),
}

impl ScalarValue {
    /// Canonical string form stored in snapshots.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Integer(value) => value.to_string(),
            Self::Float(value) => format!("{value:?}"),
            Self::Boolean(value) => value.to_string(),
            Self::Timestamp(at) => at.to_rfc3339_opts(SecondsFormat::Micros, true),
            Self::Json(value) => value.to_string(),
            Self::Array(items) => items.join(", "),
        }
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// Value of a single-slot field as read from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Option<ScalarValue>),
    /// To-one relation or polymorphic pointer.
    One(Option<ObjectRef>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("entity type '{0}' is not known to the host")]
    UnknownEntityType(String),

    #[error("'{field}' is not a field of '{entity_type}'")]
    UnknownField { entity_type: String, field: String },

    #[error("{0} does not exist")]
    ObjectNotFound(ObjectRef),

    #[error("'{field}' on {object} is not readable as {expected}")]
    WrongShape {
        object: ObjectRef,
        field: String,
        expected: &'static str,
    },

    #[error("'{field}' on {object} points at missing {target}")]
    Dangling {
        object: ObjectRef,
        field: String,
        target: ObjectRef,
    },
}

/// Entity introspection and state reads.
pub trait EntitySource {
    /// Declared metadata for `entity_type`, if the host knows it.
    fn meta(&self, entity_type: &str) -> Option<&EntityMeta>;

    /// Read a scalar, to-one or polymorphic-pointer field.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the object or field is unknown, or the
    /// stored value is unreadable.
    fn read_field(&self, object: &ObjectRef, field: &str) -> Result<FieldValue, SourceError>;

    /// Enumerate members of a multi-valued relation or generic collection.
    ///
    /// Must read from the write-consistent source: members are collected
    /// right after cascading writes, and a lagging replica would report
    /// stale membership.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] when the object or field is unknown.
    fn related_members(
        &self,
        object: &ObjectRef,
        field: &str,
    ) -> Result<Vec<ObjectRef>, SourceError>;

    fn exists(&self, object: &ObjectRef) -> bool;

    /// All instance ids of `entity_type`, for bulk population.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnknownEntityType`] for unknown types.
    fn object_ids(&self, entity_type: &str) -> Result<Vec<String>, SourceError>;
}
