//! Entity type metadata as exposed by the host persistence layer.
//!
//! The history engine never owns entity storage. It only needs to know, per
//! entity type, which fields exist, what kind of value each holds and, for
//! relations, which type sits on the other side.

use serde::{Deserialize, Serialize};

/// Storage kind of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// Structured value stored as JSON text.
    Json,
    /// Flat list of tokens serialized as `"a, b, c"`.
    Array,
}

impl ValueKind {
    /// Serialized form of the value a freshly added column would carry.
    ///
    /// Used when an older snapshot predates the field: a current value equal
    /// to this default is not a change.
    #[must_use]
    pub const fn intrinsic_default(self) -> Option<&'static str> {
        match self {
            Self::Text | Self::Array => Some(""),
            Self::Integer => Some("0"),
            Self::Float => Some("0.0"),
            Self::Boolean => Some("false"),
            Self::Json => Some("{}"),
            Self::Timestamp => None,
        }
    }
}

/// Cardinality of a relation as seen from the declaring side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
    ReverseOneToOne,
}

impl Cardinality {
    /// Whether the field holds at most one related object.
    #[must_use]
    pub const fn is_single(self) -> bool {
        matches!(self, Self::ManyToOne | Self::OneToOne)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ValueKind),
    Relation {
        cardinality: Cardinality,
        target: String,
        /// Name of the field on `target` that points back here, if declared.
        inverse: Option<String>,
    },
    /// Polymorphic pointer to an instance of any type.
    GenericReference,
    /// Reverse side of a polymorphic pointer held by `target` instances.
    GenericCollection { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldMeta {
    #[must_use]
    pub fn scalar(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar(kind),
        }
    }

    #[must_use]
    pub fn relation(
        name: impl Into<String>,
        cardinality: Cardinality,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Relation {
                cardinality,
                target: target.into(),
                inverse: None,
            },
        }
    }

    /// Set the inverse name on a relation field. No-op for other kinds.
    #[must_use]
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        if let FieldKind::Relation { inverse: slot, .. } = &mut self.kind {
            *slot = Some(inverse.into());
        }
        self
    }

    #[must_use]
    pub fn generic_reference(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::GenericReference,
        }
    }

    #[must_use]
    pub fn generic_collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::GenericCollection {
                target: target.into(),
            },
        }
    }

    /// Relation-like fields are the ones propagation walks.
    #[must_use]
    pub const fn is_relation(&self) -> bool {
        !matches!(self.kind, FieldKind::Scalar(_))
    }

    /// Fields serialized as comma-joined id lists.
    #[must_use]
    pub const fn is_multi_valued(&self) -> bool {
        match &self.kind {
            FieldKind::Relation { cardinality, .. } => !cardinality.is_single(),
            FieldKind::GenericCollection { .. } => true,
            FieldKind::Scalar(_) | FieldKind::GenericReference => false,
        }
    }

    /// Target type for typed relations and generic collections.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation { target, .. } | FieldKind::GenericCollection { target } => {
                Some(target)
            }
            FieldKind::Scalar(_) | FieldKind::GenericReference => None,
        }
    }

    #[must_use]
    pub fn declared_inverse(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Relation { inverse, .. } => inverse.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn value_kind(&self) -> Option<ValueKind> {
        match self.kind {
            FieldKind::Scalar(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Declared fields of one entity type, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub name: String,
    pub fields: Vec<FieldMeta>,
}

impl EntityMeta {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldMeta) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn relations(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields.iter().filter(|field| field.is_relation())
    }

    /// Lower snake-case form of the type name (`SeasonEpisode` -> `season_episode`).
    #[must_use]
    pub fn snake_name(&self) -> String {
        snake_case(&self.name)
    }
}

#[must_use]
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (idx, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if idx > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
