//! Tracked-entity-type registration.
//!
//! Declarations are collected on a [`RegistryBuilder`] at bootstrap and
//! resolved against live host metadata in [`RegistryBuilder::build`]. The
//! resulting [`Registry`] is immutable and shared by reference.

use crate::error::ConfigError;
use crate::model::{Attribution, EntityMeta, ExtraData, FieldMeta};
use crate::source::{EntitySource, ObjectRef};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Typed accessor producing a type's default additional data.
pub type AdditionalDataFn = Arc<dyn Fn(&dyn EntitySource, &ObjectRef) -> ExtraData + Send + Sync>;

/// Actors whose changes are never recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoredActors {
    pub names: BTreeSet<String>,
    pub ids: BTreeSet<i64>,
}

impl IgnoredActors {
    /// Name and id are checked independently; either one matching is enough.
    #[must_use]
    pub fn matches(&self, attribution: &Attribution) -> bool {
        attribution
            .name
            .as_ref()
            .is_some_and(|name| self.names.contains(name))
            || attribution.id.is_some_and(|id| self.ids.contains(&id))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.ids.is_empty()
    }
}

/// Per-type tracking declaration.
#[derive(Clone, Default)]
pub struct TrackingConfig {
    excluded: BTreeSet<String>,
    interested: Vec<String>,
    ignored: IgnoredActors,
    additional_data: Option<AdditionalDataFn>,
}

impl TrackingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn interested<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interested.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn ignore_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.names.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn ignore_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.ignored.ids.extend(ids);
        self
    }

    #[must_use]
    pub fn additional_data(
        mut self,
        accessor: impl Fn(&dyn EntitySource, &ObjectRef) -> ExtraData + Send + Sync + 'static,
    ) -> Self {
        self.additional_data = Some(Arc::new(accessor));
        self
    }

    /// Same additional data for every instance.
    #[must_use]
    pub fn static_additional_data<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let data: ExtraData = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.to_string()))
            .collect();
        self.additional_data(move |_, _| data.clone())
    }
}

impl fmt::Debug for TrackingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingConfig")
            .field("excluded", &self.excluded)
            .field("interested", &self.interested)
            .field("ignored", &self.ignored)
            .field("additional_data", &self.additional_data.is_some())
            .finish()
    }
}

/// A registered type with its configuration resolved against metadata.
#[derive(Clone)]
pub struct TrackedType {
    pub meta: EntityMeta,
    pub excluded: BTreeSet<String>,
    pub ignored: IgnoredActors,
    pub interested: Vec<FieldMeta>,
    additional_data: Option<AdditionalDataFn>,
}

impl TrackedType {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// The type's default additional data for `object`, or empty.
    #[must_use]
    pub fn additional_data(&self, source: &dyn EntitySource, object: &ObjectRef) -> ExtraData {
        self.additional_data
            .as_ref()
            .map(|accessor| accessor(source, object))
            .unwrap_or_default()
    }
}

impl fmt::Debug for TrackedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedType")
            .field("name", &self.meta.name)
            .field("excluded", &self.excluded)
            .field("ignored", &self.ignored)
            .field(
                "interested",
                &self.interested.iter().map(|f| &f.name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    declared: Vec<(String, TrackingConfig)>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn track(mut self, entity_type: impl Into<String>, config: TrackingConfig) -> Self {
        self.declared.push((entity_type.into(), config));
        self
    }

    /// Resolve every declaration against `source`'s metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a type is unknown or tracked twice, or an
    /// interested name is not a relation field of its type.
    pub fn build(self, source: &dyn EntitySource) -> Result<Registry, ConfigError> {
        let mut types = BTreeMap::new();
        let mut order = Vec::with_capacity(self.declared.len());

        for (name, config) in self.declared {
            if types.contains_key(&name) {
                return Err(ConfigError::DuplicateRegistration(name));
            }
            let meta = source
                .meta(&name)
                .cloned()
                .ok_or_else(|| ConfigError::UnknownEntityType(name.clone()))?;

            let mut interested = Vec::with_capacity(config.interested.len());
            for field_name in &config.interested {
                let field = meta.get(field_name).ok_or_else(|| ConfigError::UnknownField {
                    entity_type: name.clone(),
                    field: field_name.clone(),
                })?;
                if !field.is_relation() {
                    return Err(ConfigError::InvalidRelatedField {
                        entity_type: name.clone(),
                        field: field_name.clone(),
                    });
                }
                interested.push(field.clone());
            }

            order.push(name.clone());
            types.insert(
                name,
                TrackedType {
                    meta,
                    excluded: config.excluded,
                    ignored: config.ignored,
                    interested,
                    additional_data: config.additional_data,
                },
            );
        }

        Ok(Registry { types, order })
    }
}

/// Immutable table of tracked types, in registration order.
#[derive(Debug, Default)]
pub struct Registry {
    types: BTreeMap<String, TrackedType>,
    order: Vec<String>,
}

impl Registry {
    #[must_use]
    pub fn get(&self, entity_type: &str) -> Option<&TrackedType> {
        self.types.get(entity_type)
    }

    #[must_use]
    pub fn is_tracked(&self, entity_type: &str) -> bool {
        self.types.contains_key(entity_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedType> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
