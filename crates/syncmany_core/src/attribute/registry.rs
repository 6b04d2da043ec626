//! Per-record-type registry of virtual attribute definitions.

use super::definition::{AttributeDefinition, DefinitionError};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

/// Virtual attribute name → definition, normalized and validated on insert.
pub struct AttributeRegistry<R> {
    definitions: BTreeMap<String, AttributeDefinition<R>>,
}

impl<R> AttributeRegistry<R> {
    pub fn new() -> Self {
        Self {
            definitions: BTreeMap::new(),
        }
    }

    /// Registers one virtual attribute.
    ///
    /// `definition` may be a relation name, a `(relation, pivot_spec)` pair
    /// or a pre-built [`AttributeDefinition`].
    ///
    /// # Errors
    /// - `InvalidAttributeName` for blank names.
    /// - `DuplicateAttribute` when `name` is already registered.
    /// - `DuplicateRelation` when another attribute already syncs the same
    ///   relation; two buffers racing on one join table are not allowed.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        definition: impl Into<AttributeDefinition<R>>,
    ) -> Result<&mut Self, DefinitionError> {
        let name = name.into();
        let definition = definition.into();

        if name.trim().is_empty() {
            return Err(DefinitionError::InvalidAttributeName(name));
        }
        if definition.relation().trim().is_empty() {
            return Err(DefinitionError::InvalidDefinitionShape(format!(
                "attribute `{name}` has an empty relation name"
            )));
        }
        if self.definitions.contains_key(&name) {
            return Err(DefinitionError::DuplicateAttribute(name));
        }
        if let Some(existing) = self.attribute_for_relation(definition.relation()) {
            return Err(DefinitionError::DuplicateRelation {
                relation: definition.relation().to_string(),
                attribute: name,
                existing: existing.to_string(),
            });
        }

        self.definitions.insert(name, definition);
        Ok(self)
    }

    /// Builds a registry from a JSON object of `attribute → declaration`.
    ///
    /// # Errors
    /// - `InvalidDefinitionShape` when `value` is not an object.
    /// - Any error of [`AttributeDefinition::from_json`] or
    ///   [`AttributeRegistry::register`].
    pub fn from_json(value: &serde_json::Value) -> Result<Self, DefinitionError> {
        let entries = value.as_object().ok_or_else(|| {
            DefinitionError::InvalidDefinitionShape(
                "attribute declarations must be a JSON object".to_string(),
            )
        })?;

        let mut registry = Self::new();
        for (name, raw) in entries {
            registry.register(name.as_str(), AttributeDefinition::from_json(raw)?)?;
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDefinition<R>> {
        self.definitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Declared attribute names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.definitions.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeDefinition<R>)> {
        self.definitions
            .iter()
            .map(|(name, definition)| (name.as_str(), definition))
    }

    fn attribute_for_relation(&self, relation: &str) -> Option<&str> {
        self.iter()
            .find(|(_, definition)| definition.relation() == relation)
            .map(|(name, _)| name)
    }
}

impl<R> Default for AttributeRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for AttributeRegistry<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.definitions.iter()).finish()
    }
}
