//! Virtual attribute definition.
//!
//! # Responsibility
//! - Describe which relation a virtual attribute maps to.
//! - Describe pivot columns stamped onto join rows, constant or computed from
//!   the owning record.
//! - Resolve the relation and delegate reads/syncs to it.
//!
//! # Invariants
//! - A definition targets exactly one relation.
//! - Pivot values are resolved once per sync and shared by every id.

use super::capability::SyncManyRecord;
use super::value::{PivotMap, PivotValue, RelatedId};
use crate::relation::{ManyToManyRelation, RelationResult, SyncChanges, SyncPayload};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Function computing one pivot value from the owning record.
pub type ComputedValue<R> = Arc<dyn Fn(&R) -> PivotValue + Send + Sync>;
/// Function computing the whole pivot mapping from the owning record.
pub type ComputedMap<R> = Arc<dyn Fn(&R) -> PivotMap + Send + Sync>;

/// Declaration and registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Declaration is neither a relation name nor a single-entry mapping.
    InvalidDefinitionShape(String),
    /// Pivot spec is neither absent, a mapping, nor a function.
    InvalidPivotSpec(String),
    InvalidAttributeName(String),
    DuplicateAttribute(String),
    /// Two attributes would sync the same relation.
    DuplicateRelation {
        relation: String,
        attribute: String,
        existing: String,
    },
}

impl Display for DefinitionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDefinitionShape(details) => {
                write!(f, "invalid attribute definition: {details}")
            }
            Self::InvalidPivotSpec(details) => {
                write!(f, "invalid pivot attribute specification: {details}")
            }
            Self::InvalidAttributeName(name) => write!(f, "invalid attribute name `{name}`"),
            Self::DuplicateAttribute(name) => write!(f, "attribute already defined: `{name}`"),
            Self::DuplicateRelation {
                relation,
                attribute,
                existing,
            } => write!(
                f,
                "relation `{relation}` of attribute `{attribute}` is already synced by `{existing}`"
            ),
        }
    }
}

impl Error for DefinitionError {}

/// One pivot column value.
pub enum PivotField<R> {
    Constant(PivotValue),
    Computed(ComputedValue<R>),
}

impl<R> PivotField<R> {
    pub fn constant(value: impl Into<PivotValue>) -> Self {
        Self::Constant(value.into())
    }

    pub fn computed(provider: impl Fn(&R) -> PivotValue + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(provider))
    }

    fn resolve(&self, record: &R) -> PivotValue {
        match self {
            Self::Constant(value) => value.clone(),
            Self::Computed(provider) => provider(record),
        }
    }
}

impl<R> Clone for PivotField<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Constant(value) => Self::Constant(value.clone()),
            Self::Computed(provider) => Self::Computed(Arc::clone(provider)),
        }
    }
}

impl<R> Debug for PivotField<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Pivot columns to stamp onto join rows at sync time.
pub enum PivotSpec<R> {
    /// Fixed column set; individual values may be computed.
    Fields(BTreeMap<String, PivotField<R>>),
    /// Whole mapping computed from the owning record.
    Computed(ComputedMap<R>),
}

impl<R> PivotSpec<R> {
    pub fn fields<K: Into<String>>(entries: impl IntoIterator<Item = (K, PivotField<R>)>) -> Self {
        Self::Fields(
            entries
                .into_iter()
                .map(|(column, field)| (column.into(), field))
                .collect(),
        )
    }

    pub fn computed(provider: impl Fn(&R) -> PivotMap + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(provider))
    }

    /// An empty fixed mapping stamps nothing and syncs like no spec at all.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Fields(fields) if fields.is_empty())
    }

    /// Evaluates the spec against `record`; every computed provider runs once.
    pub fn resolve(&self, record: &R) -> PivotMap {
        match self {
            Self::Fields(fields) => fields
                .iter()
                .map(|(column, field)| (column.clone(), field.resolve(record)))
                .collect(),
            Self::Computed(provider) => provider(record),
        }
    }

    fn from_json(value: &serde_json::Value) -> Result<Option<Self>, DefinitionError> {
        match value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(entries) => {
                let mut fields = BTreeMap::new();
                for (column, raw) in entries {
                    let value = PivotValue::from_json(raw).ok_or_else(|| {
                        DefinitionError::InvalidPivotSpec(format!(
                            "pivot column `{column}` must hold a scalar value"
                        ))
                    })?;
                    fields.insert(column.clone(), PivotField::Constant(value));
                }
                Ok(Some(Self::Fields(fields)))
            }
            other => Err(DefinitionError::InvalidPivotSpec(format!(
                "expected null or an object, got {}",
                json_kind(other)
            ))),
        }
    }
}

impl<R> Clone for PivotSpec<R> {
    fn clone(&self) -> Self {
        match self {
            Self::Fields(fields) => Self::Fields(fields.clone()),
            Self::Computed(provider) => Self::Computed(Arc::clone(provider)),
        }
    }
}

impl<R> Debug for PivotSpec<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Maps one virtual attribute onto one many-to-many relation.
pub struct AttributeDefinition<R> {
    relation_name: String,
    pivot_attributes: Option<PivotSpec<R>>,
}

impl<R> AttributeDefinition<R> {
    /// Creates a definition targeting `relation_name` with no pivot columns.
    pub fn new(relation_name: impl Into<String>) -> Self {
        Self {
            relation_name: relation_name.into(),
            pivot_attributes: None,
        }
    }

    /// Sets the target relation.
    pub fn relation_name(mut self, relation_name: impl Into<String>) -> Self {
        self.relation_name = relation_name.into();
        self
    }

    /// Sets pivot columns applied at sync time.
    pub fn pivot_attributes(mut self, spec: impl Into<Option<PivotSpec<R>>>) -> Self {
        self.pivot_attributes = spec.into();
        self
    }

    /// Builds a definition from a `{relation: pivot_spec}` mapping.
    ///
    /// # Errors
    /// - `InvalidDefinitionShape` unless the mapping has exactly one entry.
    pub fn from_mapping<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, Option<PivotSpec<R>>)>,
    ) -> Result<Self, DefinitionError> {
        let mut entries = entries.into_iter();
        let (Some((relation_name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(DefinitionError::InvalidDefinitionShape(
                "definition must refer to exactly one relation".to_string(),
            ));
        };
        Ok(Self::new(relation_name).pivot_attributes(spec))
    }

    /// Builds a definition from a JSON declaration.
    ///
    /// Accepts `"relation"` or `{"relation": null | {"column": scalar, ..}}`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, DefinitionError> {
        match value {
            serde_json::Value::String(relation_name) => Ok(Self::new(relation_name.as_str())),
            serde_json::Value::Object(entries) => {
                if entries.len() != 1 {
                    return Err(DefinitionError::InvalidDefinitionShape(format!(
                        "definition must refer to exactly one relation, got {} entries",
                        entries.len()
                    )));
                }
                let parsed = entries
                    .iter()
                    .map(|(relation_name, spec)| {
                        PivotSpec::from_json(spec).map(|spec| (relation_name.clone(), spec))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Self::from_mapping(parsed)
            }
            other => Err(DefinitionError::InvalidDefinitionShape(format!(
                "expected a relation name or a single-entry object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Name of the relation this attribute syncs.
    pub fn relation(&self) -> &str {
        &self.relation_name
    }

    pub fn pivot(&self) -> Option<&PivotSpec<R>> {
        self.pivot_attributes.as_ref()
    }

    /// Builds the sync payload for `ids`, resolving pivot values once.
    pub fn payload(&self, record: &R, ids: &[RelatedId]) -> SyncPayload {
        match self.pivot_attributes.as_ref().filter(|spec| !spec.is_empty()) {
            None => SyncPayload::Ids(ids.to_vec()),
            Some(spec) => {
                let pivot = spec.resolve(record);
                SyncPayload::WithPivot(ids.iter().map(|id| (*id, pivot.clone())).collect())
            }
        }
    }
}

impl<R: SyncManyRecord> AttributeDefinition<R> {
    /// Resolves the relation object on `record`.
    pub fn get_relation<'s>(
        &self,
        record: &R,
        store: &'s R::Store,
    ) -> RelationResult<Box<dyn ManyToManyRelation + 's>> {
        record.relation(store, &self.relation_name)
    }

    /// Returns every id currently related to `record`.
    pub fn get_related_ids(&self, record: &R, store: &R::Store) -> RelationResult<Vec<RelatedId>> {
        self.get_relation(record, store)?.all_related_ids()
    }

    /// Makes the relation hold exactly `ids`, stamping resolved pivot values.
    pub fn sync(
        &self,
        record: &R,
        store: &R::Store,
        ids: &[RelatedId],
    ) -> RelationResult<SyncChanges> {
        let relation = self.get_relation(record, store)?;
        relation.sync(self.payload(record, ids))
    }
}

impl<R> Clone for AttributeDefinition<R> {
    fn clone(&self) -> Self {
        Self {
            relation_name: self.relation_name.clone(),
            pivot_attributes: self.pivot_attributes.clone(),
        }
    }
}

impl<R> Debug for AttributeDefinition<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeDefinition")
            .field("relation_name", &self.relation_name)
            .field("pivot_attributes", &self.pivot_attributes)
            .finish()
    }
}

impl<R> From<&str> for AttributeDefinition<R> {
    fn from(relation_name: &str) -> Self {
        Self::new(relation_name)
    }
}

impl<R> From<String> for AttributeDefinition<R> {
    fn from(relation_name: String) -> Self {
        Self::new(relation_name)
    }
}

impl<R> From<(&str, PivotSpec<R>)> for AttributeDefinition<R> {
    fn from((relation_name, spec): (&str, PivotSpec<R>)) -> Self {
        Self::new(relation_name).pivot_attributes(spec)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
