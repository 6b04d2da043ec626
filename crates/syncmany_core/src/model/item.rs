//! Item record with relation-backed virtual attributes.
//!
//! # Responsibility
//! - Define the stored `items` row shape.
//! - Declare `category_ids` and `tag_ids` virtual attributes and expose them
//!   through typed and keyed accessors.
//!
//! # Invariants
//! - `id` is `None` until the first successful save.
//! - Virtual attribute assignments stay in memory until the item is saved.
//! - `tag_ids` join rows carry `reason` and `attached_at`; every row written
//!   by one save shares the same `attached_at`.

use crate::attribute::{
    AttributeDefinition, AttributeRegistry, AttributeValue, DefinitionError, PivotField,
    PivotSpec, PivotValue, RelatedId, SyncError, SyncManyAttributes, SyncManyRecord, SyncReport,
};
use crate::relation::{BelongsToMany, ManyToManyRelation, PivotTable, RelationError, RelationResult};
use once_cell::sync::Lazy;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Primary key of an `items` row.
pub type ItemId = i64;

/// Virtual attribute exposing related category ids.
pub const CATEGORY_IDS: &str = "category_ids";
/// Virtual attribute exposing related tag ids.
pub const TAG_IDS: &str = "tag_ids";
/// `reason` stamped onto `item_tag` rows written through `tag_ids`.
pub const TAG_REASON: &str = "test-reason";

/// `items` ↔ `categories` join table.
pub const CATEGORY_ITEM: PivotTable = PivotTable {
    table: "category_item",
    parent_key: "item_id",
    related_key: "category_id",
};

/// `items` ↔ `tags` join table.
pub const ITEM_TAG: PivotTable = PivotTable {
    table: "item_tag",
    parent_key: "item_id",
    related_key: "tag_id",
};

static ITEM_ATTRIBUTES: Lazy<Arc<AttributeRegistry<Item>>> = Lazy::new(|| {
    Arc::new(item_attribute_registry().expect("item attribute declarations are valid"))
});

fn item_attribute_registry() -> Result<AttributeRegistry<Item>, DefinitionError> {
    let mut registry = AttributeRegistry::new();
    registry.register(CATEGORY_IDS, "categories")?.register(
        TAG_IDS,
        AttributeDefinition::new("tags").pivot_attributes(PivotSpec::fields([
            ("reason", PivotField::constant(TAG_REASON)),
            (
                "attached_at",
                PivotField::computed(|_: &Item| PivotValue::Integer(epoch_millis())),
            ),
        ])),
    )?;
    Ok(registry)
}

fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

/// Record validation failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValidationError {
    EmptyName,
    InvalidPrice(f64),
}

impl Display for ItemValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "item name cannot be empty"),
            Self::InvalidPrice(price) => write!(f, "item price must be finite, got {price}"),
        }
    }
}

impl Error for ItemValidationError {}

/// Keyed attribute access failures.
#[derive(Debug)]
pub enum ItemAttributeError {
    /// Name is neither a column nor a virtual attribute.
    UndefinedAttribute(String),
    ReadOnlyAttribute(String),
    InvalidValue {
        attribute: String,
        expected: &'static str,
    },
    Sync(SyncError),
}

impl Display for ItemAttributeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndefinedAttribute(name) => write!(f, "undefined attribute `{name}`"),
            Self::ReadOnlyAttribute(name) => write!(f, "attribute `{name}` is read-only"),
            Self::InvalidValue {
                attribute,
                expected,
            } => write!(f, "attribute `{attribute}` expects {expected}"),
            Self::Sync(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ItemAttributeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sync(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SyncError> for ItemAttributeError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::UndefinedAttribute(name) => Self::UndefinedAttribute(name),
            other => Self::Sync(other),
        }
    }
}

/// Stored item plus its pending virtual attribute values.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: Option<ItemId>,
    pub name: String,
    pub price: f64,
    attributes: SyncManyAttributes<Item>,
}

impl Item {
    /// Creates an unsaved item.
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self::from_row(None, name, price)
    }

    pub(crate) fn from_row(id: Option<ItemId>, name: impl Into<String>, price: f64) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            attributes: SyncManyAttributes::new(Arc::clone(&ITEM_ATTRIBUTES)),
        }
    }

    /// Names of the virtual attributes every item exposes.
    pub fn declared_attributes() -> Vec<&'static str> {
        Lazy::force(&ITEM_ATTRIBUTES).names()
    }

    pub fn attributes(&self) -> &SyncManyAttributes<Item> {
        &self.attributes
    }

    pub fn validate(&self) -> Result<(), ItemValidationError> {
        if self.name.trim().is_empty() {
            return Err(ItemValidationError::EmptyName);
        }
        if !self.price.is_finite() {
            return Err(ItemValidationError::InvalidPrice(self.price));
        }
        Ok(())
    }

    pub fn category_ids(&self, conn: &Connection) -> Result<Vec<RelatedId>, SyncError> {
        self.attributes.get(self, conn, CATEGORY_IDS)
    }

    pub fn set_category_ids(
        &mut self,
        value: impl Into<AttributeValue>,
    ) -> Result<&mut Self, SyncError> {
        self.attributes.set(CATEGORY_IDS, value)?;
        Ok(self)
    }

    pub fn tag_ids(&self, conn: &Connection) -> Result<Vec<RelatedId>, SyncError> {
        self.attributes.get(self, conn, TAG_IDS)
    }

    pub fn set_tag_ids(
        &mut self,
        value: impl Into<AttributeValue>,
    ) -> Result<&mut Self, SyncError> {
        self.attributes.set(TAG_IDS, value)?;
        Ok(self)
    }

    /// Reads a column or virtual attribute by name.
    pub fn get_attribute(
        &self,
        conn: &Connection,
        name: &str,
    ) -> Result<Value, ItemAttributeError> {
        if self.attributes.has_attribute(name) {
            return Ok(json!(self.attributes.get(self, conn, name)?));
        }

        match name {
            "id" => Ok(json!(self.id)),
            "name" => Ok(json!(self.name)),
            "price" => Ok(json!(self.price)),
            other => Err(ItemAttributeError::UndefinedAttribute(other.to_string())),
        }
    }

    /// Assigns a column or virtual attribute by name.
    ///
    /// Virtual attributes accept `null`, an integer or an array of integers.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: Value,
    ) -> Result<&mut Self, ItemAttributeError> {
        if self.attributes.has_attribute(name) {
            let ids = AttributeValue::from_json(&value).ok_or_else(|| {
                ItemAttributeError::InvalidValue {
                    attribute: name.to_string(),
                    expected: "null, an integer or an array of integers",
                }
            })?;
            self.attributes.set(name, ids)?;
            return Ok(self);
        }

        match name {
            "id" => return Err(ItemAttributeError::ReadOnlyAttribute(name.to_string())),
            "name" => {
                self.name = value
                    .as_str()
                    .ok_or_else(|| ItemAttributeError::InvalidValue {
                        attribute: name.to_string(),
                        expected: "a string",
                    })?
                    .to_string();
            }
            "price" => {
                self.price = value
                    .as_f64()
                    .ok_or_else(|| ItemAttributeError::InvalidValue {
                        attribute: name.to_string(),
                        expected: "a number",
                    })?;
            }
            other => return Err(ItemAttributeError::UndefinedAttribute(other.to_string())),
        }
        Ok(self)
    }

    /// After-save hook, invoked by the repository once per successful save.
    pub(crate) fn after_save(&self, conn: &Connection) -> Result<SyncReport, SyncError> {
        self.attributes.after_save(self, conn)
    }
}

impl SyncManyRecord for Item {
    type Store = Connection;

    fn relation<'s>(
        &self,
        store: &'s Connection,
        relation_name: &str,
    ) -> RelationResult<Box<dyn ManyToManyRelation + 's>> {
        let pivot = match relation_name {
            "categories" => CATEGORY_ITEM,
            "tags" => ITEM_TAG,
            other => return Err(RelationError::UnknownRelation(other.to_string())),
        };
        Ok(Box::new(BelongsToMany::try_new(store, pivot, self.id)?))
    }
}
