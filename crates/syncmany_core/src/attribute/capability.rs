//! Deferred many-to-many synchronization for record types.
//!
//! # Responsibility
//! - Buffer id lists assigned to virtual attributes.
//! - Serve reads from the buffer, falling back to the relation once.
//! - Flush the buffer into relations from the after-save hook.
//!
//! # Invariants
//! - Each pending attribute is synced at most once per save and removed from
//!   the buffer right after its sync succeeded.
//! - An attribute that was never set or read is never synced.
//! - The buffer is private per record instance and never persisted.

use super::definition::AttributeDefinition;
use super::registry::AttributeRegistry;
use super::value::{AttributeValue, RelatedId};
use crate::relation::{ManyToManyRelation, RelationError, RelationResult, SyncChanges};
use log::{debug, error, info};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

/// Pending id lists keyed by attribute name.
pub type PendingAttributes = BTreeMap<String, Vec<RelatedId>>;

/// Change reports of one after-save pass, keyed by attribute name.
pub type SyncReport = BTreeMap<String, SyncChanges>;

/// Record type exposing many-to-many relations by name.
///
/// Implementors own a [`SyncManyAttributes`] and are contractually required
/// to call [`SyncManyAttributes::after_save`] exactly once after every
/// successful insert or update.
pub trait SyncManyRecord: Sized {
    /// Storage handle relations are resolved against.
    type Store: ?Sized;

    /// Returns the relation named `relation_name` for this record.
    ///
    /// # Errors
    /// - `RelationError::UnknownRelation` when no such relation exists.
    fn relation<'s>(
        &self,
        store: &'s Self::Store,
        relation_name: &str,
    ) -> RelationResult<Box<dyn ManyToManyRelation + 's>>;
}

/// Virtual attribute access and sync failures.
#[derive(Debug)]
pub enum SyncError {
    UndefinedAttribute(String),
    Relation {
        attribute: String,
        source: RelationError,
    },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndefinedAttribute(name) => write!(f, "undefined attribute `{name}`"),
            Self::Relation { attribute, source } => {
                write!(f, "relation sync failed for attribute `{attribute}`: {source}")
            }
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UndefinedAttribute(_) => None,
            Self::Relation { source, .. } => Some(source),
        }
    }
}

/// Per-instance virtual attribute state owned by a record.
pub struct SyncManyAttributes<R> {
    definitions: Arc<AttributeRegistry<R>>,
    pending: RefCell<PendingAttributes>,
}

impl<R> SyncManyAttributes<R> {
    /// Creates an empty buffer over the record type's definitions.
    pub fn new(definitions: Arc<AttributeRegistry<R>>) -> Self {
        Self {
            definitions,
            pending: RefCell::new(PendingAttributes::new()),
        }
    }

    /// Returns whether `name` is pending or declared.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.is_pending(name) || self.definitions.contains(name)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending.borrow().contains_key(name)
    }

    /// Names of attributes the next save will sync.
    pub fn pending_names(&self) -> Vec<String> {
        self.pending.borrow().keys().cloned().collect()
    }

    /// Stores `value` as the pending id list of `name`.
    ///
    /// A scalar becomes a single-element list, `Null` an empty one. Any
    /// earlier pending value is replaced.
    ///
    /// # Errors
    /// - `UndefinedAttribute` when `name` is not declared; callers fall back
    ///   to their plain attribute handling.
    pub fn set(
        &mut self,
        name: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<&mut Self, SyncError> {
        if !self.has_attribute(name) {
            return Err(SyncError::UndefinedAttribute(name.to_string()));
        }

        let ids = value.into().into_ids();
        debug!(
            "event=attribute_set module=attribute status=ok attribute={} ids={}",
            name,
            ids.len()
        );
        self.pending.get_mut().insert(name.to_string(), ids);
        Ok(self)
    }

    /// Copy of the buffer, for restoring after a rolled back save.
    pub fn pending_snapshot(&self) -> PendingAttributes {
        self.pending.borrow().clone()
    }

    /// Replaces the buffer with `snapshot`.
    pub fn restore_pending(&self, snapshot: PendingAttributes) {
        *self.pending.borrow_mut() = snapshot;
    }

    fn definition(&self, name: &str) -> Result<&AttributeDefinition<R>, SyncError> {
        self.definitions
            .get(name)
            .ok_or_else(|| SyncError::UndefinedAttribute(name.to_string()))
    }
}

impl<R: SyncManyRecord> SyncManyAttributes<R> {
    /// Returns the id list of `name`.
    ///
    /// Pending values win. Otherwise the relation is queried once and the
    /// result is cached as pending, so later reads agree until the next save.
    ///
    /// # Errors
    /// - `UndefinedAttribute` when `name` is neither pending nor declared.
    /// - `Relation` when the relation lookup or query fails.
    pub fn get(
        &self,
        record: &R,
        store: &R::Store,
        name: &str,
    ) -> Result<Vec<RelatedId>, SyncError> {
        if let Some(ids) = self.pending.borrow().get(name) {
            return Ok(ids.clone());
        }

        let ids = self
            .definition(name)?
            .get_related_ids(record, store)
            .map_err(|source| SyncError::Relation {
                attribute: name.to_string(),
                source,
            })?;
        debug!(
            "event=attribute_load module=attribute status=ok attribute={} ids={}",
            name,
            ids.len()
        );
        self.pending
            .borrow_mut()
            .insert(name.to_string(), ids.clone());
        Ok(ids)
    }

    /// After-save hook: syncs every pending attribute into its relation.
    ///
    /// Attributes are processed in name order. Each one leaves the buffer as
    /// soon as its sync succeeds; on failure the pass stops and the failed
    /// and remaining attributes stay pending. An empty buffer is a no-op.
    pub fn after_save(&self, record: &R, store: &R::Store) -> Result<SyncReport, SyncError> {
        let mut report = SyncReport::new();
        for name in self.pending_names() {
            let Some(ids) = self.pending.borrow().get(&name).cloned() else {
                continue;
            };

            let changes = self
                .definition(&name)?
                .sync(record, store, &ids)
                .map_err(|source| {
                    error!(
                        "event=attribute_sync module=attribute status=error attribute={} error={}",
                        name, source
                    );
                    SyncError::Relation {
                        attribute: name.clone(),
                        source,
                    }
                })?;

            self.pending.borrow_mut().remove(&name);
            report.insert(name, changes);
        }

        if !report.is_empty() {
            info!(
                "event=attribute_sync module=attribute status=ok attributes={}",
                report.len()
            );
        }
        Ok(report)
    }
}

impl<R> Clone for SyncManyAttributes<R> {
    fn clone(&self) -> Self {
        Self {
            definitions: Arc::clone(&self.definitions),
            pending: RefCell::new(self.pending_snapshot()),
        }
    }
}

impl<R> Debug for SyncManyAttributes<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManyAttributes")
            .field("declared", &self.definitions.names())
            .field("pending", &*self.pending.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{SyncError, SyncManyAttributes, SyncManyRecord};
    use crate::attribute::definition::{AttributeDefinition, PivotField, PivotSpec};
    use crate::attribute::registry::AttributeRegistry;
    use crate::attribute::value::{PivotMap, PivotValue, RelatedId};
    use crate::relation::{
        ManyToManyRelation, RelationError, RelationResult, SyncChanges, SyncPayload,
    };
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// In-memory join tables keyed by relation name.
    #[derive(Default)]
    struct FakeStore {
        links: RefCell<BTreeMap<String, Vec<(RelatedId, PivotMap)>>>,
        reads: Cell<usize>,
        syncs: Cell<usize>,
        fail_relation: Option<&'static str>,
    }

    impl FakeStore {
        fn seed(&self, relation: &str, ids: &[RelatedId]) {
            self.links.borrow_mut().insert(
                relation.to_string(),
                ids.iter().map(|id| (*id, PivotMap::new())).collect(),
            );
        }

        fn ids(&self, relation: &str) -> Vec<RelatedId> {
            self.links
                .borrow()
                .get(relation)
                .map(|rows| rows.iter().map(|(id, _)| *id).collect())
                .unwrap_or_default()
        }

        fn pivots(&self, relation: &str) -> Vec<PivotMap> {
            self.links
                .borrow()
                .get(relation)
                .map(|rows| rows.iter().map(|(_, pivot)| pivot.clone()).collect())
                .unwrap_or_default()
        }
    }

    struct FakeRelation<'s> {
        store: &'s FakeStore,
        name: String,
    }

    impl ManyToManyRelation for FakeRelation<'_> {
        fn all_related_ids(&self) -> RelationResult<Vec<RelatedId>> {
            self.store.reads.set(self.store.reads.get() + 1);
            Ok(self.store.ids(&self.name))
        }

        fn sync(&self, payload: SyncPayload) -> RelationResult<SyncChanges> {
            if self.store.fail_relation == Some(self.name.as_str()) {
                return Err(RelationError::MissingRequiredTable("forced"));
            }
            self.store.syncs.set(self.store.syncs.get() + 1);
            let rows = match payload {
                SyncPayload::Ids(ids) => ids.into_iter().map(|id| (id, PivotMap::new())).collect(),
                SyncPayload::WithPivot(entries) => entries,
            };
            let changes = SyncChanges {
                attached: rows.iter().map(|(id, _)| *id).collect(),
                ..SyncChanges::default()
            };
            self.store.links.borrow_mut().insert(self.name.clone(), rows);
            Ok(changes)
        }
    }

    struct Post {
        id: i64,
        attributes: SyncManyAttributes<Post>,
    }

    impl SyncManyRecord for Post {
        type Store = FakeStore;

        fn relation<'s>(
            &self,
            store: &'s FakeStore,
            relation_name: &str,
        ) -> RelationResult<Box<dyn ManyToManyRelation + 's>> {
            match relation_name {
                "categories" | "tags" => Ok(Box::new(FakeRelation {
                    store,
                    name: relation_name.to_string(),
                })),
                other => Err(RelationError::UnknownRelation(other.to_string())),
            }
        }
    }

    impl Post {
        fn new(registry: &Arc<AttributeRegistry<Post>>) -> Self {
            Self {
                id: 9,
                attributes: SyncManyAttributes::new(Arc::clone(registry)),
            }
        }

        fn get(&self, store: &FakeStore, name: &str) -> Result<Vec<RelatedId>, SyncError> {
            self.attributes.get(self, store, name)
        }

        fn save(&self, store: &FakeStore) -> Result<(), SyncError> {
            self.attributes.after_save(self, store).map(|_| ())
        }
    }

    fn registry() -> Arc<AttributeRegistry<Post>> {
        let mut registry = AttributeRegistry::new();
        registry.register("category_ids", "categories").unwrap();
        registry
            .register(
                "tag_ids",
                AttributeDefinition::new("tags").pivot_attributes(PivotSpec::fields([
                    ("reason", PivotField::constant("x")),
                    (
                        "attached_at",
                        PivotField::computed(|post: &Post| PivotValue::Integer(post.id * 1000)),
                    ),
                ])),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn first_read_loads_relation_once_and_caches() {
        let store = FakeStore::default();
        store.seed("categories", &[1, 2]);
        let post = Post::new(&registry());

        assert_eq!(post.get(&store, "category_ids").unwrap(), vec![1, 2]);
        store.seed("categories", &[7]);
        assert_eq!(post.get(&store, "category_ids").unwrap(), vec![1, 2]);
        assert_eq!(store.reads.get(), 1);
    }

    #[test]
    fn set_value_is_returned_verbatim_before_save() {
        let store = FakeStore::default();
        store.seed("categories", &[1, 2]);
        let mut post = Post::new(&registry());

        post.attributes.set("category_ids", vec![3, 3, 1]).unwrap();
        assert_eq!(post.get(&store, "category_ids").unwrap(), vec![3, 3, 1]);

        post.attributes.set("category_ids", Vec::new()).unwrap();
        assert!(post.get(&store, "category_ids").unwrap().is_empty());
        assert_eq!(store.reads.get(), 0);
    }

    #[test]
    fn scalar_and_null_assignments_wrap_into_lists() {
        let store = FakeStore::default();
        let mut post = Post::new(&registry());

        post.attributes.set("category_ids", 4_i64).unwrap();
        assert_eq!(post.get(&store, "category_ids").unwrap(), vec![4]);

        post.attributes.set("category_ids", None::<RelatedId>).unwrap();
        assert!(post.get(&store, "category_ids").unwrap().is_empty());
    }

    #[test]
    fn save_syncs_last_pending_value_and_clears_buffer() {
        let store = FakeStore::default();
        store.seed("categories", &[1, 2]);
        let mut post = Post::new(&registry());

        assert_eq!(post.get(&store, "category_ids").unwrap(), vec![1, 2]);
        post.attributes.set("category_ids", vec![2, 3]).unwrap();
        post.save(&store).unwrap();

        assert_eq!(store.ids("categories"), vec![2, 3]);
        assert!(!post.attributes.is_pending("category_ids"));
        assert_eq!(store.syncs.get(), 1);

        post.save(&store).unwrap();
        assert_eq!(store.syncs.get(), 1);

        post.attributes.set("category_ids", None::<RelatedId>).unwrap();
        post.save(&store).unwrap();
        assert!(store.ids("categories").is_empty());
    }

    #[test]
    fn save_without_pending_values_leaves_relations_untouched() {
        let store = FakeStore::default();
        store.seed("categories", &[1, 2]);
        let post = Post::new(&registry());

        let report = post.attributes.after_save(&post, &store).unwrap();
        assert!(report.is_empty());
        assert_eq!(store.syncs.get(), 0);
        assert_eq!(store.ids("categories"), vec![1, 2]);
    }

    #[test]
    fn undefined_attribute_fails_on_get_and_set() {
        let store = FakeStore::default();
        let mut post = Post::new(&registry());

        let err = post.get(&store, "foo_ids").unwrap_err();
        assert!(matches!(err, SyncError::UndefinedAttribute(ref name) if name == "foo_ids"));
        assert!(err.to_string().contains("undefined attribute"));
        assert!(post.attributes.set("foo_ids", vec![1]).is_err());
        assert!(!post.attributes.has_attribute("foo_ids"));
        assert!(post.attributes.has_attribute("tag_ids"));
    }

    #[test]
    fn pivot_values_are_shared_by_every_synced_id() {
        let store = FakeStore::default();
        let mut post = Post::new(&registry());

        post.attributes.set("tag_ids", vec![5, 6]).unwrap();
        post.save(&store).unwrap();

        let pivots = store.pivots("tags");
        assert_eq!(pivots.len(), 2);
        for pivot in &pivots {
            assert_eq!(pivot.get("reason"), Some(&PivotValue::from("x")));
            assert_eq!(pivot.get("attached_at"), Some(&PivotValue::Integer(9000)));
        }
    }

    #[test]
    fn failed_sync_keeps_failed_and_remaining_attributes_pending() {
        let store = FakeStore {
            fail_relation: Some("tags"),
            ..FakeStore::default()
        };
        let mut post = Post::new(&registry());

        post.attributes.set("category_ids", vec![1]).unwrap();
        post.attributes.set("tag_ids", vec![2]).unwrap();
        let err = post.save(&store).unwrap_err();

        assert!(matches!(err, SyncError::Relation { ref attribute, .. } if attribute == "tag_ids"));
        assert_eq!(store.ids("categories"), vec![1]);
        assert_eq!(post.attributes.pending_names(), vec!["tag_ids".to_string()]);
    }

    #[test]
    fn snapshot_restores_buffer() {
        let mut post = Post::new(&registry());
        post.attributes.set("category_ids", vec![1]).unwrap();
        let snapshot = post.attributes.pending_snapshot();

        post.attributes.set("category_ids", vec![7]).unwrap();
        post.attributes.set("tag_ids", vec![2]).unwrap();

        post.attributes.restore_pending(snapshot.clone());
        assert_eq!(post.attributes.pending_snapshot(), snapshot);
        assert_eq!(post.attributes.pending_names(), vec!["category_ids".to_string()]);
    }
}
