use rusqlite::Connection;
use serde_json::json;
use syncmany_core::db::open_db_in_memory;
use syncmany_core::{
    AttributeValue, CatalogRepository, Item, ItemAttributeError, ItemRepository, RelationError,
    RepoError, SqliteCatalogRepository, SqliteItemRepository, SyncError,
};

fn seed_categories(conn: &Connection, count: usize) -> Vec<i64> {
    let catalog = SqliteCatalogRepository::try_new(conn).unwrap();
    (0..count)
        .map(|idx| catalog.create_category(&format!("category-{idx}")).unwrap())
        .collect()
}

fn seed_tags(conn: &Connection, count: usize) -> Vec<i64> {
    let catalog = SqliteCatalogRepository::try_new(conn).unwrap();
    (0..count)
        .map(|idx| catalog.create_tag(&format!("tag-{idx}")).unwrap())
        .collect()
}

fn stored_category_ids(conn: &Connection, item_id: i64) -> Vec<i64> {
    let mut stmt = conn
        .prepare("SELECT category_id FROM category_item WHERE item_id = ?1 ORDER BY category_id;")
        .unwrap();
    let rows = stmt
        .query_map([item_id], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<i64>, _>>()
        .unwrap();
    rows
}

fn count_rows(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn inserting_item_attaches_assigned_categories() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 3);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 12.5);
    item.set_category_ids(vec![categories[0], categories[2]])
        .unwrap();
    let outcome = repo.save_item(&mut item).unwrap();

    assert!(outcome.inserted);
    assert_eq!(item.id, Some(outcome.id));
    assert_eq!(
        outcome.synced["category_ids"].attached,
        vec![categories[0], categories[2]]
    );
    assert!(item.attributes().pending_names().is_empty());
    assert_eq!(
        stored_category_ids(&conn, outcome.id),
        vec![categories[0], categories[2]]
    );
}

#[test]
fn updating_item_replaces_category_set() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 3);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 12.5);
    item.set_category_ids(vec![categories[0], categories[1]])
        .unwrap();
    let id = repo.save_item(&mut item).unwrap().id;

    let mut loaded = repo.get_item(id).unwrap().unwrap();
    assert_eq!(
        loaded.category_ids(&conn).unwrap(),
        vec![categories[0], categories[1]]
    );

    loaded
        .set_category_ids(vec![categories[1], categories[2]])
        .unwrap();
    let outcome = repo.save_item(&mut loaded).unwrap();
    let changes = &outcome.synced["category_ids"];

    assert!(!outcome.inserted);
    assert_eq!(changes.detached, vec![categories[0]]);
    assert_eq!(changes.attached, vec![categories[2]]);
    assert_eq!(
        stored_category_ids(&conn, id),
        vec![categories[1], categories[2]]
    );

    let fresh = repo.get_item(id).unwrap().unwrap();
    assert_eq!(
        fresh.category_ids(&conn).unwrap(),
        vec![categories[1], categories[2]]
    );
}

#[test]
fn null_clears_and_scalar_wraps_into_single_id() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 2);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(categories.clone()).unwrap();
    let id = repo.save_item(&mut item).unwrap().id;

    item.set_category_ids(AttributeValue::Null).unwrap();
    repo.save_item(&mut item).unwrap();
    assert!(stored_category_ids(&conn, id).is_empty());

    item.set_category_ids(categories[1]).unwrap();
    repo.save_item(&mut item).unwrap();
    assert_eq!(stored_category_ids(&conn, id), vec![categories[1]]);
}

#[test]
fn duplicate_ids_attach_once() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 2);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(vec![categories[1], categories[0], categories[1]])
        .unwrap();
    let outcome = repo.save_item(&mut item).unwrap();

    assert_eq!(
        outcome.synced["category_ids"].attached,
        vec![categories[1], categories[0]]
    );
    assert_eq!(count_rows(&conn, "category_item"), 2);
}

#[test]
fn tag_sync_stamps_pivot_columns() {
    let conn = open_db_in_memory().unwrap();
    let tags = seed_tags(&conn, 3);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_tag_ids(tags.clone()).unwrap();
    let id = repo.save_item(&mut item).unwrap().id;

    let mut stmt = conn
        .prepare("SELECT reason, attached_at FROM item_tag WHERE item_id = ?1;")
        .unwrap();
    let rows = stmt
        .query_map([id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(reason, _)| reason == "test-reason"));
    let stamp = rows[0].1;
    assert!(stamp > 0);
    assert!(rows.iter().all(|(_, attached_at)| *attached_at == stamp));
}

#[test]
fn undefined_attribute_is_rejected() {
    let mut item = Item::new("lamp", 1.0);

    let err = item.set_attribute("foo_ids", json!([1, 2])).unwrap_err();
    assert!(matches!(
        err,
        ItemAttributeError::UndefinedAttribute(ref name) if name == "foo_ids"
    ));
    assert!(item.attributes().pending_names().is_empty());
}

#[test]
fn saving_without_pending_values_touches_no_relation() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 1);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(categories.clone()).unwrap();
    repo.save_item(&mut item).unwrap();

    item.name = "desk lamp".to_string();
    let outcome = repo.save_item(&mut item).unwrap();

    assert!(!outcome.inserted);
    assert!(outcome.synced.is_empty());
    assert_eq!(count_rows(&conn, "category_item"), 1);
}

#[test]
fn reading_before_assigning_resyncs_same_set() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 2);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(categories.clone()).unwrap();
    let id = repo.save_item(&mut item).unwrap().id;

    let mut loaded = repo.get_item(id).unwrap().unwrap();
    assert_eq!(loaded.category_ids(&conn).unwrap(), categories);
    assert!(loaded.attributes().is_pending("category_ids"));

    let outcome = repo.save_item(&mut loaded).unwrap();
    assert!(outcome.synced["category_ids"].is_empty());
    assert_eq!(stored_category_ids(&conn, id), categories);
}

#[test]
fn failed_relation_sync_rolls_back_new_item() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 1);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(vec![categories[0], 9_999]).unwrap();

    let err = repo.save_item(&mut item).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Sync(SyncError::Relation {
            ref attribute,
            source: RelationError::Db(_),
        }) if attribute == "category_ids"
    ));
    assert_eq!(item.id, None);
    assert!(item.attributes().is_pending("category_ids"));
    assert_eq!(count_rows(&conn, "items"), 0);
    assert_eq!(count_rows(&conn, "category_item"), 0);

    item.set_category_ids(categories.clone()).unwrap();
    let outcome = repo.save_item(&mut item).unwrap();
    assert_eq!(stored_category_ids(&conn, outcome.id), categories);
}

#[test]
fn failed_second_attribute_rolls_back_first() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 1);
    let tags = seed_tags(&conn, 1);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(vec![categories[0]]).unwrap();
    item.set_tag_ids(vec![tags[0]]).unwrap();
    let id = repo.save_item(&mut item).unwrap().id;

    item.name = "renamed".to_string();
    item.set_category_ids(AttributeValue::Null).unwrap();
    item.set_tag_ids(vec![tags[0], 4_242]).unwrap();

    let err = repo.save_item(&mut item).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Sync(SyncError::Relation { ref attribute, .. }) if attribute == "tag_ids"
    ));
    assert_eq!(item.id, Some(id));
    assert_eq!(
        item.attributes().pending_names(),
        vec!["category_ids".to_string(), "tag_ids".to_string()]
    );

    let stored = repo.get_item(id).unwrap().unwrap();
    assert_eq!(stored.name, "lamp");
    assert_eq!(stored_category_ids(&conn, id), vec![categories[0]]);
    assert_eq!(count_rows(&conn, "item_tag"), 1);
}

#[test]
fn deleting_item_cascades_join_rows() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 2);
    let tags = seed_tags(&conn, 2);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(categories).unwrap();
    item.set_tag_ids(tags).unwrap();
    let id = repo.save_item(&mut item).unwrap().id;

    repo.delete_item(id).unwrap();

    assert!(repo.get_item(id).unwrap().is_none());
    assert_eq!(count_rows(&conn, "category_item"), 0);
    assert_eq!(count_rows(&conn, "item_tag"), 0);
    assert!(matches!(repo.delete_item(id), Err(RepoError::NotFound(_))));
}

#[test]
fn keyed_access_round_trips_through_save() {
    let conn = open_db_in_memory().unwrap();
    let tags = seed_tags(&conn, 2);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_attribute("tag_ids", json!(tags)).unwrap();
    let id = repo.save_item(&mut item).unwrap().id;

    let loaded = repo.get_item(id).unwrap().unwrap();
    assert_eq!(loaded.get_attribute(&conn, "tag_ids").unwrap(), json!(tags));
    assert_eq!(loaded.get_attribute(&conn, "name").unwrap(), json!("lamp"));
}

#[test]
fn invalid_item_is_rejected_before_sql() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("   ", 1.0);
    item.set_category_ids(vec![1_i64]).unwrap();

    assert!(matches!(
        repo.save_item(&mut item),
        Err(RepoError::Validation(_))
    ));
    assert!(item.attributes().is_pending("category_ids"));
    assert_eq!(count_rows(&conn, "items"), 0);
}

#[test]
fn listed_items_start_with_empty_pending_buffer() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 1);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut first = Item::new("lamp", 1.0);
    first.set_category_ids(categories.clone()).unwrap();
    repo.save_item(&mut first).unwrap();
    repo.save_item(&mut Item::new("desk", 80.0)).unwrap();

    let items = repo.list_items().unwrap();
    let names: Vec<&str> = items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, vec!["lamp", "desk"]);
    assert!(items
        .iter()
        .all(|item| item.attributes().pending_names().is_empty()));
    assert_eq!(items[0].category_ids(&conn).unwrap(), categories);
    assert!(items[1].category_ids(&conn).unwrap().is_empty());
}

#[test]
fn save_report_serializes_per_attribute_changes() {
    let conn = open_db_in_memory().unwrap();
    let categories = seed_categories(&conn, 2);
    let repo = SqliteItemRepository::try_new(&conn).unwrap();

    let mut item = Item::new("lamp", 1.0);
    item.set_category_ids(categories.clone()).unwrap();
    let outcome = repo.save_item(&mut item).unwrap();

    assert_eq!(
        serde_json::to_value(&outcome.synced).unwrap(),
        json!({
            "category_ids": {"attached": categories, "detached": [], "updated": []}
        })
    );
}
