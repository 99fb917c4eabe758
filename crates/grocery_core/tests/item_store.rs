use grocery_core::db::{open_db, open_db_in_memory};
use grocery_core::{ItemValidationError, ListItem, LocalStore, SqliteItemStore, StoreError};

fn store() -> SqliteItemStore {
    SqliteItemStore::new(open_db_in_memory().unwrap())
}

#[test]
fn upsert_replaces_by_name() {
    let store = store();
    store.upsert_item(&ListItem::new("milk", 2, 10)).unwrap();
    store.upsert_item(&ListItem::new("milk", 5, 20)).unwrap();

    let items = store.list_items().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, 5);
    assert_eq!(items[0].created_at_ms, 20);
}

#[test]
fn names_are_case_sensitive_keys() {
    let store = store();
    store.upsert_item(&ListItem::new("Milk", 1, 10)).unwrap();
    store.upsert_item(&ListItem::new("milk", 1, 10)).unwrap();
    assert_eq!(store.list_items().unwrap().len(), 2);
    assert!(store.get_item("MILK").unwrap().is_none());
}

#[test]
fn list_orders_newest_first_then_name() {
    let store = store();
    store.upsert_item(&ListItem::new("bread", 1, 10)).unwrap();
    store.upsert_item(&ListItem::new("milk", 1, 30)).unwrap();
    store.upsert_item(&ListItem::new("apples", 1, 30)).unwrap();

    let names = store
        .list_items()
        .unwrap()
        .into_iter()
        .map(|item| item.name)
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["apples", "milk", "bread"]);
}

#[test]
fn update_round_trips_fulfillment_and_requires_existing_row() {
    let store = store();
    let mut item = ListItem::new("eggs", 12, 10);
    store.upsert_item(&item).unwrap();

    item.set_fulfilled(true, 99);
    store.update_item(&item).unwrap();
    let loaded = store.get_item("eggs").unwrap().unwrap();
    assert!(loaded.fulfilled);
    assert_eq!(loaded.fulfilled_at_ms, Some(99));

    let missing = ListItem::new("butter", 1, 10);
    assert!(matches!(
        store.update_item(&missing),
        Err(StoreError::NotFound(name)) if name == "butter"
    ));
}

#[test]
fn writes_validate_before_touching_the_table() {
    let store = store();
    let mut item = ListItem::new("tea", 1, 10);
    item.fulfilled = true;
    assert!(matches!(
        store.upsert_item(&item),
        Err(StoreError::Validation(ItemValidationError::MissingFulfilledAt))
    ));
    assert!(store.list_items().unwrap().is_empty());
}

#[test]
fn deletes_report_what_they_removed() {
    let store = store();
    for (name, fulfilled) in [("a", true), ("b", true), ("c", false)] {
        let mut item = ListItem::new(name, 1, 10);
        item.set_fulfilled(fulfilled, 20);
        store.upsert_item(&item).unwrap();
    }

    assert!(store.delete_item("c").unwrap());
    assert!(!store.delete_item("c").unwrap());
    assert_eq!(store.delete_fulfilled().unwrap(), 2);
    assert!(store.list_items().unwrap().is_empty());

    store.upsert_item(&ListItem::new("d", 1, 10)).unwrap();
    assert_eq!(store.delete_all().unwrap(), 1);
}

#[test]
fn invalid_persisted_rows_are_rejected_on_read() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch("PRAGMA ignore_check_constraints = ON;")
        .unwrap();
    conn.execute(
        "INSERT INTO grocery_items (name, quantity, fulfilled, created_at, fulfilled_at)
         VALUES ('ghost', 1, 2, 10, 5);",
        [],
    )
    .unwrap();
    let store = SqliteItemStore::new(conn);

    assert!(matches!(
        store.get_item("ghost"),
        Err(StoreError::InvalidData(_))
    ));
}

#[test]
fn items_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grocery.db");

    let store = SqliteItemStore::new(open_db(&path).unwrap());
    store.upsert_item(&ListItem::new("rice", 3, 10)).unwrap();
    drop(store);

    let reopened = SqliteItemStore::new(open_db(&path).unwrap());
    assert_eq!(reopened.get_item("rice").unwrap().unwrap().quantity, 3);
}
