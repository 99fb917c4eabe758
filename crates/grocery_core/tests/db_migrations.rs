use grocery_core::db::migrations::latest_version;
use grocery_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "grocery_items");
    assert_index_exists(&conn, "idx_grocery_items_fulfilled");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grocery.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "grocery_items");
}

#[test]
fn schema_rejects_fulfilled_row_without_timestamp() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO grocery_items (name, quantity, fulfilled, created_at, fulfilled_at)
         VALUES ('milk', 1, 1, 10, NULL);",
        [],
    );
    assert!(result.is_err());

    let result = conn.execute(
        "INSERT INTO grocery_items (name, quantity, fulfilled, created_at, fulfilled_at)
         VALUES ('milk', 0, 0, 10, NULL);",
        [],
    );
    assert!(result.is_err());
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::NewerSchema { found, supported } => {
            assert_eq!(found, 999);
            assert_eq!(supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unreachable_cache_path_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("grocery.db");

    match open_db(&path).unwrap_err() {
        DbError::Open { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    assert!(
        schema_object_exists(conn, "table", table_name),
        "table {table_name} does not exist"
    );
}

fn assert_index_exists(conn: &Connection, index_name: &str) {
    assert!(
        schema_object_exists(conn, "index", index_name),
        "index {index_name} does not exist"
    );
}

fn schema_object_exists(conn: &Connection, kind: &str, name: &str) -> bool {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = ?1 AND name = ?2
            );",
            [kind, name],
            |row| row.get(0),
        )
        .unwrap();
    exists == 1
}
