//! List item store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide keyed-by-name CRUD and bulk deletes over `grocery_items`.
//!
//! # Invariants
//! - `upsert_item` replaces the whole row for an existing name.
//! - Listing order is `created_at DESC, name ASC`.

use crate::db::DbError;
use crate::model::item::{ItemValidationError, ListItem};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const ITEM_SELECT_SQL: &str = "SELECT
    name,
    quantity,
    fulfilled,
    created_at,
    fulfilled_at
FROM grocery_items";

pub type StoreResult<T> = Result<T, StoreError>;

/// Local persistence error. Fatal to the operation that raised it.
#[derive(Debug)]
pub enum StoreError {
    Validation(ItemValidationError),
    Db(DbError),
    NotFound(String),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(name) => write!(f, "list item not found: {name}"),
            Self::InvalidData(message) => write!(f, "invalid persisted list item: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) => None,
        }
    }
}

impl From<ItemValidationError> for StoreError {
    fn from(value: ItemValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage contract used by the reconciliation engine.
///
/// Implementations must be `Send` so the engine can own them behind its
/// async mutex.
pub trait LocalStore: Send {
    fn list_items(&self) -> StoreResult<Vec<ListItem>>;
    fn get_item(&self, name: &str) -> StoreResult<Option<ListItem>>;
    fn upsert_item(&self, item: &ListItem) -> StoreResult<()>;
    fn update_item(&self, item: &ListItem) -> StoreResult<()>;
    /// Returns whether a row was removed.
    fn delete_item(&self, name: &str) -> StoreResult<bool>;
    /// Returns the number of removed rows.
    fn delete_fulfilled(&self) -> StoreResult<usize>;
    /// Returns the number of removed rows.
    fn delete_all(&self) -> StoreResult<usize>;
}

/// SQLite-backed list store owning its connection.
pub struct SqliteItemStore {
    conn: Connection,
}

impl SqliteItemStore {
    /// Wraps a connection returned by `db::open_db*`.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl LocalStore for SqliteItemStore {
    fn list_items(&self) -> StoreResult<Vec<ListItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ITEM_SELECT_SQL} ORDER BY created_at DESC, name ASC"))?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn get_item(&self, name: &str) -> StoreResult<Option<ListItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ITEM_SELECT_SQL} WHERE name = ?1"))?;
        let raw = stmt.query_row([name], RawItemRow::read).optional()?;
        raw.map(RawItemRow::into_item).transpose()
    }

    fn upsert_item(&self, item: &ListItem) -> StoreResult<()> {
        item.validate()?;
        self.conn.execute(
            "INSERT INTO grocery_items (name, quantity, fulfilled, created_at, fulfilled_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                quantity = excluded.quantity,
                fulfilled = excluded.fulfilled,
                created_at = excluded.created_at,
                fulfilled_at = excluded.fulfilled_at;",
            params![
                item.name.as_str(),
                item.quantity,
                item.fulfilled,
                item.created_at_ms,
                item.fulfilled_at_ms,
            ],
        )?;
        Ok(())
    }

    fn update_item(&self, item: &ListItem) -> StoreResult<()> {
        item.validate()?;
        let changed = self.conn.execute(
            "UPDATE grocery_items
             SET quantity = ?1, fulfilled = ?2, created_at = ?3, fulfilled_at = ?4
             WHERE name = ?5;",
            params![
                item.quantity,
                item.fulfilled,
                item.created_at_ms,
                item.fulfilled_at_ms,
                item.name.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(item.name.clone()));
        }
        Ok(())
    }

    fn delete_item(&self, name: &str) -> StoreResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM grocery_items WHERE name = ?1;", [name])?;
        Ok(changed > 0)
    }

    fn delete_fulfilled(&self) -> StoreResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM grocery_items WHERE fulfilled = 1;", [])?)
    }

    fn delete_all(&self) -> StoreResult<usize> {
        Ok(self.conn.execute("DELETE FROM grocery_items;", [])?)
    }
}

/// Column values as stored, before domain validation.
struct RawItemRow {
    name: String,
    quantity: i64,
    fulfilled: i64,
    created_at: i64,
    fulfilled_at: Option<i64>,
}

impl RawItemRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get("name")?,
            quantity: row.get("quantity")?,
            fulfilled: row.get("fulfilled")?,
            created_at: row.get("created_at")?,
            fulfilled_at: row.get("fulfilled_at")?,
        })
    }

    fn into_item(self) -> StoreResult<ListItem> {
        let quantity = u32::try_from(self.quantity).map_err(|_| {
            StoreError::InvalidData(format!(
                "quantity `{}` out of range in grocery_items.quantity",
                self.quantity
            ))
        })?;
        let fulfilled = match self.fulfilled {
            0 => false,
            1 => true,
            other => {
                return Err(StoreError::InvalidData(format!(
                    "invalid fulfilled value `{other}` in grocery_items.fulfilled"
                )));
            }
        };
        let item = ListItem {
            name: self.name,
            quantity,
            fulfilled,
            created_at_ms: self.created_at,
            fulfilled_at_ms: self.fulfilled_at,
        };
        item.validate()?;
        Ok(item)
    }
}

fn parse_item_row(row: &Row<'_>) -> StoreResult<ListItem> {
    RawItemRow::read(row)?.into_item()
}
