//! Local list cache: SQLite bootstrap and schema upgrades.
//!
//! # Responsibility
//! - Open the cache file (or an in-memory cache) the list store writes to.
//! - Bring its schema up to date before any item is read.
//!
//! # Invariants
//! - The cache schema version lives in `PRAGMA user_version`.
//! - A cache written by a newer build is refused, never downgraded.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    /// The cache file could not be opened or created.
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },
    Sqlite(rusqlite::Error),
    /// The cache was last migrated by a newer build.
    NewerSchema { found: u32, supported: u32 },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "cannot open list cache {}: {source}", path.display())
            }
            Self::Sqlite(err) => write!(f, "list cache: {err}"),
            Self::NewerSchema { found, supported } => write!(
                f,
                "list cache schema v{found} comes from a newer build (this one knows up to v{supported})"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Sqlite(err) => Some(err),
            Self::NewerSchema { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
