//! Shopping list item model.
//!
//! # Responsibility
//! - Define the canonical record shared by the local cache, the remote mirror
//!   and the detection path.
//! - Provide lifecycle helpers that keep fulfillment state consistent.
//!
//! # Invariants
//! - `name` is the identity key and is never blank.
//! - `quantity` is at least 1.
//! - `fulfilled_at_ms` is `Some` iff `fulfilled` is `true`.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Validation failures for `ListItem` invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemValidationError {
    BlankName,
    ZeroQuantity,
    /// `fulfilled` is set but no fulfillment timestamp is present.
    MissingFulfilledAt,
    /// A fulfillment timestamp is present on an open item.
    UnexpectedFulfilledAt(i64),
}

impl Display for ItemValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankName => write!(f, "item name must not be blank"),
            Self::ZeroQuantity => write!(f, "item quantity must be at least 1"),
            Self::MissingFulfilledAt => {
                write!(f, "fulfilled item must carry a fulfillment timestamp")
            }
            Self::UnexpectedFulfilledAt(at) => {
                write!(f, "open item must not carry a fulfillment timestamp ({at})")
            }
        }
    }
}

impl Error for ItemValidationError {}

/// One entry of the shopping list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    /// Case-sensitive identity key.
    pub name: String,
    pub quantity: u32,
    pub fulfilled: bool,
    /// Unix epoch milliseconds.
    pub created_at_ms: i64,
    /// Unix epoch milliseconds; present iff `fulfilled`.
    pub fulfilled_at_ms: Option<i64>,
}

impl ListItem {
    /// Creates an open item.
    ///
    /// The name is trimmed and the quantity is clamped to a minimum of 1.
    /// Callers are expected to reject blank names before constructing.
    pub fn new(name: impl AsRef<str>, quantity: u32, now_ms: i64) -> Self {
        Self {
            name: name.as_ref().trim().to_string(),
            quantity: quantity.max(1),
            fulfilled: false,
            created_at_ms: now_ms,
            fulfilled_at_ms: None,
        }
    }

    /// Creates an item that is already checked off, as recorded when the
    /// detector reports an object that was never listed.
    pub fn fulfilled_on_detection(name: impl AsRef<str>, now_ms: i64) -> Self {
        let mut item = Self::new(name, 1, now_ms);
        item.set_fulfilled(true, now_ms);
        item
    }

    /// Sets the fulfilled flag and keeps the timestamp in lockstep.
    pub fn set_fulfilled(&mut self, fulfilled: bool, now_ms: i64) {
        self.fulfilled = fulfilled;
        self.fulfilled_at_ms = fulfilled.then_some(now_ms);
    }

    /// Flips the fulfilled flag.
    pub fn toggle_fulfilled(&mut self, now_ms: i64) {
        self.set_fulfilled(!self.fulfilled, now_ms);
    }

    /// Case-insensitive name comparison used by detection matching.
    pub fn matches_name(&self, other: &str) -> bool {
        self.name == other || self.name.to_lowercase() == other.to_lowercase()
    }

    pub fn validate(&self) -> Result<(), ItemValidationError> {
        if self.name.trim().is_empty() {
            return Err(ItemValidationError::BlankName);
        }
        if self.quantity == 0 {
            return Err(ItemValidationError::ZeroQuantity);
        }
        match (self.fulfilled, self.fulfilled_at_ms) {
            (true, None) => Err(ItemValidationError::MissingFulfilledAt),
            (false, Some(at)) => Err(ItemValidationError::UnexpectedFulfilledAt(at)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ItemValidationError, ListItem};

    #[test]
    fn new_trims_name_and_clamps_quantity() {
        let item = ListItem::new("  milk ", 0, 10);
        assert_eq!(item.name, "milk");
        assert_eq!(item.quantity, 1);
        assert!(!item.fulfilled);
        assert_eq!(item.fulfilled_at_ms, None);
    }

    #[test]
    fn toggle_keeps_timestamp_in_lockstep() {
        let mut item = ListItem::new("eggs", 12, 10);
        item.toggle_fulfilled(20);
        assert_eq!(item.fulfilled_at_ms, Some(20));
        item.toggle_fulfilled(30);
        assert_eq!(item.fulfilled_at_ms, None);
        item.validate().unwrap();
    }

    #[test]
    fn validate_rejects_dangling_timestamp() {
        let mut item = ListItem::new("bread", 1, 10);
        item.fulfilled_at_ms = Some(11);
        assert_eq!(
            item.validate().unwrap_err(),
            ItemValidationError::UnexpectedFulfilledAt(11)
        );
    }
}
