//! Local Store Adapter: durable on-device persistence for the list.
//!
//! # Responsibility
//! - Define the storage contract the reconciliation engine writes through.
//! - Keep SQLite query details out of the engine.
//!
//! # Invariants
//! - Write paths call `ListItem::validate()` before touching SQL.
//! - Read paths reject invalid persisted rows instead of masking them.
//! - The store holds no authoritative state of its own; it persists on
//!   behalf of the engine.

pub mod item_repo;
