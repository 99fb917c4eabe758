//! Remote Store Adapter: the REST table the list is mirrored to.
//!
//! # Responsibility
//! - Translate list mirror operations into REST calls keyed by item name.
//! - Degrade to a silent no-op when credentials are not configured.
//!
//! # Invariants
//! - The adapter keeps no list state between calls.
//! - Unconfigured adapters never touch the network.

pub mod item_remote;
