//! Domain model for the shopping list and the robot telemetry stream.
//!
//! # Responsibility
//! - Define canonical data structures used by the reconciliation core.
//! - Keep list identity (`name`) and telemetry snapshots free of storage or
//!   transport details.
//!
//! # Invariants
//! - Exactly one `ListItem` exists per distinct name in the canonical list.
//! - A `ListItem` carries a fulfillment timestamp iff it is fulfilled.
//! - Telemetry snapshots are replaced wholesale, never merged.

pub mod item;
pub mod telemetry;

use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in Unix epoch milliseconds.
///
/// Falls back to `0` when the system clock is before the epoch.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
