//! List reconciliation between the canonical list, the local store, the
//! remote mirror and the robot's detection stream.
//!
//! # Responsibility
//! - `engine` owns the canonical list and serializes every mutation.
//! - `mirror` replays applied mutations against the remote store in order.
//! - `detection` turns telemetry detections into engine mutations.
//!
//! # Invariants
//! - Local writes complete before the matching remote call is queued.
//! - Remote failures never roll back or fail a local mutation.

pub mod detection;
pub mod engine;
pub mod mirror;
