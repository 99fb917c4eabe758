//! Core logic for the robot-assisted grocery list.
//! This crate is the single source of truth for list invariants.

pub mod config;
pub mod db;
pub mod link;
pub mod logging;
pub mod model;
pub mod remote;
pub mod repo;
pub mod sync;

pub use config::{ConfigError, Settings};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use link::connection::{CommandSink, ConnectionManager, ReconnectPolicy};
pub use link::Endpoint;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::item::{ItemValidationError, ListItem};
pub use model::telemetry::{CameraMode, ConnectionState, TelemetrySnapshot, VideoFrame};
pub use remote::item_remote::{RemoteError, RemoteStore, RestRemoteStore};
pub use repo::item_repo::{LocalStore, SqliteItemStore, StoreError, StoreResult};
pub use sync::detection::{DetectionMatcher, UnmatchedPolicy};
pub use sync::engine::{DetectionOutcome, ReconciliationEngine};
