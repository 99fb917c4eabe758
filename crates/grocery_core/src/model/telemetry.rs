//! Live-connection state and robot telemetry snapshots.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Lifecycle state of the live robot connection.
///
/// Written only by the connection manager; everything else reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Camera behavior reported by (and commanded on) the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    #[default]
    Scan,
    Follow,
}

impl CameraMode {
    /// Wire value used by `set_mode` and status messages.
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Follow => "follow",
        }
    }

    /// `"follow"` maps to `Follow`; anything else is `Scan`.
    pub fn from_wire(value: &str) -> Self {
        if value == "follow" {
            Self::Follow
        } else {
            Self::Scan
        }
    }
}

/// Point-in-time robot status. Each inbound status message replaces the
/// previous snapshot wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub tracking: bool,
    pub distance: f64,
    pub battery: i64,
    pub target_locked: bool,
    pub obstacle_detected: bool,
    pub calibrated: bool,
    pub mode: CameraMode,
    /// Empty string means nothing is currently detected.
    pub detected_object: String,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            tracking: false,
            distance: 0.0,
            battery: 100,
            target_locked: false,
            obstacle_detected: false,
            calibrated: false,
            mode: CameraMode::Scan,
            detected_object: String::new(),
        }
    }
}

/// Latest out-of-band image payload, already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub bytes: Arc<[u8]>,
}

impl VideoFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
