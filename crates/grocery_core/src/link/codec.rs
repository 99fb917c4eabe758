//! Stateless translation between typed commands/events and JSON text frames.
//!
//! Outbound frames carry `command`, `timestamp` (epoch millis) and any extra
//! fields. Inbound frames are dispatched on `type` (default `"status"`).
//! Status decoding is best-effort: every field that is missing or has the
//! wrong shape falls back to its documented default.

use crate::model::now_epoch_ms;
use crate::model::telemetry::{CameraMode, TelemetrySnapshot, VideoFrame};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::warn;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Commands understood by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartVideoStream,
    Calibrate,
    StartTracking,
    StopTracking,
    EmergencyStop,
    GetStatus,
    SetMode(CameraMode),
}

impl Command {
    pub fn name(self) -> &'static str {
        match self {
            Self::StartVideoStream => "start_video_stream",
            Self::Calibrate => "calibrate",
            Self::StartTracking => "start_tracking",
            Self::StopTracking => "stop_tracking",
            Self::EmergencyStop => "emergency_stop",
            Self::GetStatus => "get_status",
            Self::SetMode(_) => "set_mode",
        }
    }

    pub fn extras(self) -> Map<String, Value> {
        let mut extras = Map::new();
        if let Self::SetMode(mode) = self {
            extras.insert("mode".to_string(), Value::from(mode.as_wire()));
        }
        extras
    }

    /// Stamps the command with the current time.
    pub fn pending(self) -> PendingCommand {
        PendingCommand::new(self.name(), self.extras(), now_epoch_ms())
    }
}

/// One outbound command. Fire-and-forget; never retried.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCommand {
    pub name: String,
    pub extras: Map<String, Value>,
    pub sent_at_ms: i64,
}

impl PendingCommand {
    pub fn new(name: impl Into<String>, extras: Map<String, Value>, sent_at_ms: i64) -> Self {
        Self {
            name: name.into(),
            extras,
            sent_at_ms,
        }
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Status(TelemetrySnapshot),
    VideoFrame(VideoFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    NotJson(String),
    NotAnObject,
    BadFrame(String),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotJson(message) => write!(f, "inbound frame is not JSON: {message}"),
            Self::NotAnObject => write!(f, "inbound frame is not a JSON object"),
            Self::BadFrame(message) => write!(f, "video frame payload is not base64: {message}"),
        }
    }
}

impl Error for DecodeError {}

/// Encodes a command as a JSON text frame.
///
/// `command` and `timestamp` always win over same-named extras.
pub fn encode_command(command: &PendingCommand) -> String {
    let mut body = command.extras.clone();
    body.insert("command".to_string(), Value::from(command.name.as_str()));
    body.insert("timestamp".to_string(), Value::from(command.sent_at_ms));
    Value::Object(body).to_string()
}

/// Decodes one inbound text frame, swallowing and logging malformed input.
///
/// Returns `None` for malformed frames, unknown `type` values and empty video
/// frames.
pub fn decode_message(text: &str) -> Option<InboundEvent> {
    match try_decode_message(text) {
        Ok(event) => event,
        Err(err) => {
            warn!(
                "event=frame_decode module=link status=error bytes={} error={err}",
                text.len()
            );
            None
        }
    }
}

/// Strict variant of [`decode_message`] that reports why a frame was dropped.
pub fn try_decode_message(text: &str) -> Result<Option<InboundEvent>, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| DecodeError::NotJson(err.to_string()))?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;

    match object.get("type").and_then(Value::as_str).unwrap_or("status") {
        "status" => Ok(Some(InboundEvent::Status(decode_status(object)))),
        "video_frame" => {
            let frame = object.get("frame").and_then(Value::as_str).unwrap_or("");
            if frame.is_empty() {
                return Ok(None);
            }
            let bytes = STANDARD
                .decode(frame)
                .map_err(|err| DecodeError::BadFrame(err.to_string()))?;
            Ok(Some(InboundEvent::VideoFrame(VideoFrame::new(bytes))))
        }
        _ => Ok(None),
    }
}

fn decode_status(object: &Map<String, Value>) -> TelemetrySnapshot {
    let defaults = TelemetrySnapshot::default();
    let flag = |key: &str, default: bool| object.get(key).and_then(Value::as_bool).unwrap_or(default);

    TelemetrySnapshot {
        tracking: flag("tracking", defaults.tracking),
        distance: object
            .get("distance")
            .and_then(Value::as_f64)
            .unwrap_or(defaults.distance),
        battery: object
            .get("battery")
            .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|v| v as i64)))
            .unwrap_or(defaults.battery),
        target_locked: flag("target_locked", defaults.target_locked),
        obstacle_detected: flag("obstacle_detected", defaults.obstacle_detected),
        calibrated: flag("calibrated", defaults.calibrated),
        mode: object
            .get("mode")
            .and_then(Value::as_str)
            .map_or(defaults.mode, CameraMode::from_wire),
        detected_object: object
            .get("detected_object")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    }
}
