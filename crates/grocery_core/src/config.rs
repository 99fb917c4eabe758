//! Layered runtime settings.
//!
//! # Responsibility
//! - Provide defaults for every knob so a bare process still starts.
//! - Merge an optional TOML file and `GROCERY_*` environment overrides.
//!
//! # Invariants
//! - Later layers replace earlier ones field by field.
//! - Unknown TOML keys are rejected; malformed overrides are errors, not
//!   silently ignored.

use crate::link::connection::ReconnectPolicy;
use crate::link::Endpoint;
use crate::sync::detection::UnmatchedPolicy;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ROBOT_PORT: u16 = 8765;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(toml::de::Error),
    InvalidValue { key: &'static str, value: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read settings file `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid settings file: {err}"),
            Self::InvalidValue { key, value } => write!(f, "invalid value `{value}` for {key}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::InvalidValue { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub robot: RobotSettings,
    pub remote: RemoteSettings,
    pub storage: StorageSettings,
    pub logging: LogSettings,
    pub detection: DetectionSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RobotSettings {
    pub host: String,
    pub port: u16,
    pub heartbeat_secs: u64,
    pub connect_timeout_secs: u64,
    /// `0` keeps reconnection manual.
    pub reconnect_max_attempts: u32,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for RobotSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_ROBOT_PORT,
            heartbeat_secs: 30,
            connect_timeout_secs: 10,
            reconnect_max_attempts: 0,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl RobotSettings {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        if self.reconnect_max_attempts == 0 {
            return ReconnectPolicy::Manual;
        }
        ReconnectPolicy::Backoff {
            initial: Duration::from_millis(self.reconnect_initial_ms.max(1)),
            max: Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_initial_ms)),
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

/// Credentials for the remote mirror. Blank values keep the process in
/// local-only mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// `None` keeps the list cache in memory.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    pub level: String,
    /// `None` disables file logging.
    pub dir: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: crate::logging::default_log_level().to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionSettings {
    pub unmatched: UnmatchedPolicy,
}

impl Settings {
    /// Defaults, then `path` (when given), then process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(ConfigError::Parse)
    }

    /// Applies `GROCERY_*` overrides read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("GROCERY_ROBOT_HOST") {
            self.robot.host = host.trim().to_string();
        }
        if let Some(port) = lookup("GROCERY_ROBOT_PORT") {
            self.robot.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "GROCERY_ROBOT_PORT",
                    value: port.clone(),
                })?;
        }
        if let Some(url) = lookup("GROCERY_REMOTE_URL") {
            self.remote.base_url = url;
        }
        if let Some(key) = lookup("GROCERY_REMOTE_KEY") {
            self.remote.api_key = key;
        }
        if let Some(path) = lookup("GROCERY_DB_PATH") {
            self.storage.db_path = non_blank_path(&path);
        }
        if let Some(level) = lookup("GROCERY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = lookup("GROCERY_LOG_DIR") {
            self.logging.dir = non_blank_path(&dir);
        }
        if let Some(policy) = lookup("GROCERY_UNMATCHED_DETECTION") {
            self.detection.unmatched =
                UnmatchedPolicy::parse(&policy).ok_or_else(|| ConfigError::InvalidValue {
                    key: "GROCERY_UNMATCHED_DETECTION",
                    value: policy.clone(),
                })?;
        }
        Ok(())
    }
}

fn non_blank_path(value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, Settings, DEFAULT_ROBOT_PORT};
    use crate::link::connection::ReconnectPolicy;
    use crate::sync::detection::UnmatchedPolicy;
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_local_only() {
        let settings = Settings::default();
        assert_eq!(settings.robot.port, DEFAULT_ROBOT_PORT);
        assert!(settings.remote.base_url.is_empty());
        assert_eq!(settings.robot.reconnect_policy(), ReconnectPolicy::Manual);
        assert_eq!(settings.detection.unmatched, UnmatchedPolicy::CreateFulfilled);
    }

    #[test]
    fn toml_layer_overrides_selected_fields() {
        let settings = Settings::from_toml_str(
            r#"
            [robot]
            host = "10.0.0.7"
            reconnect_max_attempts = 3

            [detection]
            unmatched = "ignore"
            "#,
        )
        .unwrap();
        assert_eq!(settings.robot.host, "10.0.0.7");
        assert_eq!(settings.robot.port, DEFAULT_ROBOT_PORT);
        assert_eq!(settings.detection.unmatched, UnmatchedPolicy::Ignore);
        assert_eq!(
            settings.robot.reconnect_policy(),
            ReconnectPolicy::Backoff {
                initial: Duration::from_millis(500),
                max: Duration::from_millis(30_000),
                max_attempts: 3,
            }
        );
    }

    #[test]
    fn toml_rejects_unknown_keys() {
        let err = Settings::from_toml_str("[robot]\nhots = \"typo\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_apply_last() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("GROCERY_ROBOT_PORT", "9000"),
                ("GROCERY_REMOTE_URL", "https://lists.example.test"),
                ("GROCERY_DB_PATH", "  "),
                ("GROCERY_UNMATCHED_DETECTION", "ignore"),
            ]))
            .unwrap();
        assert_eq!(settings.robot.port, 9000);
        assert_eq!(settings.remote.base_url, "https://lists.example.test");
        assert_eq!(settings.storage.db_path, None);
        assert_eq!(settings.detection.unmatched, UnmatchedPolicy::Ignore);
    }

    #[test]
    fn env_rejects_malformed_port() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(env(&[("GROCERY_ROBOT_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "GROCERY_ROBOT_PORT",
                ..
            }
        ));
    }
}
