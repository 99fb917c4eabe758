//! Detection matcher: turns the telemetry `detected_object` field into list
//! mutations.
//!
//! Edge-triggered on the trimmed name. The previous value is tracked even
//! when blank, so `apples`, `""`, `apples` fires twice while `apples`,
//! `apples` fires once.

use crate::model::telemetry::TelemetrySnapshot;
use crate::repo::item_repo::{LocalStore, StoreResult};
use crate::sync::engine::{DetectionOutcome, ReconciliationEngine};
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;

/// What to do with a detection that matches no listed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    /// Record the object as a new, already fulfilled item.
    #[default]
    CreateFulfilled,
    Ignore,
}

impl UnmatchedPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "create_fulfilled" => Some(Self::CreateFulfilled),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionMatcher {
    policy: UnmatchedPolicy,
    previous: String,
}

impl DetectionMatcher {
    pub fn new(policy: UnmatchedPolicy) -> Self {
        Self {
            policy,
            previous: String::new(),
        }
    }

    /// Returns the trimmed name when it differs from the last observed one
    /// and is non-blank.
    pub fn observe(&mut self, snapshot: &TelemetrySnapshot) -> Option<String> {
        let current = snapshot.detected_object.trim();
        if current == self.previous {
            return None;
        }
        self.previous = current.to_string();
        (!current.is_empty()).then(|| current.to_string())
    }

    /// Applies one snapshot through the engine. `None` when no edge fired.
    pub async fn handle<S: LocalStore>(
        &mut self,
        engine: &ReconciliationEngine<S>,
        snapshot: &TelemetrySnapshot,
    ) -> StoreResult<Option<DetectionOutcome>> {
        let Some(name) = self.observe(snapshot) else {
            return Ok(None);
        };
        engine.fulfill_detected(&name, self.policy).await.map(Some)
    }

    /// Consumes telemetry updates until the sender side is dropped.
    ///
    /// Local write failures are logged and the loop keeps going.
    pub async fn run<S: LocalStore>(
        mut self,
        engine: Arc<ReconciliationEngine<S>>,
        mut telemetry: watch::Receiver<TelemetrySnapshot>,
    ) {
        debug!("event=detection_run module=sync status=start policy={:?}", self.policy);
        loop {
            let snapshot = telemetry.borrow_and_update().clone();
            if let Err(err) = self.handle(&engine, &snapshot).await {
                warn!("event=detection_apply module=sync status=error error={err}");
            }
            if telemetry.changed().await.is_err() {
                break;
            }
        }
        debug!("event=detection_run module=sync status=ok reason=stream_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::{DetectionMatcher, UnmatchedPolicy};
    use crate::model::telemetry::TelemetrySnapshot;

    fn seen(name: &str) -> TelemetrySnapshot {
        TelemetrySnapshot {
            detected_object: name.to_string(),
            ..TelemetrySnapshot::default()
        }
    }

    #[test]
    fn repeated_detection_fires_once() {
        let mut matcher = DetectionMatcher::new(UnmatchedPolicy::default());
        assert_eq!(matcher.observe(&seen("apples")).as_deref(), Some("apples"));
        assert_eq!(matcher.observe(&seen(" apples ")), None);
        assert_eq!(matcher.observe(&seen("bananas")).as_deref(), Some("bananas"));
    }

    #[test]
    fn blank_detection_rearms_the_edge() {
        let mut matcher = DetectionMatcher::new(UnmatchedPolicy::default());
        assert!(matcher.observe(&seen("apples")).is_some());
        assert_eq!(matcher.observe(&seen("   ")), None);
        assert!(matcher.observe(&seen("apples")).is_some());
    }

    #[test]
    fn policy_parses_config_spellings() {
        assert_eq!(
            UnmatchedPolicy::parse(" Create_Fulfilled "),
            Some(UnmatchedPolicy::CreateFulfilled)
        );
        assert_eq!(UnmatchedPolicy::parse("ignore"), Some(UnmatchedPolicy::Ignore));
        assert_eq!(UnmatchedPolicy::parse("drop"), None);
    }
}
