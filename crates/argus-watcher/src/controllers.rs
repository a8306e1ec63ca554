//! Desired-vs-applied controllers for emulation and throttling.
//!
//! The desired value survives detachment and is idempotently re-applied
//! on every attach; `applied` and `last_error` report what actually
//! happened against the live session.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmulationSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_scale_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub touch: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThrottleSettings {
    /// CPU slowdown factor; 1.0 is no throttling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Bytes per second; -1 disables the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_bps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_bps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_disabled: Option<bool>,
}

/// Shadow state for one controlled aspect of the target.
#[derive(Debug, Clone, Default)]
pub struct Controller<T> {
    desired: Option<T>,
    applied: bool,
    last_error: Option<String>,
}

/// Serializable view returned by `GET /emulation` and `GET /throttle`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerState<T> {
    pub desired: Option<T>,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl<T: Clone> Controller<T> {
    /// Record a new desired value; it is pending until re-applied.
    pub fn set_desired(&mut self, desired: Option<T>) {
        self.desired = desired;
        self.applied = false;
        self.last_error = None;
    }

    pub fn desired(&self) -> Option<T> {
        self.desired.clone()
    }

    pub fn mark_applied(&mut self) {
        self.applied = true;
        self.last_error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.applied = false;
        self.last_error = Some(error.into());
    }

    /// Called on detach: the target forgot everything we applied.
    pub fn mark_detached(&mut self) {
        self.applied = false;
    }

    pub fn state(&self) -> ControllerState<T> {
        ControllerState {
            desired: self.desired.clone(),
            applied: self.applied,
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_survives_detach() {
        let mut controller = Controller::default();
        controller.set_desired(Some(EmulationSettings {
            width: Some(390),
            height: Some(844),
            ..Default::default()
        }));
        controller.mark_applied();
        assert!(controller.state().applied);

        controller.mark_detached();
        let state = controller.state();
        assert!(!state.applied);
        assert_eq!(state.desired.unwrap().width, Some(390));
    }

    #[test]
    fn failure_records_error_and_clears_applied() {
        let mut controller: Controller<ThrottleSettings> = Controller::default();
        controller.set_desired(Some(ThrottleSettings {
            cpu_rate: Some(4.0),
            ..Default::default()
        }));
        controller.mark_failed("cdp timeout");
        let state = controller.state();
        assert!(!state.applied);
        assert_eq!(state.last_error.as_deref(), Some("cdp timeout"));
    }

    #[test]
    fn new_desired_resets_error() {
        let mut controller: Controller<EmulationSettings> = Controller::default();
        controller.mark_failed("old failure");
        controller.set_desired(None);
        assert!(controller.state().last_error.is_none());
    }
}
