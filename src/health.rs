//! Collector health derivation
//!
//! Health is a pure function of the number of consecutive failed executions:
//!
//! ```text
//! no runs yet         → unknown
//! 0..=1 errors        → healthy
//! 2..=4 errors        → degraded
//! 5+ errors           → failing
//! ```
//!
//! Any successful execution resets the counter and returns to healthy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive errors at which a collector is considered degraded
pub const DEGRADED_AFTER: u32 = 2;

/// Consecutive errors at which a collector is considered failing
pub const FAILING_AFTER: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Failing,
}

impl HealthState {
    pub fn from_consecutive_errors(consecutive_errors: u32) -> Self {
        match consecutive_errors {
            n if n >= FAILING_AFTER => HealthState::Failing,
            n if n >= DEGRADED_AFTER => HealthState::Degraded,
            _ => HealthState::Healthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Failing => "failing",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(HealthState::Unknown),
            "healthy" => Ok(HealthState::Healthy),
            "degraded" => Ok(HealthState::Degraded),
            "failing" => Ok(HealthState::Failing),
            other => Err(format!("unknown health state: {other}")),
        }
    }
}

/// Per-collector health row, overwritten after every execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub collector_id: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub state: HealthState,
    pub last_error: Option<String>,
}

impl HealthStatus {
    pub fn unknown(collector_id: impl Into<String>) -> Self {
        Self {
            collector_id: collector_id.into(),
            last_run: None,
            last_success: None,
            consecutive_errors: 0,
            state: HealthState::Unknown,
            last_error: None,
        }
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_run = Some(at);
        self.last_success = Some(at);
        self.consecutive_errors = 0;
        self.last_error = None;
        self.state = HealthState::Healthy;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.last_run = Some(at);
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.last_error = Some(error.into());
        self.state = HealthState::from_consecutive_errors(self.consecutive_errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_thresholds() {
        assert_eq!(HealthState::from_consecutive_errors(0), HealthState::Healthy);
        assert_eq!(HealthState::from_consecutive_errors(1), HealthState::Healthy);
        assert_eq!(HealthState::from_consecutive_errors(2), HealthState::Degraded);
        assert_eq!(HealthState::from_consecutive_errors(4), HealthState::Degraded);
        assert_eq!(HealthState::from_consecutive_errors(5), HealthState::Failing);
        assert_eq!(HealthState::from_consecutive_errors(500), HealthState::Failing);
    }

    #[test]
    fn test_success_resets_failing_collector() {
        let now = Utc::now();
        let mut status = HealthStatus::unknown("nas");
        assert_eq!(status.state, HealthState::Unknown);

        for _ in 0..6 {
            status.record_failure(now, "connection refused");
        }
        assert_eq!(status.state, HealthState::Failing);
        assert_eq!(status.consecutive_errors, 6);

        status.record_success(now);
        assert_eq!(status.state, HealthState::Healthy);
        assert_eq!(status.consecutive_errors, 0);
        assert!(status.last_error.is_none());
    }
}
