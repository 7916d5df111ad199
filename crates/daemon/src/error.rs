use std::time::Duration;

use survey_core::pattern::PatternError;
use survey_core::validation::ValidationError;
use thiserror::Error;

/// Failures reported by the vehicle link.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VehicleError {
    #[error("cannot reach vehicle at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    #[error("timed out after {0:?} connecting to vehicle")]
    ConnectTimeout(Duration),
    #[error("unsupported vehicle endpoint: {0}")]
    UnsupportedEndpoint(String),
    #[error("vehicle link is closed")]
    NotConnected,
    #[error("vehicle rejected {command}: {reason}")]
    CommandRejected {
        command: &'static str,
        reason: String,
    },
    #[error("telemetry unavailable: {0}")]
    Telemetry(String),
}

/// Reasons a mission does not start, or stops early.
#[derive(Debug, Error)]
pub enum MissionError {
    #[error("Vehicle not connected")]
    NotConnected,
    #[error("Invalid mission request: {0}")]
    Validation(#[from] ValidationError),
    #[error("Cannot build survey pattern: {0}")]
    Pattern(#[from] PatternError),
    #[error("Survey planning failed: {0}")]
    PlanningAborted(String),
    #[error("Mission already in progress")]
    AlreadyActive,
    #[error("Vehicle not armable after {}s", .0.as_secs())]
    ArmableTimeout(Duration),
    #[error("Vehicle disarmed while flying to survey point {0}")]
    VehicleDisarmed(usize),
    #[error(transparent)]
    Vehicle(#[from] VehicleError),
}
