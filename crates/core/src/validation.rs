//! Sanity checks on operator mission requests, applied before anything flies.

use thiserror::Error;

use crate::model::MissionRequest;

/// Highest survey altitude accepted from the operator, in feet.
pub const MAX_ALTITUDE_FT: f64 = 1_000.0;

/// Upper bound on polygon vertices in a single request.
pub const MAX_POLYGON_VERTICES: usize = 500;

/// A request or setting outside the accepted range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Zero, negative or not a number.
    #[error("altitude must be a positive number of feet, got {0}")]
    NonPositiveAltitude(f64),
    /// Above [`MAX_ALTITUDE_FT`].
    #[error("altitude {0} ft exceeds the 1000 ft ceiling")]
    AltitudeTooHigh(f64),
    /// More than [`MAX_POLYGON_VERTICES`] polygon vertices.
    #[error("survey polygon has {0} vertices (max 500)")]
    TooManyVertices(usize),
    /// Configured cruise speed is not positive.
    #[error("ground speed must be positive, got {0} m/s")]
    NonPositiveSpeed(f64),
}

/// Checks a request's scalar fields. Polygon shape is the pattern generator's job.
pub fn validate_mission_request(req: &MissionRequest) -> Result<(), ValidationError> {
    if !req.altitude.is_finite() || req.altitude <= 0.0 {
        return Err(ValidationError::NonPositiveAltitude(req.altitude));
    }
    if req.altitude > MAX_ALTITUDE_FT {
        return Err(ValidationError::AltitudeTooHigh(req.altitude));
    }
    if req.waypoints.len() > MAX_POLYGON_VERTICES {
        return Err(ValidationError::TooManyVertices(req.waypoints.len()));
    }
    Ok(())
}

/// Checks a configured cruise speed.
pub fn validate_ground_speed(speed_mps: f64) -> Result<(), ValidationError> {
    if !speed_mps.is_finite() || speed_mps <= 0.0 {
        return Err(ValidationError::NonPositiveSpeed(speed_mps));
    }
    Ok(())
}
