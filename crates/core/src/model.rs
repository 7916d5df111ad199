use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Feet to meters. Operators enter altitude in feet, everything internal is meters.
pub const FEET_TO_METERS: f64 = 0.3048;

/// Default survey altitude in feet when a request omits it.
pub const DEFAULT_ALTITUDE_FT: f64 = 100.0;

/// Rejected latitude/longitude pair.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    /// Latitude not finite or outside `[-90, 90]`.
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    /// Longitude not finite or outside `[-180, 180]`.
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}

/// WGS84 position in decimal degrees.
///
/// Only constructible through [`Coordinate::new`] (or deserialization, which
/// runs the same checks), so a value in hand always satisfies
/// `lat ∈ [-90, 90]` and `lng ∈ [-180, 180]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.lat, raw.lng)
    }
}

impl Coordinate {
    /// Validates and builds a coordinate.
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::Longitude(lng));
        }
        Ok(Self { lat, lng })
    }

    /// Latitude in degrees.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees.
    pub fn lng(&self) -> f64 {
        self.lng
    }
}

/// What the vehicle does once it reaches a survey point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyAction {
    /// Trigger the camera.
    Photo,
    /// Fly through.
    None,
}

/// One stop of a generated survey. Order in the containing sequence is flight order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurveyPoint {
    /// Serialized inline as `lat` and `lng`.
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// Altitude above home in meters.
    pub altitude: f64,
    /// What to do on arrival.
    pub action: SurveyAction,
}

/// Payload of a `start_mission` command.
///
/// `waypoints` are the polygon vertices drawn by the operator and `altitude`
/// is in feet, as the planning UI sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRequest {
    /// Survey polygon, in drawing order.
    #[serde(default)]
    pub waypoints: Vec<Coordinate>,
    /// Feet above home; [`DEFAULT_ALTITUDE_FT`] when omitted.
    #[serde(default = "default_altitude_ft")]
    pub altitude: f64,
    /// Add the cross-hatch pass.
    #[serde(default)]
    pub enhanced3d: bool,
}

fn default_altitude_ft() -> f64 {
    DEFAULT_ALTITUDE_FT
}

impl Default for MissionRequest {
    fn default() -> Self {
        Self {
            waypoints: Vec::new(),
            altitude: DEFAULT_ALTITUDE_FT,
            enhanced3d: false,
        }
    }
}

impl MissionRequest {
    /// Requested altitude converted to meters.
    pub fn altitude_meters(&self) -> f64 {
        self.altitude * FEET_TO_METERS
    }
}
