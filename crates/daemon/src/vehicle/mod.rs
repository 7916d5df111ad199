//! Flight-controller abstraction.
//!
//! Everything the engine needs from an autopilot goes through
//! [`VehicleControl`]. The only in-tree backend is the kinematic
//! [`SimulatedVehicle`]; a MAVLink link would be another implementor.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use survey_core::geodesy::normalize_degrees;
use survey_core::model::Coordinate;

use crate::error::VehicleError;

mod sim;

pub use sim::{SimConfig, SimulatedVehicle};

/// Home used for `sim://` endpoints that do not name one (ArduPilot's CMAC field).
pub const DEFAULT_SIM_HOME: (f64, f64) = (-35.363261, 149.165230);

/// Waypoint-navigation parameters pushed to the autopilot after connecting.
pub const WPNAV_SPEED_CM_S: f64 = 1000.0;
pub const WPNAV_RADIUS_CM: f64 = 200.0;

/// Autopilot flight modes the engine commands or reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightMode {
    Stabilize,
    Guided,
    Auto,
    Rtl,
    Land,
}

impl FlightMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stabilize => "STABILIZE",
            Self::Guided => "GUIDED",
            Self::Auto => "AUTO",
            Self::Rtl => "RTL",
            Self::Land => "LAND",
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STABILIZE" => Ok(Self::Stabilize),
            "GUIDED" => Ok(Self::Guided),
            "AUTO" => Ok(Self::Auto),
            "RTL" => Ok(Self::Rtl),
            "LAND" => Ok(Self::Land),
            other => Err(format!("unknown flight mode {other}")),
        }
    }
}

/// Global position with altitude relative to home, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Location {
    /// Horizontal part as a validated coordinate.
    pub fn coordinate(&self) -> Result<Coordinate, VehicleError> {
        Coordinate::new(self.lat, self.lon).map_err(|e| VehicleError::Telemetry(e.to_string()))
    }
}

/// Radians; yaw is in `[-π, π]` as autopilots report it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Everything telemetry needs, read in one go.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleSnapshot {
    pub location: Location,
    pub attitude: Attitude,
    /// North, east, down in m/s.
    pub velocity: [f64; 3],
    pub armed: bool,
    pub mode: FlightMode,
    /// Percent, when the autopilot reports one.
    pub battery_level: Option<f64>,
    pub gps_fix_type: u8,
}

impl VehicleSnapshot {
    /// Heading in `[0, 360)` degrees.
    pub fn heading_degrees(&self) -> f64 {
        normalize_degrees(self.attitude.yaw.to_degrees())
    }

    /// Horizontal speed in m/s.
    pub fn ground_speed(&self) -> f64 {
        self.velocity[0].hypot(self.velocity[1])
    }
}

/// Commands and queries the mission engine issues to a flight controller.
///
/// Implementations are shared between the dispatcher, the mission runner and
/// the telemetry publisher, so every method takes `&self`.
#[async_trait]
pub trait VehicleControl: Send + Sync {
    /// Endpoint the link was opened on.
    fn endpoint(&self) -> &str;

    async fn is_connected(&self) -> bool;
    async fn location(&self) -> Result<Location, VehicleError>;
    async fn attitude(&self) -> Result<Attitude, VehicleError>;
    async fn velocity(&self) -> Result<[f64; 3], VehicleError>;
    async fn armed(&self) -> Result<bool, VehicleError>;
    async fn is_armable(&self) -> Result<bool, VehicleError>;
    async fn mode(&self) -> Result<FlightMode, VehicleError>;
    async fn battery_level(&self) -> Result<Option<f64>, VehicleError>;
    async fn gps_fix_type(&self) -> Result<u8, VehicleError>;

    async fn set_mode(&self, mode: FlightMode) -> Result<(), VehicleError>;
    async fn set_armed(&self, armed: bool) -> Result<(), VehicleError>;
    async fn simple_takeoff(&self, altitude_m: f64) -> Result<(), VehicleError>;
    async fn simple_goto(
        &self,
        target: Coordinate,
        altitude_m: f64,
        ground_speed: f64,
    ) -> Result<(), VehicleError>;
    async fn set_parameter(&self, name: &str, value: f64) -> Result<(), VehicleError>;

    /// Releases the link. Further calls fail with [`VehicleError::NotConnected`].
    async fn close(&self);

    async fn snapshot(&self) -> Result<VehicleSnapshot, VehicleError> {
        Ok(VehicleSnapshot {
            location: self.location().await?,
            attitude: self.attitude().await?,
            velocity: self.velocity().await?,
            armed: self.armed().await?,
            mode: self.mode().await?,
            battery_level: self.battery_level().await?,
            gps_fix_type: self.gps_fix_type().await?,
        })
    }
}

/// Opens a vehicle link.
///
/// Supported endpoints: `sim://` (default home) and `sim://<lat>,<lng>`.
pub async fn connect(
    endpoint: &str,
    timeout: Duration,
) -> Result<Arc<dyn VehicleControl>, VehicleError> {
    let Some(rest) = endpoint.strip_prefix("sim://") else {
        return Err(VehicleError::UnsupportedEndpoint(endpoint.to_string()));
    };

    let home = parse_sim_home(endpoint, rest)?;
    let vehicle = SimulatedVehicle::new(endpoint, SimConfig::with_home(home));
    tokio::time::timeout(timeout, vehicle.wait_ready())
        .await
        .map_err(|_| VehicleError::ConnectTimeout(timeout))?;

    tracing::info!(endpoint, lat = home.lat(), lng = home.lng(), "vehicle connected");
    Ok(Arc::new(vehicle))
}

fn parse_sim_home(endpoint: &str, rest: &str) -> Result<Coordinate, VehicleError> {
    let bad = |reason: String| VehicleError::Connection {
        endpoint: endpoint.to_string(),
        reason,
    };

    if rest.trim().is_empty() {
        let (lat, lng) = DEFAULT_SIM_HOME;
        return Coordinate::new(lat, lng).map_err(|e| bad(e.to_string()));
    }

    let (lat, lng) = rest
        .split_once(',')
        .ok_or_else(|| bad("expected sim://<lat>,<lng>".to_string()))?;
    let lat: f64 = lat.trim().parse().map_err(|_| bad(format!("bad latitude {lat:?}")))?;
    let lng: f64 = lng.trim().parse().map_err(|_| bad(format!("bad longitude {lng:?}")))?;
    Coordinate::new(lat, lng).map_err(|e| bad(e.to_string()))
}

/// Pushes the waypoint-navigation tuning the survey relies on. Failures are
/// logged; the autopilot defaults still fly.
pub async fn configure_navigation(vehicle: &dyn VehicleControl) {
    for (name, value) in [("WPNAV_SPEED", WPNAV_SPEED_CM_S), ("WPNAV_RADIUS", WPNAV_RADIUS_CM)] {
        if let Err(e) = vehicle.set_parameter(name, value).await {
            tracing::warn!(param = name, error = %e, "failed to set navigation parameter");
        }
    }
}
