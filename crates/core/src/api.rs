//! Wire contract between the mission engine and operator clients.
//!
//! Inbound: `{"command": "...", "data": {...}}`.
//! Outbound: `{"type": "...", "payload": ..., "timestamp": <epoch seconds>}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{MissionRequest, SurveyPoint};

/// Bad input on the message channel. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// The message is not JSON at all.
    #[error("Invalid JSON message: {0}")]
    InvalidJson(String),
    /// JSON without a string `command` field.
    #[error("Message is missing a string `command` field")]
    MissingCommand,
    /// A command name this engine does not know.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    /// Known command whose `data` does not decode.
    #[error("Invalid data for {command}: {reason}")]
    InvalidData {
        /// Wire name of the command.
        command: String,
        /// Decoder message.
        reason: String,
    },
}

/// Operator command, decoded from an inbound envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate, plan and fly a survey.
    StartMission(MissionRequest),
    /// Cancel the running mission and return to launch.
    StopMission,
    /// Land where the vehicle is. Ends any running mission.
    EmergencyLand,
    /// Ask for a [`VehicleStatus`] reply.
    GetStatus,
    /// Stop any mission and exit the daemon.
    Shutdown,
}

impl Command {
    /// Decodes one inbound text message.
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| CommandError::InvalidJson(e.to_string()))?;
        let name = value
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or(CommandError::MissingCommand)?;

        match name {
            "start_mission" => {
                let request = match value.get("data") {
                    None | Some(serde_json::Value::Null) => MissionRequest::default(),
                    Some(data) => serde_json::from_value(data.clone()).map_err(|e| {
                        CommandError::InvalidData {
                            command: name.to_string(),
                            reason: e.to_string(),
                        }
                    })?,
                };
                Ok(Self::StartMission(request))
            }
            "stop_mission" => Ok(Self::StopMission),
            "emergency_land" => Ok(Self::EmergencyLand),
            "get_status" => Ok(Self::GetStatus),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartMission(_) => "start_mission",
            Self::StopMission => "stop_mission",
            Self::EmergencyLand => "emergency_land",
            Self::GetStatus => "get_status",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Outbound event. The variant name is the wire `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    /// Sent to a client right after it connects.
    Connected(ConnectedInfo),
    /// Human-readable progress line.
    Status(String),
    /// A command or the mission failed.
    Error(String),
    /// Something was ignored; nothing failed.
    Warning(String),
    /// Plan summary, first event of a mission.
    MissionInfo(MissionInfo),
    /// The generated survey, sent once after [`Event::MissionInfo`].
    FlightPath(FlightPath),
    /// Vehicle sent to the next survey point.
    WaypointProgress(WaypointProgress),
    /// Photo triggered at a survey point.
    PhotoTaken(PhotoTaken),
    /// Every survey point was visited and RTL has been commanded.
    MissionComplete(MissionComplete),
    /// Periodic vehicle sample.
    Telemetry(Telemetry),
    /// Reply to `get_status`.
    VehicleStatus(VehicleStatus),
    /// Last event of every mission, with its closing message.
    SimulationEnd(String),
}

impl Event {
    /// Wire `type` of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Status(_) => "status",
            Self::Error(_) => "error",
            Self::Warning(_) => "warning",
            Self::MissionInfo(_) => "mission_info",
            Self::FlightPath(_) => "flight_path",
            Self::WaypointProgress(_) => "waypoint_progress",
            Self::PhotoTaken(_) => "photo_taken",
            Self::MissionComplete(_) => "mission_complete",
            Self::Telemetry(_) => "telemetry",
            Self::VehicleStatus(_) => "vehicle_status",
            Self::SimulationEnd(_) => "simulation_end",
        }
    }
}

/// Timestamped event as it goes out on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Flattened into `type` and `payload`.
    #[serde(flatten)]
    pub event: Event,
    /// Unix epoch seconds.
    pub timestamp: f64,
}

impl Envelope {
    /// Envelope with an explicit timestamp.
    pub fn new(event: Event, timestamp: f64) -> Self {
        Self { event, timestamp }
    }

    /// Envelope stamped with the current wall-clock time.
    pub fn now(event: Event) -> Self {
        Self::new(event, crate::now_secs())
    }
}

/// Greeting sent to each client when it connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedInfo {
    /// Whether a vehicle link is up.
    pub vehicle_connected: bool,
    /// Daemon package version.
    pub server_version: String,
}

/// Which sweep layout a mission flies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoveragePattern {
    /// One row-wise pass.
    #[serde(rename = "standard_grid")]
    StandardGrid,
    /// Row-wise pass plus a higher column-wise cross-hatch.
    #[serde(rename = "enhanced_3d")]
    Enhanced3d,
}

/// Summary emitted once per mission after the survey has been generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionInfo {
    /// ULID assigned when the plan was built.
    pub mission_id: String,
    /// Number of survey points.
    pub total_waypoints: usize,
    /// Rough flight time in seconds (3 s per survey point).
    pub estimated_time: u64,
    /// Layout the survey was generated with.
    pub coverage_pattern: CoveragePattern,
    /// Survey polygon area in square meters.
    pub area_m2: f64,
}

/// Full generated path, for drawing on the planning map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPath {
    /// Survey points in flight order.
    pub points: Vec<SurveyPoint>,
    /// `points.len()`, repeated for clients.
    pub total_points: usize,
}

/// Emitted when the vehicle is sent to the next survey point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointProgress {
    /// 1-based.
    pub current: usize,
    /// Survey points in the mission.
    pub total: usize,
    /// `current / total`, 0 to 100.
    pub percentage: f64,
}

/// Where a photo was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoLocation {
    /// Degrees.
    pub lat: f64,
    /// Degrees.
    pub lng: f64,
    /// Meters.
    pub altitude: f64,
}

/// Photo trigger report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoTaken {
    /// 1-based count within the mission.
    pub photo_number: u32,
    /// The survey point the photo was taken at.
    pub location: PhotoLocation,
}

/// Totals for a survey that visited every point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionComplete {
    /// Photos triggered.
    pub photos_taken: u32,
    /// Survey points visited.
    pub waypoints_completed: usize,
    /// Meters actually flown during the survey legs.
    pub distance_flown: f64,
    /// Square meters.
    pub area_covered: f64,
}

/// Mission progress attached to telemetry while a mission runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionStatus {
    /// False once cancellation has been requested.
    pub active: bool,
    /// Photos so far.
    pub photos_taken: u32,
    /// 1-based index of the point being flown to.
    pub current_waypoint: usize,
    /// Meters flown so far.
    pub distance_flown: f64,
}

/// One 10 Hz telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Degrees.
    pub lat: f64,
    /// Degrees.
    pub lng: f64,
    /// Meters above home.
    pub alt: f64,
    /// `alt` in feet.
    pub alt_feet: f64,
    /// Degrees in `[0, 360)`.
    pub heading: f64,
    /// m/s, horizontal.
    pub ground_speed: f64,
    /// Percent.
    pub battery: f64,
    /// Autopilot flight mode name, e.g. `GUIDED`.
    pub mode: String,
    /// Motors armed.
    pub armed: bool,
    /// GPS fix type as the autopilot reports it (3 is a 3D fix).
    pub gps_fix: u8,
    /// Present only while a mission runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_status: Option<MissionStatus>,
}

/// Reply to `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    /// Whether a vehicle link is up.
    pub connected: bool,
    /// Motors armed; false when not connected.
    pub armed: bool,
    /// Flight mode name, `UNKNOWN` when not connected.
    pub mode: String,
    /// A mission is running and has not been asked to stop.
    pub mission_active: bool,
}
