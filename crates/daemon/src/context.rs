//! Process-wide mission context shared by the dispatcher, the mission runner
//! and the telemetry publisher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use survey_core::api::MissionStatus;
use survey_core::model::{Coordinate, SurveyPoint};
use tokio::sync::watch;

use crate::error::MissionError;
use crate::mission::MissionPhase;
use crate::vehicle::VehicleControl;

/// The mission in flight. Readers get copies, never references.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionState {
    pub mission_id: String,
    pub phase: MissionPhase,
    /// Polygon as the operator drew it.
    pub waypoints: Arc<[Coordinate]>,
    pub altitude_m: f64,
    pub survey_points: Arc<[SurveyPoint]>,
    /// Cruise speed for survey legs, m/s.
    pub flight_speed: f64,
    /// 1-based index of the survey point being flown to, 0 before the survey.
    pub current_waypoint: usize,
    pub photos_taken: u32,
    pub distance_flown_m: f64,
    pub area_covered_m2: f64,
    pub area_m2: f64,
    /// Unix epoch seconds.
    pub started_at: f64,
}

impl MissionState {
    pub fn new(mission_id: impl Into<String>, survey_points: Vec<SurveyPoint>) -> Self {
        Self {
            mission_id: mission_id.into(),
            phase: MissionPhase::Idle,
            waypoints: Arc::from(Vec::new()),
            altitude_m: 0.0,
            survey_points: survey_points.into(),
            flight_speed: 0.0,
            current_waypoint: 0,
            photos_taken: 0,
            distance_flown_m: 0.0,
            area_covered_m2: 0.0,
            area_m2: 0.0,
            started_at: survey_core::now_secs(),
        }
    }

    pub fn total_waypoints(&self) -> usize {
        self.survey_points.len()
    }

    /// Telemetry view of the state.
    pub fn status(&self, active: bool) -> MissionStatus {
        MissionStatus {
            active,
            photos_taken: self.photos_taken,
            current_waypoint: self.current_waypoint,
            distance_flown: self.distance_flown_m,
        }
    }
}

/// Shared handle to the vehicle plus the single mission slot.
///
/// Two flags: `active` is the cooperative cancellation flag (cleared by
/// stop, shutdown or disconnect), `running` is held for the whole lifetime of
/// a mission task, teardown included. A new mission needs `running` clear.
pub struct MissionControl {
    vehicle: Option<Arc<dyn VehicleControl>>,
    active: AtomicBool,
    running: AtomicBool,
    state: watch::Sender<Option<MissionState>>,
}

impl MissionControl {
    pub fn new(vehicle: Option<Arc<dyn VehicleControl>>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            vehicle,
            active: AtomicBool::new(false),
            running: AtomicBool::new(false),
            state,
        }
    }

    pub fn vehicle(&self) -> Option<&Arc<dyn VehicleControl>> {
        self.vehicle.as_ref()
    }

    pub fn is_mission_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_mission_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the cancellation flag. Returns whether a mission was active.
    pub fn request_stop(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    /// Copy of the current mission state, if a mission is running.
    pub fn mission_snapshot(&self) -> Option<MissionState> {
        self.state.borrow().clone()
    }

    /// Change feed for the mission state.
    pub fn subscribe(&self) -> watch::Receiver<Option<MissionState>> {
        self.state.subscribe()
    }

    /// Claims the mission slot and raises the active flag.
    pub fn try_begin(self: &Arc<Self>, state: MissionState) -> Result<MissionGuard, MissionError> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| MissionError::AlreadyActive)?;
        self.state.send_replace(Some(state));
        self.active.store(true, Ordering::SeqCst);
        Ok(MissionGuard {
            ctx: Arc::clone(self),
        })
    }
}

/// Write access to the mission slot. Dropping it resets the slot to idle.
pub struct MissionGuard {
    ctx: Arc<MissionControl>,
}

impl MissionGuard {
    pub fn update(&self, f: impl FnOnce(&mut MissionState)) {
        self.ctx.state.send_modify(|slot| {
            if let Some(state) = slot.as_mut() {
                f(state);
            }
        });
    }

    pub fn snapshot(&self) -> Option<MissionState> {
        self.ctx.mission_snapshot()
    }
}

impl Drop for MissionGuard {
    fn drop(&mut self) {
        self.ctx.state.send_replace(None);
        self.ctx.active.store(false, Ordering::SeqCst);
        self.ctx.running.store(false, Ordering::SeqCst);
    }
}
