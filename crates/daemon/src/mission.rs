//! Mission state machine: pre-flight, arm, take off, survey, return to launch.
//!
//! A [`MissionRunner`] is prepared by the dispatcher (so request problems are
//! reported before anything moves) and then driven to a terminal phase on its
//! own task. Cancellation is cooperative: every wait loop checks
//! [`MissionControl::is_mission_active`] at least once per poll interval.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use survey_core::api::{
    CoveragePattern, Event, FlightPath, MissionComplete, MissionInfo, PhotoLocation, PhotoTaken,
    WaypointProgress,
};
use survey_core::geodesy::{distance_meters, polygon_area_m2};
use survey_core::model::{MissionRequest, SurveyAction, SurveyPoint};
use survey_core::pattern::SurveyPlanner;
use survey_core::validation::validate_mission_request;
use tokio::time::{sleep, Instant};

use crate::channel::Outbox;
use crate::context::{MissionControl, MissionGuard, MissionState};
use crate::error::MissionError;
use crate::vehicle::{FlightMode, VehicleControl};

/// Rough flight time budget per survey point, for `mission_info`.
pub const ESTIMATED_SECONDS_PER_POINT: u64 = 3;

/// Where a mission is. `Landed`, `Cancelled` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionPhase {
    Idle,
    PreflightWait,
    Arming,
    TakingOff,
    Surveying,
    ReturningToLaunch,
    Landed,
    Cancelled,
    Failed,
}

impl MissionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Landed | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PreflightWait => "preflight_wait",
            Self::Arming => "arming",
            Self::TakingOff => "taking_off",
            Self::Surveying => "surveying",
            Self::ReturningToLaunch => "returning_to_launch",
            Self::Landed => "landed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MissionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poll intervals and limits for the wait loops.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionTiming {
    pub armable_poll: Duration,
    pub armable_timeout: Duration,
    pub arm_poll: Duration,
    pub takeoff_poll: Duration,
    pub arrival_poll: Duration,
    /// Dwell at each photo point.
    pub photo_latency: Duration,
    pub landing_poll: Duration,
    /// A survey point counts as reached inside this radius, meters.
    pub arrival_radius_m: f64,
    /// Takeoff is done at this fraction of the target altitude.
    pub takeoff_altitude_ratio: f64,
    /// How long a wait may stall before a liveness warning is logged.
    pub stall_warning: Duration,
}

impl Default for MissionTiming {
    fn default() -> Self {
        Self {
            armable_poll: Duration::from_secs(1),
            armable_timeout: Duration::from_secs(30),
            arm_poll: Duration::from_millis(500),
            takeoff_poll: Duration::from_millis(500),
            arrival_poll: Duration::from_millis(200),
            photo_latency: Duration::from_millis(500),
            landing_poll: Duration::from_secs(1),
            arrival_radius_m: 2.0,
            takeoff_altitude_ratio: 0.95,
            stall_warning: Duration::from_secs(30),
        }
    }
}

/// Daemon-wide mission parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionSettings {
    pub timing: MissionTiming,
    /// Survey cruise speed, m/s.
    pub ground_speed: f64,
    pub planner: SurveyPlanner,
}

impl Default for MissionSettings {
    fn default() -> Self {
        Self {
            timing: MissionTiming::default(),
            ground_speed: 10.0,
            planner: SurveyPlanner::default(),
        }
    }
}

/// Final accounting for one mission, returned by [`MissionRunner::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct MissionOutcome {
    pub mission_id: String,
    pub phase: MissionPhase,
    pub photos_taken: u32,
    pub waypoints_reached: usize,
    pub distance_flown_m: f64,
}

/// A validated request with its generated survey, ready to fly.
#[derive(Debug, Clone)]
pub struct MissionPlan {
    pub mission_id: String,
    pub request: MissionRequest,
    pub altitude_m: f64,
    /// Shared with the mission state; the survey is never copied per reader.
    pub points: Arc<[SurveyPoint]>,
    pub area_m2: f64,
}

impl MissionPlan {
    /// Validates `request` and generates its survey.
    pub fn build(request: MissionRequest, planner: &SurveyPlanner) -> Result<Self, MissionError> {
        validate_mission_request(&request)?;
        let altitude_m = request.altitude_meters();
        let points = planner.generate(&request.waypoints, altitude_m, request.enhanced3d)?;
        let area_m2 = polygon_area_m2(&request.waypoints);
        Ok(Self {
            mission_id: survey_core::new_ulid().to_string(),
            request,
            altitude_m,
            points: points.into(),
            area_m2,
        })
    }

    pub fn coverage_pattern(&self) -> CoveragePattern {
        if self.request.enhanced3d {
            CoveragePattern::Enhanced3d
        } else {
            CoveragePattern::StandardGrid
        }
    }
}

/// How a run that did not error ended.
enum Ending {
    Landed,
    Cancelled(&'static str),
}

/// Drives one mission from pre-flight checks to a terminal phase.
pub struct MissionRunner {
    guard: MissionGuard,
    ctx: Arc<MissionControl>,
    vehicle: Arc<dyn VehicleControl>,
    outbox: Outbox,
    timing: MissionTiming,
    ground_speed: f64,
    plan: MissionPlan,
}

impl MissionRunner {
    /// Checks the vehicle link, builds the plan and claims the mission slot.
    pub async fn prepare(
        ctx: &Arc<MissionControl>,
        request: MissionRequest,
        settings: &MissionSettings,
        outbox: Outbox,
    ) -> Result<Self, MissionError> {
        if ctx.is_mission_running() {
            return Err(MissionError::AlreadyActive);
        }
        let vehicle = ctx.vehicle().cloned().ok_or(MissionError::NotConnected)?;
        if !vehicle.is_connected().await {
            return Err(MissionError::NotConnected);
        }
        // Sweeping a large polygon is CPU-bound; keep it off the dispatcher's worker.
        let planner = settings.planner;
        let plan = tokio::task::spawn_blocking(move || MissionPlan::build(request, &planner))
            .await
            .map_err(|e| MissionError::PlanningAborted(e.to_string()))??;
        let guard = ctx.try_begin(MissionState {
            waypoints: plan.request.waypoints.clone().into(),
            altitude_m: plan.altitude_m,
            flight_speed: settings.ground_speed,
            area_m2: plan.area_m2,
            survey_points: Arc::clone(&plan.points),
            ..MissionState::new(plan.mission_id.clone(), Vec::new())
        })?;

        Ok(Self {
            guard,
            ctx: Arc::clone(ctx),
            vehicle,
            outbox,
            timing: settings.timing.clone(),
            ground_speed: settings.ground_speed,
            plan,
        })
    }

    pub fn mission_id(&self) -> &str {
        &self.plan.mission_id
    }

    /// Runs to a terminal phase. The mission slot is released before the
    /// closing `simulation_end` event goes out.
    pub async fn run(mut self) -> MissionOutcome {
        let mission_id = self.plan.mission_id.clone();
        tracing::info!(
            mission_id = %mission_id,
            points = self.plan.points.len(),
            altitude_m = self.plan.altitude_m,
            "mission started"
        );

        let (phase, closing) = match self.execute().await {
            Ok(Ending::Landed) => (MissionPhase::Landed, "Landing complete"),
            Ok(Ending::Cancelled(msg)) => (MissionPhase::Cancelled, msg),
            Err(e) => {
                tracing::warn!(mission_id = %mission_id, error = %e, "mission failed");
                self.outbox.emit(Event::Error(format!("Mission error: {e}")));
                if let Err(rtl) = self.return_to_launch().await {
                    tracing::warn!(mission_id = %mission_id, error = %rtl, "failed to command RTL after error");
                }
                (MissionPhase::Failed, "Mission aborted")
            }
        };
        self.enter(phase);

        let state = self.guard.snapshot();
        let outcome = MissionOutcome {
            mission_id,
            phase,
            photos_taken: state.as_ref().map_or(0, |s| s.photos_taken),
            waypoints_reached: state.as_ref().map_or(0, |s| s.current_waypoint),
            distance_flown_m: state.as_ref().map_or(0.0, |s| s.distance_flown_m),
        };
        tracing::info!(
            mission_id = %outcome.mission_id,
            phase = %outcome.phase,
            photos = outcome.photos_taken,
            distance_m = outcome.distance_flown_m,
            "mission finished"
        );

        let outbox = self.outbox.clone();
        drop(self);
        outbox.emit(Event::SimulationEnd(closing.to_string()));
        outcome
    }

    async fn execute(&mut self) -> Result<Ending, MissionError> {
        self.announce();
        self.emit(Event::Status("Pre-flight checks...".to_string()));

        self.enter(MissionPhase::PreflightWait);
        if !self.wait_armable().await? {
            return Ok(self.cancelled("Mission cancelled during pre-flight checks"));
        }

        self.enter(MissionPhase::Arming);
        self.emit(Event::Status("Arming vehicle...".to_string()));
        self.vehicle.set_mode(FlightMode::Guided).await?;
        self.vehicle.set_armed(true).await?;
        if !self.wait_armed().await? {
            return Ok(self.cancelled("Mission cancelled during arming"));
        }

        self.enter(MissionPhase::TakingOff);
        self.emit(Event::Status(format!(
            "Taking off to {:.1}m...",
            self.plan.altitude_m
        )));
        self.vehicle.simple_takeoff(self.plan.altitude_m).await?;
        if !self.wait_takeoff().await? {
            self.return_to_launch().await?;
            return Ok(self.cancelled("Mission cancelled during takeoff"));
        }
        self.emit(Event::Status(
            "Takeoff complete, starting survey...".to_string(),
        ));

        self.enter(MissionPhase::Surveying);
        let completed = self.survey().await?;

        self.enter(MissionPhase::ReturningToLaunch);
        let returning = self.return_to_launch().await?;
        if completed {
            self.report_complete();
        }
        let status = match (completed, returning) {
            (true, true) => "Mission complete - returning to launch",
            (false, true) => "Mission cancelled - returning to launch",
            (true, false) => "Mission complete - emergency landing in progress",
            (false, false) => "Mission cancelled - emergency landing in progress",
        };
        self.emit(Event::Status(status.to_string()));
        let landed = self.wait_landed().await?;

        match (completed, landed) {
            (true, true) => Ok(Ending::Landed),
            (true, false) => Ok(Ending::Cancelled("Stopped while returning to launch")),
            (false, _) => Ok(Ending::Cancelled("Mission cancelled")),
        }
    }

    fn announce(&self) {
        let total = self.plan.points.len();
        self.emit(Event::MissionInfo(MissionInfo {
            mission_id: self.plan.mission_id.clone(),
            total_waypoints: total,
            estimated_time: total as u64 * ESTIMATED_SECONDS_PER_POINT,
            coverage_pattern: self.plan.coverage_pattern(),
            area_m2: self.plan.area_m2,
        }));
        self.emit(Event::FlightPath(FlightPath {
            points: self.plan.points.to_vec(),
            total_points: total,
        }));
    }

    fn cancelled(&self, message: &'static str) -> Ending {
        self.emit(Event::Status(message.to_string()));
        Ending::Cancelled(message)
    }

    async fn wait_armable(&mut self) -> Result<bool, MissionError> {
        let started = Instant::now();
        loop {
            if !self.ctx.is_mission_active() {
                return Ok(false);
            }
            if self.vehicle.is_armable().await? {
                return Ok(true);
            }
            let waited = started.elapsed();
            if waited >= self.timing.armable_timeout {
                return Err(MissionError::ArmableTimeout(self.timing.armable_timeout));
            }
            self.emit(Event::Status(format!(
                "Waiting for vehicle to become armable... ({}s)",
                waited.as_secs()
            )));
            sleep(self.timing.armable_poll).await;
        }
    }

    async fn wait_armed(&mut self) -> Result<bool, MissionError> {
        let mut stall = StallWatch::new("arming", self.timing.stall_warning);
        loop {
            if !self.ctx.is_mission_active() {
                return Ok(false);
            }
            if self.vehicle.armed().await? {
                return Ok(true);
            }
            stall.check(&self.plan.mission_id);
            sleep(self.timing.arm_poll).await;
        }
    }

    async fn wait_takeoff(&mut self) -> Result<bool, MissionError> {
        let target = self.plan.altitude_m * self.timing.takeoff_altitude_ratio;
        let mut stall = StallWatch::new("takeoff", self.timing.stall_warning);
        loop {
            if !self.ctx.is_mission_active() {
                return Ok(false);
            }
            let alt = self.vehicle.location().await?.alt;
            if alt >= target {
                return Ok(true);
            }
            stall.check(&self.plan.mission_id);
            sleep(self.timing.takeoff_poll).await;
        }
    }

    /// Flies every survey point in order. `Ok(false)` means cancelled.
    async fn survey(&mut self) -> Result<bool, MissionError> {
        let points = Arc::clone(&self.plan.points);
        let total = points.len();
        let mut last = self.vehicle.location().await?.coordinate()?;

        for (i, point) in points.iter().enumerate() {
            if !self.ctx.is_mission_active() {
                return Ok(false);
            }
            let current = i + 1;
            self.emit(Event::Status(format!(
                "Flying to survey point {current}/{total}"
            )));
            self.emit(Event::WaypointProgress(WaypointProgress {
                current,
                total,
                percentage: current as f64 / total as f64 * 100.0,
            }));
            self.guard.update(|s| s.current_waypoint = current);

            self.vehicle
                .simple_goto(point.coordinate, point.altitude, self.ground_speed)
                .await?;

            let mut stall = StallWatch::new("survey leg", self.timing.stall_warning);
            loop {
                if !self.ctx.is_mission_active() {
                    return Ok(false);
                }
                // One sample per tick feeds both the odometer and the arrival check.
                let here = self.vehicle.location().await?.coordinate()?;
                let step = distance_meters(&last, &here);
                last = here;
                if step > 0.0 {
                    self.guard.update(|s| s.distance_flown_m += step);
                }
                if distance_meters(&here, &point.coordinate) < self.timing.arrival_radius_m {
                    break;
                }
                if !self.vehicle.armed().await? {
                    return Err(MissionError::VehicleDisarmed(current));
                }
                stall.check(&self.plan.mission_id);
                sleep(self.timing.arrival_poll).await;
            }

            if point.action == SurveyAction::Photo {
                self.take_photo(point);
                sleep(self.timing.photo_latency).await;
            }

            let covered = self.plan.area_m2 * current as f64 / total as f64;
            self.guard.update(|s| s.area_covered_m2 = covered);
        }
        Ok(true)
    }

    fn take_photo(&self, point: &SurveyPoint) {
        let mut photo_number = 0;
        self.guard.update(|s| {
            s.photos_taken += 1;
            photo_number = s.photos_taken;
        });
        self.emit(Event::PhotoTaken(PhotoTaken {
            photo_number,
            location: PhotoLocation {
                lat: point.coordinate.lat(),
                lng: point.coordinate.lng(),
                altitude: point.altitude,
            },
        }));
    }

    fn report_complete(&self) {
        let Some(state) = self.guard.snapshot() else {
            return;
        };
        self.emit(Event::MissionComplete(MissionComplete {
            photos_taken: state.photos_taken,
            waypoints_completed: self.plan.points.len(),
            distance_flown: state.distance_flown_m,
            area_covered: state.area_covered_m2,
        }));
    }

    /// Waits for the vehicle to disarm after RTL. Returns early, with
    /// `false`, once the mission is no longer active.
    async fn wait_landed(&mut self) -> Result<bool, MissionError> {
        let mut stall = StallWatch::new("landing", self.timing.stall_warning);
        loop {
            if !self.ctx.is_mission_active() {
                return Ok(false);
            }
            if !self.vehicle.armed().await? {
                return Ok(true);
            }
            stall.check(&self.plan.mission_id);
            sleep(self.timing.landing_poll).await;
        }
    }

    /// Commands RTL unless the operator has already ordered a landing, which
    /// always wins. Returns whether RTL was commanded.
    async fn return_to_launch(&self) -> Result<bool, MissionError> {
        if self.vehicle.mode().await? == FlightMode::Land {
            tracing::info!(mission_id = %self.plan.mission_id, "vehicle is landing; RTL not commanded");
            return Ok(false);
        }
        self.vehicle.set_mode(FlightMode::Rtl).await?;
        Ok(true)
    }

    fn enter(&self, phase: MissionPhase) {
        tracing::debug!(mission_id = %self.plan.mission_id, phase = %phase, "mission phase");
        self.guard.update(|s| s.phase = phase);
    }

    fn emit(&self, event: Event) {
        self.outbox.emit(event);
    }
}

/// Logs a warning each time a wait has been stuck for another `every`.
struct StallWatch {
    what: &'static str,
    started: Instant,
    every: Duration,
    next: Instant,
}

impl StallWatch {
    fn new(what: &'static str, every: Duration) -> Self {
        let now = Instant::now();
        Self {
            what,
            started: now,
            every,
            next: now + every,
        }
    }

    fn check(&mut self, mission_id: &str) {
        let now = Instant::now();
        if now >= self.next {
            tracing::warn!(
                mission_id,
                waiting_for = self.what,
                waited_secs = now.duration_since(self.started).as_secs(),
                "vehicle has not made progress"
            );
            self.next = now + self.every;
        }
    }
}
