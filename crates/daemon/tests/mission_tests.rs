//! Mission state machine driven against the simulated vehicle on a paused clock.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use survey_core::api::Event;
use survey_core::geodesy::{destination, distance_meters};
use survey_core::model::Coordinate;
use survey_core::pattern::SurveyPlanner;
use survey_daemon::channel::Outbox;
use survey_daemon::context::MissionControl;
use survey_daemon::error::VehicleError;
use survey_daemon::mission::{MissionPhase, MissionRunner, MissionSettings, MissionTiming};
use survey_daemon::vehicle::{Attitude, FlightMode, Location, VehicleControl};

#[tokio::test(start_paused = true)]
async fn full_survey_lands_with_every_photo() {
    let vehicle = sim(sim_config());
    let ctx = context_with(vehicle.clone());
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();

    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());
    let events = until_end(&mut rx).await;
    let outcome = task.await.unwrap();

    let Event::MissionInfo(info) = &events[0] else {
        panic!("first event should be mission_info, got {:?}", events[0]);
    };
    assert_eq!(info.total_waypoints, 9);
    assert_eq!(info.estimated_time, 27);
    assert!(matches!(&events[1], Event::FlightPath(p) if p.total_points == 9));
    assert_eq!(events[2], Event::Status("Pre-flight checks...".into()));

    let progress: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            Event::WaypointProgress(p) => Some(p.current),
            _ => None,
        })
        .collect();
    assert_eq!(progress, (1..=9).collect::<Vec<_>>());

    let photos: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            Event::PhotoTaken(p) => Some(p.photo_number),
            _ => None,
        })
        .collect();
    assert_eq!(photos, (1..=9).collect::<Vec<_>>());

    let complete = events
        .iter()
        .find_map(|e| match e {
            Event::MissionComplete(c) => Some(c.clone()),
            _ => None,
        })
        .expect("mission_complete");
    assert_eq!(complete.photos_taken, 9);
    assert_eq!(complete.waypoints_completed, 9);
    // Eight legs of at least ~9 m between neighbouring grid cells.
    assert!(complete.distance_flown > 8.0 * 9.0, "{}", complete.distance_flown);
    assert!((complete.area_covered - info.area_m2).abs() < 1e-6);

    assert!(statuses(&events).contains(&"Mission complete - returning to launch"));
    assert_eq!(events.last(), Some(&Event::SimulationEnd("Landing complete".into())));

    assert_eq!(outcome.phase, MissionPhase::Landed);
    assert_eq!(outcome.photos_taken, 9);
    assert!(!ctx.is_mission_running());
    assert!(!vehicle.armed().await.unwrap());
    let loc = vehicle.location().await.unwrap();
    assert!(distance_meters(&loc.coordinate().unwrap(), &home()) < 1.0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_survey_cancels_without_completing() {
    let vehicle = sim(sim_config());
    let ctx = context_with(vehicle.clone());
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();

    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());

    loop {
        if let Event::PhotoTaken(p) = next_event(&mut rx).await {
            if p.photo_number == 2 {
                break;
            }
        }
    }
    assert!(ctx.request_stop());
    vehicle.set_mode(FlightMode::Rtl).await.unwrap();

    let rest = until_end(&mut rx).await;
    let outcome = task.await.unwrap();

    assert!(!rest.iter().any(|e| matches!(e, Event::MissionComplete(_))));
    assert!(!rest.iter().any(|e| matches!(e, Event::WaypointProgress(_))));
    assert!(statuses(&rest).contains(&"Mission cancelled - returning to launch"));
    assert_eq!(rest.last(), Some(&Event::SimulationEnd("Mission cancelled".into())));
    assert_eq!(outcome.phase, MissionPhase::Cancelled);
    assert_eq!(outcome.photos_taken, 2);
    assert!(ctx.mission_snapshot().is_none());
    assert!(!ctx.is_mission_active());
}

#[tokio::test(start_paused = true)]
async fn stop_during_preflight_ends_cleanly() {
    let mut config = sim_config();
    config.armable_after = Duration::from_secs(600);
    let vehicle = sim(config);
    let ctx = context_with(vehicle);
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();

    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());

    loop {
        if let Event::Status(s) = next_event(&mut rx).await {
            if s.starts_with("Waiting for vehicle to become armable") {
                break;
            }
        }
    }
    ctx.request_stop();

    let rest = until_end(&mut rx).await;
    assert!(!rest.iter().any(|e| matches!(e, Event::Error(_))));
    assert!(statuses(&rest).contains(&"Mission cancelled during pre-flight checks"));
    assert_eq!(task.await.unwrap().phase, MissionPhase::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn armable_timeout_aborts_with_error() {
    let mut config = sim_config();
    config.armable_after = Duration::from_secs(600);
    let vehicle = sim(config);
    let ctx = context_with(vehicle.clone());
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();
    let settings = MissionSettings {
        timing: MissionTiming {
            armable_timeout: Duration::from_secs(5),
            ..MissionTiming::default()
        },
        ..MissionSettings::default()
    };

    let runner = MissionRunner::prepare(&ctx, small_request(), &settings, outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());
    let events = until_end(&mut rx).await;

    let waits = statuses(&events)
        .into_iter()
        .filter(|s| s.starts_with("Waiting for vehicle to become armable"))
        .count();
    assert_eq!(waits, 5);
    assert!(events.contains(&Event::Error("Mission error: Vehicle not armable after 5s".into())));
    assert_eq!(events.last(), Some(&Event::SimulationEnd("Mission aborted".into())));
    assert_eq!(vehicle.mode().await.unwrap(), FlightMode::Rtl);
    assert_eq!(task.await.unwrap().phase, MissionPhase::Failed);
}

/// Starts a mission and reads events until a status starting with `prefix`.
async fn run_until_status(
    vehicle: Arc<survey_daemon::vehicle::SimulatedVehicle>,
    prefix: &str,
) -> (
    Arc<MissionControl>,
    tokio::sync::broadcast::Receiver<survey_core::api::Envelope>,
    tokio::task::JoinHandle<survey_daemon::mission::MissionOutcome>,
) {
    let ctx = context_with(vehicle);
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();
    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());
    loop {
        if let Event::Status(s) = next_event(&mut rx).await {
            if s.starts_with(prefix) {
                return (ctx, rx, task);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn stop_while_arming_cancels_without_error() {
    let mut config = sim_config();
    config.arm_delay = Duration::from_secs(600);
    let (ctx, mut rx, task) = run_until_status(sim(config), "Arming vehicle").await;
    ctx.request_stop();

    let rest = until_end(&mut rx).await;
    assert!(!rest.iter().any(|e| matches!(e, Event::Error(_))));
    assert!(statuses(&rest).contains(&"Mission cancelled during arming"));
    assert_eq!(task.await.unwrap().phase, MissionPhase::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn stop_while_taking_off_returns_to_launch() {
    let vehicle = sim(sim_config());
    let (ctx, mut rx, task) = run_until_status(vehicle.clone(), "Taking off").await;
    ctx.request_stop();

    let rest = until_end(&mut rx).await;
    assert!(!rest.iter().any(|e| matches!(e, Event::Error(_))));
    assert!(statuses(&rest).contains(&"Mission cancelled during takeoff"));
    assert_eq!(task.await.unwrap().phase, MissionPhase::Cancelled);
    assert_eq!(vehicle.mode().await.unwrap(), FlightMode::Rtl);
}

#[tokio::test(start_paused = true)]
async fn odometer_never_decreases() {
    let vehicle = sim(sim_config());
    let ctx = context_with(vehicle);
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();
    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let mut states = ctx.subscribe();
    let task = tokio::spawn(runner.run());

    let mut readings = Vec::new();
    while states.changed().await.is_ok() {
        let Some(state) = states.borrow_and_update().clone() else {
            break;
        };
        assert!(state.photos_taken as usize <= state.current_waypoint);
        readings.push(state.distance_flown_m);
    }
    until_end(&mut rx).await;
    let outcome = task.await.unwrap();

    assert!(readings.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(readings.last().copied(), Some(outcome.distance_flown_m));
    assert!(outcome.distance_flown_m > 0.0);
}

#[tokio::test(start_paused = true)]
async fn stop_while_flying_to_a_point_skips_its_photo() {
    let vehicle = sim(sim_config());
    let ctx = context_with(vehicle.clone());
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();
    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());

    loop {
        if let Event::WaypointProgress(p) = next_event(&mut rx).await {
            if p.current == 2 {
                break;
            }
        }
    }
    // The runner is polling for arrival at point 2.
    assert!(ctx.request_stop());

    let rest = until_end(&mut rx).await;
    let outcome = task.await.unwrap();

    assert!(!rest.iter().any(|e| matches!(e, Event::PhotoTaken(_) | Event::Error(_))));
    assert!(statuses(&rest).contains(&"Mission cancelled - returning to launch"));
    assert_eq!(rest.last(), Some(&Event::SimulationEnd("Mission cancelled".into())));
    assert_eq!(outcome.phase, MissionPhase::Cancelled);
    assert_eq!(outcome.photos_taken, 1);
    assert_eq!(outcome.waypoints_reached, 2);
    assert_eq!(vehicle.mode().await.unwrap(), FlightMode::Rtl);
}

#[tokio::test(start_paused = true)]
async fn stop_while_returning_to_launch_keeps_the_completion_report() {
    let vehicle = sim(sim_config());
    let ctx = context_with(vehicle.clone());
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();
    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());

    let mut events = Vec::new();
    loop {
        let event = next_event(&mut rx).await;
        let returning = event == Event::Status("Mission complete - returning to launch".into());
        events.push(event);
        if returning {
            break;
        }
    }
    assert_eq!(vehicle.mode().await.unwrap(), FlightMode::Rtl);
    assert!(ctx.request_stop());

    events.extend(until_end(&mut rx).await);
    let outcome = task.await.unwrap();

    let complete_at = events
        .iter()
        .position(|e| matches!(e, Event::MissionComplete(_)))
        .expect("mission_complete");
    let last_photo = events
        .iter()
        .rposition(|e| matches!(e, Event::PhotoTaken(_)))
        .expect("photos");
    assert!(complete_at > last_photo);
    assert!(!events.iter().any(|e| matches!(e, Event::Error(_))));
    assert_eq!(
        events.last(),
        Some(&Event::SimulationEnd("Stopped while returning to launch".into()))
    );
    assert_eq!(outcome.phase, MissionPhase::Cancelled);
    assert_eq!(outcome.photos_taken, 9);
    assert!(vehicle.armed().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn disarm_in_flight_aborts_and_commands_rtl() {
    let vehicle = sim(sim_config());
    let ctx = context_with(vehicle.clone());
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();
    let runner = MissionRunner::prepare(&ctx, small_request(), &MissionSettings::default(), outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());

    loop {
        if let Event::WaypointProgress(p) = next_event(&mut rx).await {
            if p.current == 2 {
                break;
            }
        }
    }
    vehicle.set_armed(false).await.unwrap();

    let rest = until_end(&mut rx).await;
    let outcome = task.await.unwrap();

    assert!(rest.contains(&Event::Error(
        "Mission error: Vehicle disarmed while flying to survey point 2".into()
    )));
    assert!(!rest.iter().any(|e| matches!(e, Event::MissionComplete(_))));
    assert_eq!(rest.last(), Some(&Event::SimulationEnd("Mission aborted".into())));
    assert_eq!(outcome.phase, MissionPhase::Failed);
    assert_eq!(outcome.waypoints_reached, 2);
    assert_eq!(vehicle.mode().await.unwrap(), FlightMode::Rtl);
    assert!(!ctx.is_mission_running());
}

/// Replays a fixed list of positions once the first goto is commanded, so the
/// odometer can be checked against an exact sum.
struct ScriptedVehicle {
    home: Coordinate,
    path: Vec<Coordinate>,
    state: Mutex<Script>,
}

struct Script {
    mode: FlightMode,
    armed: bool,
    altitude: f64,
    flying: bool,
    cursor: usize,
}

impl ScriptedVehicle {
    fn new(home: Coordinate, path: Vec<Coordinate>) -> Self {
        Self {
            home,
            path,
            state: Mutex::new(Script {
                mode: FlightMode::Stabilize,
                armed: false,
                altitude: 0.0,
                flying: false,
                cursor: 0,
            }),
        }
    }
}

#[async_trait]
impl VehicleControl for ScriptedVehicle {
    fn endpoint(&self) -> &str {
        "scripted://"
    }

    async fn is_connected(&self) -> bool {
        true
    }

    async fn location(&self) -> Result<Location, VehicleError> {
        let mut s = self.state.lock().unwrap();
        let here = if s.flying {
            let here = self.path[s.cursor.min(self.path.len() - 1)];
            s.cursor += 1;
            here
        } else {
            self.home
        };
        Ok(Location {
            lat: here.lat(),
            lon: here.lng(),
            alt: s.altitude,
        })
    }

    async fn attitude(&self) -> Result<Attitude, VehicleError> {
        Ok(Attitude::default())
    }

    async fn velocity(&self) -> Result<[f64; 3], VehicleError> {
        Ok([0.0; 3])
    }

    async fn armed(&self) -> Result<bool, VehicleError> {
        let s = self.state.lock().unwrap();
        Ok(s.armed && s.mode != FlightMode::Rtl)
    }

    async fn is_armable(&self) -> Result<bool, VehicleError> {
        Ok(true)
    }

    async fn mode(&self) -> Result<FlightMode, VehicleError> {
        Ok(self.state.lock().unwrap().mode)
    }

    async fn battery_level(&self) -> Result<Option<f64>, VehicleError> {
        Ok(None)
    }

    async fn gps_fix_type(&self) -> Result<u8, VehicleError> {
        Ok(3)
    }

    async fn set_mode(&self, mode: FlightMode) -> Result<(), VehicleError> {
        self.state.lock().unwrap().mode = mode;
        Ok(())
    }

    async fn set_armed(&self, armed: bool) -> Result<(), VehicleError> {
        self.state.lock().unwrap().armed = armed;
        Ok(())
    }

    async fn simple_takeoff(&self, altitude_m: f64) -> Result<(), VehicleError> {
        self.state.lock().unwrap().altitude = altitude_m;
        Ok(())
    }

    async fn simple_goto(
        &self,
        _target: Coordinate,
        _altitude_m: f64,
        _ground_speed: f64,
    ) -> Result<(), VehicleError> {
        self.state.lock().unwrap().flying = true;
        Ok(())
    }

    async fn set_parameter(&self, _name: &str, _value: f64) -> Result<(), VehicleError> {
        Ok(())
    }

    async fn close(&self) {}
}

#[tokio::test(start_paused = true)]
async fn odometer_sums_every_sampled_leg() {
    let target = home();
    let start = destination(&target, 180.0, 30.0);
    let path = vec![
        destination(&target, 180.0, 20.0),
        destination(&target, 180.0, 10.0),
        destination(&target, 180.0, 1.0),
    ];
    let expected = std::iter::once(&start)
        .chain(&path)
        .collect::<Vec<_>>()
        .windows(2)
        .fold(0.0, |sum, w| sum + distance_meters(w[0], w[1]));

    let vehicle: Arc<dyn VehicleControl> = Arc::new(ScriptedVehicle::new(start, path));
    let ctx = Arc::new(MissionControl::new(Some(vehicle)));
    let outbox = Outbox::new(1024);
    let mut rx = outbox.subscribe();
    // Spacing wider than the square leaves exactly one survey point: its corner.
    let settings = MissionSettings {
        planner: SurveyPlanner::new(0.001).unwrap(),
        ..MissionSettings::default()
    };
    let runner = MissionRunner::prepare(&ctx, small_request(), &settings, outbox)
        .await
        .unwrap();
    let task = tokio::spawn(runner.run());

    let events = until_end(&mut rx).await;
    let outcome = task.await.unwrap();

    let complete = events
        .iter()
        .find_map(|e| match e {
            Event::MissionComplete(c) => Some(c.clone()),
            _ => None,
        })
        .expect("mission_complete");
    assert_eq!(complete.waypoints_completed, 1);
    assert_eq!(complete.photos_taken, 1);
    assert!((complete.distance_flown - expected).abs() < 1e-9, "{}", complete.distance_flown);
    assert!((outcome.distance_flown_m - expected).abs() < 1e-9);
    assert!((expected - 29.0).abs() < 0.01, "{expected}");
    assert_eq!(outcome.phase, MissionPhase::Landed);
}
