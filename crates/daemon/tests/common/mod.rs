#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use survey_core::api::{Envelope, Event};
use survey_core::model::{Coordinate, MissionRequest};
use survey_daemon::context::MissionControl;
use survey_daemon::vehicle::{SimConfig, SimulatedVehicle, VehicleControl};
use tokio::sync::broadcast;

pub const HOME: (f64, f64) = (-35.0, 149.0);

pub fn home() -> Coordinate {
    Coordinate::new(HOME.0, HOME.1).unwrap()
}

pub fn sim_config() -> SimConfig {
    SimConfig::with_home(home())
}

pub fn sim(config: SimConfig) -> Arc<SimulatedVehicle> {
    Arc::new(SimulatedVehicle::new("sim://test", config))
}

pub fn context_with(vehicle: Arc<SimulatedVehicle>) -> Arc<MissionControl> {
    let vehicle: Arc<dyn VehicleControl> = vehicle;
    Arc::new(MissionControl::new(Some(vehicle)))
}

/// 3x3 survey grid just north-east of home.
pub fn small_request() -> MissionRequest {
    let (lat, lng) = HOME;
    MissionRequest {
        waypoints: vec![
            Coordinate::new(lat, lng).unwrap(),
            Coordinate::new(lat, lng + 0.0002).unwrap(),
            Coordinate::new(lat + 0.0002, lng + 0.0002).unwrap(),
            Coordinate::new(lat + 0.0002, lng).unwrap(),
        ],
        altitude: 100.0,
        enhanced3d: false,
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<Envelope>) -> Event {
    tokio::time::timeout(Duration::from_secs(600), rx.recv())
        .await
        .expect("no event within 10 minutes")
        .expect("outbox closed")
        .event
}

/// Events up to and including `simulation_end`.
pub async fn until_end(rx: &mut broadcast::Receiver<Envelope>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, Event::SimulationEnd(_));
        events.push(event);
        if done {
            return events;
        }
    }
}

pub fn statuses(events: &[Event]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Status(s) => Some(s.as_str()),
            _ => None,
        })
        .collect()
}
