use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use survey_core::geodesy::{bearing_degrees, destination, distance_meters};
use survey_core::model::Coordinate;
use tokio::time::Instant;

use super::{Attitude, FlightMode, Location, VehicleControl};
use crate::error::VehicleError;

/// Below this altitude the simulated airframe counts as on the ground.
const GROUND_M: f64 = 0.05;

/// Integration step, seconds. Long gaps between queries are replayed in these.
const STEP_S: f64 = 0.1;

/// Kinematic tuning for [`SimulatedVehicle`].
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub home: Coordinate,
    /// Time after boot before pre-arm checks pass.
    pub armable_after: Duration,
    /// Time between an arm request and the motors reporting armed.
    pub arm_delay: Duration,
    /// m/s.
    pub climb_rate: f64,
    /// m/s.
    pub descent_rate: f64,
    /// Horizontal speed when returning home, m/s.
    pub rtl_speed: f64,
    /// Upper bound on any commanded ground speed, m/s.
    pub max_speed: f64,
    /// Percent per second while armed.
    pub battery_drain_per_sec: f64,
    pub gps_fix_type: u8,
}

impl SimConfig {
    pub fn with_home(home: Coordinate) -> Self {
        Self {
            home,
            armable_after: Duration::from_secs(2),
            arm_delay: Duration::from_secs(1),
            climb_rate: 2.5,
            descent_rate: 1.5,
            rtl_speed: 10.0,
            max_speed: 20.0,
            battery_drain_per_sec: 0.05,
            gps_fix_type: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Target {
    coordinate: Coordinate,
    alt: f64,
    speed: f64,
}

#[derive(Debug)]
struct SimState {
    connected: bool,
    position: Coordinate,
    alt: f64,
    mode: FlightMode,
    armed: bool,
    arm_at: Option<Instant>,
    target: Option<Target>,
    yaw: f64,
    velocity: [f64; 3],
    battery: f64,
    last_update: Instant,
    params: HashMap<String, f64>,
}

/// In-process multicopter: enough flight dynamics to drive a survey end to end.
///
/// State is integrated lazily on every query against [`tokio::time::Instant`],
/// so tests with a paused clock fly missions instantly.
#[derive(Debug)]
pub struct SimulatedVehicle {
    endpoint: String,
    config: SimConfig,
    booted_at: Instant,
    state: Mutex<SimState>,
}

impl SimulatedVehicle {
    pub fn new(endpoint: impl Into<String>, config: SimConfig) -> Self {
        let now = Instant::now();
        let state = SimState {
            connected: true,
            position: config.home,
            alt: 0.0,
            mode: FlightMode::Stabilize,
            armed: false,
            arm_at: None,
            target: None,
            yaw: 0.0,
            velocity: [0.0; 3],
            battery: 100.0,
            last_update: now,
            params: HashMap::new(),
        };
        Self {
            endpoint: endpoint.into(),
            config,
            booted_at: now,
            state: Mutex::new(state),
        }
    }

    /// Resolves once the simulated link would have a heartbeat.
    pub async fn wait_ready(&self) {
        tokio::task::yield_now().await;
    }

    /// Last value written with `set_parameter`.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        self.lock().params.get(name).copied()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks, integrates up to now, and fails if the link was closed.
    fn current(&self) -> Result<MutexGuard<'_, SimState>, VehicleError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(VehicleError::NotConnected);
        }
        state.advance(&self.config, Instant::now());
        Ok(state)
    }

    fn armable(&self, state: &SimState) -> bool {
        Instant::now() >= self.booted_at + self.config.armable_after
            && self.config.gps_fix_type >= 3
            && state.battery > 0.0
    }
}

impl SimState {
    fn on_ground(&self) -> bool {
        self.alt <= GROUND_M
    }

    fn advance(&mut self, config: &SimConfig, now: Instant) {
        let mut remaining = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;

        if let Some(at) = self.arm_at {
            if now >= at {
                self.armed = true;
                self.arm_at = None;
            }
        }
        if !self.armed {
            self.velocity = [0.0; 3];
            return;
        }
        while remaining > 0.0 && self.armed {
            let dt = remaining.min(STEP_S);
            remaining -= dt;
            self.step(config, dt);
        }
    }

    fn step(&mut self, config: &SimConfig, dt: f64) {
        self.battery = (self.battery - config.battery_drain_per_sec * dt).max(0.0);

        match self.mode {
            FlightMode::Guided => match self.target {
                Some(t) => self.fly_towards(t.coordinate, t.alt, t.speed, config.climb_rate, dt),
                None => self.velocity = [0.0; 3],
            },
            FlightMode::Rtl => {
                if distance_meters(&self.position, &config.home) > 0.5 {
                    let alt = self.alt;
                    self.fly_towards(config.home, alt, config.rtl_speed, config.climb_rate, dt);
                } else {
                    self.descend(config.descent_rate, dt);
                }
            }
            FlightMode::Land => self.descend(config.descent_rate, dt),
            FlightMode::Stabilize | FlightMode::Auto => self.velocity = [0.0; 3],
        }
    }

    fn fly_towards(&mut self, target: Coordinate, target_alt: f64, speed: f64, climb: f64, dt: f64) {
        let dist = distance_meters(&self.position, &target);
        let [mut vn, mut ve] = [0.0, 0.0];
        if dist > 1e-6 && speed > 0.0 {
            let bearing = bearing_degrees(&self.position, &target);
            let step = (speed * dt).min(dist);
            self.position = if step >= dist {
                target
            } else {
                destination(&self.position, bearing, step)
            };
            let yaw = bearing.to_radians();
            self.yaw = if yaw > PI { yaw - 2.0 * PI } else { yaw };
            let moved = step / dt;
            vn = moved * yaw.cos();
            ve = moved * yaw.sin();
        }

        let dz = target_alt - self.alt;
        let climb_step = (climb * dt).min(dz.abs());
        self.alt += climb_step * dz.signum();
        let vd = -(climb_step / dt) * dz.signum();
        self.velocity = [vn, ve, if dz == 0.0 { 0.0 } else { vd }];
    }

    fn descend(&mut self, rate: f64, dt: f64) {
        self.alt = (self.alt - rate * dt).max(0.0);
        self.velocity = [0.0, 0.0, rate];
        if self.on_ground() {
            self.alt = 0.0;
            self.armed = false;
            self.target = None;
            self.velocity = [0.0; 3];
        }
    }
}

#[async_trait]
impl VehicleControl for SimulatedVehicle {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn location(&self) -> Result<Location, VehicleError> {
        let s = self.current()?;
        Ok(Location {
            lat: s.position.lat(),
            lon: s.position.lng(),
            alt: s.alt,
        })
    }

    async fn attitude(&self) -> Result<Attitude, VehicleError> {
        let s = self.current()?;
        Ok(Attitude {
            roll: 0.0,
            pitch: 0.0,
            yaw: s.yaw,
        })
    }

    async fn velocity(&self) -> Result<[f64; 3], VehicleError> {
        Ok(self.current()?.velocity)
    }

    async fn armed(&self) -> Result<bool, VehicleError> {
        Ok(self.current()?.armed)
    }

    async fn is_armable(&self) -> Result<bool, VehicleError> {
        let s = self.current()?;
        Ok(self.armable(&s))
    }

    async fn mode(&self) -> Result<FlightMode, VehicleError> {
        Ok(self.current()?.mode)
    }

    async fn battery_level(&self) -> Result<Option<f64>, VehicleError> {
        Ok(Some(self.current()?.battery))
    }

    async fn gps_fix_type(&self) -> Result<u8, VehicleError> {
        drop(self.current()?);
        Ok(self.config.gps_fix_type)
    }

    async fn set_mode(&self, mode: FlightMode) -> Result<(), VehicleError> {
        let mut s = self.current()?;
        if s.mode != mode {
            tracing::debug!(from = %s.mode, to = %mode, "sim mode change");
        }
        s.mode = mode;
        if mode != FlightMode::Guided {
            s.target = None;
        }
        Ok(())
    }

    async fn set_armed(&self, armed: bool) -> Result<(), VehicleError> {
        let mut s = self.current()?;
        if !armed {
            s.armed = false;
            s.arm_at = None;
            s.target = None;
            return Ok(());
        }
        if s.armed || s.arm_at.is_some() {
            return Ok(());
        }
        if !self.armable(&s) {
            return Err(VehicleError::CommandRejected {
                command: "arm",
                reason: "pre-arm checks have not passed".to_string(),
            });
        }
        if s.mode != FlightMode::Guided {
            return Err(VehicleError::CommandRejected {
                command: "arm",
                reason: format!("cannot arm in {}", s.mode),
            });
        }
        s.arm_at = Some(Instant::now() + self.config.arm_delay);
        Ok(())
    }

    async fn simple_takeoff(&self, altitude_m: f64) -> Result<(), VehicleError> {
        let mut s = self.current()?;
        if !s.armed || s.mode != FlightMode::Guided {
            return Err(VehicleError::CommandRejected {
                command: "takeoff",
                reason: format!("armed={} mode={}", s.armed, s.mode),
            });
        }
        s.target = Some(Target {
            coordinate: s.position,
            alt: altitude_m,
            speed: 0.0,
        });
        Ok(())
    }

    async fn simple_goto(
        &self,
        target: Coordinate,
        altitude_m: f64,
        ground_speed: f64,
    ) -> Result<(), VehicleError> {
        let mut s = self.current()?;
        if !s.armed || s.mode != FlightMode::Guided {
            return Err(VehicleError::CommandRejected {
                command: "goto",
                reason: format!("armed={} mode={}", s.armed, s.mode),
            });
        }
        s.target = Some(Target {
            coordinate: target,
            alt: altitude_m,
            speed: ground_speed.clamp(0.0, self.config.max_speed),
        });
        Ok(())
    }

    async fn set_parameter(&self, name: &str, value: f64) -> Result<(), VehicleError> {
        let mut s = self.current()?;
        s.params.insert(name.to_string(), value);
        Ok(())
    }

    async fn close(&self) {
        let mut s = self.lock();
        if s.connected {
            tracing::info!(endpoint = %self.endpoint, "vehicle link closed");
        }
        s.connected = false;
    }
}
