//! Fixed-rate telemetry broadcast.

use std::sync::Arc;
use std::time::Duration;

use survey_core::api::{Event, MissionStatus, Telemetry};
use survey_core::model::FEET_TO_METERS;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::channel::Outbox;
use crate::context::MissionControl;
use crate::error::VehicleError;
use crate::vehicle::VehicleSnapshot;

/// Pause after a failed sample before trying again.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Samples the vehicle at a fixed rate and broadcasts `telemetry` events
/// while it is armed.
pub struct TelemetryPublisher {
    ctx: Arc<MissionControl>,
    outbox: Outbox,
    period: Duration,
    error_backoff: Duration,
}

impl TelemetryPublisher {
    pub fn new(ctx: Arc<MissionControl>, outbox: Outbox, rate_hz: f64) -> Self {
        Self {
            ctx,
            outbox,
            period: Duration::from_secs_f64(1.0 / rate_hz.max(0.1)),
            error_backoff: ERROR_BACKOFF,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(period_ms = self.period.as_millis() as u64, "telemetry publisher started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            match self.sample().await {
                Ok(Some(telemetry)) => self.outbox.emit(Event::Telemetry(telemetry)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "telemetry sample failed");
                    self.outbox.emit(Event::Error(format!("Telemetry error: {e}")));
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = sleep(self.error_backoff) => {}
                    }
                    ticker.reset();
                }
            }
        }
        tracing::info!("telemetry publisher stopped");
    }

    /// One sample. `None` when there is no vehicle or it is disarmed.
    pub async fn sample(&self) -> Result<Option<Telemetry>, VehicleError> {
        let Some(vehicle) = self.ctx.vehicle() else {
            return Ok(None);
        };
        if !vehicle.is_connected().await || !vehicle.armed().await? {
            return Ok(None);
        }
        let snapshot = vehicle.snapshot().await?;
        let mission_status = if self.ctx.is_mission_active() {
            self.ctx.mission_snapshot().map(|s| s.status(true))
        } else {
            None
        };
        Ok(Some(build_telemetry(&snapshot, mission_status)))
    }
}

/// Maps a vehicle snapshot onto the wire record.
pub fn build_telemetry(snapshot: &VehicleSnapshot, mission_status: Option<MissionStatus>) -> Telemetry {
    let loc = snapshot.location;
    Telemetry {
        lat: loc.lat,
        lng: loc.lon,
        alt: loc.alt,
        alt_feet: loc.alt / FEET_TO_METERS,
        heading: snapshot.heading_degrees(),
        ground_speed: snapshot.ground_speed(),
        battery: snapshot.battery_level.unwrap_or(100.0),
        mode: snapshot.mode.to_string(),
        armed: snapshot.armed,
        gps_fix: snapshot.gps_fix_type,
        mission_status,
    }
}
