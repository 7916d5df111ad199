//! Command dispatcher: decodes operator messages and acts on them.
//!
//! All inbound messages funnel through one [`Dispatcher`] task, so commands
//! are handled in arrival order. Missions run on their own task; the
//! dispatcher only keeps the join handle.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use survey_core::api::{Command, Event, VehicleStatus};
use survey_core::model::MissionRequest;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::channel::{ClientId, Inbound, Outbox};
use crate::context::MissionControl;
use crate::mission::{MissionOutcome, MissionRunner, MissionSettings};
use crate::vehicle::FlightMode;

/// How long shutdown waits for a running mission to wind down.
pub const MISSION_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    ctx: Arc<MissionControl>,
    outbox: Outbox,
    settings: MissionSettings,
    stop_on_disconnect: bool,
    shutdown: broadcast::Sender<()>,
    mission: Option<JoinHandle<MissionOutcome>>,
}

impl Dispatcher {
    pub fn new(
        ctx: Arc<MissionControl>,
        outbox: Outbox,
        settings: MissionSettings,
        stop_on_disconnect: bool,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            ctx,
            outbox,
            settings,
            stop_on_disconnect,
            shutdown,
            mission: None,
        }
    }

    /// Consumes inbound messages until a `shutdown` command, the shutdown
    /// signal, or every channel sender going away. Then winds down any mission.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) -> Option<MissionOutcome> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            // Queued messages go first so a disconnect is never overtaken by shutdown.
            let next = tokio::select! {
                biased;
                next = inbound.recv() => next,
                _ = shutdown.recv() => break,
            };
            let Some(item) = next else { break };
            if self.handle(item).await.is_break() {
                break;
            }
        }
        self.wind_down().await
    }

    /// Handles one inbound item. `Break` means the daemon should shut down.
    pub async fn handle(&mut self, item: Inbound) -> ControlFlow<()> {
        match item {
            Inbound::Message { client, text } => match Command::parse(&text) {
                Ok(command) => {
                    tracing::info!(%client, command = command.name(), "command received");
                    self.execute(client, command).await
                }
                Err(e) => {
                    tracing::warn!(%client, error = %e, "rejected message");
                    self.outbox.emit(Event::Error(e.to_string()));
                    ControlFlow::Continue(())
                }
            },
            Inbound::Disconnected {
                client,
                remaining_clients,
            } => {
                tracing::info!(%client, remaining_clients, "client disconnected");
                if self.stop_on_disconnect && remaining_clients == 0 && self.ctx.is_mission_active() {
                    tracing::warn!("last client gone; stopping mission");
                    self.stop_mission().await;
                }
                ControlFlow::Continue(())
            }
        }
    }

    async fn execute(&mut self, client: ClientId, command: Command) -> ControlFlow<()> {
        match command {
            Command::StartMission(request) => self.start_mission(client, request).await,
            Command::StopMission => self.stop_mission().await,
            Command::EmergencyLand => self.emergency_land().await,
            Command::GetStatus => self.report_status().await,
            Command::Shutdown => {
                if self.ctx.is_mission_active() {
                    self.stop_mission().await;
                }
                self.outbox.emit(Event::Status("Shutting down".to_string()));
                let _ = self.shutdown.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn start_mission(&mut self, client: ClientId, request: MissionRequest) {
        let runner =
            match MissionRunner::prepare(&self.ctx, request, &self.settings, self.outbox.clone()).await {
                Ok(runner) => runner,
                Err(e) => {
                    tracing::warn!(%client, error = %e, "mission not started");
                    self.outbox.emit(Event::Error(e.to_string()));
                    return;
                }
            };
        tracing::info!(%client, mission_id = runner.mission_id(), "mission accepted");
        self.mission = Some(tokio::spawn(runner.run()));
    }

    async fn stop_mission(&mut self) {
        if !self.ctx.request_stop() {
            self.outbox
                .emit(Event::Warning("No active mission to stop".to_string()));
            return;
        }
        self.outbox.emit(Event::Status("Stopping mission...".to_string()));
        if let Some(vehicle) = self.ctx.vehicle() {
            if let Err(e) = vehicle.set_mode(FlightMode::Rtl).await {
                tracing::warn!(error = %e, "failed to command RTL on stop");
                self.outbox
                    .emit(Event::Error(format!("Command processing error: {e}")));
            }
        }
    }

    async fn emergency_land(&mut self) {
        let Some(vehicle) = self.ctx.vehicle() else {
            self.outbox.emit(Event::Warning(
                "Emergency land ignored: vehicle not connected".to_string(),
            ));
            return;
        };
        match vehicle.armed().await {
            Ok(true) => match vehicle.set_mode(FlightMode::Land).await {
                Ok(()) => {
                    // LAND is set before the flag clears so the mission winds
                    // down without commanding RTL over it.
                    let stopped = self.ctx.request_stop();
                    tracing::warn!(mission_stopped = stopped, "emergency landing commanded");
                    self.outbox
                        .emit(Event::Status("Emergency landing initiated".to_string()));
                }
                Err(e) => self
                    .outbox
                    .emit(Event::Error(format!("Command processing error: {e}"))),
            },
            Ok(false) => self.outbox.emit(Event::Warning(
                "Emergency land ignored: vehicle is not armed".to_string(),
            )),
            Err(e) => self
                .outbox
                .emit(Event::Error(format!("Command processing error: {e}"))),
        }
    }

    async fn report_status(&mut self) {
        let mut status = VehicleStatus {
            connected: false,
            armed: false,
            mode: "UNKNOWN".to_string(),
            mission_active: self.ctx.is_mission_active(),
        };
        if let Some(vehicle) = self.ctx.vehicle() {
            if vehicle.is_connected().await {
                status.connected = true;
                match (vehicle.armed().await, vehicle.mode().await) {
                    (Ok(armed), Ok(mode)) => {
                        status.armed = armed;
                        status.mode = mode.to_string();
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        self.outbox
                            .emit(Event::Error(format!("Command processing error: {e}")));
                        return;
                    }
                }
            }
        }
        self.outbox.emit(Event::VehicleStatus(status));
    }

    /// Stops any mission and waits for its task, bounded by
    /// [`MISSION_JOIN_TIMEOUT`].
    async fn wind_down(&mut self) -> Option<MissionOutcome> {
        if self.ctx.request_stop() {
            if let Some(vehicle) = self.ctx.vehicle() {
                if let Err(e) = vehicle.set_mode(FlightMode::Rtl).await {
                    tracing::warn!(error = %e, "failed to command RTL on shutdown");
                }
            }
        }
        let handle = self.mission.take()?;
        match tokio::time::timeout(MISSION_JOIN_TIMEOUT, handle).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "mission task panicked");
                None
            }
            Err(_) => {
                tracing::error!("mission did not stop in time");
                None
            }
        }
    }
}
