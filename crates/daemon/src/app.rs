//! Wires vehicle, dispatcher, telemetry and channel together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::channel::{stdio, ws, Outbox};
use crate::config::{ChannelKind, DaemonConfig};
use crate::context::MissionControl;
use crate::dispatcher::Dispatcher;
use crate::telemetry::TelemetryPublisher;
use crate::vehicle;

/// Upper bound on how long the channel may take to flush after shutdown.
const CHANNEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs the daemon until a `shutdown` command, end of stdin, or Ctrl-C.
pub async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let vehicle = match vehicle::connect(&config.vehicle_endpoint, config.connect_timeout).await {
        Ok(v) => {
            vehicle::configure_navigation(v.as_ref()).await;
            Some(v)
        }
        Err(e) => {
            tracing::error!(endpoint = %config.vehicle_endpoint, error = %e, "vehicle unavailable; missions disabled");
            None
        }
    };

    let ctx = Arc::new(MissionControl::new(vehicle.clone()));
    let outbox = Outbox::new(config.outbox_capacity);
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(4);
    let (inbound_tx, inbound_rx) = mpsc::channel(64);

    let telemetry = tokio::spawn(
        TelemetryPublisher::new(Arc::clone(&ctx), outbox.clone(), config.telemetry_hz)
            .run(shutdown_tx.subscribe()),
    );
    let dispatcher = tokio::spawn(
        Dispatcher::new(
            Arc::clone(&ctx),
            outbox.clone(),
            config.mission.clone(),
            config.stop_on_disconnect,
            shutdown_tx.clone(),
        )
        .run(inbound_rx),
    );
    let channel = match config.channel {
        ChannelKind::Stdio => tokio::spawn(stdio::serve(
            outbox.subscribe(),
            inbound_tx,
            shutdown_tx.clone(),
        )),
        ChannelKind::Ws => {
            let state = ws::AppState::new(outbox.clone(), inbound_tx, Arc::clone(&ctx), shutdown_tx.clone());
            tokio::spawn(ws::serve(config.listen, state))
        }
    };
    tracing::info!(channel = ?config.channel, "survey daemon ready");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("interrupt received; shutting down");
        }
        _ = shutdown_rx.recv() => tracing::info!("shutdown requested"),
    }
    let _ = shutdown_tx.send(());

    if let Some(outcome) = dispatcher.await? {
        tracing::info!(mission_id = %outcome.mission_id, phase = %outcome.phase, "mission wound down");
    }
    telemetry.await?;
    if let Some(v) = &vehicle {
        v.close().await;
    }

    drop(outbox);
    match tokio::time::timeout(CHANNEL_DRAIN_TIMEOUT, channel).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!("channel did not close in time"),
    }
    tracing::info!("survey daemon stopped");
    Ok(())
}
