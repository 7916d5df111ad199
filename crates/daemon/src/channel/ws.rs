//! WebSocket channel: each client gets a `connected` greeting, then every
//! broadcast event; text frames from any client are commands.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use survey_core::api::{ConnectedInfo, Envelope, Event};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::{ClientId, Inbound, Outbox};
use crate::context::MissionControl;

/// Reported in the greeting.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
pub struct AppState {
    outbox: Outbox,
    inbound: mpsc::Sender<Inbound>,
    ctx: Arc<MissionControl>,
    clients: Arc<AtomicUsize>,
    shutdown: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        outbox: Outbox,
        inbound: mpsc::Sender<Inbound>,
        ctx: Arc<MissionControl>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            outbox,
            inbound,
            ctx,
            clients: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .route("/ws", get(upgrade))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `listen` and serves until the shutdown signal. A failure to bind or
/// serve also signals shutdown, since the daemon has no other channel.
pub async fn serve(listen: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let shutdown_tx = state.shutdown.clone();
    let result = serve_inner(listen, state).await;
    if let Err(e) = &result {
        tracing::error!(listen = %listen, error = %e, "websocket channel failed");
        let _ = shutdown_tx.send(());
    }
    result
}

async fn serve_inner(listen: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let mut shutdown = state.shutdown.subscribe();
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(listen = %listener.local_addr()?, "websocket channel listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn upgrade(ws: WebSocketUpgrade, State(st): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| session(socket, st))
}

/// Greeting sent first on every new connection.
pub fn greeting(ctx: &MissionControl) -> Envelope {
    Envelope::now(Event::Connected(ConnectedInfo {
        vehicle_connected: ctx.vehicle().is_some(),
        server_version: SERVER_VERSION.to_string(),
    }))
}

async fn session(mut socket: WebSocket, st: AppState) {
    let client = ClientId::Socket(Uuid::new_v4());
    // Subscribe before greeting so nothing emitted meanwhile is lost.
    let mut events = st.outbox.subscribe();
    let mut shutdown = st.shutdown.subscribe();
    let connected = st.clients.fetch_add(1, Ordering::SeqCst) + 1;
    tracing::info!(%client, clients = connected, "client connected");

    if send(&mut socket, &greeting(&st.ctx)).await.is_ok() {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let item = Inbound::Message { client, text: text.as_str().to_owned() };
                        if st.inbound.send(item).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(%client, error = %e, "websocket receive failed");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Ok(envelope) => {
                        if let Err(e) = send(&mut socket, &envelope).await {
                            tracing::debug!(%client, error = %e, "websocket send failed");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(%client, skipped, "client fell behind; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    let remaining = st.clients.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    let _ = st
        .inbound
        .send(Inbound::Disconnected {
            client,
            remaining_clients: remaining,
        })
        .await;
}

async fn send(socket: &mut WebSocket, envelope: &Envelope) -> anyhow::Result<()> {
    let text = serde_json::to_string(envelope)?;
    socket.send(Message::Text(text.into())).await?;
    Ok(())
}
