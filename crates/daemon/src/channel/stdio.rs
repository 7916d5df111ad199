//! Line-delimited JSON over stdin/stdout, for running as a child process.
//!
//! One command per stdin line, one event per stdout line. Logs go to stderr
//! so stdout carries nothing but events.

use survey_core::api::Envelope;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;

use super::{ClientId, Inbound};

/// Serves the process's own stdin/stdout.
///
/// `events` comes from [`super::Outbox::subscribe`]. End of input requests daemon
/// shutdown; output keeps draining until every outbox handle is gone, so
/// the closing events of a mission still reach the parent process.
pub async fn serve(
    events: broadcast::Receiver<Envelope>,
    inbound: mpsc::Sender<Inbound>,
    shutdown: broadcast::Sender<()>,
) -> anyhow::Result<()> {
    let writer = tokio::spawn(write_events(events, tokio::io::stdout()));
    let reader = BufReader::new(tokio::io::stdin());
    let read = read_commands(reader, inbound, shutdown.subscribe()).await;
    let _ = shutdown.send(());
    writer.await??;
    read
}

/// Forwards each non-blank line to the dispatcher. Sends a disconnect when
/// the input ends.
pub async fn read_commands<R>(
    reader: R,
    inbound: mpsc::Sender<Inbound>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(text) = line else {
            tracing::info!("stdin closed");
            let _ = inbound
                .send(Inbound::Disconnected {
                    client: ClientId::Stdio,
                    remaining_clients: 0,
                })
                .await;
            return Ok(());
        };
        if text.trim().is_empty() {
            continue;
        }
        let item = Inbound::Message {
            client: ClientId::Stdio,
            text,
        };
        if inbound.send(item).await.is_err() {
            return Ok(());
        }
    }
}

/// Writes each event as one JSON line until the outbox closes.
pub async fn write_events<W>(mut events: broadcast::Receiver<Envelope>, mut out: W) -> anyhow::Result<W>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match events.recv().await {
            Ok(envelope) => {
                let mut line = serde_json::to_vec(&envelope)?;
                line.push(b'\n');
                out.write_all(&line).await?;
                out.flush().await?;
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "stdout fell behind; events dropped");
            }
            Err(RecvError::Closed) => return Ok(out),
        }
    }
}
