//! Operator message channels.
//!
//! A channel turns client text into [`Inbound`] items for the dispatcher and
//! fans [`Outbox`] events back out. Two are provided: line-delimited JSON on
//! stdio and a WebSocket server.

use std::fmt;

use survey_core::api::{Envelope, Event};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod stdio;
pub mod ws;

/// Identifies the client a message came from, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientId {
    Stdio,
    Socket(Uuid),
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Socket(id) => write!(f, "ws:{id}"),
        }
    }
}

/// What a channel hands to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message { client: ClientId, text: String },
    Disconnected { client: ClientId, remaining_clients: usize },
}

/// Broadcast side of the event stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: broadcast::Sender<Envelope>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Stamps and broadcasts an event to every connected client.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        if self.tx.send(Envelope::now(event)).is_err() {
            tracing::trace!(kind, "no clients listening; event dropped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
