//! Live indexer events and the sinks they are emitted to

use crate::{
    constants::EVENT_CHANNEL_CAPACITY,
    network::PeerNode,
    store::{BlockRow, TransactionRow},
};
use log::trace;
use serde::Serialize;
use std::{fmt, str::FromStr};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Block,
    Transaction,
    Network,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Block, EventType::Transaction, EventType::Network];
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Block => "block",
            Self::Transaction => "transaction",
            Self::Network => "network",
        };
        write!(f, "{name}")
    }
}

impl FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "transaction" => Ok(Self::Transaction),
            "network" => Ok(Self::Network),
            _ => anyhow::bail!("unknown event type {s:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndexerEvent {
    Block(BlockRow),
    Transaction(TransactionRow),
    Network(Box<PeerNode>),
}

impl IndexerEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Block(_) => EventType::Block,
            Self::Transaction(_) => EventType::Transaction,
            Self::Network(_) => EventType::Network,
        }
    }
}

/// Fire-and-forget event consumer. Implementations must never block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: IndexerEvent);
}

/// Fans events out to every live subscriber
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<IndexerEvent>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.sender.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for Broadcaster {
    fn emit(&self, event: IndexerEvent) {
        let event_type = event.event_type();

        // no subscribers is not an error
        if self.sender.send(event).is_err() {
            trace!("No subscribers for {event_type} event");
        }
    }
}
