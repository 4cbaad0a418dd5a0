//! Pub/sub transport.
//!
//! A [`Link`] is one client's connection to a broker. [`MemoryBus`] is an
//! in-process broker with the two features the protocol depends on:
//! retained messages (late subscribers immediately get the last snapshot)
//! and a last-will message published when a link drops without closing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Connection state reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("link is closed")]
    Closed,
    #[error("broker rejected publish to {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Message the broker publishes on a client's behalf if it drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: String,
}

pub trait Link: Send {
    fn publish(&mut self, packet: Packet) -> Result<(), TransportError>;

    /// Next packet on a subscribed topic. Must be cancel-safe.
    fn recv(&mut self) -> impl Future<Output = Result<Packet, TransportError>> + Send;

    /// Disconnect cleanly; the will is discarded.
    fn close(&mut self);
}

const BUS_CAPACITY: usize = 1024;

struct BusInner {
    tx: broadcast::Sender<Packet>,
    retained: Mutex<HashMap<String, String>>,
}

/// In-process broker.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBus")
            .field("subscribers", &self.inner.tx.receiver_count())
            .finish()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                tx,
                retained: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to `topics`; retained payloads on them are delivered first.
    pub fn connect(&self, client_id: &str, topics: &[String], will: Option<Will>) -> MemoryLink {
        let rx = self.inner.tx.subscribe();
        let backlog = {
            let retained = self.inner.retained.lock().unwrap_or_else(PoisonError::into_inner);
            topics
                .iter()
                .filter_map(|t| {
                    retained.get(t).map(|payload| Packet {
                        topic: t.clone(),
                        payload: payload.clone(),
                        retain: true,
                    })
                })
                .collect()
        };
        debug!(client = client_id, topics = topics.len(), "link connected");
        MemoryLink {
            bus: self.clone(),
            client_id: client_id.to_string(),
            rx,
            topics: topics.iter().cloned().collect(),
            backlog,
            will,
            closed: false,
        }
    }

    pub fn retained(&self, topic: &str) -> Option<String> {
        self.inner
            .retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
    }

    fn deliver(&self, packet: Packet) {
        if packet.retain {
            self.inner
                .retained
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(packet.topic.clone(), packet.payload.clone());
        }
        // No subscribers is not an error for a broker.
        let _ = self.inner.tx.send(packet);
    }
}

pub struct MemoryLink {
    bus: MemoryBus,
    client_id: String,
    rx: broadcast::Receiver<Packet>,
    topics: HashSet<String>,
    backlog: VecDeque<Packet>,
    will: Option<Will>,
    closed: bool,
}

impl fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLink")
            .field("client_id", &self.client_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Link for MemoryLink {
    fn publish(&mut self, packet: Packet) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.bus.deliver(packet);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Packet, TransportError> {
        if let Some(packet) = self.backlog.pop_front() {
            return Ok(packet);
        }
        loop {
            if self.closed {
                return Err(TransportError::Closed);
            }
            match self.rx.recv().await {
                Ok(packet) if self.topics.contains(&packet.topic) => return Ok(packet),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client = %self.client_id, skipped, "link lagged, packets dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }

    fn close(&mut self) {
        self.will = None;
        self.closed = true;
        debug!(client = %self.client_id, "link closed");
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        if let Some(will) = self.will.take() {
            debug!(client = %self.client_id, topic = %will.topic, "link dropped, publishing will");
            self.bus.deliver(Packet {
                topic: will.topic,
                payload: will.payload,
                retain: false,
            });
        }
    }
}
