//! Event loop for one client.
//!
//! Network traffic, UI commands and timers are all serialised through a
//! single `tokio::select!` so the reducer never runs concurrently with
//! itself. The UI reads state through `watch` channels.

use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::state::{ActionKind, Scorer, SessionId};
use crate::sync::config::SyncConfig;
use crate::sync::message::{Channel, Control, Message, MessageError, RoomTopics};
use crate::sync::replica::{Replica, View};
use crate::sync::transport::{ConnectionStatus, Link, MemoryBus, Packet, TransportError, Will};

/// Something the UI asks the client to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Take a slot, or queue for one if a game is running.
    Join,
    Leave,
    /// Roll with locally generated dice.
    Roll,
    Act(ActionKind),
}

pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<View>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    pub fn send(&self, command: Command) -> Result<(), TransportError> {
        self.commands.send(command).map_err(|_| TransportError::Closed)
    }

    pub fn view(&self) -> watch::Receiver<View> {
        self.view.clone()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Disconnect cleanly. No departure is announced.
    pub async fn shutdown(self) {
        drop(self.commands);
        if let Err(e) = self.task.await {
            warn!("client task failed: {e}");
        }
    }

    /// Drop the connection without closing it, as a crash would.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Connect to `room` on an in-memory bus and start the client loop.
pub fn connect(
    bus: &MemoryBus,
    room: &str,
    session_id: impl Into<SessionId>,
    player_name: impl Into<String>,
    config: SyncConfig,
) -> Result<ClientHandle, MessageError> {
    let session_id = session_id.into();
    let topics = RoomTopics::new(&config.topic_prefix, room)?;
    let will = Will {
        topic: topics.state.clone(),
        payload: Message::Control(Control::departure(&session_id)).encode()?,
    };
    let link = bus.connect(&session_id, &topics.all(), Some(will));
    let replica = Replica::new(session_id, player_name, config.thresholds(), Utc::now());
    Ok(spawn(link, replica, topics, config))
}

/// Start the loop over an already-connected link.
pub fn spawn<L, S>(
    link: L,
    replica: Replica<S>,
    topics: RoomTopics,
    config: SyncConfig,
) -> ClientHandle
where
    L: Link + 'static,
    S: Scorer + Send + 'static,
{
    let (commands, command_rx) = mpsc::unbounded_channel();
    let (view_tx, view) = watch::channel(replica.view());
    let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);

    let task = tokio::spawn(run(link, replica, topics, config, command_rx, view_tx, status_tx));
    ClientHandle {
        commands,
        view,
        status,
        task,
    }
}

async fn run<L: Link, S: Scorer>(
    mut link: L,
    mut replica: Replica<S>,
    topics: RoomTopics,
    config: SyncConfig,
    mut commands: mpsc::UnboundedReceiver<Command>,
    view_tx: watch::Sender<View>,
    status_tx: watch::Sender<ConnectionStatus>,
) {
    let session = replica.session_id().to_string();
    debug!(%session, room = %topics.room, "client loop started");

    let mut rng = StdRng::from_entropy();
    let grace = time::sleep(config.bootstrap_grace);
    tokio::pin!(grace);
    let mut bootstrapped = false;
    let mut heartbeat = ticker(config.heartbeat_interval);
    let mut presence = ticker(config.presence_check_interval);

    loop {
        let outbound = tokio::select! {
            incoming = link.recv() => match incoming {
                Ok(packet) => {
                    set_status(&status_tx, ConnectionStatus::Connected);
                    receive(&mut replica, &topics, packet)
                }
                Err(e) => {
                    warn!(%session, "link failed: {e}");
                    set_status(&status_tx, ConnectionStatus::Error);
                    break;
                }
            },

            command = commands.recv() => match command {
                Some(command) => {
                    let now = Utc::now();
                    match command {
                        Command::Join => replica.join(now),
                        Command::Leave => replica.leave(now),
                        Command::Roll => replica.roll(&mut rng, now),
                        Command::Act(kind) => replica.dispatch(kind, now),
                    }
                }
                None => {
                    debug!(%session, "command channel closed, shutting down");
                    link.close();
                    break;
                }
            },

            _ = &mut grace, if !bootstrapped => {
                bootstrapped = true;
                replica.bootstrap_expired(Utc::now())
            }

            _ = heartbeat.tick() => replica.heartbeat(Utc::now()),

            _ = presence.tick() => replica.presence_tick(Utc::now()),
        };

        if !outbound.is_empty() {
            let mut healthy = true;
            for message in outbound {
                if let Err(e) = publish(&mut link, &topics, &message) {
                    warn!(%session, kind = message.kind(), "publish failed: {e}");
                    healthy = false;
                }
            }
            let status = if healthy {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Reconnecting
            };
            set_status(&status_tx, status);
        }
        view_tx.send_if_modified(|view| {
            let next = replica.view();
            if *view == next {
                false
            } else {
                *view = next;
                true
            }
        });
    }

    debug!(%session, "client loop exited");
}

fn set_status(tx: &watch::Sender<ConnectionStatus>, status: ConnectionStatus) {
    tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
}

fn ticker(period: Duration) -> time::Interval {
    let mut interval = time::interval_at(time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

fn receive<S: Scorer>(
    replica: &mut Replica<S>,
    topics: &RoomTopics,
    packet: Packet,
) -> Vec<Message> {
    let Some(channel) = topics.channel_of(&packet.topic) else {
        debug!(topic = %packet.topic, "packet for another room ignored");
        return Vec::new();
    };
    match Message::decode(channel, &packet.payload) {
        Ok(message) => replica.handle(message, Utc::now()),
        Err(e) => {
            warn!(topic = %packet.topic, "dropping malformed message: {e}");
            Vec::new()
        }
    }
}

fn publish<L: Link>(
    link: &mut L,
    topics: &RoomTopics,
    message: &Message,
) -> Result<(), PublishError> {
    let packet = Packet {
        topic: topics.topic(message.channel()).to_string(),
        payload: message.encode()?,
        retain: message.is_retained(),
    };
    link.publish(packet)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum PublishError {
    #[error(transparent)]
    Encode(#[from] MessageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Ask whether anyone is hosting `room`; returns the host's name.
pub async fn probe_room(
    bus: &MemoryBus,
    prefix: &str,
    room: &str,
    wait: Duration,
) -> Result<Option<String>, MessageError> {
    let topics = RoomTopics::new(prefix, room)?;
    let probe_id = format!("probe-{:08x}", rand::random::<u32>());
    let mut link = bus.connect(&probe_id, std::slice::from_ref(&topics.state), None);

    let ping = Message::Control(Control::PingHost {
        sender_id: probe_id.clone(),
    });
    if let Err(e) = publish(&mut link, &topics, &ping) {
        warn!(room = %topics.room, "room probe failed: {e}");
        return Ok(None);
    }

    let answer = time::timeout(wait, async {
        loop {
            let packet = link.recv().await.ok()?;
            if let Ok(Message::Control(Control::PongHost { host_name, .. })) =
                Message::decode(Channel::State, &packet.payload)
            {
                return Some(host_name);
            }
        }
    })
    .await;
    link.close();
    Ok(answer.ok().flatten())
}
