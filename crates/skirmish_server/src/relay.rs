//! The relay: one hub task owning every client slot, plus a reader and a
//! writer task per socket.
//!
//! Connection tasks never touch shared state. They forward what they read to
//! the hub over an unbounded channel, and the hub pushes outgoing messages
//! into each client's own channel. A client that has not been heard from for
//! longer than the ack timeout is dropped exactly like one that closed its
//! socket: the others get a [`ServerMessage::Disconnect`] for the frame after
//! the last one it sent orders for.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use skirmish_core::connection::ClientId;

use crate::error::Result;
use crate::protocol::{read_frame, write_frame, ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::ServerConfig;

/// Lockstep relay server.
#[derive(Debug)]
pub struct RelayServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl RelayServer {
    /// Validate `config` and bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.socket_address()).await?;
        Ok(Self { listener, config })
    }

    /// Address actually bound, useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the listener fails.
    pub async fn run(self) -> Result<()> {
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        tokio::spawn(Hub::new(self.config.clone()).run(hub_rx));
        info!(address = %self.local_addr()?, "Relay listening");

        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "Accepted connection");
            tokio::spawn(serve_client(stream, peer, hub_tx.clone()));
        }
    }
}

#[derive(Debug)]
enum HubEvent {
    Join {
        name: String,
        version: u32,
        outbound: mpsc::UnboundedSender<ServerMessage>,
        reply: oneshot::Sender<Option<ClientId>>,
    },
    Message {
        client: ClientId,
        message: ClientMessage,
    },
    Left {
        client: ClientId,
    },
}

async fn serve_client(stream: TcpStream, peer: SocketAddr, hub: mpsc::UnboundedSender<HubEvent>) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(%peer, error = %e, "Failed to disable Nagle");
    }
    let (mut reader, mut writer) = stream.into_split();

    let hello = match read_frame::<_, ClientMessage>(&mut reader).await {
        Ok(Some(ClientMessage::Hello { name, version })) => (name, version),
        Ok(Some(other)) => {
            warn!(%peer, message = ?other, "Expected hello");
            return;
        }
        Ok(None) => return,
        Err(e) => {
            warn!(%peer, error = %e, "Failed to read hello");
            return;
        }
    };

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &message).await {
                debug!(%peer, error = %e, "Write failed");
                break;
            }
        }
    });

    let (reply, accepted) = oneshot::channel();
    let join = HubEvent::Join {
        name: hello.0,
        version: hello.1,
        outbound,
        reply,
    };
    if hub.send(join).is_err() {
        return;
    }
    let Ok(Some(client)) = accepted.await else {
        return;
    };

    loop {
        match read_frame::<_, ClientMessage>(&mut reader).await {
            Ok(Some(ClientMessage::Leave)) | Ok(None) => break,
            Ok(Some(message)) => {
                if hub.send(HubEvent::Message { client, message }).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(client, error = %e, "Dropping client after read error");
                break;
            }
        }
    }
    let _ = hub.send(HubEvent::Left { client });
}

#[derive(Debug)]
struct ClientSlot {
    name: String,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    last_frame: u32,
    last_seen: Instant,
}

#[derive(Debug)]
struct Hub {
    config: ServerConfig,
    clients: BTreeMap<ClientId, ClientSlot>,
    next_client: ClientId,
    started: bool,
}

impl Hub {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clients: BTreeMap::new(),
            next_client: 1,
            started: false,
        }
    }

    fn heartbeat(&self) -> Duration {
        (self.config.ack_timeout() / 4).max(Duration::from_millis(10))
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<HubEvent>) {
        let mut deadline_check = tokio::time::interval(self.heartbeat());
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = deadline_check.tick() => self.drop_silent_clients(Instant::now()),
            }
        }
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Join {
                name,
                version,
                outbound,
                reply,
            } => {
                let client = self.join(name, version, outbound);
                let _ = reply.send(client);
            }
            HubEvent::Message { client, message } => self.relay(client, message),
            HubEvent::Left { client } => self.remove(client, "left"),
        }
    }

    fn join(
        &mut self,
        name: String,
        version: u32,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Option<ClientId> {
        let refusal = if version != PROTOCOL_VERSION {
            Some(format!(
                "protocol version {version}, server speaks {PROTOCOL_VERSION}"
            ))
        } else if self.started {
            Some("game already in progress".to_string())
        } else if self.clients.len() >= usize::from(self.config.max_players) {
            Some("server full".to_string())
        } else {
            None
        };
        if let Some(reason) = refusal {
            info!(name = %name, reason = %reason, "Join rejected");
            let _ = outbound.send(ServerMessage::Rejected { reason });
            return None;
        }

        let client = self.next_client;
        self.next_client += 1;
        let heartbeat_ms = u64::try_from(self.heartbeat().as_millis()).unwrap_or(u64::MAX);
        let _ = outbound.send(ServerMessage::Welcome {
            client,
            heartbeat_ms,
        });
        info!(client, name = %name, "Client joined");
        self.clients.insert(
            client,
            ClientSlot {
                name,
                outbound,
                last_frame: 0,
                last_seen: Instant::now(),
            },
        );
        Some(client)
    }

    /// Lowest connected client id; the only one allowed to start the game.
    fn host(&self) -> Option<ClientId> {
        self.clients.keys().next().copied()
    }

    fn relay(&mut self, client: ClientId, message: ClientMessage) {
        let Some(slot) = self.clients.get_mut(&client) else {
            return;
        };
        slot.last_seen = Instant::now();

        match message {
            ClientMessage::Ping => {}
            ClientMessage::StartGame { session } => {
                if self.started || self.host() != Some(client) {
                    warn!(client, "Ignoring start request");
                    return;
                }
                self.started = true;
                let now = Instant::now();
                for slot in self.clients.values_mut() {
                    slot.last_seen = now;
                }
                info!(
                    clients = self.clients.len(),
                    map = %session.map.id,
                    "Game started"
                );
                self.broadcast(
                    &ServerMessage::Start {
                        session,
                        order_latency: self.config.order_latency,
                    },
                    None,
                );
            }
            ClientMessage::Orders { frame, packet } => {
                if !self.started {
                    warn!(client, frame, "Orders before game start");
                    return;
                }
                slot.last_frame = slot.last_frame.max(frame);
                self.broadcast(
                    &ServerMessage::Orders {
                        client,
                        frame,
                        packet,
                    },
                    None,
                );
            }
            ClientMessage::Immediate { orders } => {
                self.broadcast(&ServerMessage::Immediate { client, orders }, None);
            }
            ClientMessage::Sync {
                frame,
                hash,
                defeat_state,
            } => {
                self.broadcast(
                    &ServerMessage::Sync {
                        client,
                        frame,
                        hash,
                        defeat_state,
                    },
                    Some(client),
                );
            }
            ClientMessage::Hello { .. } => warn!(client, "Duplicate hello"),
            ClientMessage::Leave => self.remove(client, "left"),
        }
    }

    fn broadcast(&self, message: &ServerMessage, except: Option<ClientId>) {
        for (&client, slot) in &self.clients {
            if Some(client) != except {
                let _ = slot.outbound.send(message.clone());
            }
        }
    }

    fn remove(&mut self, client: ClientId, reason: &str) {
        let Some(slot) = self.clients.remove(&client) else {
            return;
        };
        let frame = slot.last_frame + 1;
        info!(client, name = %slot.name, frame, reason, "Client disconnected");
        if self.started {
            self.broadcast(&ServerMessage::Disconnect { client, frame }, None);
        }
        if self.clients.is_empty() && self.started {
            info!("Last client gone, back to lobby");
            self.started = false;
        }
    }

    fn drop_silent_clients(&mut self, now: Instant) {
        if !self.started {
            return;
        }
        let timeout = self.config.ack_timeout();
        let silent: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, slot)| now.duration_since(slot.last_seen) > timeout)
            .map(|(&client, _)| client)
            .collect();
        for client in silent {
            warn!(client, timeout_ms = self.config.ack_timeout_ms, "Ack deadline missed");
            self.remove(client, "ack timeout");
        }
    }
}
