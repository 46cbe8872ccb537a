//! Client side of the relay.
//!
//! The order manager polls its connection synchronously from the game loop,
//! so the socket lives on a small background runtime and the two sides talk
//! over channels. [`Connection::receive`] only drains what has already
//! arrived and never blocks.

use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use skirmish_core::connection::{ClientId, Connection, ConnectionEvent, ConnectionState};
use skirmish_core::error::{GameError, Result as GameResult};
use skirmish_core::order::{Order, OrderPacket};
use skirmish_core::session::Session;
use skirmish_core::settings::LockstepSettings;

use crate::error::{Result, ServerError};
use crate::protocol::{read_frame, write_frame, ClientMessage, ServerMessage, PROTOCOL_VERSION};

#[derive(Debug)]
enum Inbound {
    Event(ConnectionEvent),
    Start { session: Session, order_latency: u32 },
    Closed,
}

/// A [`Connection`] to a [`RelayServer`](crate::relay::RelayServer).
#[derive(Debug)]
pub struct NetworkConnection {
    runtime: Runtime,
    client: ClientId,
    state: ConnectionState,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    /// Events that arrived while waiting for the game to start.
    early: Vec<ConnectionEvent>,
}

impl NetworkConnection {
    /// Connect and join, waiting at most `timeout` for the server's answer.
    pub fn connect(address: &str, name: &str, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("skirmish-net")
            .enable_all()
            .build()?;

        let (mut reader, mut writer, client, heartbeat) = runtime
            .block_on(async { tokio::time::timeout(timeout, handshake(address, name)).await })
            .map_err(|_| ServerError::Timeout("welcome"))??;
        info!(client, address, "Joined relay");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        runtime.spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat.max(Duration::from_millis(10)));
            loop {
                let message = tokio::select! {
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = heartbeat.tick() => ClientMessage::Ping,
                };
                let leaving = message == ClientMessage::Leave;
                if let Err(e) = write_frame(&mut writer, &message).await {
                    debug!(error = %e, "Relay write failed");
                    break;
                }
                if leaving {
                    break;
                }
            }
        });

        runtime.spawn(async move {
            loop {
                let inbound = match read_frame::<_, ServerMessage>(&mut reader).await {
                    Ok(Some(ServerMessage::Start {
                        session,
                        order_latency,
                    })) => Inbound::Start {
                        session,
                        order_latency,
                    },
                    Ok(Some(
                        message @ (ServerMessage::Welcome { .. } | ServerMessage::Rejected { .. }),
                    )) => {
                        warn!(?message, "Unexpected relay message");
                        continue;
                    }
                    Ok(Some(message)) => match message.into_event() {
                        Some(event) => Inbound::Event(event),
                        None => continue,
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Relay read failed");
                        break;
                    }
                };
                if inbound_tx.send(inbound).is_err() {
                    return;
                }
            }
            let _ = inbound_tx.send(Inbound::Closed);
        });

        Ok(Self {
            runtime,
            client,
            state: ConnectionState::WaitingForLeader,
            outbound,
            inbound,
            early: Vec::new(),
        })
    }

    /// Ask the relay to start the game. Only honoured for the host.
    pub fn request_start(&self, session: &Session) -> Result<()> {
        self.outbound
            .send(ClientMessage::StartGame {
                session: session.clone(),
            })
            .map_err(|_| ServerError::Closed)
    }

    /// Block until the relay starts the game, returning the agreed roster and
    /// lockstep settings.
    pub fn wait_for_start(&mut self, timeout: Duration) -> Result<(Session, LockstepSettings)> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let next = self
                .runtime
                .block_on(tokio::time::timeout_at(deadline, self.inbound.recv()))
                .map_err(|_| ServerError::Timeout("game start"))?;
            match next {
                Some(Inbound::Start {
                    session,
                    order_latency,
                }) => {
                    if order_latency == 0 {
                        return Err(ServerError::Protocol(
                            "game started with zero order latency".to_string(),
                        ));
                    }
                    self.state = ConnectionState::Orders;
                    info!(client = self.client, order_latency, "Game started");
                    let settings = LockstepSettings {
                        order_latency,
                        ..LockstepSettings::default()
                    };
                    return Ok((session, settings));
                }
                Some(Inbound::Event(event)) => self.early.push(event),
                Some(Inbound::Closed) | None => {
                    self.state = ConnectionState::Disconnected;
                    return Err(ServerError::Closed);
                }
            }
        }
    }

    /// Leave the game. The relay announces the departure to the others.
    pub fn leave(&mut self) {
        if self.state != ConnectionState::Disconnected {
            let _ = self.outbound.send(ClientMessage::Leave);
            self.state = ConnectionState::Disconnected;
        }
    }

    fn push(&self, message: ClientMessage) -> GameResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| GameError::from(ServerError::Closed))
    }
}

async fn handshake(
    address: &str,
    name: &str,
) -> Result<(OwnedReadHalf, OwnedWriteHalf, ClientId, Duration)> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();
    let hello = ClientMessage::Hello {
        name: name.to_string(),
        version: PROTOCOL_VERSION,
    };
    write_frame(&mut writer, &hello).await?;
    match read_frame::<_, ServerMessage>(&mut reader).await? {
        Some(ServerMessage::Welcome {
            client,
            heartbeat_ms,
        }) => Ok((reader, writer, client, Duration::from_millis(heartbeat_ms))),
        Some(ServerMessage::Rejected { reason }) => Err(ServerError::Rejected(reason)),
        Some(other) => Err(ServerError::Protocol(format!("expected welcome, got {other:?}"))),
        None => Err(ServerError::Closed),
    }
}

impl Drop for NetworkConnection {
    fn drop(&mut self) {
        self.leave();
    }
}

impl Connection for NetworkConnection {
    fn local_client_id(&self) -> ClientId {
        self.client
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn send(&mut self, frame: u32, packet: &OrderPacket) -> GameResult<()> {
        self.push(ClientMessage::Orders {
            frame,
            packet: packet.clone(),
        })
    }

    fn send_immediate(&mut self, orders: &[Order]) -> GameResult<()> {
        self.push(ClientMessage::Immediate {
            orders: orders.to_vec(),
        })
    }

    fn send_sync(&mut self, frame: u32, hash: u64, defeat_state: u64) -> GameResult<()> {
        self.push(ClientMessage::Sync {
            frame,
            hash,
            defeat_state,
        })
    }

    fn receive(&mut self) -> Vec<ConnectionEvent> {
        let mut events = std::mem::take(&mut self.early);
        while let Ok(inbound) = self.inbound.try_recv() {
            match inbound {
                Inbound::Event(event) => events.push(event),
                Inbound::Start { .. } => warn!(client = self.client, "Duplicate game start"),
                Inbound::Closed => {
                    if self.state != ConnectionState::Disconnected {
                        warn!(client = self.client, "Lost connection to relay");
                    }
                    self.state = ConnectionState::Disconnected;
                }
            }
        }
        events
    }
}
