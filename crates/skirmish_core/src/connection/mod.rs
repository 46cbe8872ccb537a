//! Transports feeding the order manager.
//!
//! A [`Connection`] carries order packets, immediate orders, sync hashes and
//! disconnect notices between peers. Order packets are delivered to every
//! client *including the sender*, so the order manager treats its own orders
//! exactly like a peer's. Sync hashes go to the other clients only.
//!
//! Implementations:
//! - [`EchoConnection`]: single player, loops everything back.
//! - [`LocalHub`]/[`HubConnection`]: several peers in one process.
//! - [`ReplayConnection`](crate::replay::ReplayConnection): plays a recording.
//! - `NetworkConnection` in `skirmish_server`: TCP relay client.

mod echo;
mod hub;

pub use echo::EchoConnection;
pub use hub::{HubConnection, LocalHub};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::order::{Order, OrderPacket};

/// Identifier of a connected client, assigned by the host.
pub type ClientId = u32;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Handshake in progress.
    #[default]
    Connecting,
    /// Joined, waiting for the host to start the game.
    WaitingForLeader,
    /// Exchanging orders.
    Orders,
    /// Closed or lost.
    Disconnected,
}

/// Something that arrived from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// A client's orders for one frame.
    Orders {
        /// Sender.
        client: ClientId,
        /// Frame the orders apply to.
        frame: u32,
        /// The orders; may be empty.
        packet: OrderPacket,
    },
    /// Orders to apply on arrival.
    Immediate {
        /// Sender.
        client: ClientId,
        /// The orders.
        orders: Vec<Order>,
    },
    /// A client's state hash after a frame.
    Sync {
        /// Sender.
        client: ClientId,
        /// Frame the hash was taken after.
        frame: u32,
        /// World sync hash.
        hash: u64,
        /// Defeated-player bitmask.
        defeat_state: u64,
    },
    /// A client left. It contributes empty order sets from `frame` onward.
    Disconnect {
        /// Departed client.
        client: ClientId,
        /// First frame without orders from the client.
        frame: u32,
    },
}

/// Transport used by the order manager.
pub trait Connection: Send + std::fmt::Debug {
    /// Id of the client running this end.
    fn local_client_id(&self) -> ClientId;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Whether this plays back a recording.
    fn is_replay(&self) -> bool {
        false
    }

    /// Broadcast our orders for `frame` to every client, ourselves included.
    fn send(&mut self, frame: u32, packet: &OrderPacket) -> Result<()>;

    /// Broadcast orders that bypass the frame buffer.
    fn send_immediate(&mut self, orders: &[Order]) -> Result<()>;

    /// Report our state hash after `frame` to the other clients.
    fn send_sync(&mut self, frame: u32, hash: u64, defeat_state: u64) -> Result<()>;

    /// Take everything that arrived since the last call.
    fn receive(&mut self) -> Vec<ConnectionEvent>;
}
