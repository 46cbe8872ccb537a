//! Relay wire protocol.
//!
//! Every message is one frame: a little-endian `u32` payload length followed
//! by the bincode payload.
//!
//! ```text
//! client                       server
//!   Hello { name }       ->
//!                        <-    Welcome { client, heartbeat_ms } | Rejected { reason }
//!   StartGame { session } ->                        (first client only)
//!                        <-    Start { session, order_latency }
//!   Orders / Immediate / Sync  <->  relayed with the sender's id
//!   Ping                 ->                        (while otherwise silent)
//!                        <-    Disconnect { client, frame }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use skirmish_core::connection::{ClientId, ConnectionEvent};
use skirmish_core::order::{Order, OrderPacket};
use skirmish_core::session::Session;

use crate::error::{Result, ServerError};

/// Relay protocol version; a mismatching client is rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Join request.
    Hello {
        /// Display name.
        name: String,
        /// [`PROTOCOL_VERSION`] of the client.
        version: u32,
    },
    /// Start the game with this roster. Only the first client may send it.
    StartGame {
        /// Map, players and seed.
        session: Session,
    },
    /// Orders for one frame.
    Orders {
        /// Frame the orders apply to.
        frame: u32,
        /// The orders.
        packet: OrderPacket,
    },
    /// Orders to apply on arrival.
    Immediate {
        /// The orders.
        orders: Vec<Order>,
    },
    /// State hash after a frame.
    Sync {
        /// Frame.
        frame: u32,
        /// World sync hash.
        hash: u64,
        /// Defeated-player bitmask.
        defeat_state: u64,
    },
    /// Keepalive while blocked on the frame barrier.
    Ping,
    /// Orderly departure.
    Leave,
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Join accepted.
    Welcome {
        /// Id assigned to the client.
        client: ClientId,
        /// Interval at which the client must ping while otherwise silent.
        heartbeat_ms: u64,
    },
    /// Join refused.
    Rejected {
        /// Why.
        reason: String,
    },
    /// The game begins.
    Start {
        /// Map, players and seed chosen by the host.
        session: Session,
        /// Order latency every client must use.
        order_latency: u32,
    },
    /// Relayed orders.
    Orders {
        /// Sender.
        client: ClientId,
        /// Frame the orders apply to.
        frame: u32,
        /// The orders.
        packet: OrderPacket,
    },
    /// Relayed immediate orders.
    Immediate {
        /// Sender.
        client: ClientId,
        /// The orders.
        orders: Vec<Order>,
    },
    /// Relayed sync hash.
    Sync {
        /// Sender.
        client: ClientId,
        /// Frame.
        frame: u32,
        /// World sync hash.
        hash: u64,
        /// Defeated-player bitmask.
        defeat_state: u64,
    },
    /// A client is gone and contributes nothing from `frame` onward.
    Disconnect {
        /// Departed client.
        client: ClientId,
        /// First frame without orders from the client.
        frame: u32,
    },
}

impl ServerMessage {
    /// The lockstep event this message carries, if any.
    #[must_use]
    pub fn into_event(self) -> Option<ConnectionEvent> {
        match self {
            Self::Orders {
                client,
                frame,
                packet,
            } => Some(ConnectionEvent::Orders {
                client,
                frame,
                packet,
            }),
            Self::Immediate { client, orders } => Some(ConnectionEvent::Immediate { client, orders }),
            Self::Sync {
                client,
                frame,
                hash,
                defeat_state,
            } => Some(ConnectionEvent::Sync {
                client,
                frame,
                hash,
                defeat_state,
            }),
            Self::Disconnect { client, frame } => Some(ConnectionEvent::Disconnect { client, frame }),
            Self::Welcome { .. } | Self::Rejected { .. } | Self::Start { .. } => None,
        }
    }
}

/// Write one frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_LEN)
        .ok_or_else(|| ServerError::Protocol(format!("frame of {} bytes too large", payload.len())))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len);
    if len > MAX_FRAME_LEN {
        return Err(ServerError::Protocol(format!("frame of {len} bytes too large")));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(bincode::deserialize(&payload)?))
}
