use std::collections::VecDeque;

use crate::connection::{ClientId, Connection, ConnectionEvent, ConnectionState};
use crate::error::Result;
use crate::order::{Order, OrderPacket};

/// Single-player loopback: every packet comes straight back.
#[derive(Debug)]
pub struct EchoConnection {
    client: ClientId,
    inbox: VecDeque<ConnectionEvent>,
}

impl Default for EchoConnection {
    fn default() -> Self {
        Self::new(1)
    }
}

impl EchoConnection {
    /// Loopback for `client`.
    #[must_use]
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            inbox: VecDeque::new(),
        }
    }
}

impl Connection for EchoConnection {
    fn local_client_id(&self) -> ClientId {
        self.client
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Orders
    }

    fn send(&mut self, frame: u32, packet: &OrderPacket) -> Result<()> {
        self.inbox.push_back(ConnectionEvent::Orders {
            client: self.client,
            frame,
            packet: packet.clone(),
        });
        Ok(())
    }

    fn send_immediate(&mut self, orders: &[Order]) -> Result<()> {
        self.inbox.push_back(ConnectionEvent::Immediate {
            client: self.client,
            orders: orders.to_vec(),
        });
        Ok(())
    }

    fn send_sync(&mut self, _frame: u32, _hash: u64, _defeat_state: u64) -> Result<()> {
        Ok(())
    }

    fn receive(&mut self) -> Vec<ConnectionEvent> {
        self.inbox.drain(..).collect()
    }
}
