use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::connection::{ClientId, Connection, ConnectionEvent, ConnectionState};
use crate::error::{GameError, Result};
use crate::order::{Order, OrderPacket};

#[derive(Debug, Default)]
struct HubState {
    inboxes: BTreeMap<ClientId, VecDeque<ConnectionEvent>>,
    last_frame: BTreeMap<ClientId, u32>,
}

impl HubState {
    fn broadcast(&mut self, event: &ConnectionEvent, except: Option<ClientId>) {
        for (&client, inbox) in &mut self.inboxes {
            if Some(client) != except {
                inbox.push_back(event.clone());
            }
        }
    }
}

/// In-process relay connecting several peers, for local multiplayer and
/// tests. Behaves like the network relay without sockets.
#[derive(Debug, Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// An empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a client.
    #[must_use]
    pub fn connect(&self, client: ClientId) -> HubConnection {
        let mut state = self.lock();
        state.inboxes.insert(client, VecDeque::new());
        state.last_frame.insert(client, 0);
        HubConnection {
            client,
            hub: self.clone(),
        }
    }

    /// Drop a client. The others learn that it contributes nothing from the
    /// frame after the last one it sent.
    pub fn disconnect(&self, client: ClientId) {
        let mut state = self.lock();
        if state.inboxes.remove(&client).is_none() {
            return;
        }
        let frame = state.last_frame.remove(&client).unwrap_or(0) + 1;
        info!(client, frame, "Hub client disconnected");
        state.broadcast(&ConnectionEvent::Disconnect { client, frame }, None);
    }

    /// Whether `client` is attached.
    #[must_use]
    pub fn is_connected(&self, client: ClientId) -> bool {
        self.lock().inboxes.contains_key(&client)
    }
}

/// One peer's end of a [`LocalHub`].
#[derive(Debug)]
pub struct HubConnection {
    client: ClientId,
    hub: LocalHub,
}

impl HubConnection {
    fn closed(&self) -> GameError {
        GameError::Protocol(format!("client {} is not connected", self.client))
    }
}

impl Connection for HubConnection {
    fn local_client_id(&self) -> ClientId {
        self.client
    }

    fn state(&self) -> ConnectionState {
        if self.hub.is_connected(self.client) {
            ConnectionState::Orders
        } else {
            ConnectionState::Disconnected
        }
    }

    fn send(&mut self, frame: u32, packet: &OrderPacket) -> Result<()> {
        let mut state = self.hub.lock();
        if !state.inboxes.contains_key(&self.client) {
            return Err(self.closed());
        }
        state.last_frame.insert(self.client, frame);
        let event = ConnectionEvent::Orders {
            client: self.client,
            frame,
            packet: packet.clone(),
        };
        state.broadcast(&event, None);
        Ok(())
    }

    fn send_immediate(&mut self, orders: &[Order]) -> Result<()> {
        let mut state = self.hub.lock();
        if !state.inboxes.contains_key(&self.client) {
            return Err(self.closed());
        }
        let event = ConnectionEvent::Immediate {
            client: self.client,
            orders: orders.to_vec(),
        };
        state.broadcast(&event, None);
        Ok(())
    }

    fn send_sync(&mut self, frame: u32, hash: u64, defeat_state: u64) -> Result<()> {
        let mut state = self.hub.lock();
        if !state.inboxes.contains_key(&self.client) {
            return Err(self.closed());
        }
        let event = ConnectionEvent::Sync {
            client: self.client,
            frame,
            hash,
            defeat_state,
        };
        state.broadcast(&event, Some(self.client));
        Ok(())
    }

    fn receive(&mut self) -> Vec<ConnectionEvent> {
        self.hub
            .lock()
            .inboxes
            .get_mut(&self.client)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }
}
