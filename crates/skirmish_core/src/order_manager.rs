//! The lockstep barrier.
//!
//! The order manager sits between a [`Connection`] and the [`World`]. Orders
//! issued locally while frame `N` executes are sent for frame
//! `N + order_latency`. Frame `N` itself only executes once an order packet
//! for `N` is buffered from every expected client; a client that disconnected
//! counts as sending empty packets from its disconnect frame onward.
//!
//! After every frame the local sync hash is compared with the hashes peers
//! report for the same frame. A mismatch is terminal: the manager refuses to
//! advance any further and every later call returns the same
//! [`GameError::DesyncDetected`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::connection::{ClientId, Connection, ConnectionEvent, ConnectionState};
use crate::error::{GameError, Result};
use crate::order::{ClientOrder, Order, OrderPacket, CHAT, MAX_CHAT_LENGTH, PAUSE_GAME};
use crate::replay::{ReplayRecord, ReplayRecorder};
use crate::session::Session;
use crate::settings::LockstepSettings;
use crate::sync_report::SyncReport;
use crate::world::{TickReport, World};

/// Frames of sync hashes kept for comparison with late peers.
pub const SYNC_RETENTION_FRAMES: u32 = 128;

/// A chat line received as an immediate order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Sender.
    pub client: ClientId,
    /// Text, capped at [`MAX_CHAT_LENGTH`] characters.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameSync {
    client: ClientId,
    hash: u64,
    defeat_state: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutOfSync {
    frame: u32,
    local_hash: u64,
    remote_hash: u64,
}

impl OutOfSync {
    const fn error(self) -> GameError {
        GameError::DesyncDetected {
            frame: self.frame,
            local_hash: self.local_hash,
            remote_hash: self.remote_hash,
        }
    }
}

/// Drives a [`World`] under the lockstep protocol.
#[derive(Debug)]
pub struct OrderManager {
    connection: Box<dyn Connection>,
    settings: LockstepSettings,
    clients: BTreeSet<ClientId>,
    pending: BTreeMap<ClientId, BTreeMap<u32, OrderPacket>>,
    disconnected: BTreeMap<ClientId, u32>,
    sync_for_frame: BTreeMap<u32, FrameSync>,
    local_orders: Vec<Order>,
    started: bool,
    out_of_sync: Option<OutOfSync>,
    chat: Vec<ChatMessage>,
    sync_report: SyncReport,
    recorder: Option<ReplayRecorder>,
    last_tick: Option<TickReport>,
}

impl OrderManager {
    /// A manager expecting orders from every client in `session`.
    #[must_use]
    pub fn new(connection: Box<dyn Connection>, session: &Session, settings: LockstepSettings) -> Self {
        let clients: BTreeSet<ClientId> = session.client_ids().into_iter().collect();
        let pending = clients.iter().map(|&c| (c, BTreeMap::new())).collect();
        Self {
            connection,
            settings,
            clients,
            pending,
            disconnected: BTreeMap::new(),
            sync_for_frame: BTreeMap::new(),
            local_orders: Vec::new(),
            started: false,
            out_of_sync: None,
            chat: Vec::new(),
            sync_report: SyncReport::new(),
            recorder: None,
            last_tick: None,
        }
    }

    /// Record every consumed input into `recorder`.
    #[must_use]
    pub fn with_recorder(mut self, recorder: ReplayRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Open the barrier: bind the world to the local client and send empty
    /// packets for the first `order_latency` frames.
    ///
    /// Fails on settings that could never open the barrier, such as an
    /// `order_latency` of zero.
    pub fn start_game(&mut self, world: &mut World) -> Result<()> {
        if self.started {
            return Err(GameError::InvalidState("game already started".to_string()));
        }
        self.settings.validate()?;
        let local = self.connection.local_client_id();
        world.set_local_client(Some(local));

        if self.sends_orders() {
            for frame in 1..=self.settings.order_latency {
                self.connection.send(world.frame() + frame, &OrderPacket::empty())?;
            }
        }
        self.started = true;
        info!(
            client = local,
            peers = self.clients.len(),
            latency = self.settings.order_latency,
            replay = self.connection.is_replay(),
            "Game started"
        );
        Ok(())
    }

    fn sends_orders(&self) -> bool {
        !self.connection.is_replay() && self.clients.contains(&self.connection.local_client_id())
    }

    /// Try to execute the next frame.
    ///
    /// Returns `Ok(true)` if a frame ran and `Ok(false)` if the barrier is
    /// closed, the game is paused or the connection is gone.
    pub fn try_tick(&mut self, world: &mut World) -> Result<bool> {
        if let Some(out_of_sync) = self.out_of_sync {
            return Err(out_of_sync.error());
        }
        if !self.started {
            return Err(GameError::InvalidState("game not started".to_string()));
        }

        self.flush_immediate(world)?;
        self.receive(world)?;

        if world.is_paused() || self.connection.state() == ConnectionState::Disconnected {
            return Ok(false);
        }

        let frame = world.frame() + 1;
        if !self.is_ready_for_frame(frame) {
            return Ok(false);
        }

        self.send_orders(frame)?;
        self.process_frame(world, frame)?;
        Ok(true)
    }

    /// Whether every expected client's orders for `frame` are buffered.
    #[must_use]
    pub fn is_ready_for_frame(&self, frame: u32) -> bool {
        self.clients.iter().all(|client| {
            self.disconnected.get(client).is_some_and(|&d| d <= frame)
                || self
                    .pending
                    .get(client)
                    .is_some_and(|frames| frames.contains_key(&frame))
        })
    }

    /// Clients whose orders for `frame` are still missing.
    #[must_use]
    pub fn missing_clients(&self, frame: u32) -> Vec<ClientId> {
        self.clients
            .iter()
            .copied()
            .filter(|client| {
                !self.disconnected.get(client).is_some_and(|&d| d <= frame)
                    && !self
                        .pending
                        .get(client)
                        .is_some_and(|frames| frames.contains_key(&frame))
            })
            .collect()
    }

    fn flush_immediate(&mut self, world: &mut World) -> Result<()> {
        let (immediate, queued): (Vec<Order>, Vec<Order>) = world
            .take_issued_orders()
            .into_iter()
            .partition(|o| o.is_immediate);
        self.local_orders.extend(queued);
        if !immediate.is_empty() && !self.connection.is_replay() {
            self.connection.send_immediate(&immediate)?;
        }
        Ok(())
    }

    fn send_orders(&mut self, frame: u32) -> Result<()> {
        let orders = std::mem::take(&mut self.local_orders);
        if !self.sends_orders() {
            return Ok(());
        }
        let target = frame + self.settings.order_latency;
        self.connection.send(target, &OrderPacket::new(orders))
    }

    fn receive(&mut self, world: &mut World) -> Result<()> {
        for event in self.connection.receive() {
            match event {
                ConnectionEvent::Orders {
                    client,
                    frame,
                    packet,
                } => self.buffer_packet(world, client, frame, packet),
                ConnectionEvent::Immediate { client, orders } => {
                    self.process_immediate(world, client, &orders)?;
                }
                ConnectionEvent::Sync {
                    client,
                    frame,
                    hash,
                    defeat_state,
                } => {
                    if client != self.connection.local_client_id() {
                        self.check_sync(
                            frame,
                            FrameSync {
                                client,
                                hash,
                                defeat_state,
                            },
                        )?;
                    }
                }
                ConnectionEvent::Disconnect { client, frame } => {
                    self.receive_disconnect(world, client, frame);
                }
            }
        }
        Ok(())
    }

    fn buffer_packet(&mut self, world: &World, client: ClientId, frame: u32, packet: OrderPacket) {
        let Some(frames) = self.pending.get_mut(&client) else {
            warn!(client, frame, "Discarding orders from unknown client");
            return;
        };
        if frame <= world.frame() {
            warn!(
                client,
                frame,
                current = world.frame(),
                "Discarding orders for a frame already applied"
            );
            return;
        }
        if self.disconnected.get(&client).is_some_and(|&d| d <= frame) {
            warn!(client, frame, "Discarding orders sent after disconnect");
            return;
        }
        if frames.contains_key(&frame) {
            warn!(client, frame, "Discarding duplicate orders");
            return;
        }
        frames.insert(frame, packet);
    }

    fn receive_disconnect(&mut self, world: &World, client: ClientId, frame: u32) {
        if !self.clients.contains(&client) || self.disconnected.contains_key(&client) {
            return;
        }
        let next = world.frame() + 1;
        let frame = if frame < next {
            warn!(client, frame, next, "Disconnect notice arrived late");
            next
        } else {
            frame
        };
        info!(client, frame, "Client disconnected");
        self.disconnected.insert(client, frame);
    }

    fn process_immediate(&mut self, world: &mut World, client: ClientId, orders: &[Order]) -> Result<()> {
        for order in orders {
            match order.order_string.as_str() {
                CHAT => {
                    let text: String = order
                        .target_string
                        .as_deref()
                        .unwrap_or_default()
                        .chars()
                        .take(MAX_CHAT_LENGTH)
                        .collect();
                    info!(client, text = %text, "Chat");
                    self.chat.push(ChatMessage { client, text });
                }
                PAUSE_GAME => {
                    if !self.connection.is_replay() {
                        let paused = order.is_pause_request();
                        info!(client, paused, "Pause toggled");
                        world.set_paused(paused);
                    }
                }
                other => debug!(client, order = other, "Ignoring immediate order"),
            }
        }
        self.record(&ReplayRecord::Immediate {
            frame: world.frame() + 1,
            client,
            orders: orders.to_vec(),
        })
    }

    fn process_frame(&mut self, world: &mut World, frame: u32) -> Result<()> {
        let mut frame_orders = Vec::new();
        let clients: Vec<ClientId> = self.clients.iter().copied().collect();
        for client in clients {
            if self.disconnected.get(&client) == Some(&frame) {
                world.on_client_disconnected(client);
                self.record(&ReplayRecord::Disconnect { frame, client })?;
            }
            let packet = self
                .pending
                .get_mut(&client)
                .and_then(|frames| frames.remove(&frame));
            if let Some(packet) = packet {
                self.record(&ReplayRecord::Orders {
                    frame,
                    client,
                    packet: packet.clone(),
                })?;
                frame_orders.extend(
                    packet
                        .orders
                        .into_iter()
                        .map(|order| ClientOrder { client, order }),
                );
            }
        }

        world.receive_frame_orders(frame_orders);
        let report = world.tick();
        self.last_tick = Some(report);

        let local = FrameSync {
            client: self.connection.local_client_id(),
            hash: report.sync_hash,
            defeat_state: world.defeat_state(),
        };
        if self.settings.sync_reports {
            self.sync_report.update(world.frame_report());
        }
        self.record(&ReplayRecord::Sync {
            frame,
            client: local.client,
            hash: local.hash,
            defeat_state: local.defeat_state,
        })?;
        if !self.connection.is_replay() {
            self.connection
                .send_sync(frame, local.hash, local.defeat_state)?;
        }
        self.check_sync(frame, local)?;

        let horizon = frame.saturating_sub(SYNC_RETENTION_FRAMES);
        self.sync_for_frame = self.sync_for_frame.split_off(&horizon);
        Ok(())
    }

    fn check_sync(&mut self, frame: u32, sync: FrameSync) -> Result<()> {
        let Some(&known) = self.sync_for_frame.get(&frame) else {
            self.sync_for_frame.insert(frame, sync);
            return Ok(());
        };
        if known.hash == sync.hash && known.defeat_state == sync.defeat_state {
            return Ok(());
        }

        let local_client = self.connection.local_client_id();
        let (local, remote) = if sync.client == local_client {
            (sync, known)
        } else {
            (known, sync)
        };
        let out_of_sync = OutOfSync {
            frame,
            local_hash: local.hash,
            remote_hash: remote.hash,
        };
        error!(
            frame,
            local_client = local.client,
            remote_client = remote.client,
            local_hash = %format_args!("{:#018x}", local.hash),
            remote_hash = %format_args!("{:#018x}", remote.hash),
            local_defeat = local.defeat_state,
            remote_defeat = remote.defeat_state,
            "Out of sync"
        );
        self.out_of_sync = Some(out_of_sync);
        self.dump_sync_report(frame);
        Err(out_of_sync.error())
    }

    fn dump_sync_report(&self, frame: u32) {
        let Some(dir) = &self.settings.sync_report_dir else {
            return;
        };
        let Some(text) = self.sync_report.dump(frame) else {
            warn!(frame, "No sync report held for desynced frame");
            return;
        };
        let path = dir.join(format!(
            "syncreport-{}-{frame}.txt",
            self.connection.local_client_id()
        ));
        match write_report(&path, &text) {
            Ok(()) => info!(path = %path.display(), "Sync report written"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write sync report"),
        }
    }

    fn record(&mut self, record: &ReplayRecord) -> Result<()> {
        match &mut self.recorder {
            Some(recorder) => recorder.record(record),
            None => Ok(()),
        }
    }

    /// Write the end record of the replay, if recording.
    pub fn finish_recording(&mut self, world: &World) -> Result<()> {
        if let Some(recorder) = &mut self.recorder {
            if !recorder.is_finished() {
                recorder.finish(world.frame(), world.sync_hash())?;
            }
        }
        Ok(())
    }

    /// State of the underlying connection.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Client id of this end.
    #[must_use]
    pub fn local_client_id(&self) -> ClientId {
        self.connection.local_client_id()
    }

    /// Whether the game has been started.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Frame of the detected desync, if any.
    #[must_use]
    pub fn out_of_sync_frame(&self) -> Option<u32> {
        self.out_of_sync.map(|o| o.frame)
    }

    /// Chat received so far.
    #[must_use]
    pub fn chat(&self) -> &[ChatMessage] {
        &self.chat
    }

    /// Recent per-frame sync reports.
    #[must_use]
    pub const fn sync_report(&self) -> &SyncReport {
        &self.sync_report
    }

    /// Report of the last executed frame.
    #[must_use]
    pub const fn last_tick(&self) -> Option<TickReport> {
        self.last_tick
    }

    /// Expected clients, ascending.
    pub fn clients(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.clients.iter().copied()
    }

    /// Disconnected clients and the first frame they miss.
    #[must_use]
    pub const fn disconnected(&self) -> &BTreeMap<ClientId, u32> {
        &self.disconnected
    }

    /// Lockstep settings in use.
    #[must_use]
    pub const fn settings(&self) -> &LockstepSettings {
        &self.settings
    }
}

fn write_report(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}
