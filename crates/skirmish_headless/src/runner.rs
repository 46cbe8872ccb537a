//! Running scenarios to completion.
//!
//! Every client in the session gets its own world and order manager. A solo
//! session loops through an [`EchoConnection`]; anything larger runs its peers
//! over a [`LocalHub`], stepped round-robin on the calling thread, so a local
//! run exercises the same barrier and sync checks as a networked game.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use skirmish_core::connection::{ClientId, Connection, EchoConnection, LocalHub};
use skirmish_core::error::GameError;
use skirmish_core::order_manager::{ChatMessage, OrderManager};
use skirmish_core::replay::{Replay, ReplayHeader, ReplayPlayer, ReplayRecorder};
use skirmish_core::rules::Ruleset;
use skirmish_core::session::WinState;
use skirmish_core::world::World;
use skirmish_server::client::NetworkConnection;
use skirmish_server::ServerError;

use crate::scenario::{Scenario, ScenarioError};

/// Error raised while running a scenario.
#[derive(Error, Debug)]
pub enum RunError {
    /// Scenario could not be loaded or validated.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    /// Simulation or lockstep failure.
    #[error(transparent)]
    Game(#[from] GameError),
    /// Relay connection failure.
    #[error(transparent)]
    Server(#[from] ServerError),
    /// No peer could advance.
    #[error("Lockstep stalled before frame {0}")]
    Stalled(u32),
    /// The session has no client to run.
    #[error("Session has no playable client")]
    NoClients,
}

/// Knobs for a local run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Record the first client's view of the game to this replay file.
    pub record: Option<PathBuf>,
    /// Directory for sync reports written on desync.
    pub sync_report_dir: Option<PathBuf>,
}

/// Final state of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerOutcome {
    /// Display name.
    pub name: String,
    /// Controlling client.
    pub client: Option<ClientId>,
    /// Outcome.
    pub win_state: WinState,
    /// Cash at the end.
    pub cash: i64,
    /// Whether the client left before the end.
    pub disconnected: bool,
}

/// What a run produced. Printed as one JSON line by the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Scenario name.
    pub scenario: String,
    /// Session seed.
    pub seed: u64,
    /// Clients that played.
    pub clients: usize,
    /// Frames executed by the reporting peer.
    pub frames: u32,
    /// Sync hash after the last frame.
    pub final_hash: u64,
    /// Whether every peer still connected ended on the same frame and hash.
    pub peers_agree: bool,
    /// Frame of a detected desync.
    pub desync_frame: Option<u32>,
    /// Orders applied over the whole run.
    pub orders_applied: usize,
    /// Orders dropped over the whole run.
    pub orders_dropped: usize,
    /// Frame-end tasks executed over the whole run.
    pub frame_end_tasks: usize,
    /// Actors alive at the end.
    pub actors: usize,
    /// Chat lines, `client: text`.
    pub chat: Vec<String>,
    /// Per-player outcome in roster order.
    pub players: Vec<PlayerOutcome>,
    /// Replay written, if recording.
    pub replay: Option<PathBuf>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    applied: usize,
    dropped: usize,
    frame_end: usize,
}

impl Totals {
    fn add(&mut self, manager: &OrderManager) {
        if let Some(tick) = manager.last_tick() {
            self.applied += tick.orders_applied;
            self.dropped += tick.orders_dropped;
            self.frame_end += tick.frame_end_tasks;
        }
    }
}

#[derive(Debug)]
struct Peer {
    client: ClientId,
    world: World,
    manager: OrderManager,
    /// Frame count whose scripted orders were issued last.
    scripted: Option<u32>,
    left: bool,
    totals: Totals,
}

impl Peer {
    /// Issue the script for the current frame once, then try to advance.
    fn step(&mut self, scenario: &Scenario, hub: &LocalHub) -> Result<bool, GameError> {
        let frame = self.world.frame();
        if self.scripted != Some(frame) {
            self.scripted = Some(frame);
            if scenario.leaves_at(self.client, frame) {
                info!(client = self.client, frame, "Scripted departure");
                self.manager.finish_recording(&self.world)?;
                hub.disconnect(self.client);
                self.left = true;
                return Ok(false);
            }
            for order in scenario.orders_at(self.client, frame) {
                debug!(client = self.client, frame, order = %order, "Scripted order");
                self.world.issue_order(order);
            }
        }
        let advanced = self.manager.try_tick(&mut self.world)?;
        if advanced {
            self.totals.add(&self.manager);
        }
        Ok(advanced)
    }
}

fn chat_lines(chat: &[ChatMessage]) -> Vec<String> {
    chat.iter().map(|m| format!("{}: {}", m.client, m.text)).collect()
}

fn outcomes(world: &World) -> Vec<PlayerOutcome> {
    world
        .players()
        .iter()
        .map(|p| PlayerOutcome {
            name: p.name.clone(),
            client: p.client_id,
            win_state: p.win_state,
            cash: p.cash,
            disconnected: p.disconnected,
        })
        .collect()
}

fn duration_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs one scenario locally.
#[derive(Debug)]
pub struct ScenarioRunner {
    scenario: Scenario,
    rules: Arc<Ruleset>,
    options: RunOptions,
}

impl ScenarioRunner {
    /// Validate `scenario` and prepare a run.
    pub fn new(scenario: Scenario, options: RunOptions) -> Result<Self, RunError> {
        let rules = scenario.validate()?;
        Ok(Self {
            scenario,
            rules,
            options,
        })
    }

    /// The scenario being run.
    #[must_use]
    pub const fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    fn start_peers(&self, hub: &LocalHub) -> Result<Vec<Peer>, RunError> {
        let session = &self.scenario.session;
        let clients = session.client_ids();
        if clients.is_empty() {
            return Err(RunError::NoClients);
        }
        let mut settings = self.scenario.settings.clone();
        if self.options.sync_report_dir.is_some() {
            settings.sync_report_dir.clone_from(&self.options.sync_report_dir);
        }

        // Attach everyone before anyone starts sending.
        let solo = clients.len() == 1;
        let connections: Vec<(ClientId, Box<dyn Connection>)> = clients
            .iter()
            .map(|&client| -> (ClientId, Box<dyn Connection>) {
                if solo {
                    (client, Box::new(EchoConnection::new(client)))
                } else {
                    (client, Box::new(hub.connect(client)))
                }
            })
            .collect();

        let mut peers = Vec::with_capacity(clients.len());
        for (index, (client, connection)) in connections.into_iter().enumerate() {
            let mut world = World::new(Arc::clone(&self.rules), session, &settings)?;
            let mut manager = OrderManager::new(connection, session, settings.clone());
            if let (0, Some(path)) = (index, &self.options.record) {
                let header = ReplayHeader::new(session.clone(), &settings, client);
                manager = manager.with_recorder(ReplayRecorder::create(path, &header)?);
            }
            manager.start_game(&mut world)?;
            peers.push(Peer {
                client,
                world,
                manager,
                scripted: None,
                left: false,
                totals: Totals::default(),
            });
        }
        Ok(peers)
    }

    /// Run every peer to the scenario's frame count.
    ///
    /// A desync ends the run early and is reported, not returned as an error.
    pub fn run(&self) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let frames = self.scenario.frames;
        let hub = LocalHub::new();
        let mut peers = self.start_peers(&hub)?;
        info!(
            scenario = %self.scenario.name,
            clients = peers.len(),
            frames,
            seed = self.scenario.session.seed,
            "Running scenario"
        );

        let mut desync_frame = None;
        'run: while peers.iter().any(|p| !p.left && p.world.frame() < frames) {
            let mut advanced = false;
            for peer in peers.iter_mut().filter(|p| !p.left && p.world.frame() < frames) {
                match peer.step(&self.scenario, &hub) {
                    Ok(stepped) => advanced |= stepped || peer.left,
                    Err(GameError::DesyncDetected { frame, .. }) => {
                        error!(client = peer.client, frame, "Scenario desynced");
                        desync_frame = Some(frame);
                        break 'run;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if !advanced {
                let frame = peers.iter().map(|p| p.world.frame()).min().unwrap_or(0) + 1;
                return Err(RunError::Stalled(frame));
            }
        }

        for peer in peers.iter_mut().filter(|p| !p.left) {
            peer.manager.finish_recording(&peer.world)?;
        }
        let remaining: Vec<&Peer> = peers.iter().filter(|p| !p.left).collect();
        let reference = peers
            .iter()
            .find(|p| !p.left)
            .or_else(|| peers.first())
            .ok_or(RunError::NoClients)?;
        let peers_agree = desync_frame.is_none()
            && remaining.windows(2).all(|w| {
                w[0].world.frame() == w[1].world.frame()
                    && w[0].world.sync_hash() == w[1].world.sync_hash()
            });

        let report = RunReport {
            scenario: self.scenario.name.clone(),
            seed: self.scenario.session.seed,
            clients: peers.len(),
            frames: reference.world.frame(),
            final_hash: reference.world.sync_hash(),
            peers_agree,
            desync_frame,
            orders_applied: reference.totals.applied,
            orders_dropped: reference.totals.dropped,
            frame_end_tasks: reference.totals.frame_end,
            actors: reference.world.actor_count(),
            chat: chat_lines(reference.manager.chat()),
            players: outcomes(&reference.world),
            replay: self.options.record.clone(),
            duration_ms: duration_ms(started),
        };
        info!(
            frames = report.frames,
            hash = format_args!("{:#018x}", report.final_hash),
            agree = report.peers_agree,
            "Scenario finished"
        );
        Ok(report)
    }
}

/// Outcome of replaying a recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    /// Replay file.
    pub path: PathBuf,
    /// Map the game was played on.
    pub map: String,
    /// Frames recorded.
    pub recorded_frames: u32,
    /// Frames replayed.
    pub frames: u32,
    /// Hash recorded at the end.
    pub recorded_hash: u64,
    /// Hash the replay produced.
    pub final_hash: u64,
    /// Whether the replay reproduced the recording.
    pub verified: bool,
    /// First frame whose hash differs from the recording.
    pub desync_frame: Option<u32>,
    /// Chat lines, `client: text`.
    pub chat: Vec<String>,
}

/// Replay `path` with `rules` and compare against the recorded hashes.
pub fn verify_replay(path: &Path, rules: Arc<Ruleset>) -> Result<ReplayReport, RunError> {
    let replay = Replay::load(path)?;
    let map = replay.header.session.map.id.clone();
    let (recorded_frames, recorded_hash) = (replay.final_frame, replay.final_hash);
    let mut player = ReplayPlayer::new(replay, rules)?;

    let (verified, desync_frame) = match player.verify() {
        Ok(verified) => (verified, None),
        Err(GameError::DesyncDetected { frame, .. }) => (false, Some(frame)),
        Err(e) => return Err(e.into()),
    };
    if verified {
        info!(path = %path.display(), frames = recorded_frames, "Replay verified");
    } else {
        warn!(path = %path.display(), ?desync_frame, "Replay diverged");
    }

    Ok(ReplayReport {
        path: path.to_path_buf(),
        map,
        recorded_frames,
        frames: player.current_frame(),
        recorded_hash,
        final_hash: player.world().sync_hash(),
        verified,
        desync_frame,
        chat: chat_lines(player.manager().chat()),
    })
}

/// Play `scenario` through a relay as the client behind `connection`.
///
/// The host proposes the scenario's session; everyone plays whatever session
/// the relay starts. Orders scripted for the local client are issued on
/// schedule. Fails if no frame executes for `stall_timeout`.
pub fn run_networked(
    scenario: &Scenario,
    mut connection: NetworkConnection,
    host: bool,
    stall_timeout: Duration,
) -> Result<RunReport, RunError> {
    let started = Instant::now();
    let rules = scenario.load_rules()?;
    if host {
        connection.request_start(&scenario.session)?;
    }
    let (session, mut settings) = connection.wait_for_start(stall_timeout)?;
    settings.timestep_ms = scenario.settings.timestep_ms;
    settings.sync_reports = scenario.settings.sync_reports;
    settings.sync_report_dir.clone_from(&scenario.settings.sync_report_dir);

    let client = connection.local_client_id();
    let mut world = World::new(rules, &session, &settings)?;
    let mut manager = OrderManager::new(Box::new(connection), &session, settings);
    manager.start_game(&mut world)?;
    info!(client, map = %session.map.id, frames = scenario.frames, "Joined game");

    let mut totals = Totals::default();
    let mut scripted = None;
    let mut last_progress = Instant::now();
    let mut desync_frame = None;
    while world.frame() < scenario.frames {
        let frame = world.frame();
        if scripted != Some(frame) {
            scripted = Some(frame);
            for order in scenario.orders_at(client, frame) {
                world.issue_order(order);
            }
        }
        match manager.try_tick(&mut world) {
            Ok(true) => {
                totals.add(&manager);
                last_progress = Instant::now();
            }
            Ok(false) => {
                if last_progress.elapsed() > stall_timeout {
                    return Err(RunError::Stalled(frame + 1));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(GameError::DesyncDetected { frame, .. }) => {
                desync_frame = Some(frame);
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(RunReport {
        scenario: scenario.name.clone(),
        seed: session.seed,
        clients: manager.clients().count(),
        frames: world.frame(),
        final_hash: world.sync_hash(),
        peers_agree: desync_frame.is_none(),
        desync_frame,
        orders_applied: totals.applied,
        orders_dropped: totals.dropped,
        frame_end_tasks: totals.frame_end,
        actors: world.actor_count(),
        chat: chat_lines(manager.chat()),
        players: outcomes(&world),
        replay: None,
        duration_ms: duration_ms(started),
    })
}
