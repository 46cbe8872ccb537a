//! Replay recording and playback.
//!
//! A replay is the session header plus the exact stream of lockstep inputs
//! the order manager consumed: every client's order packet per frame,
//! immediate orders, disconnect notices and the local sync hash of every
//! frame. Playing it back through a [`ReplayConnection`] reproduces the
//! original sequence of [`World::tick`] calls, and the recorded hashes turn
//! any divergence into a desync error.
//!
//! # File layout
//!
//! ```text
//! "SKRP" | version: u32 LE | len: u32 LE | header | (len: u32 LE | record)*
//! ```
//!
//! Header and records are bincode. The last record is always
//! [`ReplayRecord::End`]; a file without one is truncated.

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::connection::{ClientId, Connection, ConnectionEvent, ConnectionState};
use crate::error::{GameError, Result};
use crate::order::{Order, OrderPacket};
use crate::order_manager::OrderManager;
use crate::rules::Ruleset;
use crate::session::Session;
use crate::settings::LockstepSettings;
use crate::world::World;

/// Replay file format version for compatibility.
pub const REPLAY_VERSION: u32 = 1;

/// Leading bytes of every replay file.
pub const REPLAY_MAGIC: &[u8; 4] = b"SKRP";

/// Client id used when watching a replay.
pub const OBSERVER_CLIENT: ClientId = 0;

/// Everything needed to rebuild the initial world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayHeader {
    /// Map, roster and seed.
    pub session: Session,
    /// Order latency the game ran with.
    pub order_latency: u32,
    /// Frame duration the game ran with.
    pub timestep_ms: u32,
    /// Client that recorded the replay.
    pub recorded_by: ClientId,
}

impl ReplayHeader {
    /// Header for a game run with `settings`.
    #[must_use]
    pub fn new(session: Session, settings: &LockstepSettings, recorded_by: ClientId) -> Self {
        Self {
            session,
            order_latency: settings.order_latency,
            timestep_ms: settings.timestep_ms,
            recorded_by,
        }
    }
}

/// One entry of the recorded input stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayRecord {
    /// A client's orders, applied on `frame`.
    Orders {
        /// Frame.
        frame: u32,
        /// Issuing client.
        client: ClientId,
        /// The orders.
        packet: OrderPacket,
    },
    /// Immediate orders received before `frame` executed.
    Immediate {
        /// Next frame at arrival.
        frame: u32,
        /// Issuing client.
        client: ClientId,
        /// The orders.
        orders: Vec<Order>,
    },
    /// Sync hash after `frame`.
    Sync {
        /// Frame.
        frame: u32,
        /// Reporting client.
        client: ClientId,
        /// World sync hash.
        hash: u64,
        /// Defeated-player bitmask.
        defeat_state: u64,
    },
    /// A client contributes nothing from `frame` on.
    Disconnect {
        /// Frame.
        frame: u32,
        /// Departed client.
        client: ClientId,
    },
    /// Final record.
    End {
        /// Last executed frame.
        final_frame: u32,
        /// Sync hash after the last frame.
        final_hash: u64,
    },
}

fn write_chunk<W: Write + ?Sized, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| GameError::InvalidState("replay record too large".to_string()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;
    Ok(())
}

/// Append-only replay writer.
pub struct ReplayRecorder {
    writer: Box<dyn Write + Send>,
    records: usize,
    finished: bool,
}

impl std::fmt::Debug for ReplayRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayRecorder")
            .field("records", &self.records)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ReplayRecorder {
    /// Start a replay on `writer`.
    pub fn new(mut writer: Box<dyn Write + Send>, header: &ReplayHeader) -> Result<Self> {
        writer.write_all(REPLAY_MAGIC)?;
        writer.write_all(&REPLAY_VERSION.to_le_bytes())?;
        write_chunk(&mut writer, header)?;
        Ok(Self {
            writer,
            records: 0,
            finished: false,
        })
    }

    /// Start a replay file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, header: &ReplayHeader) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Recording replay");
        Self::new(Box::new(BufWriter::new(file)), header)
    }

    /// Append one record.
    pub fn record(&mut self, record: &ReplayRecord) -> Result<()> {
        if self.finished {
            return Err(GameError::InvalidState(
                "replay already finished".to_string(),
            ));
        }
        write_chunk(&mut self.writer, record)?;
        self.records += 1;
        Ok(())
    }

    /// Write the end record and flush.
    pub fn finish(&mut self, final_frame: u32, final_hash: u64) -> Result<()> {
        self.record(&ReplayRecord::End {
            final_frame,
            final_hash,
        })?;
        self.finished = true;
        self.writer.flush()?;
        debug!(records = self.records, final_frame, "Replay finished");
        Ok(())
    }

    /// Records written so far, including the end record.
    #[must_use]
    pub const fn record_count(&self) -> usize {
        self.records
    }

    /// Whether the end record was written.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}

/// A fully loaded replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replay {
    /// Session header.
    pub header: ReplayHeader,
    /// Input stream, without the end record.
    pub records: Vec<ReplayRecord>,
    /// Last executed frame.
    pub final_frame: u32,
    /// Sync hash after the last frame.
    pub final_hash: u64,
}

struct ChunkReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ChunkReader<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(GameError::ReplayTruncated(format!(
                "{what} at byte {} needs {len} bytes, {} left",
                self.offset,
                self.bytes.len() - self.offset
            )));
        };
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn chunk<T: for<'de> Deserialize<'de>>(&mut self, what: &str) -> Result<T> {
        let len = self.u32(what)? as usize;
        let at = self.offset;
        let bytes = self.take(len, what)?;
        bincode::deserialize(bytes)
            .map_err(|e| GameError::ReplayCorrupt(format!("{what} at byte {at}: {e}")))
    }
}

impl Replay {
    /// Parse a replay from raw bytes. No partial results: any damage fails.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ChunkReader { bytes, offset: 0 };

        let magic = reader.take(4, "magic")?;
        if magic != REPLAY_MAGIC {
            return Err(GameError::ReplayCorrupt("not a replay file".to_string()));
        }
        let version = reader.u32("version")?;
        if version != REPLAY_VERSION {
            return Err(GameError::ReplayVersion {
                expected: REPLAY_VERSION,
                found: version,
            });
        }
        let header: ReplayHeader = reader.chunk("header")?;

        let mut records = Vec::new();
        loop {
            if reader.is_empty() {
                return Err(GameError::ReplayTruncated(format!(
                    "missing end record after {} records",
                    records.len()
                )));
            }
            match reader.chunk("record")? {
                ReplayRecord::End {
                    final_frame,
                    final_hash,
                } => {
                    if !reader.is_empty() {
                        return Err(GameError::ReplayCorrupt(
                            "data after end record".to_string(),
                        ));
                    }
                    return Ok(Self {
                        header,
                        records,
                        final_frame,
                        final_hash,
                    });
                }
                record => records.push(record),
            }
        }
    }

    /// Read a replay from `reader`.
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    /// Load a replay file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read(File::open(path.as_ref())?)
    }

    /// Recorded sync hashes of the recording client, by frame.
    #[must_use]
    pub fn sync_hashes(&self) -> BTreeMap<u32, u64> {
        self.records
            .iter()
            .filter_map(|r| match r {
                ReplayRecord::Sync {
                    frame,
                    client,
                    hash,
                    ..
                } if *client == self.header.recorded_by => Some((*frame, *hash)),
                _ => None,
            })
            .collect()
    }

    /// Number of order packets recorded.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(r, ReplayRecord::Orders { .. }))
            .count()
    }

    /// Settings reproducing the recorded game.
    #[must_use]
    pub fn settings(&self) -> LockstepSettings {
        LockstepSettings {
            order_latency: self.header.order_latency,
            timestep_ms: self.header.timestep_ms,
            ..LockstepSettings::default()
        }
    }
}

/// Feeds a recording to the order manager in place of live peers.
#[derive(Debug)]
pub struct ReplayConnection {
    events: VecDeque<ConnectionEvent>,
}

impl ReplayConnection {
    /// Queue every record of `replay`.
    #[must_use]
    pub fn new(replay: &Replay) -> Self {
        let events = replay
            .records
            .iter()
            .filter_map(|record| match record {
                ReplayRecord::Orders {
                    frame,
                    client,
                    packet,
                } => Some(ConnectionEvent::Orders {
                    client: *client,
                    frame: *frame,
                    packet: packet.clone(),
                }),
                ReplayRecord::Immediate { client, orders, .. } => {
                    Some(ConnectionEvent::Immediate {
                        client: *client,
                        orders: orders.clone(),
                    })
                }
                ReplayRecord::Sync {
                    frame,
                    client,
                    hash,
                    defeat_state,
                } => Some(ConnectionEvent::Sync {
                    client: *client,
                    frame: *frame,
                    hash: *hash,
                    defeat_state: *defeat_state,
                }),
                ReplayRecord::Disconnect { frame, client } => Some(ConnectionEvent::Disconnect {
                    client: *client,
                    frame: *frame,
                }),
                ReplayRecord::End { .. } => None,
            })
            .collect();
        Self { events }
    }
}

impl Connection for ReplayConnection {
    fn local_client_id(&self) -> ClientId {
        OBSERVER_CLIENT
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Orders
    }

    fn is_replay(&self) -> bool {
        true
    }

    fn send(&mut self, _frame: u32, _packet: &OrderPacket) -> Result<()> {
        Ok(())
    }

    fn send_immediate(&mut self, _orders: &[Order]) -> Result<()> {
        Ok(())
    }

    fn send_sync(&mut self, _frame: u32, _hash: u64, _defeat_state: u64) -> Result<()> {
        Ok(())
    }

    fn receive(&mut self) -> Vec<ConnectionEvent> {
        self.events.drain(..).collect()
    }
}

/// Replay playback controller.
#[derive(Debug)]
pub struct ReplayPlayer {
    replay: Replay,
    rules: Arc<Ruleset>,
    world: World,
    manager: OrderManager,
    /// Whether playback is paused.
    pub paused: bool,
}

impl ReplayPlayer {
    /// Prepare playback from the initial state.
    pub fn new(replay: Replay, rules: Arc<Ruleset>) -> Result<Self> {
        let (world, manager) = Self::start(&replay, &rules)?;
        Ok(Self {
            replay,
            rules,
            world,
            manager,
            paused: false,
        })
    }

    fn start(replay: &Replay, rules: &Arc<Ruleset>) -> Result<(World, OrderManager)> {
        let settings = replay.settings();
        let mut world = World::new(Arc::clone(rules), &replay.header.session, &settings)?;
        let mut manager = OrderManager::new(
            Box::new(ReplayConnection::new(replay)),
            &replay.header.session,
            settings,
        );
        manager.start_game(&mut world)?;
        Ok((world, manager))
    }

    /// Execute the next frame.
    ///
    /// Returns `Ok(false)` when paused or finished. A divergence from the
    /// recorded hashes surfaces as [`GameError::DesyncDetected`].
    pub fn advance(&mut self) -> Result<bool> {
        if self.paused || self.is_finished() {
            return Ok(false);
        }
        if self.manager.try_tick(&mut self.world)? {
            return Ok(true);
        }
        Err(GameError::ReplayTruncated(format!(
            "no input for frame {}",
            self.world.frame() + 1
        )))
    }

    /// Jump to `frame`, replaying from the start if it lies behind.
    pub fn seek(&mut self, frame: u32) -> Result<()> {
        if frame < self.world.frame() {
            let (world, manager) = Self::start(&self.replay, &self.rules)?;
            self.world = world;
            self.manager = manager;
        }
        let target = frame.min(self.replay.final_frame);
        while self.world.frame() < target {
            if !self.manager.try_tick(&mut self.world)? {
                return Err(GameError::ReplayTruncated(format!(
                    "no input for frame {}",
                    self.world.frame() + 1
                )));
            }
        }
        Ok(())
    }

    /// Play to the end and compare the final hash with the recorded one.
    pub fn verify(&mut self) -> Result<bool> {
        self.seek(self.replay.final_frame)?;
        Ok(self.world.frame() == self.replay.final_frame
            && self.world.sync_hash() == self.replay.final_hash)
    }

    /// Last executed frame.
    #[must_use]
    pub const fn current_frame(&self) -> u32 {
        self.world.frame()
    }

    /// The world being replayed.
    #[must_use]
    pub const fn world(&self) -> &World {
        &self.world
    }

    /// The order manager driving playback.
    #[must_use]
    pub const fn manager(&self) -> &OrderManager {
        &self.manager
    }

    /// The replay being played.
    #[must_use]
    pub const fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Whether the last recorded frame has been executed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.world.frame() >= self.replay.final_frame
    }

    /// Toggle pause state.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Progress as a percentage (0-100).
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        if self.replay.final_frame == 0 {
            100.0
        } else {
            f64::from(self.world.frame()) / f64::from(self.replay.final_frame) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::two_player_session;

    fn header() -> ReplayHeader {
        ReplayHeader::new(two_player_session(&[]), &LockstepSettings::default(), 1)
    }

    fn write_replay(records: &[ReplayRecord], end: Option<(u32, u64)>) -> Vec<u8> {
        let buffer = SharedBuffer::default();
        let mut recorder = ReplayRecorder::new(Box::new(buffer.clone()), &header()).unwrap();
        for record in records {
            recorder.record(record).unwrap();
        }
        if let Some((frame, hash)) = end {
            recorder.finish(frame, hash).unwrap();
        }
        buffer.bytes()
    }

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_round_trip_through_bytes() {
        let records = vec![
            ReplayRecord::Orders {
                frame: 1,
                client: 1,
                packet: OrderPacket::empty(),
            },
            ReplayRecord::Sync {
                frame: 1,
                client: 1,
                hash: 42,
                defeat_state: 0,
            },
        ];
        let bytes = write_replay(&records, Some((1, 42)));
        let replay = Replay::from_bytes(&bytes).unwrap();
        assert_eq!(replay.header, header());
        assert_eq!(replay.records, records);
        assert_eq!(replay.final_frame, 1);
        assert_eq!(replay.sync_hashes().get(&1), Some(&42));
        assert_eq!(replay.packet_count(), 1);
    }

    #[test]
    fn test_missing_end_is_truncated() {
        let bytes = write_replay(&[], None);
        assert!(matches!(
            Replay::from_bytes(&bytes),
            Err(GameError::ReplayTruncated(_))
        ));
    }

    #[test]
    fn test_cut_record_is_truncated() {
        let bytes = write_replay(&[], Some((0, 0)));
        assert!(matches!(
            Replay::from_bytes(&bytes[..bytes.len() - 2]),
            Err(GameError::ReplayTruncated(_))
        ));
    }

    #[test]
    fn test_trailing_garbage_is_corrupt() {
        let mut bytes = write_replay(&[], Some((0, 0)));
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            Replay::from_bytes(&bytes),
            Err(GameError::ReplayCorrupt(_))
        ));
    }

    #[test]
    fn test_bad_magic_and_version() {
        assert!(matches!(
            Replay::from_bytes(b"NOPE\x01\x00\x00\x00"),
            Err(GameError::ReplayCorrupt(_))
        ));

        let mut bytes = write_replay(&[], Some((0, 0)));
        bytes[4] = 99;
        assert!(matches!(
            Replay::from_bytes(&bytes),
            Err(GameError::ReplayVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_recorder_refuses_after_finish() {
        let mut recorder = ReplayRecorder::new(Box::new(std::io::sink()), &header()).unwrap();
        recorder.finish(0, 0).unwrap();
        assert!(recorder.is_finished());
        assert!(recorder
            .record(&ReplayRecord::Disconnect { frame: 1, client: 2 })
            .is_err());
    }

    #[test]
    fn test_replay_connection_is_observer() {
        let bytes = write_replay(
            &[ReplayRecord::Disconnect { frame: 4, client: 2 }],
            Some((3, 0)),
        );
        let replay = Replay::from_bytes(&bytes).unwrap();
        let mut conn = ReplayConnection::new(&replay);
        assert_eq!(conn.local_client_id(), OBSERVER_CLIENT);
        assert!(conn.is_replay());
        assert_eq!(
            conn.receive(),
            vec![ConnectionEvent::Disconnect { client: 2, frame: 4 }]
        );
        assert!(conn.receive().is_empty());
    }
}
