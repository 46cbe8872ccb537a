//! Determinism testing utilities.
//!
//! Provides harnesses for verifying that the simulation produces identical
//! results given identical inputs, both for bare worlds fed a fixed order
//! schedule and for several peers running the full lockstep protocol over an
//! in-process hub.
//!
//! # Testing Strategy
//!
//! Lockstep peers only exchange orders, so every peer must compute exactly
//! the same state from them. Sources of non-determinism include:
//!
//! - **Floating-point math**: different CPUs can produce different results.
//!   The core uses fixed-point arithmetic and lookup-table trigonometry.
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Actors live in a `BTreeMap` and are always visited in id order.
//!
//! - **System randomness**: the only RNG is the session-seeded `ChaCha8Rng`
//!   owned by the world.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: individual traits (movement, combat, capture)
//! 2. **Property tests**: random order schedules still produce identical hashes
//! 3. **Lockstep tests**: several peers over a [`LocalHub`] stay in sync
//! 4. **Parallel tests**: running N worlds on N threads all match

use std::collections::BTreeMap;
use std::thread;

use skirmish_core::connection::{ClientId, LocalHub};
use skirmish_core::error::{GameError, Result};
use skirmish_core::order::ClientOrder;
use skirmish_core::order_manager::OrderManager;
use skirmish_core::session::Session;
use skirmish_core::settings::LockstepSettings;
use skirmish_core::world::World;
use tracing::debug;

use crate::fixtures::{rules, world_for};

/// Orders to feed a world, keyed by the frame they apply on.
pub type OrderSchedule = BTreeMap<u32, Vec<ClientOrder>>;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Final hash of each run.
    pub hashes: Vec<u64>,
    /// Number of frames simulated.
    pub frames: u32,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Frames: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.frames,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a simulation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of times to run the simulation
/// * `frames` - Number of frames to simulate per run
/// * `setup` - Function to create initial simulation state
/// * `step` - Function to advance simulation by one frame
/// * `hash` - Function to compute state hash
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    frames: u32,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..frames {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        frames,
    }
}

/// Advance `world` by `frames`, feeding each frame its scheduled orders.
/// Returns the sync hash after every frame.
pub fn run_schedule(world: &mut World, schedule: &OrderSchedule, frames: u32) -> Vec<u64> {
    (0..frames)
        .map(|_| {
            let frame = world.frame() + 1;
            if let Some(orders) = schedule.get(&frame) {
                world.receive_frame_orders(orders.iter().cloned());
            }
            world.tick().sync_hash
        })
        .collect()
}

/// Run `session` with `schedule` twice and compare final hashes.
#[must_use]
pub fn verify_world_determinism(session: &Session, schedule: &OrderSchedule, frames: u32) -> bool {
    verify_determinism(
        2,
        frames,
        || world_for(session),
        |world| {
            run_schedule(world, schedule, 1);
        },
        World::sync_hash,
    )
    .is_deterministic
}

/// First position at which two per-frame hash streams differ, as a 1-based
/// frame number.
#[must_use]
pub fn find_first_divergence(a: &[u64], b: &[u64]) -> Option<u32> {
    let diverged = a
        .iter()
        .zip(b)
        .position(|(x, y)| x != y)
        .or_else(|| (a.len() != b.len()).then(|| a.len().min(b.len())))?;
    u32::try_from(diverged + 1).ok()
}

/// Result of parallel simulation runs.
#[derive(Debug, Clone)]
pub struct ParallelSimResult {
    /// Final state hash from each simulation.
    pub hashes: Vec<u64>,
    /// Number of frames each simulation ran.
    pub frames: u32,
}

impl ParallelSimResult {
    /// Check if all simulations produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }
}

/// Run `num_sims` worlds for `session` on scoped threads and collect their
/// final hashes.
///
/// # Panics
///
/// Panics if a simulation thread panics.
#[must_use]
pub fn run_parallel_worlds(
    session: &Session,
    schedule: &OrderSchedule,
    num_sims: usize,
    frames: u32,
) -> ParallelSimResult {
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    let mut world = world_for(session);
                    run_schedule(&mut world, schedule, frames);
                    world.sync_hash()
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    ParallelSimResult { hashes, frames }
}

/// One peer of a [`LockstepHarness`].
#[derive(Debug)]
pub struct LockstepPeer {
    /// The peer's order manager.
    pub manager: OrderManager,
    /// The peer's world.
    pub world: World,
}

/// Several peers running the lockstep protocol over a [`LocalHub`], stepped
/// round-robin on one thread.
#[derive(Debug)]
pub struct LockstepHarness {
    /// Hub relaying between the peers.
    pub hub: LocalHub,
    /// Peers in client-id order.
    pub peers: Vec<LockstepPeer>,
}

impl LockstepHarness {
    /// One started peer per client in `session`.
    pub fn new(session: &Session, settings: &LockstepSettings) -> Result<Self> {
        let hub = LocalHub::new();
        let connections: Vec<_> = session
            .client_ids()
            .into_iter()
            .map(|client| hub.connect(client))
            .collect();

        let mut peers = Vec::with_capacity(connections.len());
        for connection in connections {
            let mut world = World::new(rules(), session, settings)?;
            let mut manager = OrderManager::new(Box::new(connection), session, settings.clone());
            manager.start_game(&mut world)?;
            peers.push(LockstepPeer { manager, world });
        }
        Ok(Self { hub, peers })
    }

    /// The peer running `client`.
    #[must_use]
    pub fn peer(&self, client: ClientId) -> Option<&LockstepPeer> {
        self.peers
            .iter()
            .find(|p| p.manager.local_client_id() == client)
    }

    /// Mutable access to the peer running `client`.
    pub fn peer_mut(&mut self, client: ClientId) -> Option<&mut LockstepPeer> {
        self.peers
            .iter_mut()
            .find(|p| p.manager.local_client_id() == client)
    }

    /// Give every peer one chance to advance. Returns whether any did.
    pub fn step(&mut self) -> Result<bool> {
        let mut advanced = false;
        for peer in &mut self.peers {
            advanced |= peer.manager.try_tick(&mut peer.world)?;
        }
        Ok(advanced)
    }

    /// Step until every connected peer has executed `frame`.
    pub fn run_until(&mut self, frame: u32) -> Result<()> {
        while self.peers.iter().any(|p| {
            p.world.frame() < frame && self.hub.is_connected(p.manager.local_client_id())
        }) {
            if !self.step()? {
                return Err(GameError::InvalidState(format!(
                    "lockstep stalled before frame {frame}"
                )));
            }
        }
        debug!(frame, peers = self.peers.len(), "Harness reached frame");
        Ok(())
    }

    /// Sync hash of every peer, in client order.
    #[must_use]
    pub fn hashes(&self) -> Vec<u64> {
        self.peers.iter().map(|p| p.world.sync_hash()).collect()
    }
}

/// Proptest strategies for determinism testing.
///
/// These strategies generate random but reproducible order schedules for
/// property-based testing of simulation determinism.
pub mod strategies {
    use proptest::prelude::*;
    use skirmish_core::actor::ActorId;
    use skirmish_core::connection::ClientId;
    use skirmish_core::math::CPos;
    use skirmish_core::order::{ClientOrder, Order};

    use super::OrderSchedule;

    /// A cell on a `width` x `height` map.
    pub fn arb_cell(width: i32, height: i32) -> impl Strategy<Value = CPos> {
        (0..width, 0..height).prop_map(|(x, y)| CPos::new(x, y))
    }

    /// An actor id in `1..=max_id`.
    pub fn arb_actor_id(max_id: u32) -> impl Strategy<Value = ActorId> + Clone {
        (1..=max_id).prop_map(ActorId)
    }

    /// A move, stop, attack, capture, sell or unknown order for one of the
    /// first `max_id` actors. Subjects and targets may be stale or foreign.
    pub fn arb_order(max_id: u32) -> impl Strategy<Value = Order> {
        let subject = arb_actor_id(max_id);
        prop_oneof![
            (subject.clone(), arb_cell(32, 32), any::<bool>()).prop_map(|(s, cell, queued)| {
                Order::new("Move", Some(s))
                    .with_target_location(cell)
                    .queued(queued)
            }),
            subject.clone().prop_map(|s| Order::new("Stop", Some(s))),
            (subject.clone(), arb_actor_id(max_id))
                .prop_map(|(s, t)| Order::new("Attack", Some(s)).with_target_actor(t)),
            (subject.clone(), arb_actor_id(max_id))
                .prop_map(|(s, t)| Order::new("CaptureActor", Some(s)).with_target_actor(t)),
            subject.clone().prop_map(|s| Order::new("Sell", Some(s))),
            subject.prop_map(|s| Order::new("Dance", Some(s))),
        ]
    }

    /// Orders from `clients` spread over frames `1..=frames`.
    pub fn arb_schedule(
        clients: Vec<ClientId>,
        max_id: u32,
        frames: u32,
        max_orders: usize,
    ) -> impl Strategy<Value = OrderSchedule> {
        proptest::collection::vec(
            (1..=frames, proptest::sample::select(clients), arb_order(max_id)),
            0..max_orders,
        )
        .prop_map(|entries| {
            let mut schedule = OrderSchedule::new();
            for (frame, client, order) in entries {
                schedule
                    .entry(frame)
                    .or_default()
                    .push(ClientOrder { client, order });
            }
            schedule
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{skirmish_session, solo_session, two_player_session};
    use proptest::prelude::*;
    use skirmish_core::actor::ActorId;
    use skirmish_core::order::Order;

    #[test]
    fn test_verify_determinism_simple() {
        let result = verify_determinism(3, 100, || 0u64, |n| *n += 1, |n| *n);

        assert!(result.is_deterministic);
        assert_eq!(result.hashes, vec![100, 100, 100]);
    }

    #[test]
    fn test_busy_map_is_deterministic() {
        assert!(verify_world_determinism(
            &skirmish_session(),
            &OrderSchedule::new(),
            200
        ));
    }

    #[test]
    fn test_find_first_divergence() {
        assert_eq!(find_first_divergence(&[1, 2, 3], &[1, 2, 3]), None);
        assert_eq!(find_first_divergence(&[1, 2, 3], &[1, 9, 3]), Some(2));
        assert_eq!(find_first_divergence(&[1, 2], &[1, 2, 3]), Some(3));
    }

    #[test]
    fn test_parallel_worlds_agree() {
        let mut schedule = OrderSchedule::new();
        schedule.insert(
            3,
            vec![ClientOrder {
                client: 1,
                order: Order::new("Attack", Some(ActorId(3))).with_target_actor(ActorId(5)),
            }],
        );
        let result = run_parallel_worlds(&skirmish_session(), &schedule, 4, 150);
        assert!(result.is_deterministic());
        assert_eq!(result.hashes.len(), 4);
    }

    #[test]
    fn test_harness_peers_stay_in_sync() {
        let mut harness =
            LockstepHarness::new(&two_player_session(&[]), &LockstepSettings::default()).unwrap();
        harness.run_until(30).unwrap();
        let hashes = harness.hashes();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hashes[1]);
    }

    #[test]
    fn test_harness_single_peer() {
        let mut harness =
            LockstepHarness::new(&solo_session(&[]), &LockstepSettings::default()).unwrap();
        harness.run_until(10).unwrap();
        assert_eq!(harness.peer(1).unwrap().world.frame(), 10);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_random_schedules_are_deterministic(
            schedule in strategies::arb_schedule(vec![1, 2], 12, 60, 40)
        ) {
            let session = skirmish_session();
            let mut a = world_for(&session);
            let mut b = world_for(&session);
            let hashes_a = run_schedule(&mut a, &schedule, 80);
            let hashes_b = run_schedule(&mut b, &schedule, 80);
            prop_assert_eq!(find_first_divergence(&hashes_a, &hashes_b), None);
        }
    }
}
