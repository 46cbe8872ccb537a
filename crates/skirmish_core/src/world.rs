//! The world: aggregate root of one running game.
//!
//! [`World::tick`] advances the simulation by exactly one frame:
//!
//! 1. Resolve the orders buffered for the frame.
//! 2. Tick every live actor's [`Tick`](crate::traits::Tick) traits, actors in
//!    id order and traits in declaration order.
//! 3. Drain the frame-end queue until it is empty.
//! 4. Update player win states.
//! 5. Compute the sync hash and advance the frame counter.
//!
//! # Determinism
//!
//! - Actors live in a `BTreeMap` keyed by monotonically assigned ids, so
//!   iteration order is registration order on every peer.
//! - The only randomness is a `ChaCha8Rng` seeded from the session.
//! - Structural changes only happen while the frame-end queue drains.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::actor::{Actor, ActorId, ActorInit};
use crate::connection::ClientId;
use crate::error::{GameError, Result};
use crate::frame_end::FrameEndTask;
use crate::math::{CPos, WAngle, WPos};
use crate::order::{ClientOrder, MouseInput, Order};
use crate::rules::Ruleset;
use crate::session::{MapInfo, Player, PlayerId, Session, WinState};
use crate::settings::LockstepSettings;
use crate::sync::SyncHasher;
use crate::sync_report::{ActorReport, FrameReport, TraitReport};
use crate::traits::health::Health;
use crate::traits::{AttackInfo, Capability, MustBeDestroyed, Trait};

/// Summary of one executed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Frame that was executed.
    pub frame: u32,
    /// Sync hash after the frame.
    pub sync_hash: u64,
    /// Orders dispatched to actors.
    pub orders_applied: usize,
    /// Orders dropped (stale subject or target, failed validation).
    pub orders_dropped: usize,
    /// Frame-end tasks executed, including chained ones.
    pub frame_end_tasks: usize,
}

/// Read-only copy of one actor's committed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    /// Actor id.
    pub id: ActorId,
    /// Actor type.
    pub type_name: String,
    /// Owner.
    pub owner: Option<PlayerId>,
    /// Cell.
    pub location: CPos,
    /// Center position.
    pub center: WPos,
    /// Facing.
    pub facing: WAngle,
    /// Current and maximum hit points, if damageable.
    pub health: Option<(i32, i32)>,
}

/// Read-only copy of committed world state for render and UI threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Last executed frame.
    pub frame: u32,
    /// Sync hash of that frame.
    pub sync_hash: u64,
    /// Actors in id order.
    pub actors: Vec<ActorSnapshot>,
    /// Players in roster order.
    pub players: Vec<Player>,
}

/// The simulation state of one game.
#[derive(Debug)]
pub struct World {
    frame: u32,
    rules: Arc<Ruleset>,
    map: MapInfo,
    players: Vec<Player>,
    actors: BTreeMap<ActorId, Actor>,
    next_actor_id: u32,
    frame_end: VecDeque<FrameEndTask>,
    frame_orders: Vec<ClientOrder>,
    applied_orders: Vec<String>,
    issued: Vec<Order>,
    rng: ChaCha8Rng,
    timestep_ms: u32,
    paused: bool,
    local_client: Option<ClientId>,
    /// Per player: ever owned a `MustBeDestroyed` actor.
    conquest: Vec<bool>,
    sync_hash: u64,
}

impl World {
    /// Build the world for a session and spawn the map's preplaced actors.
    pub fn new(rules: Arc<Ruleset>, session: &Session, settings: &LockstepSettings) -> Result<Self> {
        let players = session
            .players
            .iter()
            .enumerate()
            .map(|(index, reference)| {
                let id = u8::try_from(index).map_err(|_| {
                    GameError::InvalidState(format!("too many players: {}", session.players.len()))
                })?;
                Ok(Player::from_reference(PlayerId(id), reference))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut world = Self {
            frame: 0,
            rules,
            map: session.map.clone(),
            players,
            actors: BTreeMap::new(),
            next_actor_id: 1,
            frame_end: VecDeque::new(),
            frame_orders: Vec::new(),
            applied_orders: Vec::new(),
            issued: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(session.seed),
            timestep_ms: settings.timestep_ms,
            paused: false,
            local_client: None,
            conquest: vec![false; session.players.len()],
            sync_hash: 0,
        };

        for reference in &session.map.actors {
            if let Some(owner) = reference.owner {
                world.player(owner)?;
            }
            world.create_actor_facing(
                &reference.type_name,
                reference.location,
                reference.owner,
                reference.facing,
            )?;
        }
        world.drain_frame_end();
        world.sync_hash = world.compute_sync_hash();

        info!(
            map = %world.map.id,
            players = world.players.len(),
            actors = world.actors.len(),
            seed = session.seed,
            "World created"
        );
        Ok(world)
    }

    // ------------------------------------------------------------------
    // Frame loop
    // ------------------------------------------------------------------

    /// Execute the next frame.
    pub fn tick(&mut self) -> TickReport {
        let frame = self.frame + 1;

        let (orders_applied, orders_dropped) = self.resolve_orders();
        self.tick_actors();
        let frame_end_tasks = self.drain_frame_end();
        self.update_win_states();

        self.frame = frame;
        self.sync_hash = self.compute_sync_hash();

        debug!(
            frame,
            hash = %format_args!("{:#018x}", self.sync_hash),
            orders = orders_applied,
            "Frame complete"
        );

        TickReport {
            frame,
            sync_hash: self.sync_hash,
            orders_applied,
            orders_dropped,
            frame_end_tasks,
        }
    }

    fn resolve_orders(&mut self) -> (usize, usize) {
        self.applied_orders.clear();
        let orders = std::mem::take(&mut self.frame_orders);
        let (mut applied, mut dropped) = (0, 0);

        for ClientOrder { client, order } in &orders {
            let Some(subject) = order.subject else {
                trace!(order = %order, "Order without subject ignored");
                dropped += 1;
                continue;
            };
            if !self.is_alive(subject) || order.target_actor.is_some_and(|t| !self.is_alive(t)) {
                trace!(order = %order, "Stale order dropped");
                dropped += 1;
                continue;
            }
            if !self.validate_order(*client, subject) {
                warn!(client, order = %order, "Order for an actor the client does not control");
                dropped += 1;
                continue;
            }

            self.applied_orders.push(order.to_string());
            applied += 1;
            for index in self.capability_indices(subject, Capability::ResolveOrder) {
                if !self.is_alive(subject) {
                    break;
                }
                self.with_trait(subject, index, |t, world| {
                    if let Some(resolver) = t.as_resolve_order() {
                        resolver.resolve_order(subject, order, world);
                    }
                });
            }
        }

        (applied, dropped)
    }

    fn tick_actors(&mut self) {
        let ids: Vec<ActorId> = self.actors.keys().copied().collect();
        for id in ids {
            for index in self.capability_indices(id, Capability::Tick) {
                if !self.is_alive(id) {
                    break;
                }
                self.with_trait(id, index, |t, world| {
                    if let Some(tick) = t.as_tick() {
                        tick.tick(id, world);
                    }
                });
            }
        }
    }

    /// Run frame-end tasks until the queue is empty, including tasks queued by
    /// other tasks. Returns the number executed.
    fn drain_frame_end(&mut self) -> usize {
        let mut executed = 0;
        while let Some(task) = self.frame_end.pop_front() {
            trace!(task = task.kind(), "Frame-end task");
            self.apply_task(task);
            executed += 1;
        }
        executed
    }

    fn apply_task(&mut self, task: FrameEndTask) {
        match task {
            FrameEndTask::CreateActor {
                id,
                type_name,
                owner,
                location,
                facing,
            } => {
                let info = match self.rules.actor(&type_name) {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(actor = %id, error = %e, "Dropping actor creation");
                        return;
                    }
                };
                let init = ActorInit {
                    id,
                    owner,
                    location,
                    facing,
                };
                let actor = Actor::new(&init, type_name, info.create_traits(&init));
                if let Some(owner) = owner.filter(|_| actor.has_trait::<MustBeDestroyed>()) {
                    if let Some(flag) = self.conquest.get_mut(usize::from(owner.0)) {
                        *flag = true;
                    }
                }
                self.actors.insert(id, actor);
                self.notify(id, Capability::NotifyAddedToWorld, |t, world| {
                    if let Some(hook) = t.as_notify_added() {
                        hook.added_to_world(id, world);
                    }
                });
            }
            FrameEndTask::RemoveActor(id) => {
                if !self.actors.contains_key(&id) {
                    return;
                }
                self.notify(id, Capability::NotifyRemovedFromWorld, |t, world| {
                    if let Some(hook) = t.as_notify_removed() {
                        hook.removed_from_world(id, world);
                    }
                });
                self.actors.remove(&id);
            }
            FrameEndTask::ChangeOwner { actor, new_owner } => {
                let Some(entry) = self.actors.get_mut(&actor).filter(|a| !a.dead) else {
                    return;
                };
                let old_owner = entry.owner;
                if old_owner == new_owner {
                    return;
                }
                entry.owner = new_owner;
                self.notify(actor, Capability::NotifyOwnerChanged, |t, world| {
                    if let Some(hook) = t.as_notify_owner_changed() {
                        hook.owner_changed(actor, old_owner, new_owner, world);
                    }
                });
            }
            FrameEndTask::GiveCash { player, amount } => {
                if let Some(p) = self.players.get_mut(usize::from(player.0)) {
                    p.cash = p.cash.saturating_add(amount);
                }
            }
        }
    }

    /// Players lose once every `MustBeDestroyed` actor they owned is gone.
    /// When everyone left standing is on one side, that side wins.
    fn update_win_states(&mut self) {
        let survivors: Vec<bool> = self
            .players
            .iter()
            .map(|p| {
                self.actors.values().any(|a| {
                    !a.dead && a.owner == Some(p.id) && a.has_trait::<MustBeDestroyed>()
                })
            })
            .collect();

        let mut anyone_lost = false;
        for ((player, alive), &tracked) in self
            .players
            .iter_mut()
            .zip(survivors)
            .zip(&self.conquest)
        {
            if tracked && !alive && player.is_playable() && player.win_state == WinState::Undefined
            {
                info!(player = %player.id, name = %player.name, frame = self.frame + 1, "Player defeated");
                player.win_state = WinState::Lost;
            }
            anyone_lost |= player.win_state == WinState::Lost;
        }
        if !anyone_lost {
            return;
        }

        let remaining: Vec<usize> = self
            .players
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_playable() && p.win_state == WinState::Undefined)
            .map(|(index, _)| index)
            .collect();
        let Some(&first) = remaining.first() else {
            return;
        };
        let one_side = remaining
            .iter()
            .all(|&i| self.players[i].is_allied_with(&self.players[first]));
        if one_side {
            for i in remaining {
                info!(player = %self.players[i].id, name = %self.players[i].name, "Player victorious");
                self.players[i].win_state = WinState::Won;
            }
        }
    }

    // ------------------------------------------------------------------
    // Trait dispatch
    // ------------------------------------------------------------------

    fn capability_indices(&self, id: ActorId, capability: Capability) -> Vec<usize> {
        self.actors
            .get(&id)
            .filter(|a| !a.dead)
            .map(|a| a.trait_indices(capability).collect())
            .unwrap_or_default()
    }

    /// Lend one trait out of its slot while `f` runs with full world access.
    fn with_trait<R>(
        &mut self,
        id: ActorId,
        index: usize,
        f: impl FnOnce(&mut dyn Trait, &mut Self) -> R,
    ) -> Option<R> {
        let mut instance = self
            .actors
            .get_mut(&id)?
            .traits
            .get_mut(index)?
            .instance
            .take()?;
        let result = f(&mut *instance, self);
        if let Some(slot) = self.actors.get_mut(&id).and_then(|a| a.traits.get_mut(index)) {
            slot.instance = Some(instance);
        }
        Some(result)
    }

    /// Run `f` on every trait of `id` exposing `capability`, dead or not.
    fn notify(
        &mut self,
        id: ActorId,
        capability: Capability,
        mut f: impl FnMut(&mut dyn Trait, &mut Self),
    ) {
        let indices: Vec<usize> = match self.actors.get(&id) {
            Some(actor) => actor.trait_indices(capability).collect(),
            None => return,
        };
        for index in indices {
            self.with_trait(id, index, &mut f);
        }
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Queue creation of an actor. The returned id is reserved immediately;
    /// the actor becomes visible once this frame's frame-end tasks drain.
    pub fn create_actor(
        &mut self,
        type_name: &str,
        location: CPos,
        owner: Option<PlayerId>,
    ) -> Result<ActorId> {
        self.create_actor_facing(type_name, location, owner, WAngle::default())
    }

    /// [`World::create_actor`] with an explicit initial facing.
    pub fn create_actor_facing(
        &mut self,
        type_name: &str,
        location: CPos,
        owner: Option<PlayerId>,
        facing: WAngle,
    ) -> Result<ActorId> {
        self.rules.actor(type_name)?;
        let id = ActorId(self.next_actor_id);
        self.next_actor_id = self
            .next_actor_id
            .checked_add(1)
            .ok_or_else(|| GameError::InvalidState("actor ids exhausted".to_string()))?;
        self.frame_end.push_back(FrameEndTask::CreateActor {
            id,
            type_name: type_name.to_string(),
            owner,
            location,
            facing,
        });
        Ok(id)
    }

    /// Mark an actor dead and queue its removal.
    ///
    /// The actor stays resolvable until the frame-end tasks run, but is no
    /// longer ticked or given orders.
    pub fn remove(&mut self, id: ActorId) {
        if let Some(actor) = self.actors.get_mut(&id) {
            if !actor.dead {
                actor.dead = true;
                self.frame_end.push_back(FrameEndTask::RemoveActor(id));
            }
        }
    }

    /// Queue a transfer of `id` to `new_owner`.
    pub fn transfer_ownership(&mut self, id: ActorId, new_owner: Option<PlayerId>) {
        self.frame_end
            .push_back(FrameEndTask::ChangeOwner { actor: id, new_owner });
    }

    /// Queue a cash change for `player`.
    pub fn give_cash(&mut self, player: PlayerId, amount: i64) {
        self.frame_end
            .push_back(FrameEndTask::GiveCash { player, amount });
    }

    /// Queue an arbitrary frame-end task.
    pub fn add_frame_end_task(&mut self, task: FrameEndTask) {
        self.frame_end.push_back(task);
    }

    /// Number of tasks waiting for the next drain.
    #[must_use]
    pub fn pending_frame_end_tasks(&self) -> usize {
        self.frame_end.len()
    }

    /// Look up an actor, including one pending removal.
    #[must_use]
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    /// Whether `id` is registered and not pending removal.
    #[must_use]
    pub fn is_alive(&self, id: ActorId) -> bool {
        self.actors.get(&id).is_some_and(|a| !a.dead)
    }

    /// Live actors in id order.
    pub fn actors(&self) -> impl Iterator<Item = &Actor> + '_ {
        self.actors.values().filter(|a| !a.dead)
    }

    /// Number of registered actors, including ones pending removal.
    #[must_use]
    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Live actors carrying a trait of type `T`, paired with that trait.
    pub fn actors_with_trait<T: Trait>(&self) -> impl Iterator<Item = (&Actor, &T)> + '_ {
        self.actors()
            .filter_map(|actor| actor.trait_of::<T>().map(|t| (actor, t)))
    }

    /// Live actors exposing `capability`.
    pub fn actors_implementing(&self, capability: Capability) -> impl Iterator<Item = &Actor> + '_ {
        self.actors().filter(move |a| a.implements(capability))
    }

    /// First trait of type `T` on `id`.
    #[must_use]
    pub fn actor_trait<T: Trait>(&self, id: ActorId) -> Option<&T> {
        self.actors.get(&id)?.trait_of::<T>()
    }

    /// Mutable access to the first trait of type `T` on `id`.
    pub fn actor_trait_mut<T: Trait>(&mut self, id: ActorId) -> Option<&mut T> {
        self.actors.get_mut(&id)?.trait_of_mut::<T>()
    }

    /// Move an actor. The cell follows the center.
    pub fn set_actor_position(&mut self, id: ActorId, center: WPos, facing: Option<WAngle>) {
        if let Some(actor) = self.actors.get_mut(&id) {
            actor.center = center;
            actor.location = center.to_cell();
            if let Some(facing) = facing {
                actor.facing = facing;
            }
        }
    }

    /// Apply damage to `target` and run the damage and death hooks.
    pub fn inflict_damage(&mut self, attacker: Option<ActorId>, target: ActorId, damage: i32) {
        if !self.is_alive(target) {
            return;
        }
        let Some(health) = self.actor_trait_mut::<Health>(target) else {
            return;
        };
        let killed = health.apply_damage(damage);
        let attack = AttackInfo {
            attacker,
            damage,
            killed,
        };

        self.notify(target, Capability::NotifyDamage, |t, world| {
            if let Some(hook) = t.as_notify_damage() {
                hook.damaged(target, &attack, world);
            }
        });

        if killed {
            debug!(target = %target, attacker = ?attacker, "Actor killed");
            self.notify(target, Capability::NotifyKilled, |t, world| {
                if let Some(hook) = t.as_notify_killed() {
                    hook.killed(target, &attack, world);
                }
            });
            self.remove(target);
        }
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    /// Players in roster order.
    #[must_use]
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Look up a player.
    pub fn player(&self, id: PlayerId) -> Result<&Player> {
        self.players
            .get(usize::from(id.0))
            .ok_or_else(|| GameError::InvalidState(format!("unknown player {id}")))
    }

    /// Players controlled by `client`.
    pub fn players_for_client(&self, client: ClientId) -> impl Iterator<Item = &Player> + '_ {
        self.players
            .iter()
            .filter(move |p| p.client_id == Some(client))
    }

    /// Client running this world instance, if any.
    #[must_use]
    pub const fn local_client(&self) -> Option<ClientId> {
        self.local_client
    }

    /// Set the client running this world instance.
    pub fn set_local_client(&mut self, client: Option<ClientId>) {
        self.local_client = client;
    }

    /// The player controlled by the local client.
    #[must_use]
    pub fn local_player(&self) -> Option<&Player> {
        let client = self.local_client?;
        self.players_for_client(client).next()
    }

    /// Whether two owners are on the same side. Neutral is only allied with
    /// neutral.
    #[must_use]
    pub fn are_allied(&self, a: Option<PlayerId>, b: Option<PlayerId>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => match (self.player(a), self.player(b)) {
                (Ok(a), Ok(b)) => a.is_allied_with(b),
                _ => false,
            },
            _ => false,
        }
    }

    /// Whether the owners of two actors are hostile to each other.
    #[must_use]
    pub fn is_enemy(&self, a: ActorId, b: ActorId) -> bool {
        match (self.actors.get(&a), self.actors.get(&b)) {
            (Some(a), Some(b)) => !self.are_allied(a.owner, b.owner),
            _ => false,
        }
    }

    /// Bitmask of defeated players, bit `n` for [`PlayerId`] `n`.
    #[must_use]
    pub fn defeat_state(&self) -> u64 {
        self.players
            .iter()
            .filter(|p| p.win_state == WinState::Lost && p.id.0 < 64)
            .fold(0, |mask, p| mask | (1u64 << p.id.0))
    }

    /// Mark every player of `client` as disconnected. A player still in the
    /// game surrenders.
    pub fn on_client_disconnected(&mut self, client: ClientId) {
        let frame = self.frame + 1;
        for player in self.players.iter_mut().filter(|p| p.client_id == Some(client)) {
            if player.disconnected {
                continue;
            }
            player.disconnected = true;
            if player.win_state == WinState::Undefined {
                player.win_state = WinState::Lost;
            }
            info!(client, player = %player.id, frame, "Player disconnected");
        }
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Whether `client` may command `subject`.
    #[must_use]
    pub fn validate_order(&self, client: ClientId, subject: ActorId) -> bool {
        let Some(owner) = self.actors.get(&subject).and_then(|a| a.owner) else {
            return false;
        };
        self.player(owner)
            .is_ok_and(|p| p.client_id == Some(client) && !p.disconnected)
    }

    /// Ask each selected actor's traits, in declaration order, for an order
    /// matching this input. The first trait to answer wins per actor.
    ///
    /// Once the world is bound to a local client, only actors owned by that
    /// client's player are asked.
    #[must_use]
    pub fn orders_for_input(
        &self,
        selection: &[ActorId],
        cell: CPos,
        input: &MouseInput,
        under_cursor: Option<ActorId>,
    ) -> Vec<Order> {
        let commander = self.local_player().map(|p| p.id);
        let bound = self.local_client.is_some();
        selection
            .iter()
            .filter_map(|&id| {
                let actor = self
                    .actors
                    .get(&id)
                    .filter(|a| !a.dead && (!bound || (commander.is_some() && a.owner == commander)))?;
                actor
                    .trait_instances()
                    .filter_map(|t| t.as_issue_order())
                    .find_map(|issuer| issuer.issue_order(id, self, cell, input, under_cursor))
            })
            .collect()
    }

    /// Queue a locally issued order for the order manager.
    ///
    /// This is the only write path available to user interfaces.
    pub fn issue_order(&mut self, order: Order) {
        self.issued.push(order);
    }

    /// Take every order issued since the last call.
    pub fn take_issued_orders(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.issued)
    }

    /// Buffer orders for the next frame, in application order.
    pub fn receive_frame_orders(&mut self, orders: impl IntoIterator<Item = ClientOrder>) {
        self.frame_orders.extend(orders);
    }

    /// Orders applied during the last frame, rendered for logs.
    #[must_use]
    pub fn applied_orders(&self) -> &[String] {
        &self.applied_orders
    }

    // ------------------------------------------------------------------
    // State accessors
    // ------------------------------------------------------------------

    /// Number of frames executed.
    #[must_use]
    pub const fn frame(&self) -> u32 {
        self.frame
    }

    /// Wall-clock milliseconds per frame.
    #[must_use]
    pub const fn timestep_ms(&self) -> u32 {
        self.timestep_ms
    }

    /// Whether local advancement is paused.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pause or resume local advancement. Never touches synchronized state.
    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Actor type definitions.
    #[must_use]
    pub fn rules(&self) -> &Ruleset {
        &self.rules
    }

    /// Map the game is played on.
    #[must_use]
    pub const fn map(&self) -> &MapInfo {
        &self.map
    }

    /// The shared deterministic RNG.
    pub fn shared_random(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Word position of the shared RNG stream.
    #[must_use]
    pub fn rng_position(&self) -> u128 {
        self.rng.get_word_pos()
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Sync hash of the last executed frame.
    #[must_use]
    pub const fn sync_hash(&self) -> u64 {
        self.sync_hash
    }

    /// Recompute the sync hash from the current state.
    #[must_use]
    pub fn compute_sync_hash(&self) -> u64 {
        self.sync_state(false).0
    }

    /// Capture the synchronized state of the last frame for a sync report.
    #[must_use]
    pub fn frame_report(&self) -> FrameReport {
        let (sync_hash, actors, players) = self.sync_state(true);
        FrameReport {
            frame: self.frame,
            sync_hash,
            rng_position: self.rng_position(),
            actors,
            players,
            orders: self.applied_orders.clone(),
        }
    }

    fn sync_state(
        &self,
        capture: bool,
    ) -> (u64, Vec<ActorReport>, Vec<crate::sync::SyncField>) {
        let new_hasher = || {
            if capture {
                SyncHasher::capturing()
            } else {
                SyncHasher::new()
            }
        };

        let mut world_hasher = new_hasher();
        world_hasher.field("frame", &self.frame);

        let mut reports = Vec::new();
        for actor in self.actors.values() {
            let mut actor_hasher = new_hasher();
            actor_hasher.field("id", &actor.id());
            actor_hasher.field("owner", &actor.owner);
            actor_hasher.field("location", &actor.location);
            actor_hasher.field("center", &actor.center);
            actor_hasher.field("facing", &actor.facing);

            let mut traits = Vec::new();
            for t in actor.trait_instances() {
                let mut trait_hasher = new_hasher();
                t.write_sync(&mut trait_hasher);
                let trait_hash = trait_hasher.finish();
                actor_hasher.write_word(trait_hash);
                if capture {
                    traits.push(TraitReport {
                        name: t.name().to_string(),
                        hash: trait_hash,
                        fields: trait_hasher.take_fields(),
                    });
                }
            }

            let actor_hash = actor_hasher.finish();
            world_hasher.write_word(actor_hash);
            if capture {
                reports.push(ActorReport {
                    id: actor.id(),
                    type_name: actor.type_name().to_string(),
                    hash: actor_hash,
                    fields: actor_hasher.take_fields(),
                    traits,
                });
            }
        }

        for player in &self.players {
            world_hasher.field("cash", &player.cash);
            world_hasher.field("win_state", &player.win_state);
            world_hasher.field("disconnected", &player.disconnected);
        }
        world_hasher.field("rng_position", &self.rng.get_word_pos());

        let players = world_hasher
            .take_fields()
            .into_iter()
            .filter(|f| f.name != "frame")
            .collect();
        (world_hasher.finish(), reports, players)
    }

    /// Owned copy of committed state, safe to hand to other threads.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            frame: self.frame,
            sync_hash: self.sync_hash,
            actors: self
                .actors()
                .map(|a| ActorSnapshot {
                    id: a.id(),
                    type_name: a.type_name().to_string(),
                    owner: a.owner,
                    location: a.location,
                    center: a.center,
                    facing: a.facing,
                    health: a.trait_of::<Health>().map(|h| (h.hp(), h.max_hp())),
                })
                .collect(),
            players: self.players.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{actor_at, two_player_world, P1, P2};
    use crate::traits::armament::Armament;
    use crate::traits::mobile::Mobile;

    fn attack(subject: ActorId, target: ActorId) -> ClientOrder {
        ClientOrder {
            client: 1,
            order: Order::new("Attack", Some(subject)).with_target_actor(target),
        }
    }

    #[test]
    fn test_tick_advances_one_frame() {
        let mut world = two_player_world(&[]);
        assert_eq!(world.frame(), 0);
        let report = world.tick();
        assert_eq!(report.frame, 1);
        assert_eq!(world.frame(), 1);
        assert_eq!(report.sync_hash, world.sync_hash());
    }

    #[test]
    fn test_created_actor_hidden_until_drain() {
        let mut world = two_player_world(&[]);
        let id = world.create_actor("e1", CPos::new(1, 1), Some(P1)).unwrap();
        assert!(world.actor(id).is_none());
        assert_eq!(world.actors_with_trait::<Health>().count(), 0);

        let report = world.tick();
        assert_eq!(report.frame_end_tasks, 1);
        assert!(world.is_alive(id));
        assert_eq!(world.actors_with_trait::<Health>().count(), 1);
    }

    #[test]
    fn test_unknown_actor_type_rejected_immediately() {
        let mut world = two_player_world(&[]);
        assert!(matches!(
            world.create_actor("mammoth", CPos::new(0, 0), None),
            Err(GameError::UnknownActorType(_))
        ));
        assert_eq!(world.pending_frame_end_tasks(), 0);
    }

    #[test]
    fn test_removed_actor_not_ticked_and_gone_after_drain() {
        let mut world = two_player_world(&[actor_at("e1", P1, 0, 0)]);
        let id = ActorId(1);
        world.actor_trait_mut::<Mobile>(id).unwrap().move_to(CPos::new(5, 0), false);
        world.remove(id);
        let before = world.actor(id).unwrap().center();
        assert!(!world.is_alive(id));
        assert_eq!(world.actor(id).unwrap().center(), before);

        world.tick();
        assert!(world.actor(id).is_none());
    }

    #[test]
    fn test_attack_reduces_health_by_weapon_damage() {
        let mut world = two_player_world(&[actor_at("tank", P1, 0, 0), actor_at("tank", P2, 2, 0)]);
        let (a, b) = (ActorId(1), ActorId(2));
        let damage = world.actor_trait::<Armament>(a).unwrap().damage();

        world.receive_frame_orders([attack(a, b)]);
        let report = world.tick();
        assert_eq!(report.orders_applied, 1);
        let hp = world.actor_trait::<Health>(b).unwrap();
        assert_eq!(hp.hp(), hp.max_hp() - damage);
    }

    #[test]
    fn test_order_for_foreign_actor_dropped() {
        let mut world = two_player_world(&[actor_at("tank", P1, 0, 0), actor_at("tank", P2, 2, 0)]);
        // Client 1 controls P1 only.
        world.receive_frame_orders([attack(ActorId(2), ActorId(1))]);
        let report = world.tick();
        assert_eq!(report.orders_dropped, 1);
        assert_eq!(world.actor_trait::<Armament>(ActorId(2)).unwrap().target(), None);
    }

    #[test]
    fn test_unrecognized_order_is_noop() {
        let mut a = two_player_world(&[actor_at("e1", P1, 0, 0)]);
        let mut b = two_player_world(&[actor_at("e1", P1, 0, 0)]);
        a.receive_frame_orders([ClientOrder {
            client: 1,
            order: Order::new("Teleport", Some(ActorId(1))),
        }]);
        assert_eq!(a.tick().sync_hash, b.tick().sync_hash);
    }

    #[test]
    fn test_chained_frame_end_tasks_drain_same_frame() {
        let mut world = two_player_world(&[actor_at("tank", P1, 0, 0), actor_at("tank", P2, 1, 0)]);
        world.inflict_damage(None, ActorId(2), 10_000);
        assert!(!world.is_alive(ActorId(2)));

        let report = world.tick();
        // Removal, then the husk spawned from the removal hook.
        assert!(report.frame_end_tasks >= 2);
        assert_eq!(world.pending_frame_end_tasks(), 0);
        assert!(world.actor(ActorId(2)).is_none());
        assert!(world.actors().any(|a| a.type_name() == "tank.husk"));
    }

    #[test]
    fn test_conquest_defeat_and_victory() {
        let mut world = two_player_world(&[actor_at("fact", P1, 0, 0), actor_at("fact", P2, 5, 5)]);
        world.tick();
        assert_eq!(world.defeat_state(), 0);

        world.remove(ActorId(2));
        world.tick();
        assert_eq!(world.player(P2).unwrap().win_state, WinState::Lost);
        assert_eq!(world.player(P1).unwrap().win_state, WinState::Won);
        assert_eq!(world.defeat_state(), 0b10);
    }

    #[test]
    fn test_disconnect_surrenders_player() {
        let mut world = two_player_world(&[]);
        world.on_client_disconnected(2);
        let p2 = world.player(P2).unwrap();
        assert!(p2.disconnected);
        assert_eq!(p2.win_state, WinState::Lost);
        assert!(!world.player(P1).unwrap().disconnected);
    }

    #[test]
    fn test_orders_for_input_first_trait_wins() {
        let world = two_player_world(&[actor_at("tank", P1, 0, 0), actor_at("tank", P2, 3, 0)]);
        let orders = world.orders_for_input(
            &[ActorId(1)],
            CPos::new(3, 0),
            &MouseInput::right_click(),
            Some(ActorId(2)),
        );
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_string, "Attack");

        let orders =
            world.orders_for_input(&[ActorId(1)], CPos::new(6, 6), &MouseInput::right_click(), None);
        assert_eq!(orders[0].order_string, "Move");
    }

    #[test]
    fn test_orders_for_input_only_commands_local_player() {
        let mut world = two_player_world(&[actor_at("tank", P1, 0, 0), actor_at("tank", P2, 3, 0)]);
        world.set_local_client(Some(2));
        assert_eq!(world.local_player().map(|p| p.id), Some(P2));

        let input = MouseInput::right_click();
        assert!(world
            .orders_for_input(&[ActorId(1)], CPos::new(6, 6), &input, None)
            .is_empty());
        let orders = world.orders_for_input(&[ActorId(1), ActorId(2)], CPos::new(6, 6), &input, None);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].subject, Some(ActorId(2)));

        // A client with no player commands nothing.
        world.set_local_client(Some(9));
        assert!(world.local_player().is_none());
        assert!(world
            .orders_for_input(&[ActorId(2)], CPos::new(6, 6), &input, None)
            .is_empty());
    }

    #[test]
    fn test_snapshot_reflects_committed_state() {
        let mut world = two_player_world(&[actor_at("e1", P1, 2, 2)]);
        world.tick();
        let snapshot = world.snapshot();
        assert_eq!(snapshot.frame, 1);
        assert_eq!(snapshot.actors.len(), 1);
        assert_eq!(snapshot.actors[0].health, Some((50, 50)));
        assert_eq!(snapshot.sync_hash, world.sync_hash());
    }

    #[test]
    fn test_frame_report_matches_hash() {
        let mut world = two_player_world(&[actor_at("e1", P1, 2, 2)]);
        world.tick();
        let report = world.frame_report();
        assert_eq!(report.sync_hash, world.sync_hash());
        assert_eq!(report.actors[0].traits[0].name, "Health");
    }
}
