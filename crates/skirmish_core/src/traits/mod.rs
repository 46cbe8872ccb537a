//! Trait framework: capability interfaces and the built-in trait plugins.
//!
//! A trait is a behaviour component attached to an actor. Each trait exposes
//! zero or more capabilities ([`Tick`], [`ResolveOrder`], [`IssueOrder`],
//! the `Notify*` hooks) by overriding the matching `as_*` accessor on
//! [`Trait`]. The world probes these accessors once when the actor is built
//! and caches the answer in a [`CapabilitySet`], then dispatches by walking
//! the actor's trait list in declaration order.
//!
//! Capability methods receive the owning actor's id and `&mut World`. While a
//! trait runs, the world holds it outside its slot, so the trait can freely
//! reach other actors and even other traits of its own actor.

pub mod armament;
pub mod capture;
pub mod health;
pub mod mobile;
pub mod sellable;
pub mod spawn_on_death;
pub mod wanders;

use std::any::Any;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::actor::{ActorId, ActorInit};
use crate::math::{CPos, WDist};
use crate::order::{MouseInput, Order};
use crate::session::PlayerId;
use crate::sync::SyncHasher;
use crate::world::World;

use armament::Armament;
use capture::{Capturable, Captures};
use health::Health;
use mobile::Mobile;
use sellable::Sellable;
use spawn_on_death::SpawnActorOnDeath;
use wanders::Wanders;

/// Downcasting support for trait objects.
pub trait AsAny: Any {
    /// Borrow as [`Any`].
    fn as_any(&self) -> &dyn Any;
    /// Mutably borrow as [`Any`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A behaviour component attached to an actor.
///
/// Every accessor defaults to "capability not implemented".
pub trait Trait: AsAny + Debug + Send {
    /// Name used in logs and sync reports.
    fn name(&self) -> &'static str;

    /// Per-frame logic.
    fn as_tick(&mut self) -> Option<&mut dyn Tick> {
        None
    }

    /// Order resolution.
    fn as_resolve_order(&mut self) -> Option<&mut dyn ResolveOrder> {
        None
    }

    /// Order production from player input.
    fn as_issue_order(&self) -> Option<&dyn IssueOrder> {
        None
    }

    /// Damage notification.
    fn as_notify_damage(&mut self) -> Option<&mut dyn NotifyDamage> {
        None
    }

    /// Death notification.
    fn as_notify_killed(&mut self) -> Option<&mut dyn NotifyKilled> {
        None
    }

    /// Registration notification.
    fn as_notify_added(&mut self) -> Option<&mut dyn NotifyAddedToWorld> {
        None
    }

    /// Removal notification.
    fn as_notify_removed(&mut self) -> Option<&mut dyn NotifyRemovedFromWorld> {
        None
    }

    /// Ownership change notification.
    fn as_notify_owner_changed(&mut self) -> Option<&mut dyn NotifyOwnerChanged> {
        None
    }

    /// Fold every synchronized field into `hasher`.
    fn write_sync(&self, _hasher: &mut SyncHasher) {}
}

/// Logic run once per frame.
pub trait Tick {
    /// Advance this trait by one frame.
    fn tick(&mut self, self_id: ActorId, world: &mut World);
}

/// Consumes orders addressed to the owning actor.
pub trait ResolveOrder {
    /// Handle `order`. Unrecognised order strings must be ignored.
    fn resolve_order(&mut self, self_id: ActorId, order: &Order, world: &mut World);
}

/// Turns player input into orders.
pub trait IssueOrder {
    /// Return an order for this input, or `None` if this trait has nothing to
    /// say about it.
    fn issue_order(
        &self,
        self_id: ActorId,
        world: &World,
        cell: CPos,
        input: &MouseInput,
        under_cursor: Option<ActorId>,
    ) -> Option<Order>;
}

/// Details of one damage event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackInfo {
    /// Actor that dealt the damage.
    pub attacker: Option<ActorId>,
    /// Damage applied.
    pub damage: i32,
    /// Whether this hit killed the victim.
    pub killed: bool,
}

/// Called after the owning actor takes damage.
pub trait NotifyDamage {
    /// React to damage.
    fn damaged(&mut self, self_id: ActorId, attack: &AttackInfo, world: &mut World);
}

/// Called when the owning actor dies from damage.
pub trait NotifyKilled {
    /// React to death.
    fn killed(&mut self, self_id: ActorId, attack: &AttackInfo, world: &mut World);
}

/// Called right after the owning actor joins the registry.
pub trait NotifyAddedToWorld {
    /// React to registration.
    fn added_to_world(&mut self, self_id: ActorId, world: &mut World);
}

/// Called right before the owning actor leaves the registry.
pub trait NotifyRemovedFromWorld {
    /// React to removal. The actor is still resolvable during this call.
    fn removed_from_world(&mut self, self_id: ActorId, world: &mut World);
}

/// Called after the owning actor changes hands.
pub trait NotifyOwnerChanged {
    /// React to the transfer.
    fn owner_changed(
        &mut self,
        self_id: ActorId,
        old_owner: Option<PlayerId>,
        new_owner: Option<PlayerId>,
        world: &mut World,
    );
}

/// A capability a trait may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// [`Tick`]
    Tick,
    /// [`ResolveOrder`]
    ResolveOrder,
    /// [`IssueOrder`]
    IssueOrder,
    /// [`NotifyDamage`]
    NotifyDamage,
    /// [`NotifyKilled`]
    NotifyKilled,
    /// [`NotifyAddedToWorld`]
    NotifyAddedToWorld,
    /// [`NotifyRemovedFromWorld`]
    NotifyRemovedFromWorld,
    /// [`NotifyOwnerChanged`]
    NotifyOwnerChanged,
}

impl Capability {
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Cached set of capabilities exposed by one trait instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// Ask a trait which capabilities it exposes.
    pub fn probe(instance: &mut dyn Trait) -> Self {
        let mut set = Self::default();
        if instance.as_tick().is_some() {
            set.insert(Capability::Tick);
        }
        if instance.as_resolve_order().is_some() {
            set.insert(Capability::ResolveOrder);
        }
        if instance.as_issue_order().is_some() {
            set.insert(Capability::IssueOrder);
        }
        if instance.as_notify_damage().is_some() {
            set.insert(Capability::NotifyDamage);
        }
        if instance.as_notify_killed().is_some() {
            set.insert(Capability::NotifyKilled);
        }
        if instance.as_notify_added().is_some() {
            set.insert(Capability::NotifyAddedToWorld);
        }
        if instance.as_notify_removed().is_some() {
            set.insert(Capability::NotifyRemovedFromWorld);
        }
        if instance.as_notify_owner_changed().is_some() {
            set.insert(Capability::NotifyOwnerChanged);
        }
        set
    }

    /// Add a capability.
    pub fn insert(&mut self, capability: Capability) {
        self.0 |= capability.bit();
    }

    /// Whether `capability` is present.
    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }
}

/// Marks an actor whose destruction is required for its owner's defeat.
///
/// A player with no live `MustBeDestroyed` actors has lost.
#[derive(Debug, Clone, Default)]
pub struct MustBeDestroyed;

impl Trait for MustBeDestroyed {
    fn name(&self) -> &'static str {
        "MustBeDestroyed"
    }
}

/// Rule data describing one trait of an actor type.
///
/// Actor types list these in declaration order; [`TraitInfo::create`] builds
/// the runtime instance when an actor is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraitInfo {
    /// Hit points.
    Health {
        /// Maximum and starting hit points.
        hp: i32,
    },
    /// Cell-to-cell movement.
    Mobile {
        /// Distance covered per frame.
        speed: WDist,
    },
    /// A weapon.
    Armament {
        /// Damage per shot.
        damage: i32,
        /// Maximum firing range.
        range: WDist,
        /// Frames between shots.
        reload_delay: u32,
    },
    /// Can capture [`TraitInfo::Capturable`] actors.
    Captures {
        /// Distance at which capture happens.
        range: WDist,
    },
    /// Can be captured.
    Capturable,
    /// Can be sold back for cash.
    Sellable {
        /// Build cost.
        value: i64,
        /// Share of `value` refunded, in percent.
        refund_percent: u32,
    },
    /// Spawns another actor when killed.
    SpawnActorOnDeath {
        /// Actor type spawned.
        actor: String,
    },
    /// Idles around the spawn point using the world RNG.
    Wanders {
        /// Maximum distance from the current cell, in cells.
        radius: i32,
        /// Minimum idle frames between wanders.
        min_delay: u32,
        /// Maximum idle frames between wanders.
        max_delay: u32,
    },
    /// See [`MustBeDestroyed`].
    MustBeDestroyed,
}

impl TraitInfo {
    /// Name of the trait this info creates.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Health { .. } => "Health",
            Self::Mobile { .. } => "Mobile",
            Self::Armament { .. } => "Armament",
            Self::Captures { .. } => "Captures",
            Self::Capturable => "Capturable",
            Self::Sellable { .. } => "Sellable",
            Self::SpawnActorOnDeath { .. } => "SpawnActorOnDeath",
            Self::Wanders { .. } => "Wanders",
            Self::MustBeDestroyed => "MustBeDestroyed",
        }
    }

    /// Instantiate the trait for a new actor.
    #[must_use]
    pub fn create(&self, init: &ActorInit) -> Box<dyn Trait> {
        match self {
            Self::Health { hp } => Box::new(Health::new(*hp)),
            Self::Mobile { speed } => Box::new(Mobile::new(*speed)),
            Self::Armament {
                damage,
                range,
                reload_delay,
            } => Box::new(Armament::new(*damage, *range, *reload_delay)),
            Self::Captures { range } => Box::new(Captures::new(*range)),
            Self::Capturable => Box::new(Capturable::new(init.owner)),
            Self::Sellable {
                value,
                refund_percent,
            } => Box::new(Sellable::new(*value, *refund_percent)),
            Self::SpawnActorOnDeath { actor } => Box::new(SpawnActorOnDeath::new(actor.clone())),
            Self::Wanders {
                radius,
                min_delay,
                max_delay,
            } => Box::new(Wanders::new(*radius, *min_delay, *max_delay)),
            Self::MustBeDestroyed => Box::new(MustBeDestroyed),
        }
    }
}
