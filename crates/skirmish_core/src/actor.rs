//! Actors: simulation entities composed of an ordered list of traits.
//!
//! Actors never hold references to one another. Everything that points at an
//! actor (order subjects, attack targets, capture targets) stores an
//! [`ActorId`] and resolves it through the world registry, so a destroyed
//! actor simply stops resolving.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::{CPos, WAngle, WPos};
use crate::session::PlayerId;
use crate::traits::{Capability, CapabilitySet, Trait};

/// Unique identifier for actors.
///
/// Ids are handed out in increasing order and never reused within a session,
/// so ascending id order is also registration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActorId(pub u32);

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Initial values handed to every trait constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorInit {
    /// Id reserved for the actor being built.
    pub id: ActorId,
    /// Owning player, `None` for neutral actors.
    pub owner: Option<PlayerId>,
    /// Spawn cell.
    pub location: CPos,
    /// Initial facing.
    pub facing: WAngle,
}

/// One trait instance plus the capabilities it exposes.
///
/// The instance is `None` only while the world has lent it out to run one of
/// its capability methods.
#[derive(Debug)]
pub(crate) struct TraitSlot {
    pub(crate) instance: Option<Box<dyn Trait>>,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) name: &'static str,
}

impl TraitSlot {
    pub(crate) fn new(mut instance: Box<dyn Trait>) -> Self {
        let capabilities = CapabilitySet::probe(&mut *instance);
        let name = instance.name();
        Self {
            instance: Some(instance),
            capabilities,
            name,
        }
    }
}

/// A simulation entity.
#[derive(Debug)]
pub struct Actor {
    id: ActorId,
    type_name: String,
    pub(crate) owner: Option<PlayerId>,
    pub(crate) location: CPos,
    pub(crate) center: WPos,
    pub(crate) facing: WAngle,
    pub(crate) dead: bool,
    pub(crate) traits: Vec<TraitSlot>,
}

impl Actor {
    pub(crate) fn new(init: &ActorInit, type_name: String, traits: Vec<Box<dyn Trait>>) -> Self {
        Self {
            id: init.id,
            type_name,
            owner: init.owner,
            location: init.location,
            center: init.location.center(),
            facing: init.facing,
            dead: false,
            traits: traits.into_iter().map(TraitSlot::new).collect(),
        }
    }

    /// Unique id.
    #[must_use]
    pub const fn id(&self) -> ActorId {
        self.id
    }

    /// Name of the actor type in the ruleset.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Owning player.
    #[must_use]
    pub const fn owner(&self) -> Option<PlayerId> {
        self.owner
    }

    /// Current cell.
    #[must_use]
    pub const fn location(&self) -> CPos {
        self.location
    }

    /// Continuous center position.
    #[must_use]
    pub const fn center(&self) -> WPos {
        self.center
    }

    /// Current facing.
    #[must_use]
    pub const fn facing(&self) -> WAngle {
        self.facing
    }

    /// Whether the actor has been removed or killed this frame.
    ///
    /// Dead actors stay in the registry until the frame-end tasks run.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.dead
    }

    /// Number of trait slots, including any currently lent out.
    #[must_use]
    pub fn trait_count(&self) -> usize {
        self.traits.len()
    }

    /// Trait names in declaration order.
    pub fn trait_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.traits.iter().map(|slot| slot.name)
    }

    /// First trait of concrete type `T`.
    #[must_use]
    pub fn trait_of<T: Trait>(&self) -> Option<&T> {
        self.traits_of::<T>().next()
    }

    /// Mutable access to the first trait of concrete type `T`.
    pub fn trait_of_mut<T: Trait>(&mut self) -> Option<&mut T> {
        self.traits
            .iter_mut()
            .filter_map(|slot| slot.instance.as_deref_mut())
            .find_map(|t| t.as_any_mut().downcast_mut::<T>())
    }

    /// All traits of concrete type `T`, in declaration order.
    pub fn traits_of<T: Trait>(&self) -> impl Iterator<Item = &T> + '_ {
        self.traits
            .iter()
            .filter_map(|slot| slot.instance.as_deref())
            .filter_map(|t| t.as_any().downcast_ref::<T>())
    }

    /// Whether any trait of concrete type `T` is attached.
    #[must_use]
    pub fn has_trait<T: Trait>(&self) -> bool {
        self.trait_of::<T>().is_some()
    }

    /// Indices of the trait slots exposing `capability`, in declaration order.
    pub fn trait_indices(&self, capability: Capability) -> impl Iterator<Item = usize> + '_ {
        self.traits
            .iter()
            .enumerate()
            .filter(move |(_, slot)| slot.capabilities.contains(capability))
            .map(|(index, _)| index)
    }

    /// Whether any trait exposes `capability`.
    #[must_use]
    pub fn implements(&self, capability: Capability) -> bool {
        self.trait_indices(capability).next().is_some()
    }

    /// Iterate the attached trait instances.
    pub(crate) fn trait_instances(&self) -> impl Iterator<Item = &dyn Trait> + '_ {
        self.traits.iter().filter_map(|slot| slot.instance.as_deref())
    }
}
