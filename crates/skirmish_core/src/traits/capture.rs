//! Capturing actors: engineers take over buildings.

use crate::actor::ActorId;
use crate::math::{CPos, WDist};
use crate::order::{MouseButton, MouseInput, Order};
use crate::session::PlayerId;
use crate::sync::SyncHasher;
use crate::traits::mobile::{Mobile, MOVE, STOP};
use crate::traits::{IssueOrder, NotifyOwnerChanged, ResolveOrder, Tick, Trait};
use crate::world::World;

/// Order string for capturing an actor.
pub const CAPTURE_ACTOR: &str = "CaptureActor";

/// Walks up to a [`Capturable`] actor and hands it to its own owner,
/// consuming itself in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captures {
    range: WDist,
    target: Option<ActorId>,
}

impl Captures {
    /// A capturer with no target.
    #[must_use]
    pub const fn new(range: WDist) -> Self {
        Self {
            range,
            target: None,
        }
    }

    /// Actor being captured.
    #[must_use]
    pub const fn target(&self) -> Option<ActorId> {
        self.target
    }
}

impl Trait for Captures {
    fn name(&self) -> &'static str {
        "Captures"
    }

    fn as_tick(&mut self) -> Option<&mut dyn Tick> {
        Some(self)
    }

    fn as_resolve_order(&mut self) -> Option<&mut dyn ResolveOrder> {
        Some(self)
    }

    fn as_issue_order(&self) -> Option<&dyn IssueOrder> {
        Some(self)
    }

    fn write_sync(&self, hasher: &mut SyncHasher) {
        hasher.field("target", &self.target);
    }
}

impl Tick for Captures {
    fn tick(&mut self, self_id: ActorId, world: &mut World) {
        let Some(target) = self.target else {
            return;
        };
        let capturable = world.is_alive(target) && world.actor_trait::<Capturable>(target).is_some();
        if !capturable || !world.is_enemy(self_id, target) {
            self.target = None;
            return;
        }

        let (Some(own), Some(victim)) = (world.actor(self_id), world.actor(target)) else {
            return;
        };
        let (own_center, owner, victim_center, victim_cell) =
            (own.center(), own.owner(), victim.center(), victim.location());

        if own_center.within(victim_center, self.range) {
            world.transfer_ownership(target, owner);
            world.remove(self_id);
            self.target = None;
        } else if let Some(mobile) = world.actor_trait_mut::<Mobile>(self_id) {
            if mobile.destinations().back() != Some(&victim_cell) {
                mobile.move_to(victim_cell, false);
            }
        }
    }
}

impl ResolveOrder for Captures {
    fn resolve_order(&mut self, _self_id: ActorId, order: &Order, world: &mut World) {
        match order.order_string.as_str() {
            CAPTURE_ACTOR => {
                if let Some(target) = order.target_actor {
                    if world.actor_trait::<Capturable>(target).is_some() {
                        self.target = Some(target);
                    }
                }
            }
            STOP => self.target = None,
            MOVE if !order.queued => self.target = None,
            _ => {}
        }
    }
}

impl IssueOrder for Captures {
    fn issue_order(
        &self,
        self_id: ActorId,
        world: &World,
        _cell: CPos,
        input: &MouseInput,
        under_cursor: Option<ActorId>,
    ) -> Option<Order> {
        if input.button != MouseButton::Right {
            return None;
        }
        let target = under_cursor?;
        if world.actor_trait::<Capturable>(target).is_none() || !world.is_enemy(self_id, target) {
            return None;
        }
        Some(Order::new(CAPTURE_ACTOR, Some(self_id)).with_target_actor(target))
    }
}

/// Allows the actor to be captured by [`Captures`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capturable {
    original_owner: Option<PlayerId>,
    times_captured: u32,
}

impl Capturable {
    /// A capturable actor that starts with `owner`.
    #[must_use]
    pub const fn new(owner: Option<PlayerId>) -> Self {
        Self {
            original_owner: owner,
            times_captured: 0,
        }
    }

    /// Owner at spawn.
    #[must_use]
    pub const fn original_owner(&self) -> Option<PlayerId> {
        self.original_owner
    }

    /// How often the actor changed hands.
    #[must_use]
    pub const fn times_captured(&self) -> u32 {
        self.times_captured
    }
}

impl Trait for Capturable {
    fn name(&self) -> &'static str {
        "Capturable"
    }

    fn as_notify_owner_changed(&mut self) -> Option<&mut dyn NotifyOwnerChanged> {
        Some(self)
    }

    fn write_sync(&self, hasher: &mut SyncHasher) {
        hasher.field("times_captured", &self.times_captured);
    }
}

impl NotifyOwnerChanged for Capturable {
    fn owner_changed(
        &mut self,
        _self_id: ActorId,
        _old_owner: Option<PlayerId>,
        _new_owner: Option<PlayerId>,
        _world: &mut World,
    ) {
        self.times_captured += 1;
    }
}
