//! A direct-fire weapon.

use crate::actor::ActorId;
use crate::math::{CPos, WDist};
use crate::order::{MouseButton, MouseInput, Order};
use crate::session::PlayerId;
use crate::sync::SyncHasher;
use crate::traits::mobile::{Mobile, MOVE, STOP};
use crate::traits::{
    AttackInfo, IssueOrder, NotifyDamage, NotifyOwnerChanged, ResolveOrder, Tick, Trait,
};
use crate::world::World;

/// Order string for attacking an actor.
pub const ATTACK: &str = "Attack";

/// Fires at a single target actor whenever it is in range and reloaded.
///
/// If the actor is also [`Mobile`], an out-of-range target is chased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Armament {
    damage: i32,
    range: WDist,
    reload_delay: u32,
    reload_remaining: u32,
    target: Option<ActorId>,
}

impl Armament {
    /// A loaded weapon with no target.
    #[must_use]
    pub const fn new(damage: i32, range: WDist, reload_delay: u32) -> Self {
        Self {
            damage,
            range,
            reload_delay,
            reload_remaining: 0,
            target: None,
        }
    }

    /// Damage per shot.
    #[must_use]
    pub const fn damage(&self) -> i32 {
        self.damage
    }

    /// Current target.
    #[must_use]
    pub const fn target(&self) -> Option<ActorId> {
        self.target
    }

    /// Frames until the next shot is possible.
    #[must_use]
    pub const fn reload_remaining(&self) -> u32 {
        self.reload_remaining
    }
}

impl Trait for Armament {
    fn name(&self) -> &'static str {
        "Armament"
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

    fn as_notify_damage(&mut self) -> Option<&mut dyn NotifyDamage> {
        Some(self)
    }

    fn as_notify_owner_changed(&mut self) -> Option<&mut dyn NotifyOwnerChanged> {
        Some(self)
    }

    fn write_sync(&self, hasher: &mut SyncHasher) {
        hasher.field("target", &self.target);
        hasher.field("reload_remaining", &self.reload_remaining);
    }
}

impl Tick for Armament {
    fn tick(&mut self, self_id: ActorId, world: &mut World) {
        self.reload_remaining = self.reload_remaining.saturating_sub(1);

        let Some(target) = self.target else {
            return;
        };
        if !world.is_alive(target) {
            self.target = None;
            return;
        }

        let (Some(own), Some(victim)) = (world.actor(self_id), world.actor(target)) else {
            return;
        };
        let (own_center, victim_center, victim_cell) =
            (own.center(), victim.center(), victim.location());

        if !own_center.within(victim_center, self.range) {
            if let Some(mobile) = world.actor_trait_mut::<Mobile>(self_id) {
                if mobile.destinations().back() != Some(&victim_cell) {
                    mobile.move_to(victim_cell, false);
                }
            }
            return;
        }

        if let Some(mobile) = world.actor_trait_mut::<Mobile>(self_id) {
            mobile.stop();
        }

        if self.reload_remaining == 0 {
            world.inflict_damage(Some(self_id), target, self.damage);
            self.reload_remaining = self.reload_delay;
        }
    }
}

impl ResolveOrder for Armament {
    fn resolve_order(&mut self, self_id: ActorId, order: &Order, world: &mut World) {
        match order.order_string.as_str() {
            ATTACK => {
                if let Some(target) = order.target_actor {
                    if target != self_id && world.is_alive(target) {
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

impl IssueOrder for Armament {
    fn issue_order(
        &self,
        self_id: ActorId,
        world: &World,
        _cell: CPos,
        input: &MouseInput,
        under_cursor: Option<ActorId>,
    ) -> Option<Order> {
        if input.button != MouseButton::Right || input.modifiers.alt {
            return None;
        }
        let target = under_cursor?;
        if target == self_id || !world.is_alive(target) {
            return None;
        }
        let hostile = world.is_enemy(self_id, target);
        if !hostile && !input.modifiers.ctrl {
            return None;
        }
        Some(
            Order::new(ATTACK, Some(self_id))
                .with_target_actor(target)
                .queued(input.modifiers.shift),
        )
    }
}

impl NotifyDamage for Armament {
    fn damaged(&mut self, self_id: ActorId, attack: &AttackInfo, world: &mut World) {
        if attack.killed || self.target.is_some() {
            return;
        }
        if let Some(attacker) = attack.attacker {
            if attacker != self_id && world.is_alive(attacker) && world.is_enemy(self_id, attacker)
            {
                self.target = Some(attacker);
            }
        }
    }
}

impl NotifyOwnerChanged for Armament {
    fn owner_changed(
        &mut self,
        _self_id: ActorId,
        _old_owner: Option<PlayerId>,
        _new_owner: Option<PlayerId>,
        _world: &mut World,
    ) {
        self.target = None;
    }
}
