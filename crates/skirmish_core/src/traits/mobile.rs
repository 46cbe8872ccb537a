//! Cell-to-cell movement.

use std::collections::VecDeque;

use crate::actor::ActorId;
use crate::math::{CPos, WAngle, WDist};
use crate::order::{MouseButton, MouseInput, Order};
use crate::sync::SyncHasher;
use crate::traits::{IssueOrder, ResolveOrder, Tick, Trait};
use crate::world::World;

/// Order string for moving to a cell.
pub const MOVE: &str = "Move";
/// Order string for cancelling the current activity.
pub const STOP: &str = "Stop";

/// Moves the actor in straight lines through a queue of destination cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mobile {
    speed: WDist,
    destinations: VecDeque<CPos>,
}

impl Mobile {
    /// A stationary mover covering `speed` per frame.
    #[must_use]
    pub fn new(speed: WDist) -> Self {
        Self {
            speed,
            destinations: VecDeque::new(),
        }
    }

    /// Distance covered per frame.
    #[must_use]
    pub const fn speed(&self) -> WDist {
        self.speed
    }

    /// Pending destinations, current first.
    #[must_use]
    pub fn destinations(&self) -> &VecDeque<CPos> {
        &self.destinations
    }

    /// Whether there is nowhere left to go.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Head for `cell`, either replacing or appending to the current route.
    pub fn move_to(&mut self, cell: CPos, queued: bool) {
        if !queued {
            self.destinations.clear();
        }
        self.destinations.push_back(cell);
    }

    /// Drop every pending destination.
    pub fn stop(&mut self) {
        self.destinations.clear();
    }
}

impl Trait for Mobile {
    fn name(&self) -> &'static str {
        "Mobile"
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
        hasher.field("destinations", &self.destinations);
    }
}

impl Tick for Mobile {
    fn tick(&mut self, self_id: ActorId, world: &mut World) {
        let Some(&cell) = self.destinations.front() else {
            return;
        };
        let Some(center) = world.actor(self_id).map(|a| a.center()) else {
            return;
        };

        let target = cell.center();
        let delta = target - center;
        let facing = WAngle::from_vector(delta.x, delta.y);
        let step = self.speed.to_cells();

        let next = if center.distance_squared(target) <= step.saturating_mul(step) {
            self.destinations.pop_front();
            target
        } else {
            center + delta.normalize().scale(step)
        };

        world.set_actor_position(self_id, next, facing);
    }
}

impl ResolveOrder for Mobile {
    fn resolve_order(&mut self, _self_id: ActorId, order: &Order, world: &mut World) {
        match order.order_string.as_str() {
            MOVE => {
                if let Some(cell) = order.target_location {
                    self.move_to(world.map().clamp(cell), order.queued);
                }
            }
            STOP => self.stop(),
            _ => {}
        }
    }
}

impl IssueOrder for Mobile {
    fn issue_order(
        &self,
        self_id: ActorId,
        _world: &World,
        cell: CPos,
        input: &MouseInput,
        under_cursor: Option<ActorId>,
    ) -> Option<Order> {
        if input.button != MouseButton::Right {
            return None;
        }
        if under_cursor.is_some() && !input.modifiers.alt {
            return None;
        }
        Some(
            Order::new(MOVE, Some(self_id))
                .with_target_location(cell)
                .queued(input.modifiers.shift),
        )
    }
}
