//! Idle wandering driven by the shared world RNG.

use rand::Rng;

use crate::actor::ActorId;
use crate::math::CPos;
use crate::sync::SyncHasher;
use crate::traits::mobile::Mobile;
use crate::traits::{Tick, Trait};
use crate::world::World;

/// Periodically sends an idle [`Mobile`] actor to a random nearby cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wanders {
    radius: i32,
    min_delay: u32,
    max_delay: u32,
    countdown: u32,
}

impl Wanders {
    /// Wander up to `radius` cells every `min_delay..=max_delay` idle frames.
    #[must_use]
    pub fn new(radius: i32, min_delay: u32, max_delay: u32) -> Self {
        Self {
            radius: radius.max(0),
            min_delay,
            max_delay: max_delay.max(min_delay),
            countdown: min_delay,
        }
    }

    /// Idle frames left before the next wander.
    #[must_use]
    pub const fn countdown(&self) -> u32 {
        self.countdown
    }
}

impl Trait for Wanders {
    fn name(&self) -> &'static str {
        "Wanders"
    }

    fn as_tick(&mut self) -> Option<&mut dyn Tick> {
        Some(self)
    }

    fn write_sync(&self, hasher: &mut SyncHasher) {
        hasher.field("countdown", &self.countdown);
    }
}

impl Tick for Wanders {
    fn tick(&mut self, self_id: ActorId, world: &mut World) {
        let idle = world
            .actor_trait::<Mobile>(self_id)
            .is_some_and(Mobile::is_idle);
        if !idle {
            return;
        }
        if self.countdown > 0 {
            self.countdown -= 1;
            return;
        }

        let Some(here) = world.actor(self_id).map(|a| a.location()) else {
            return;
        };
        let rng = world.shared_random();
        let dx = rng.gen_range(-self.radius..=self.radius);
        let dy = rng.gen_range(-self.radius..=self.radius);
        self.countdown = rng.gen_range(self.min_delay..=self.max_delay);

        let destination = world.map().clamp(CPos::new(here.x + dx, here.y + dy));
        if let Some(mobile) = world.actor_trait_mut::<Mobile>(self_id) {
            mobile.move_to(destination, false);
        }
    }
}
