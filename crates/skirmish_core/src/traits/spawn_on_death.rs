//! Leave something behind when destroyed (husks, survivors).

use tracing::warn;

use crate::actor::ActorId;
use crate::sync::SyncHasher;
use crate::traits::{AttackInfo, NotifyKilled, NotifyRemovedFromWorld, Trait};
use crate::world::World;

/// Spawns an actor in place of its owner when the owner is killed.
///
/// The spawn is requested while the dead actor's removal task runs, so it
/// lands in the same frame-end drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnActorOnDeath {
    actor: String,
    killed: bool,
}

impl SpawnActorOnDeath {
    /// Spawn `actor` on death.
    #[must_use]
    pub const fn new(actor: String) -> Self {
        Self {
            actor,
            killed: false,
        }
    }

    /// Actor type spawned.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }
}

impl Trait for SpawnActorOnDeath {
    fn name(&self) -> &'static str {
        "SpawnActorOnDeath"
    }

    fn as_notify_killed(&mut self) -> Option<&mut dyn NotifyKilled> {
        Some(self)
    }

    fn as_notify_removed(&mut self) -> Option<&mut dyn NotifyRemovedFromWorld> {
        Some(self)
    }

    fn write_sync(&self, hasher: &mut SyncHasher) {
        hasher.field("killed", &self.killed);
    }
}

impl NotifyKilled for SpawnActorOnDeath {
    fn killed(&mut self, _self_id: ActorId, _attack: &AttackInfo, _world: &mut World) {
        self.killed = true;
    }
}

impl NotifyRemovedFromWorld for SpawnActorOnDeath {
    fn removed_from_world(&mut self, self_id: ActorId, world: &mut World) {
        if !self.killed {
            return;
        }
        let Some(actor) = world.actor(self_id) else {
            return;
        };
        let (location, owner, facing) = (actor.location(), actor.owner(), actor.facing());
        if let Err(e) = world.create_actor_facing(&self.actor, location, owner, facing) {
            warn!(actor = %self_id, spawn = %self.actor, error = %e, "Failed to spawn on death");
        }
    }
}
