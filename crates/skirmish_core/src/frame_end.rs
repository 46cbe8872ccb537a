//! Deferred structural mutations.
//!
//! Traits never add or remove actors directly. They enqueue a
//! [`FrameEndTask`], and the world applies the queue after every trait has
//! ticked. Tasks are plain values so a pending queue can be logged and diffed.

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::math::{CPos, WAngle};
use crate::session::PlayerId;

/// A structural change applied at the end of the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameEndTask {
    /// Instantiate an actor under an already reserved id.
    CreateActor {
        /// Reserved id.
        id: ActorId,
        /// Actor type in the ruleset.
        type_name: String,
        /// Owning player.
        owner: Option<PlayerId>,
        /// Spawn cell.
        location: CPos,
        /// Initial facing.
        facing: WAngle,
    },
    /// Remove a dead actor from the registry.
    RemoveActor(ActorId),
    /// Hand an actor to another player.
    ChangeOwner {
        /// Actor to transfer.
        actor: ActorId,
        /// New owner.
        new_owner: Option<PlayerId>,
    },
    /// Give or take cash from a player.
    GiveCash {
        /// Receiving player.
        player: PlayerId,
        /// Amount, negative to take.
        amount: i64,
    },
}

impl FrameEndTask {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CreateActor { .. } => "CreateActor",
            Self::RemoveActor(_) => "RemoveActor",
            Self::ChangeOwner { .. } => "ChangeOwner",
            Self::GiveCash { .. } => "GiveCash",
        }
    }
}
