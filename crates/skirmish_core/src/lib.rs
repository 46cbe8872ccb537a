//! # Skirmish Core
//!
//! Deterministic lockstep simulation core for the Skirmish RTS engine.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No sockets (network transports plug in through [`connection::Connection`])
//! - No system randomness (the world RNG is seeded from the session)
//! - No floating-point math (uses fixed-point and integer lookup tables)
//!
//! This separation enables:
//! - Lockstep multiplayer (identical simulation across clients)
//! - Headless server builds
//! - Replay recording and verification
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`actor`] - Actors, ids and per-actor trait slots
//! - [`traits`] - Capability interfaces and the built-in trait plugins
//! - [`order`] - Player intents and their wire encoding
//! - [`world`] - The aggregate root that advances one frame per tick
//! - [`frame_end`] - Deferred structural mutations
//! - [`sync`] - Synchronized-state hashing
//! - [`sync_report`] - Per-frame sync dumps for desync post-mortems
//! - [`order_manager`] - The lockstep barrier
//! - [`connection`] - Transports feeding the order manager
//! - [`replay`] - Replay recording and playback
//! - [`math`] - Fixed-point math utilities

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod actor;
pub mod connection;
pub mod error;
pub mod frame_end;
pub mod math;
pub mod order;
pub mod order_manager;
pub mod replay;
pub mod rules;
pub mod session;
pub mod settings;
pub mod sync;
pub mod sync_report;
pub mod traits;
pub mod world;

#[cfg(test)]
mod test_support;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::actor::{Actor, ActorId, ActorInit};
    pub use crate::connection::{
        ClientId, Connection, ConnectionEvent, ConnectionState, EchoConnection, LocalHub,
    };
    pub use crate::error::{GameError, Result};
    pub use crate::frame_end::FrameEndTask;
    pub use crate::math::{CPos, Fixed, WAngle, WDist, WPos};
    pub use crate::order::{ClientOrder, Modifiers, MouseButton, MouseInput, Order, OrderPacket};
    pub use crate::order_manager::OrderManager;
    pub use crate::replay::{Replay, ReplayPlayer, ReplayRecorder};
    pub use crate::rules::{ActorInfo, Ruleset};
    pub use crate::session::{MapInfo, Player, PlayerId, PlayerReference, Session, WinState};
    pub use crate::settings::LockstepSettings;
    pub use crate::traits::{Trait, TraitInfo};
    pub use crate::world::{TickReport, World, WorldSnapshot};
}
