//! Test fixtures and helpers.
//!
//! A small ruleset and pre-built sessions and worlds for consistent testing.

use std::sync::Arc;

use skirmish_core::connection::ClientId;
use skirmish_core::math::{CPos, WAngle};
use skirmish_core::rules::Ruleset;
use skirmish_core::session::{ActorReference, MapInfo, PlayerId, PlayerReference, Session};
use skirmish_core::settings::LockstepSettings;
use skirmish_core::world::World;

/// First player, controlled by client 1.
pub const P1: PlayerId = PlayerId(0);
/// Second player, controlled by client 2.
pub const P2: PlayerId = PlayerId(1);

/// Seed of every fixture session.
pub const FIXTURE_SEED: u64 = 0x5eed;

/// Actor types covering every built-in trait.
pub const RULES: &str = r#"(
    actors: {
        "e1": (traits: [Health(hp: 50), Mobile(speed: 256)]),
        "tank": (traits: [
            Health(hp: 100),
            Armament(damage: 25, range: 3072, reload_delay: 10),
            Mobile(speed: 256),
            SpawnActorOnDeath(actor: "tank.husk"),
        ]),
        "tank.husk": (traits: [Health(hp: 20)]),
        "fact": (traits: [
            Health(hp: 1000),
            Capturable,
            Sellable(value: 2000, refund_percent: 50),
            MustBeDestroyed,
        ]),
        "engineer": (traits: [Health(hp: 25), Captures(range: 1024), Mobile(speed: 256)]),
        "scout": (traits: [
            Health(hp: 30),
            Mobile(speed: 512),
            Wanders(radius: 4, min_delay: 5, max_delay: 20),
        ]),
    },
)"#;

/// Parsed [`RULES`].
///
/// # Panics
///
/// Panics if the fixture ruleset fails to parse.
#[must_use]
pub fn rules() -> Arc<Ruleset> {
    Arc::new(Ruleset::from_ron(RULES).expect("fixture rules parse"))
}

/// A preplaced actor facing north.
#[must_use]
pub fn actor_at(type_name: &str, owner: PlayerId, x: i32, y: i32) -> ActorReference {
    ActorReference {
        type_name: type_name.to_string(),
        owner: Some(owner),
        location: CPos::new(x, y),
        facing: WAngle(0),
    }
}

/// A roster entry without a team.
#[must_use]
pub fn player(name: &str, client_id: Option<ClientId>) -> PlayerReference {
    PlayerReference {
        name: name.to_string(),
        client_id,
        team: 0,
        starting_cash: 1000,
    }
}

/// Alice (client 1) against Bob (client 2) on a 32x32 map.
#[must_use]
pub fn two_player_session(actors: &[ActorReference]) -> Session {
    Session {
        map: MapInfo {
            id: "test-map".to_string(),
            width: 32,
            height: 32,
            actors: actors.to_vec(),
        },
        players: vec![player("alice", Some(1)), player("bob", Some(2))],
        seed: FIXTURE_SEED,
    }
}

/// Like [`two_player_session`] but Bob has no client, so only client 1 sends
/// orders.
#[must_use]
pub fn solo_session(actors: &[ActorReference]) -> Session {
    let mut session = two_player_session(actors);
    session.players[1].client_id = None;
    session
}

/// A busy two-player map: bases, tanks, engineers and wandering scouts.
#[must_use]
pub fn skirmish_session() -> Session {
    two_player_session(&[
        actor_at("fact", P1, 2, 2),
        actor_at("fact", P2, 28, 28),
        actor_at("tank", P1, 4, 4),
        actor_at("tank", P1, 5, 4),
        actor_at("tank", P2, 26, 26),
        actor_at("tank", P2, 25, 26),
        actor_at("engineer", P1, 3, 5),
        actor_at("engineer", P2, 27, 25),
        actor_at("scout", P1, 10, 10),
        actor_at("scout", P2, 20, 20),
    ])
}

/// Build a world for `session` with the fixture rules.
///
/// # Panics
///
/// Panics if the session references unknown actor types or players.
#[must_use]
pub fn world_for(session: &Session) -> World {
    World::new(rules(), session, &LockstepSettings::default()).expect("fixture world builds")
}

/// [`world_for`] a [`two_player_session`].
#[must_use]
pub fn two_player_world(actors: &[ActorReference]) -> World {
    world_for(&two_player_session(actors))
}
