//! Fixtures for unit tests inside this crate.

use std::sync::Arc;

use crate::math::{CPos, WAngle};
use crate::rules::Ruleset;
use crate::session::{ActorReference, MapInfo, PlayerId, PlayerReference, Session};
use crate::settings::LockstepSettings;
use crate::world::World;

pub(crate) const P1: PlayerId = PlayerId(0);
pub(crate) const P2: PlayerId = PlayerId(1);

pub(crate) const RULES: &str = r#"(
    actors: {
        "e1": (traits: [Health(hp: 50), Mobile(speed: 256)]),
        "tank": (traits: [
            Health(hp: 100),
            Armament(damage: 25, range: 3072, reload_delay: 10),
            Mobile(speed: 256),
            SpawnActorOnDeath(actor: "tank.husk"),
        ]),
        "tank.husk": (traits: [Health(hp: 20)]),
        "fact": (traits: [Health(hp: 1000), Capturable, Sellable(value: 2000, refund_percent: 50), MustBeDestroyed]),
        "engineer": (traits: [Health(hp: 25), Captures(range: 1024), Mobile(speed: 256)]),
    },
)"#;

pub(crate) fn rules() -> Arc<Ruleset> {
    Arc::new(Ruleset::from_ron(RULES).unwrap())
}

pub(crate) fn actor_at(type_name: &str, owner: PlayerId, x: i32, y: i32) -> ActorReference {
    ActorReference {
        type_name: type_name.to_string(),
        owner: Some(owner),
        location: CPos::new(x, y),
        facing: WAngle(0),
    }
}

pub(crate) fn two_player_session(actors: &[ActorReference]) -> Session {
    Session {
        map: MapInfo {
            id: "test-map".to_string(),
            width: 32,
            height: 32,
            actors: actors.to_vec(),
        },
        players: vec![
            PlayerReference {
                name: "alice".to_string(),
                client_id: Some(1),
                team: 0,
                starting_cash: 1000,
            },
            PlayerReference {
                name: "bob".to_string(),
                client_id: Some(2),
                team: 0,
                starting_cash: 1000,
            },
        ],
        seed: 0x5eed,
    }
}

pub(crate) fn two_player_world(actors: &[ActorReference]) -> World {
    World::new(
        rules(),
        &two_player_session(actors),
        &LockstepSettings::default(),
    )
    .unwrap()
}

pub(crate) fn empty_world() -> World {
    two_player_world(&[])
}
