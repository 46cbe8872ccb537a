//! Session setup: map identity, player roster and the shared seed.
//!
//! A [`Session`] is everything every peer must agree on before frame 1. It is
//! written verbatim into replay headers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::connection::ClientId;
use crate::math::{CPos, WAngle};

/// Index of a player in the session roster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u8);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// An actor placed on the map at game start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorReference {
    /// Actor type name in the ruleset.
    pub type_name: String,
    /// Owning player, `None` for neutral.
    #[serde(default)]
    pub owner: Option<PlayerId>,
    /// Spawn cell.
    pub location: CPos,
    /// Initial facing.
    #[serde(default)]
    pub facing: WAngle,
}

/// Map identity and its preplaced actors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MapInfo {
    /// Map identifier, recorded in replays.
    pub id: String,
    /// Width in cells.
    pub width: i32,
    /// Height in cells.
    pub height: i32,
    /// Actors spawned before the first frame, in spawn order.
    #[serde(default)]
    pub actors: Vec<ActorReference>,
}

impl MapInfo {
    /// Whether `cell` lies inside the map bounds.
    #[must_use]
    pub const fn contains(&self, cell: CPos) -> bool {
        cell.x >= 0 && cell.y >= 0 && cell.x < self.width && cell.y < self.height
    }

    /// Clamp a cell into the map bounds.
    #[must_use]
    pub fn clamp(&self, cell: CPos) -> CPos {
        CPos::new(
            cell.x.clamp(0, (self.width - 1).max(0)),
            cell.y.clamp(0, (self.height - 1).max(0)),
        )
    }
}

/// A roster slot as configured in the lobby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerReference {
    /// Display name.
    pub name: String,
    /// Controlling client, `None` for non-playable slots (neutral, creeps).
    #[serde(default)]
    pub client_id: Option<ClientId>,
    /// Team number; players sharing a non-zero team are allied.
    #[serde(default)]
    pub team: u8,
    /// Starting cash.
    #[serde(default)]
    pub starting_cash: i64,
}

/// Everything peers agree on before the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    /// Map to play on.
    pub map: MapInfo,
    /// Player roster; index is the [`PlayerId`].
    pub players: Vec<PlayerReference>,
    /// Seed for the shared world RNG.
    pub seed: u64,
}

impl Session {
    /// Ids of every client controlling a player, ascending and deduplicated.
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.players.iter().filter_map(|p| p.client_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

/// Outcome of the game for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WinState {
    /// Still playing.
    #[default]
    Undefined,
    /// Won the game.
    Won,
    /// Lost the game.
    Lost,
}

/// A player in a running game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Roster index.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Controlling client, if any.
    pub client_id: Option<ClientId>,
    /// Team number.
    pub team: u8,
    /// Current cash.
    pub cash: i64,
    /// Current outcome.
    pub win_state: WinState,
    /// Set once the controlling client has left the game.
    pub disconnected: bool,
}

impl Player {
    pub(crate) fn from_reference(id: PlayerId, reference: &PlayerReference) -> Self {
        Self {
            id,
            name: reference.name.clone(),
            client_id: reference.client_id,
            team: reference.team,
            cash: reference.starting_cash,
            win_state: WinState::Undefined,
            disconnected: false,
        }
    }

    /// Whether this player is controlled by a client.
    #[must_use]
    pub const fn is_playable(&self) -> bool {
        self.client_id.is_some()
    }

    /// Whether two players are on the same side.
    #[must_use]
    pub fn is_allied_with(&self, other: &Self) -> bool {
        self.id == other.id || (self.team != 0 && self.team == other.team)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str, client: Option<ClientId>, team: u8) -> PlayerReference {
        PlayerReference {
            name: name.to_string(),
            client_id: client,
            team,
            starting_cash: 0,
        }
    }

    #[test]
    fn test_client_ids_sorted_and_unique() {
        let session = Session {
            map: MapInfo::default(),
            players: vec![
                reference("b", Some(2), 0),
                reference("neutral", None, 0),
                reference("a", Some(1), 0),
                reference("a2", Some(1), 0),
            ],
            seed: 1,
        };
        assert_eq!(session.client_ids(), vec![1, 2]);
    }

    #[test]
    fn test_alliance_by_team() {
        let a = Player::from_reference(PlayerId(0), &reference("a", Some(1), 1));
        let b = Player::from_reference(PlayerId(1), &reference("b", Some(2), 1));
        let c = Player::from_reference(PlayerId(2), &reference("c", Some(3), 0));
        assert!(a.is_allied_with(&b));
        assert!(!a.is_allied_with(&c));
        assert!(c.is_allied_with(&c));
    }

    #[test]
    fn test_map_bounds() {
        let map = MapInfo {
            id: "test".to_string(),
            width: 10,
            height: 5,
            actors: Vec::new(),
        };
        assert!(map.contains(CPos::new(9, 4)));
        assert!(!map.contains(CPos::new(10, 0)));
        assert_eq!(map.clamp(CPos::new(-3, 8)), CPos::new(0, 4));
    }
}
