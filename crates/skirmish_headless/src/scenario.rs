//! Scenario loading.
//!
//! A scenario is a RON file naming the rules, the session (map, roster, seed),
//! how many frames to run, and a script of orders each client issues.
//!
//! ```ron
//! (
//!     name: "tank duel",
//!     rules: File("rules.ron"),
//!     frames: 200,
//!     session: (
//!         map: (id: "duel", width: 16, height: 16, actors: [
//!             (type_name: "tank", owner: Some(0), location: (x: 2, y: 2)),
//!             (type_name: "tank", owner: Some(1), location: (x: 12, y: 2)),
//!         ]),
//!         players: [
//!             (name: "alice", client_id: Some(1), starting_cash: 1000),
//!             (name: "bob", client_id: Some(2), starting_cash: 1000),
//!         ],
//!         seed: 7,
//!     ),
//!     orders: [
//!         (frame: 5, client: 1, order: "Attack", subject: Some(1), target_actor: Some(2)),
//!     ],
//! )
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use skirmish_core::actor::ActorId;
use skirmish_core::connection::ClientId;
use skirmish_core::error::GameError;
use skirmish_core::math::CPos;
use skirmish_core::order::Order;
use skirmish_core::rules::Ruleset;
use skirmish_core::session::Session;
use skirmish_core::settings::LockstepSettings;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// Rules or session rejected by the simulation.
    #[error("Invalid scenario: {0}")]
    Invalid(#[from] GameError),
}

/// Where the actor rules come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RulesSource {
    /// A rules RON file, relative to the scenario file.
    File(PathBuf),
    /// Rules written into the scenario.
    Inline(Ruleset),
}

/// One scripted order.
///
/// Issued by `client` once its world has executed `frame` frames, so with the
/// default latency it applies on `frame + 1 + order_latency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedOrder {
    /// Frames executed before the order is issued.
    pub frame: u32,
    /// Issuing client.
    pub client: ClientId,
    /// Order string, e.g. `"Move"`.
    pub order: String,
    /// Subject actor.
    #[serde(default)]
    pub subject: Option<ActorId>,
    /// Target actor.
    #[serde(default)]
    pub target_actor: Option<ActorId>,
    /// Target cell.
    #[serde(default)]
    pub target_cell: Option<CPos>,
    /// Free-form target.
    #[serde(default)]
    pub target_string: Option<String>,
    /// Integer payload.
    #[serde(default)]
    pub extra_data: Option<u32>,
    /// Queue behind the current activity.
    #[serde(default)]
    pub queued: bool,
}

impl ScriptedOrder {
    /// The order this entry issues.
    #[must_use]
    pub fn to_order(&self) -> Order {
        if self.order == skirmish_core::order::CHAT {
            return Order::chat(self.target_string.clone().unwrap_or_default());
        }
        let mut order = Order::new(self.order.clone(), self.subject).queued(self.queued);
        if let Some(target) = self.target_actor {
            order = order.with_target_actor(target);
        }
        if let Some(cell) = self.target_cell {
            order = order.with_target_location(cell);
        }
        if let Some(target) = &self.target_string {
            order = order.with_target_string(target.clone());
        }
        if let Some(data) = self.extra_data {
            order = order.with_extra_data(data);
        }
        order
    }
}

/// A client dropping out mid-game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedDisconnect {
    /// Frames the leaving client has executed when it goes.
    pub frame: u32,
    /// Leaving client.
    pub client: ClientId,
}

/// A complete scenario configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Actor rules.
    pub rules: RulesSource,
    /// Map, roster and seed.
    pub session: Session,
    /// Frames to run.
    pub frames: u32,
    /// Lockstep tuning.
    #[serde(default)]
    pub settings: LockstepSettings,
    /// Scripted orders, in any order.
    #[serde(default)]
    pub orders: Vec<ScriptedOrder>,
    /// Scripted departures.
    #[serde(default)]
    pub disconnects: Vec<ScriptedDisconnect>,
    /// Directory `File` rules are resolved against; set by [`Scenario::load`].
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let mut scenario = Self::from_ron_str(&contents)?;
        scenario.base_dir = path.parent().map(Path::to_path_buf);
        Ok(scenario)
    }

    /// Load from a RON string.
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = ron::from_str(ron)?;
        Ok(scenario)
    }

    /// Resolve and validate the rules.
    pub fn load_rules(&self) -> Result<Arc<Ruleset>, ScenarioError> {
        let rules = match &self.rules {
            RulesSource::Inline(rules) => {
                rules.validate()?;
                rules.clone()
            }
            RulesSource::File(path) => {
                let path = match &self.base_dir {
                    Some(dir) if path.is_relative() => dir.join(path),
                    _ => path.clone(),
                };
                if !path.exists() {
                    return Err(ScenarioError::FileNotFound(path.display().to_string()));
                }
                Ruleset::load(&path)?
            }
        };
        Ok(Arc::new(rules))
    }

    /// Orders `client` issues after `frame` frames, in script order.
    pub fn orders_at(&self, client: ClientId, frame: u32) -> impl Iterator<Item = Order> + '_ {
        self.orders
            .iter()
            .filter(move |o| o.client == client && o.frame == frame)
            .map(ScriptedOrder::to_order)
    }

    /// Whether `client` leaves after `frame` frames.
    #[must_use]
    pub fn leaves_at(&self, client: ClientId, frame: u32) -> bool {
        self.disconnects
            .iter()
            .any(|d| d.client == client && d.frame == frame)
    }

    /// The same scenario with another session seed.
    #[must_use]
    pub fn with_seed(&self, seed: u64) -> Self {
        let mut scenario = self.clone();
        scenario.session.seed = seed;
        scenario
    }

    /// Check that the rules load and that every actor the session places and
    /// every client the script names exist.
    pub fn validate(&self) -> Result<Arc<Ruleset>, ScenarioError> {
        let rules = self.load_rules()?;
        for actor in &self.session.map.actors {
            rules.actor(&actor.type_name)?;
        }
        let clients = self.session.client_ids();
        let unknown = self
            .orders
            .iter()
            .map(|o| o.client)
            .chain(self.disconnects.iter().map(|d| d.client))
            .find(|client| !clients.contains(client));
        if let Some(client) = unknown {
            return Err(GameError::InvalidState(format!(
                "script names client {client}, which controls no player"
            ))
            .into());
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUEL: &str = r#"(
        name: "duel",
        rules: Inline((actors: {
            "tank": (traits: [Health(hp: 100), Mobile(speed: 256), Armament(damage: 25, range: 1536, reload_delay: 10)]),
        })),
        frames: 40,
        session: (
            map: (id: "duel", width: 16, height: 16, actors: [
                (type_name: "tank", owner: Some(0), location: (x: 2, y: 2)),
                (type_name: "tank", owner: Some(1), location: (x: 3, y: 2)),
            ]),
            players: [
                (name: "alice", client_id: Some(1), starting_cash: 1000),
                (name: "bob", client_id: Some(2), starting_cash: 1000),
            ],
            seed: 7,
        ),
        orders: [
            (frame: 5, client: 1, order: "Attack", subject: Some(1), target_actor: Some(2)),
            (frame: 6, client: 2, order: "Chat", target_string: Some("gg")),
        ],
    )"#;

    #[test]
    fn test_parse_inline_scenario() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        assert_eq!(scenario.frames, 40);
        assert_eq!(scenario.settings, LockstepSettings::default());
        let rules = scenario.validate().unwrap();
        assert!(rules.actor("tank").is_ok());
    }

    #[test]
    fn test_scripted_orders_by_frame() {
        let scenario = Scenario::from_ron_str(DUEL).unwrap();
        let attack: Vec<Order> = scenario.orders_at(1, 5).collect();
        assert_eq!(attack.len(), 1);
        assert_eq!(attack[0].target_actor, Some(ActorId(2)));
        assert_eq!(scenario.orders_at(2, 5).count(), 0);

        let chat: Vec<Order> = scenario.orders_at(2, 6).collect();
        assert!(chat[0].is_immediate);
    }

    #[test]
    fn test_unknown_client_rejected() {
        let mut scenario = Scenario::from_ron_str(DUEL).unwrap();
        scenario.orders[0].client = 9;
        assert!(matches!(scenario.validate(), Err(ScenarioError::Invalid(_))));
    }

    #[test]
    fn test_unknown_actor_type_rejected() {
        let mut scenario = Scenario::from_ron_str(DUEL).unwrap();
        scenario.session.map.actors[0].type_name = "mammoth".to_string();
        assert!(matches!(
            scenario.validate(),
            Err(ScenarioError::Invalid(GameError::UnknownActorType(_)))
        ));
    }

    #[test]
    fn test_rules_file_relative_to_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let rules = r#"(actors: { "e1": (traits: [Health(hp: 50)]) })"#;
        std::fs::write(dir.path().join("rules.ron"), rules).unwrap();
        let scenario = DUEL.replace(
            r#"Inline((actors: {
            "tank": (traits: [Health(hp: 100), Mobile(speed: 256), Armament(damage: 25, range: 1536, reload_delay: 10)]),
        }))"#,
            r#"File("rules.ron")"#,
        );
        std::fs::write(dir.path().join("duel.ron"), scenario).unwrap();

        let scenario = Scenario::load(dir.path().join("duel.ron")).unwrap();
        assert!(scenario.load_rules().unwrap().actor("e1").is_ok());
        // The session places tanks, which this rules file lacks.
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Scenario::load("/nonexistent/scenario.ron"),
            Err(ScenarioError::FileNotFound(_))
        ));
    }
}
