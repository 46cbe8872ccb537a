//! Actor type definitions loaded from RON.
//!
//! ```ron
//! (
//!     actors: {
//!         "e1": (traits: [Health(hp: 50), Mobile(speed: 256)]),
//!     },
//! )
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::actor::ActorInit;
use crate::error::{GameError, Result};
use crate::traits::{Trait, TraitInfo};

/// Definition of one actor type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActorInfo {
    /// Traits in declaration order. This order is the tick and dispatch order.
    pub traits: Vec<TraitInfo>,
}

impl ActorInfo {
    /// Whether a trait with this name is declared.
    #[must_use]
    pub fn has_trait(&self, name: &str) -> bool {
        self.traits.iter().any(|t| t.name() == name)
    }

    /// Instantiate every declared trait.
    pub(crate) fn create_traits(&self, init: &ActorInit) -> Vec<Box<dyn Trait>> {
        self.traits.iter().map(|info| info.create(init)).collect()
    }
}

/// All actor types known to a game.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ruleset {
    /// Actor types by name.
    pub actors: BTreeMap<String, ActorInfo>,
}

impl Ruleset {
    /// Parse a ruleset from a RON string.
    pub fn from_ron(source: &str) -> Result<Self> {
        Self::parse(source, "<inline>")
    }

    /// Load a ruleset from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents, &path.display().to_string())
    }

    fn parse(source: &str, path: &str) -> Result<Self> {
        let rules: Self = ron::from_str(source).map_err(|e| GameError::DataParseError {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        rules.validate()?;
        Ok(rules)
    }

    /// Look up an actor type.
    pub fn actor(&self, name: &str) -> Result<&ActorInfo> {
        self.actors
            .get(name)
            .ok_or_else(|| GameError::UnknownActorType(name.to_string()))
    }

    /// Check trait parameters and cross references between actor types.
    pub fn validate(&self) -> Result<()> {
        for (name, info) in &self.actors {
            for trait_info in &info.traits {
                match trait_info {
                    TraitInfo::Health { hp } if *hp <= 0 => {
                        return Err(GameError::InvalidState(format!(
                            "{name}: Health hp must be positive, got {hp}"
                        )));
                    }
                    TraitInfo::SpawnActorOnDeath { actor } if !self.actors.contains_key(actor) => {
                        return Err(GameError::UnknownActorType(format!(
                            "{actor} (spawned on death of {name})"
                        )));
                    }
                    TraitInfo::Wanders {
                        min_delay,
                        max_delay,
                        ..
                    } if min_delay > max_delay => {
                        return Err(GameError::InvalidState(format!(
                            "{name}: Wanders min_delay {min_delay} exceeds max_delay {max_delay}"
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"(
        actors: {
            "tank": (traits: [
                Health(hp: 100),
                Armament(damage: 25, range: 3072, reload_delay: 10),
                Mobile(speed: 256),
                SpawnActorOnDeath(actor: "tank.husk"),
            ]),
            "tank.husk": (traits: [Health(hp: 20)]),
        },
    )"#;

    #[test]
    fn test_parse_rules() {
        let rules = Ruleset::from_ron(RULES).unwrap();
        let tank = rules.actor("tank").unwrap();
        assert_eq!(tank.traits.len(), 4);
        assert!(tank.has_trait("Armament"));
        assert!(!tank.has_trait("Captures"));
    }

    #[test]
    fn test_unknown_actor_lookup() {
        let rules = Ruleset::from_ron(RULES).unwrap();
        assert!(matches!(
            rules.actor("mammoth"),
            Err(GameError::UnknownActorType(_))
        ));
    }

    #[test]
    fn test_dangling_spawn_reference_rejected() {
        let source = r#"(actors: { "a": (traits: [SpawnActorOnDeath(actor: "missing")]) })"#;
        assert!(matches!(
            Ruleset::from_ron(source),
            Err(GameError::UnknownActorType(_))
        ));
    }

    #[test]
    fn test_malformed_rules() {
        assert!(matches!(
            Ruleset::from_ron("(actors: { \"a\": (traits: [Teleport]) })"),
            Err(GameError::DataParseError { .. })
        ));
    }

    #[test]
    fn test_non_positive_health_rejected() {
        for hp in [0, -5] {
            let source = format!(r#"(actors: {{ "e1": (traits: [Health(hp: {hp})]) }})"#);
            assert!(matches!(
                Ruleset::from_ron(&source),
                Err(GameError::InvalidState(_))
            ));
        }
    }
}
