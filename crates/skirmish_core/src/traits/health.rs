//! Hit points.

use crate::sync::SyncHasher;
use crate::traits::Trait;

/// Hit points of a damageable actor.
///
/// Damage is applied by [`World::inflict_damage`](crate::world::World::inflict_damage),
/// which also runs the damage and death notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    hp: i32,
    max_hp: i32,
}

impl Health {
    /// Full health with `max_hp` hit points.
    #[must_use]
    pub const fn new(max_hp: i32) -> Self {
        Self { hp: max_hp, max_hp }
    }

    /// Current hit points.
    #[must_use]
    pub const fn hp(&self) -> i32 {
        self.hp
    }

    /// Maximum hit points.
    #[must_use]
    pub const fn max_hp(&self) -> i32 {
        self.max_hp
    }

    /// Whether hit points have run out.
    #[must_use]
    pub const fn is_dead(&self) -> bool {
        self.hp <= 0
    }

    /// Subtract `amount`, clamped to `[0, max_hp]`.
    ///
    /// Returns `true` if this call took the actor from alive to dead.
    pub fn apply_damage(&mut self, amount: i32) -> bool {
        let was_alive = !self.is_dead();
        self.hp = self.hp.saturating_sub(amount).clamp(0, self.max_hp);
        was_alive && self.is_dead()
    }
}

impl Trait for Health {
    fn name(&self) -> &'static str {
        "Health"
    }

    fn write_sync(&self, hasher: &mut SyncHasher) {
        hasher.field("hp", &self.hp);
        hasher.field("max_hp", &self.max_hp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_reports_kill_once() {
        let mut health = Health::new(30);
        assert!(!health.apply_damage(20));
        assert_eq!(health.hp(), 10);
        assert!(health.apply_damage(15));
        assert_eq!(health.hp(), 0);
        assert!(!health.apply_damage(5));
    }

    #[test]
    fn test_negative_damage_heals_up_to_max() {
        let mut health = Health::new(50);
        health.apply_damage(30);
        health.apply_damage(-100);
        assert_eq!(health.hp(), 50);
    }
}
