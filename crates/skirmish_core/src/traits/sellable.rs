//! Selling structures back for cash.

use crate::actor::ActorId;
use crate::order::Order;
use crate::sync::SyncHasher;
use crate::traits::{ResolveOrder, Trait};
use crate::world::World;

/// Order string for selling an actor.
pub const SELL: &str = "Sell";

/// Refunds part of the actor's value to its owner and removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sellable {
    value: i64,
    refund_percent: u32,
    sold: bool,
}

impl Sellable {
    /// A sellable actor worth `value`.
    #[must_use]
    pub const fn new(value: i64, refund_percent: u32) -> Self {
        Self {
            value,
            refund_percent,
            sold: false,
        }
    }

    /// Cash returned on sale.
    #[must_use]
    pub const fn refund(&self) -> i64 {
        self.value.saturating_mul(self.refund_percent as i64) / 100
    }

    /// Whether a sale already went through.
    #[must_use]
    pub const fn is_sold(&self) -> bool {
        self.sold
    }
}

impl Trait for Sellable {
    fn name(&self) -> &'static str {
        "Sellable"
    }

    fn as_resolve_order(&mut self) -> Option<&mut dyn ResolveOrder> {
        Some(self)
    }

    fn write_sync(&self, hasher: &mut SyncHasher) {
        hasher.field("sold", &self.sold);
    }
}

impl ResolveOrder for Sellable {
    fn resolve_order(&mut self, self_id: ActorId, order: &Order, world: &mut World) {
        if order.order_string != SELL || self.sold {
            return;
        }
        let Some(owner) = world.actor(self_id).and_then(|a| a.owner()) else {
            return;
        };
        self.sold = true;
        world.give_cash(owner, self.refund());
        world.remove(self_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_rounds_down() {
        assert_eq!(Sellable::new(1000, 50).refund(), 500);
        assert_eq!(Sellable::new(333, 50).refund(), 166);
        assert_eq!(Sellable::new(100, 0).refund(), 0);
    }

    #[test]
    fn test_huge_value_refund_saturates() {
        assert_eq!(Sellable::new(i64::MAX, 50).refund(), i64::MAX / 100);
        assert_eq!(Sellable::new(i64::MIN, 200).refund(), i64::MIN / 100);
    }
}
