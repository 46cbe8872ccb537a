//! Synchronized-state hashing.
//!
//! Every field that influences the simulation outcome is written into a
//! [`SyncHasher`] after each frame. Values are reduced to integer words
//! (fixed-point numbers by their raw bits) and folded with FNV-1a, so the
//! result is order-sensitive and never depends on addresses or floating
//! point.
//!
//! Hashes nest: each trait hashes its own fields, each actor combines its
//! trait hashes in declaration order, and the world combines actor hashes in
//! id order together with player state and the RNG position.

use std::collections::VecDeque;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::math::{CPos, Fixed, WAngle, WDist, WPos};
use crate::session::{PlayerId, WinState};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// One named field captured for a sync report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncField {
    /// Field name.
    pub name: String,
    /// Debug rendering of the value.
    pub value: String,
}

/// Order-sensitive 64-bit hasher for synchronized state.
#[derive(Debug, Clone)]
pub struct SyncHasher {
    state: u64,
    fields: Option<Vec<SyncField>>,
}

impl Default for SyncHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncHasher {
    /// A hasher that only folds values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: FNV_OFFSET,
            fields: None,
        }
    }

    /// A hasher that also records every named field for reporting.
    #[must_use]
    pub const fn capturing() -> Self {
        Self {
            state: FNV_OFFSET,
            fields: Some(Vec::new()),
        }
    }

    /// Whether named fields are being recorded.
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.fields.is_some()
    }

    /// Fold one raw word.
    pub fn write_word(&mut self, word: u64) {
        for byte in word.to_le_bytes() {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    /// Fold a named synchronized field.
    pub fn field<V: SyncValue + Debug + ?Sized>(&mut self, name: &str, value: &V) {
        value.hash_into(self);
        if let Some(fields) = &mut self.fields {
            fields.push(SyncField {
                name: name.to_string(),
                value: format!("{value:?}"),
            });
        }
    }

    /// Current hash value.
    #[must_use]
    pub const fn finish(&self) -> u64 {
        self.state
    }

    /// Take the captured fields, leaving none behind.
    pub fn take_fields(&mut self) -> Vec<SyncField> {
        self.fields.as_mut().map(std::mem::take).unwrap_or_default()
    }
}

/// A value that can be folded into a [`SyncHasher`].
pub trait SyncValue {
    /// Fold this value.
    fn hash_into(&self, hasher: &mut SyncHasher);
}

macro_rules! sync_unsigned {
    ($($t:ty),*) => {
        $(impl SyncValue for $t {
            fn hash_into(&self, hasher: &mut SyncHasher) {
                hasher.write_word(u64::from(*self));
            }
        })*
    };
}

macro_rules! sync_signed {
    ($($t:ty),*) => {
        $(impl SyncValue for $t {
            fn hash_into(&self, hasher: &mut SyncHasher) {
                hasher.write_word(i64::from(*self) as u64);
            }
        })*
    };
}

sync_unsigned!(u8, u16, u32, u64, bool);
sync_signed!(i8, i16, i32, i64);

impl SyncValue for usize {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        hasher.write_word(*self as u64);
    }
}

impl SyncValue for u128 {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        hasher.write_word(*self as u64);
        hasher.write_word((*self >> 64) as u64);
    }
}

impl SyncValue for Fixed {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        hasher.write_word(self.to_bits() as u64);
    }
}

impl SyncValue for CPos {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.x.hash_into(hasher);
        self.y.hash_into(hasher);
    }
}

impl SyncValue for WPos {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.x.hash_into(hasher);
        self.y.hash_into(hasher);
    }
}

impl SyncValue for WAngle {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.0.hash_into(hasher);
    }
}

impl SyncValue for WDist {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.0.hash_into(hasher);
    }
}

impl SyncValue for ActorId {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.0.hash_into(hasher);
    }
}

impl SyncValue for PlayerId {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.0.hash_into(hasher);
    }
}

impl SyncValue for WinState {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        let tag: u8 = match self {
            WinState::Undefined => 0,
            WinState::Won => 1,
            WinState::Lost => 2,
        };
        tag.hash_into(hasher);
    }
}

impl SyncValue for str {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.len().hash_into(hasher);
        for chunk in self.as_bytes().chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            hasher.write_word(u64::from_le_bytes(word));
        }
    }
}

impl SyncValue for String {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.as_str().hash_into(hasher);
    }
}

impl<T: SyncValue> SyncValue for Option<T> {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        match self {
            None => hasher.write_word(0),
            Some(value) => {
                hasher.write_word(1);
                value.hash_into(hasher);
            }
        }
    }
}

impl<T: SyncValue> SyncValue for [T] {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.len().hash_into(hasher);
        for value in self {
            value.hash_into(hasher);
        }
    }
}

impl<T: SyncValue> SyncValue for Vec<T> {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.as_slice().hash_into(hasher);
    }
}

impl<T: SyncValue> SyncValue for VecDeque<T> {
    fn hash_into(&self, hasher: &mut SyncHasher) {
        self.len().hash_into(hasher);
        for value in self {
            value.hash_into(hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of<V: SyncValue + Debug + ?Sized>(value: &V) -> u64 {
        let mut hasher = SyncHasher::new();
        hasher.field("v", value);
        hasher.finish()
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        let mut a = SyncHasher::new();
        a.field("x", &1u32);
        a.field("y", &2u32);

        let mut b = SyncHasher::new();
        b.field("y", &2u32);
        b.field("x", &1u32);

        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn test_hash_is_reproducible() {
        let pos = WPos::new(Fixed::from_num(3) / Fixed::from_num(7), Fixed::from_num(-2));
        assert_eq!(hash_of(&pos), hash_of(&pos));
        assert_ne!(hash_of(&pos), hash_of(&WPos::ZERO));
    }

    #[test]
    fn test_option_distinguishes_none_from_zero() {
        assert_ne!(hash_of(&None::<u32>), hash_of(&Some(0u32)));
    }

    #[test]
    fn test_strings_include_length() {
        assert_ne!(hash_of("ab"), hash_of("ab\0"));
    }

    #[test]
    fn test_capture_records_fields() {
        let mut hasher = SyncHasher::capturing();
        hasher.field("hp", &75i32);
        hasher.field("target", &Some(ActorId(3)));
        let fields = hasher.take_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "hp");
        assert_eq!(fields[0].value, "75");

        // Capturing does not change the hash.
        let mut plain = SyncHasher::new();
        plain.field("hp", &75i32);
        plain.field("target", &Some(ActorId(3)));
        assert_eq!(plain.finish(), hasher.finish());
    }
}
