//! Per-frame sync dumps for desync post-mortems.
//!
//! When sync reports are enabled the order manager keeps the last
//! [`NUM_SYNC_REPORTS`] frames of captured synchronized state. On a desync the
//! report for the mismatching frame is written out as text, so the dumps from
//! two peers can be diffed field by field.

use std::collections::VecDeque;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::sync::SyncField;

/// Number of frames kept.
pub const NUM_SYNC_REPORTS: usize = 7;

/// Captured state of one trait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraitReport {
    /// Trait name.
    pub name: String,
    /// Hash of the trait's fields.
    pub hash: u64,
    /// Fields in write order.
    pub fields: Vec<SyncField>,
}

/// Captured state of one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorReport {
    /// Actor id.
    pub id: ActorId,
    /// Actor type.
    pub type_name: String,
    /// Combined hash of the actor and its traits.
    pub hash: u64,
    /// Actor-level fields (owner, position, facing).
    pub fields: Vec<SyncField>,
    /// Traits in declaration order.
    pub traits: Vec<TraitReport>,
}

/// Everything captured for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameReport {
    /// Frame number.
    pub frame: u32,
    /// World sync hash.
    pub sync_hash: u64,
    /// Shared RNG word position.
    pub rng_position: u128,
    /// Actors in id order.
    pub actors: Vec<ActorReport>,
    /// Player-level fields.
    pub players: Vec<SyncField>,
    /// Orders applied during the frame.
    pub orders: Vec<String>,
}

/// Ring buffer of recent frame reports.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    reports: VecDeque<FrameReport>,
}

impl SyncReport {
    /// An empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a report, evicting the oldest when full.
    pub fn update(&mut self, report: FrameReport) {
        if self.reports.len() == NUM_SYNC_REPORTS {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
    }

    /// Report for `frame`, if still held.
    #[must_use]
    pub fn get(&self, frame: u32) -> Option<&FrameReport> {
        self.reports.iter().find(|r| r.frame == frame)
    }

    /// Frames currently held, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = u32> + '_ {
        self.reports.iter().map(|r| r.frame)
    }

    /// Render the report for `frame` as text.
    #[must_use]
    pub fn dump(&self, frame: u32) -> Option<String> {
        let report = self.get(frame)?;
        let mut out = String::new();
        // Writing to a String never fails.
        let _ = writeln!(out, "Sync for frame {}: {:#018x}", report.frame, report.sync_hash);
        let _ = writeln!(out, "Rng position: {}", report.rng_position);
        for actor in &report.actors {
            let _ = writeln!(
                out,
                "  Actor {} ({}) {:#018x}",
                actor.id, actor.type_name, actor.hash
            );
            for field in &actor.fields {
                let _ = writeln!(out, "    {}: {}", field.name, field.value);
            }
            for t in &actor.traits {
                let _ = writeln!(out, "    Trait {} {:#018x}", t.name, t.hash);
                for field in &t.fields {
                    let _ = writeln!(out, "      {}: {}", field.name, field.value);
                }
            }
        }
        for field in &report.players {
            let _ = writeln!(out, "  Player {}: {}", field.name, field.value);
        }
        let _ = writeln!(out, "Orders:");
        for order in &report.orders {
            let _ = writeln!(out, "  {order}");
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(frame: u32) -> FrameReport {
        FrameReport {
            frame,
            sync_hash: u64::from(frame) * 31,
            rng_position: 0,
            actors: vec![ActorReport {
                id: ActorId(1),
                type_name: "e1".to_string(),
                hash: 7,
                fields: Vec::new(),
                traits: vec![TraitReport {
                    name: "Health".to_string(),
                    hash: 3,
                    fields: vec![SyncField {
                        name: "hp".to_string(),
                        value: "50".to_string(),
                    }],
                }],
            }],
            players: Vec::new(),
            orders: vec!["Stop #1".to_string()],
        }
    }

    #[test]
    fn test_ring_keeps_last_seven() {
        let mut sync = SyncReport::new();
        for frame in 1..=10 {
            sync.update(report(frame));
        }
        assert_eq!(sync.frames().collect::<Vec<_>>(), vec![4, 5, 6, 7, 8, 9, 10]);
        assert!(sync.get(3).is_none());
        assert!(sync.get(10).is_some());
    }

    #[test]
    fn test_dump_lists_fields_and_orders() {
        let mut sync = SyncReport::new();
        sync.update(report(5));
        let text = sync.dump(5).unwrap();
        assert!(text.contains("Sync for frame 5"));
        assert!(text.contains("Actor #1 (e1)"));
        assert!(text.contains("hp: 50"));
        assert!(text.contains("Stop #1"));
        assert!(sync.dump(6).is_none());
    }
}
