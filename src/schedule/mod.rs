//! Daily slot scheduling — weighted apportionment of targets across
//! discrete time slots.

pub mod allocator;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The immutable assignment of targets to slots for one scheduling cycle.
///
/// Recomputed once per cycle and persisted alongside that cycle's output
/// for auditability; never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotMap {
    /// Number of discrete slots in the cycle.
    pub total_slots: usize,
    /// Target name → ordered slot indices in which that target is active.
    pub assignments: BTreeMap<String, Vec<usize>>,
    /// True when the zero-weight uniform fallback was applied.
    pub uniform_fallback: bool,
}

impl SlotMap {
    /// Names of the targets active in the given slot, in name order.
    pub fn targets_in_slot(&self, slot: usize) -> Vec<&str> {
        self.assignments
            .iter()
            .filter(|(_, slots)| slots.contains(&slot))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Number of slots awarded to a target (0 for unknown names).
    pub fn slot_count(&self, target: &str) -> usize {
        self.assignments.get(target).map_or(0, Vec::len)
    }

    /// Occupancy of each slot bucket.
    pub fn bucket_occupancy(&self) -> Vec<usize> {
        let mut occ = vec![0usize; self.total_slots];
        for slots in self.assignments.values() {
            for &s in slots {
                occ[s] += 1;
            }
        }
        occ
    }

    /// Total slot units awarded across all targets.
    pub fn total_assigned(&self) -> usize {
        self.assignments.values().map(Vec::len).sum()
    }
}
