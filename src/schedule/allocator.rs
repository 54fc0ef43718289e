//! Largest-remainder apportionment plus greedy minimum-load bucket
//! distribution.
//!
//! Weights are percentages of scheduling capacity. Apportionment follows
//! the Hamilton method: floor the raw share, then award the leftover
//! slots one at a time in descending remainder order. Bucket placement
//! fills the currently least-occupied slot, which keeps bucket occupancy
//! within 1 of any other bucket.

use super::SlotMap;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// Apportion `total_slots` across weighted targets and distribute each
/// target's count across the slot buckets.
///
/// Targets with weight 0 receive no slots. When every weight is 0 the
/// allocator falls back to uniform weighting and flags the result.
pub fn allocate(targets: &[(&str, f64)], total_slots: usize) -> SlotMap {
    assert!(total_slots >= 1, "total_slots must be >= 1");

    let weight_sum: f64 = targets.iter().map(|(_, w)| w.max(0.0)).sum();
    let uniform_fallback = !targets.is_empty() && weight_sum <= 0.0;

    let shares: Vec<f64> = if uniform_fallback {
        vec![total_slots as f64 / targets.len() as f64; targets.len()]
    } else {
        targets
            .iter()
            .map(|(_, w)| w.max(0.0) / 100.0 * total_slots as f64)
            .collect()
    };

    let counts = apportion(&shares, total_slots);
    let assignments = distribute(targets, &counts, total_slots);

    SlotMap {
        total_slots,
        assignments,
        uniform_fallback,
    }
}

/// Hamilton apportionment: floors plus largest-remainder awards.
///
/// The award pass cycles the remainder ordering until the deficit is
/// absorbed, so counts sum to exactly `total_slots` even when the raw
/// shares sum to far less. Zero-share targets are never awarded.
fn apportion(shares: &[f64], total_slots: usize) -> Vec<usize> {
    let mut counts: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();
    let assigned: usize = counts.iter().sum();

    // Remainder order: descending, ties broken by input position.
    let mut order: Vec<usize> = (0..shares.len()).filter(|&i| shares[i] > 0.0).collect();
    order.sort_by(|&a, &b| {
        let ra = shares[a] - shares[a].floor();
        let rb = shares[b] - shares[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });

    if order.is_empty() {
        return counts;
    }

    if assigned < total_slots {
        let mut deficit = total_slots - assigned;
        let mut i = 0;
        while deficit > 0 {
            counts[order[i % order.len()]] += 1;
            deficit -= 1;
            i += 1;
        }
    } else if assigned > total_slots {
        // Oversubscribed weights; trim from the smallest remainders.
        let mut surplus = assigned - total_slots;
        let mut i = order.len();
        while surplus > 0 && i > 0 {
            i -= 1;
            let idx = order[i];
            let take = counts[idx].min(surplus);
            counts[idx] -= take;
            surplus -= take;
            if i == 0 && surplus > 0 {
                i = order.len();
            }
        }
    }

    counts
}

/// Greedy minimum-load placement of each target's count across buckets.
///
/// Targets are placed in descending count order; every unit goes to the
/// least-occupied bucket, lowest index on ties. Because the counts sum
/// to exactly the bucket count, a target never lands twice in one bucket.
fn distribute(
    targets: &[(&str, f64)],
    counts: &[usize],
    total_slots: usize,
) -> BTreeMap<String, Vec<usize>> {
    let mut heap: BinaryHeap<Reverse<(usize, usize)>> =
        (0..total_slots).map(|b| Reverse((0, b))).collect();

    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by(|&a, &b| counts[b].cmp(&counts[a]));

    let mut assignments = BTreeMap::new();
    for idx in order {
        let (name, _) = targets[idx];
        let mut slots = Vec::with_capacity(counts[idx]);
        for _ in 0..counts[idx] {
            let Reverse((occ, bucket)) = heap.pop().expect("bucket heap exhausted");
            slots.push(bucket);
            heap.push(Reverse((occ + 1, bucket)));
        }
        slots.sort_unstable();
        assignments.insert(name.to_string(), slots);
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamilton_example() {
        // 50/30/20 over 6 slots: floors {3,1,1}, deficit 1 goes to the
        // largest remainder (B at 0.8).
        let map = allocate(&[("a", 50.0), ("b", 30.0), ("c", 20.0)], 6);
        assert_eq!(map.slot_count("a"), 3);
        assert_eq!(map.slot_count("b"), 2);
        assert_eq!(map.slot_count("c"), 1);
        assert_eq!(map.total_assigned(), 6);
        assert!(!map.uniform_fallback);
    }

    #[test]
    fn test_counts_always_sum_to_total() {
        let cases: Vec<Vec<(&str, f64)>> = vec![
            vec![("a", 33.3), ("b", 33.3), ("c", 33.4)],
            vec![("a", 10.0)],
            vec![("a", 50.0), ("b", 30.0)],
            vec![("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 97.0)],
        ];
        for targets in cases {
            for total in 1..=12 {
                let map = allocate(&targets, total);
                assert_eq!(map.total_assigned(), total, "targets {targets:?}");
            }
        }
    }

    #[test]
    fn test_bucket_balance_invariant() {
        let targets = [("a", 42.0), ("b", 23.0), ("c", 19.0), ("d", 16.0)];
        for total in 1..=24 {
            let map = allocate(&targets, total);
            let occ = map.bucket_occupancy();
            let max = occ.iter().max().copied().unwrap_or(0);
            let min = occ.iter().min().copied().unwrap_or(0);
            assert!(max - min <= 1, "occupancy spread {occ:?} at {total} slots");
        }
    }

    #[test]
    fn test_each_bucket_once_at_full_spread() {
        // 50/30/20 over 6 buckets: every bucket holds exactly one target.
        let map = allocate(&[("a", 50.0), ("b", 30.0), ("c", 20.0)], 6);
        assert_eq!(map.bucket_occupancy(), vec![1; 6]);
        // And no target repeats a bucket.
        for slots in map.assignments.values() {
            let mut dedup = slots.clone();
            dedup.dedup();
            assert_eq!(&dedup, slots);
        }
    }

    #[test]
    fn test_zero_weight_target_absent() {
        let map = allocate(&[("a", 60.0), ("idle", 0.0), ("b", 40.0)], 5);
        assert_eq!(map.slot_count("idle"), 0);
        assert_eq!(map.total_assigned(), 5);
        for slot in 0..5 {
            assert!(!map.targets_in_slot(slot).contains(&"idle"));
        }
    }

    #[test]
    fn test_all_zero_weights_uniform_fallback() {
        let map = allocate(&[("a", 0.0), ("b", 0.0), ("c", 0.0)], 6);
        assert!(map.uniform_fallback);
        assert_eq!(map.total_assigned(), 6);
        assert_eq!(map.slot_count("a"), 2);
        assert_eq!(map.slot_count("b"), 2);
        assert_eq!(map.slot_count("c"), 2);
    }

    #[test]
    fn test_single_low_weight_target_takes_all_slots() {
        // Deficit larger than the target count cycles the award pass.
        let map = allocate(&[("only", 10.0)], 6);
        assert_eq!(map.slot_count("only"), 6);
        assert_eq!(map.bucket_occupancy(), vec![1; 6]);
    }

    #[test]
    fn test_no_targets() {
        let map = allocate(&[], 4);
        assert_eq!(map.total_assigned(), 0);
        assert!(map.assignments.is_empty());
        assert!(!map.uniform_fallback);
    }

    #[test]
    fn test_targets_in_slot_ordering() {
        let map = allocate(&[("b", 50.0), ("a", 50.0)], 2);
        // Name-ordered listing regardless of insertion order.
        let all: Vec<_> = (0..2).flat_map(|s| map.targets_in_slot(s)).collect();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&"a") && all.contains(&"b"));
    }
}
