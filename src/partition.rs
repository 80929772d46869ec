//! Integer partitions over a restricted addend set.
//!
//! Team sizing is a partition problem: a team of `users_per_team` is a sum of
//! unit sizes. Counting and listing the partitions tells which size mixes can
//! form a team at all; [`max_partitions`] then decides how many teams the
//! pool's size distribution can fill, ignoring rank and skill.

use crate::budget::Deadline;
use crate::types::SolveStatus;
use log::debug;
use std::collections::BTreeMap;

/// Explored states between two deadline checks
const POLL_INTERVAL: usize = 256;

fn normalized(addends: &[u32]) -> Vec<u32> {
    let mut sorted: Vec<u32> = addends.iter().copied().filter(|&a| a > 0).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}

/// Number of multisets of `addends` summing to `target`
pub fn count_partitions(addends: &[u32], target: u32) -> u64 {
    let addends = normalized(addends);
    let target = target as usize;
    // ways[j]: partitions of j over the addends seen so far
    let mut ways = vec![0u64; target + 1];
    ways[0] = 1;
    for &addend in &addends {
        let addend = addend as usize;
        for j in addend..=target {
            ways[j] = ways[j].saturating_add(ways[j - addend]);
        }
    }
    ways[target]
}

struct PathState {
    /// Addends still allowed, as a prefix length of the sorted set
    usable: usize,
    remaining: u32,
    path: Vec<u32>,
}

/// Every partition of `target`, each listed largest addend first.
/// Partitions using larger addends come first.
pub fn enumerate_partitions(addends: &[u32], target: u32) -> Vec<Vec<u32>> {
    let addends = normalized(addends);
    let mut partitions = Vec::new();
    if target == 0 {
        return partitions;
    }

    let mut states = vec![PathState {
        usable: addends.len(),
        remaining: target,
        path: Vec::new(),
    }];
    while let Some(state) = states.pop() {
        if state.remaining == 0 {
            partitions.push(state.path);
            continue;
        }
        if state.usable == 0 {
            continue;
        }
        let largest = addends[state.usable - 1];

        // Pushed first, explored after every path that takes `largest`
        states.push(PathState {
            usable: state.usable - 1,
            remaining: state.remaining,
            path: state.path.clone(),
        });
        if largest <= state.remaining {
            let mut path = state.path;
            path.push(largest);
            states.push(PathState {
                usable: state.usable,
                remaining: state.remaining - largest,
                path,
            });
        }
    }
    partitions
}

/// A partition and how many times it is instantiated
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Addend -> occurrences in one instance
    pub addends: BTreeMap<u32, u32>,
    pub count: u32,
}

#[derive(Clone, Debug)]
pub struct PartitionOutcome {
    pub plans: Vec<PartitionPlan>,
    /// `Optimal` when the total is proven maximal
    pub status: SolveStatus,
}

/// Instances across all plans
pub fn total_instances(plans: &[PartitionPlan]) -> u64 {
    plans.iter().map(|p| p.count as u64).sum()
}

/// Addend -> units consumed across all plan instances
pub fn addend_usage(plans: &[PartitionPlan]) -> BTreeMap<u32, u64> {
    let mut usage = BTreeMap::new();
    for plan in plans {
        for (&addend, &uses) in &plan.addends {
            *usage.entry(addend).or_insert(0) += uses as u64 * plan.count as u64;
        }
    }
    usage
}

/// Upper bound on instances from the addend total alone
pub fn instance_ceiling(available: &BTreeMap<u32, u32>, target: u32) -> u64 {
    if target == 0 {
        return 0;
    }
    let total: u64 = available.iter().map(|(&a, &c)| a as u64 * c as u64).sum();
    total / target as u64
}

struct PlanState {
    plan: usize,
    /// Per addend slot, units not yet used
    remaining: Vec<u32>,
    counts: Vec<u32>,
    total: u64,
}

/// Choose instance counts for every partition of `target` so the total
/// number of instances is maximal without using any addend more often than
/// `available` allows.
///
/// Branch and bound over plan counts, largest count first. A state is cut
/// when even spending every remaining unit could not beat the incumbent, and
/// the search stops as soon as the incumbent reaches [`instance_ceiling`].
pub fn max_partitions(available: &BTreeMap<u32, u32>, target: u32, deadline: &Deadline) -> PartitionOutcome {
    let addends: Vec<u32> = available
        .iter()
        .filter(|(&a, &c)| a > 0 && c > 0)
        .map(|(&a, _)| a)
        .collect();
    let paths = enumerate_partitions(&addends, target);
    if paths.is_empty() {
        return PartitionOutcome {
            plans: Vec::new(),
            status: SolveStatus::Optimal,
        };
    }

    // Plans as (addend slot, occurrences) lists
    let slot_of: BTreeMap<u32, usize> = addends.iter().enumerate().map(|(i, &a)| (a, i)).collect();
    let shapes: Vec<BTreeMap<u32, u32>> = paths
        .iter()
        .map(|path| {
            let mut shape = BTreeMap::new();
            for &addend in path {
                *shape.entry(addend).or_insert(0) += 1;
            }
            shape
        })
        .collect();
    let uses: Vec<Vec<(usize, u32)>> = shapes
        .iter()
        .map(|shape| shape.iter().map(|(a, &n)| (slot_of[a], n)).collect())
        .collect();

    let ceiling = instance_ceiling(available, target);
    let value_left = |remaining: &[u32]| -> u64 {
        remaining
            .iter()
            .zip(&addends)
            .map(|(&c, &a)| c as u64 * a as u64)
            .sum::<u64>()
            / target as u64
    };

    let mut best: Option<(u64, Vec<u32>)> = None;
    let mut states = vec![PlanState {
        plan: 0,
        remaining: addends.iter().map(|a| available[a]).collect(),
        counts: Vec::with_capacity(shapes.len()),
        total: 0,
    }];
    let mut visited = 0usize;
    let mut status = SolveStatus::Optimal;

    while let Some(state) = states.pop() {
        visited += 1;
        if visited % POLL_INTERVAL == 0 && deadline.is_expired() {
            status = if best.is_some() {
                SolveStatus::Feasible
            } else {
                SolveStatus::Timeout
            };
            break;
        }
        let incumbent = best.as_ref().map(|(total, _)| *total);
        if incumbent.map_or(false, |b| state.total + value_left(&state.remaining) <= b) {
            continue;
        }
        if state.plan == shapes.len() {
            let reached = state.total;
            if incumbent.map_or(true, |b| reached > b) {
                best = Some((reached, state.counts));
            }
            if reached >= ceiling {
                break;
            }
            continue;
        }

        let max_count = uses[state.plan]
            .iter()
            .map(|&(slot, n)| state.remaining[slot] / n)
            .min()
            .unwrap_or(0);
        // Ascending pushes pop the largest count first
        for count in 0..=max_count {
            let mut remaining = state.remaining.clone();
            for &(slot, n) in &uses[state.plan] {
                remaining[slot] -= n * count;
            }
            let mut counts = state.counts.clone();
            counts.push(count);
            states.push(PlanState {
                plan: state.plan + 1,
                remaining,
                counts,
                total: state.total + count as u64,
            });
        }
    }

    let (best_total, best_counts) = best.unwrap_or_else(|| (0, vec![0; shapes.len()]));
    debug!(
        "max partitions of {}: {} plans, {} instances (ceiling {}), {} states",
        target,
        shapes.len(),
        best_total,
        ceiling,
        visited
    );
    PartitionOutcome {
        plans: shapes
            .into_iter()
            .zip(best_counts)
            .map(|(addends, count)| PartitionPlan { addends, count })
            .collect(),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_team_partitions() {
        assert_eq!(count_partitions(&[1, 2, 3], 3), 3);
        assert_eq!(count_partitions(&[1, 2, 3, 4, 5], 5), 7);
        let all: Vec<u32> = (1..=10).collect();
        assert_eq!(count_partitions(&all, 10), 42);
    }

    #[test]
    fn test_count_coin_change() {
        assert_eq!(count_partitions(&[2, 3, 4], 6), 3);
        assert_eq!(count_partitions(&[2, 5, 8, 9, 10], 10), 4);
        assert_eq!(count_partitions(&[8, 9, 10], 10), 1);
        assert_eq!(count_partitions(&[4], 6), 0);
    }

    #[test]
    fn test_count_matches_enumeration() {
        let all: Vec<u32> = (1..=10).collect();
        assert_eq!(enumerate_partitions(&all, 10).len(), 42);
        // Order and duplicates in the addend set do not matter
        assert_eq!(count_partitions(&[5, 2, 2, 10, 8, 9], 10), 4);
    }

    #[test]
    fn test_enumeration_order() {
        assert_eq!(
            enumerate_partitions(&[2, 5, 8, 9, 10], 10),
            vec![vec![10], vec![8, 2], vec![5, 5], vec![2, 2, 2, 2, 2]]
        );
        assert_eq!(
            enumerate_partitions(&[1, 2, 3, 4, 5], 5),
            vec![
                vec![5],
                vec![4, 1],
                vec![3, 2],
                vec![3, 1, 1],
                vec![2, 2, 1],
                vec![2, 1, 1, 1],
                vec![1, 1, 1, 1, 1],
            ]
        );
    }

    #[test]
    fn test_max_partitions_fills_ceiling() {
        let available = BTreeMap::from([(1, 100), (2, 40), (5, 10)]);
        let outcome = max_partitions(&available, 10, &Deadline::unbounded());
        assert_eq!(total_instances(&outcome.plans), 23);
        assert_eq!(outcome.status, SolveStatus::Optimal);
        for (addend, used) in addend_usage(&outcome.plans) {
            assert!(used <= available[&addend] as u64, "addend {} overused", addend);
        }
        for plan in &outcome.plans {
            let sum: u32 = plan.addends.iter().map(|(a, n)| a * n).sum();
            assert_eq!(sum, 10);
        }
    }

    #[test]
    fn test_max_partitions_below_ceiling() {
        // Two trios and a quad never sum to five
        let available = BTreeMap::from([(3, 2), (4, 1)]);
        let outcome = max_partitions(&available, 5, &Deadline::unbounded());
        assert_eq!(instance_ceiling(&available, 5), 2);
        assert_eq!(total_instances(&outcome.plans), 0);
        assert_eq!(outcome.status, SolveStatus::Optimal);

        // 3+2 twice leaves a lone duo
        let mixed = BTreeMap::from([(2, 3), (3, 2)]);
        let outcome = max_partitions(&mixed, 5, &Deadline::unbounded());
        assert_eq!(total_instances(&outcome.plans), 2);
    }
}
