use crate::bitset::UnitSet;
use crate::budget::Deadline;
use crate::error::Result;
use crate::operator::AffinityOperator;
use crate::pool::CompatibilityGraph;
use crate::types::*;
use log::{debug, warn};

/// Explored states between two deadline checks
const POLL_INTERVAL: usize = 256;

/// A full team: units that fill `users_per_team` exactly and accept each other
#[derive(Clone, Debug)]
pub struct FeasibleTeam {
    /// Snapshot indices of the member units
    pub members: UnitSet,
    /// Aggregate affinity of the members
    pub affinity: AffinityState,
    pub user_count: usize,
}

impl FeasibleTeam {
    pub fn unit_ids(&self, units: &[MatchUnit]) -> Vec<u64> {
        self.members.iter().map(|idx| units[idx].id).collect()
    }
}

#[derive(Debug)]
pub struct TeamSearchOutcome {
    pub teams: Vec<FeasibleTeam>,
    pub status: SolveStatus,
}

/// Search state: units before `explored` are decided, `remaining` users are
/// still needed, `chosen` holds the included units.
struct TeamSearchState {
    explored: usize,
    remaining: usize,
    chosen: UnitSet,
}

/// Enumerates every feasible team in a snapshot
pub struct TeamFinder<'a, O: AffinityOperator + ?Sized> {
    criteria: MatchmakingCriteria,
    operator: &'a O,
    graph: Option<&'a CompatibilityGraph>,
}

impl<'a, O: AffinityOperator + ?Sized> TeamFinder<'a, O> {
    pub fn new(criteria: MatchmakingCriteria, operator: &'a O) -> Self {
        Self {
            criteria,
            operator,
            graph: None,
        }
    }

    /// Answer pairwise checks from a precomputed graph over the same snapshot
    pub fn with_graph(mut self, graph: &'a CompatibilityGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Depth-first include/exclude search over `units`, which must be sorted
    /// ascending by member count. Units are taken in index order so each team
    /// comes out once, as an ascending index set.
    pub fn solve(
        &self,
        units: &[MatchUnit],
        current_timestamp: i64,
        limit: Option<usize>,
        deadline: &Deadline,
    ) -> Result<TeamSearchOutcome> {
        debug_assert!(
            units.windows(2).all(|w| w[0].member_count() <= w[1].member_count()),
            "units must be sorted by member count"
        );

        let n = units.len();
        let mut teams = Vec::new();
        if n == 0 {
            return Ok(TeamSearchOutcome {
                teams,
                status: SolveStatus::Optimal,
            });
        }

        // suffix_users[i]: users available from unit i onwards
        let mut suffix_users = vec![0usize; n + 1];
        for i in (0..n).rev() {
            suffix_users[i] = suffix_users[i + 1] + units[i].member_count();
        }

        let mut states = vec![TeamSearchState {
            explored: 0,
            remaining: self.criteria.users_per_team,
            chosen: UnitSet::with_capacity(n),
        }];
        let mut visited = 0usize;
        let mut status = SolveStatus::Optimal;

        while let Some(state) = states.pop() {
            visited += 1;
            if visited % POLL_INTERVAL == 0 && deadline.is_expired() {
                warn!("team search hit its time budget after {} states", visited);
                status = if teams.is_empty() {
                    SolveStatus::Timeout
                } else {
                    SolveStatus::Feasible
                };
                break;
            }

            let idx = state.explored;
            if idx >= n || suffix_users[idx] < state.remaining {
                continue;
            }
            let unit = &units[idx];
            // Sorted input: no later unit fits either
            if unit.member_count() > state.remaining {
                continue;
            }

            states.push(TeamSearchState {
                explored: idx + 1,
                remaining: state.remaining,
                chosen: state.chosen.clone(),
            });

            if !self.fits_chosen(units, &state.chosen, idx) {
                continue;
            }
            let mut chosen = state.chosen;
            chosen.insert(idx);
            let remaining = state.remaining - unit.member_count();
            if remaining == 0 {
                teams.push(
                    self.operator
                        .merge_units_to_team(units, &chosen, current_timestamp)?,
                );
                if limit.map_or(false, |cap| teams.len() >= cap) {
                    status = SolveStatus::Feasible;
                    break;
                }
            } else {
                states.push(TeamSearchState {
                    explored: idx + 1,
                    remaining,
                    chosen,
                });
            }
        }

        debug!(
            "team search: {} units, {} states, {} teams, {:?}",
            n,
            visited,
            teams.len(),
            status
        );
        Ok(TeamSearchOutcome { teams, status })
    }

    fn fits_chosen(&self, units: &[MatchUnit], chosen: &UnitSet, candidate: usize) -> bool {
        match self.graph {
            Some(graph) => chosen.iter().all(|j| graph.are_compatible(candidate, j)),
            None => chosen
                .iter()
                .all(|j| self.operator.is_fit_one_team(&units[candidate], &units[j])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::DefaultAffinityOperator;
    use std::collections::{HashMap, HashSet};

    fn unit(id: u64, members: usize, rank: i32) -> MatchUnit {
        MatchUnit::new(
            id,
            (0..members as u64).map(|m| id * 100 + m).collect(),
            HashMap::new(),
            0.5,
            AffinityState::new(0, rank, 1.0, 0b11111),
        )
        .unwrap()
    }

    /// 10 solos, 5 duos, 4 trios, 3 quads, 2 full stacks, all alike
    fn mixed_pool() -> Vec<MatchUnit> {
        let mut units = Vec::new();
        let mut id = 0;
        for (size, count) in [(1, 10), (2, 5), (3, 4), (4, 3), (5, 2)] {
            for _ in 0..count {
                id += 1;
                units.push(unit(id, size, 2));
            }
        }
        units
    }

    fn operator() -> DefaultAffinityOperator {
        DefaultAffinityOperator::new(MatchmakingCriteria::new(2, 5), TimeVaryingConfig::default())
    }

    #[test]
    fn test_all_solo_teams() {
        let op = operator();
        let units: Vec<_> = (1..=10).map(|id| unit(id, 1, 3)).collect();
        let outcome = TeamFinder::new(*op.criteria(), &op)
            .solve(&units, 0, None, &Deadline::unbounded())
            .unwrap();
        // C(10, 5)
        assert_eq!(outcome.teams.len(), 252);
        assert_eq!(outcome.status, SolveStatus::Optimal);
    }

    #[test]
    fn test_mixed_sizes_enumerated_once() {
        let op = operator();
        let units = mixed_pool();
        let outcome = TeamFinder::new(*op.criteria(), &op)
            .solve(&units, 0, None, &Deadline::unbounded())
            .unwrap();

        // {5}:2 {4,1}:30 {3,2}:20 {3,1,1}:180 {2,2,1}:100 {2,1,1,1}:600 {1x5}:252
        assert_eq!(outcome.teams.len(), 1184);

        let mut seen = HashSet::new();
        for team in &outcome.teams {
            let users: usize = team.members.iter().map(|i| units[i].member_count()).sum();
            assert_eq!(users, 5);
            assert_eq!(team.user_count, 5);
            assert!(seen.insert(team.members.clone()), "duplicate team generated");
        }
    }

    #[test]
    fn test_incompatible_ranks_split_teams() {
        let op = operator();
        let mut units: Vec<_> = (1..=5).map(|id| unit(id, 1, 1)).collect();
        units.extend((6..=10).map(|id| unit(id, 1, 9)));
        let outcome = TeamFinder::new(*op.criteria(), &op)
            .solve(&units, 0, None, &Deadline::unbounded())
            .unwrap();
        assert_eq!(outcome.teams.len(), 2);
        for team in &outcome.teams {
            let ranks: HashSet<i32> = team.members.iter().map(|i| units[i].affinity.rank).collect();
            assert_eq!(ranks.len(), 1);
        }
    }

    #[test]
    fn test_team_limit_truncates() {
        let op = operator();
        let units = mixed_pool();
        let outcome = TeamFinder::new(*op.criteria(), &op)
            .solve(&units, 0, Some(7), &Deadline::unbounded())
            .unwrap();
        assert_eq!(outcome.teams.len(), 7);
        assert_eq!(outcome.status, SolveStatus::Feasible);
    }

    #[test]
    fn test_expired_budget_stops_search() {
        let op = operator();
        let units: Vec<_> = (1..=24).map(|id| unit(id, 1, 3)).collect();
        let expired = Deadline::after_seconds(10.0).share(0.0);
        let outcome = TeamFinder::new(*op.criteria(), &op)
            .solve(&units, 0, None, &expired)
            .unwrap();
        assert!(outcome.teams.len() < 42_504, "C(24,5) teams means no cutoff");
        assert_ne!(outcome.status, SolveStatus::Optimal);
    }

    #[test]
    fn test_graph_and_operator_agree() {
        let op = operator();
        let mut units = mixed_pool();
        for (i, u) in units.iter_mut().enumerate() {
            u.affinity = AffinityState::new(0, (i % 3) as i32, 1.0, 0);
        }
        let graph = CompatibilityGraph::build(&units, &op);

        let plain = TeamFinder::new(*op.criteria(), &op)
            .solve(&units, 0, None, &Deadline::unbounded())
            .unwrap();
        let cached = TeamFinder::new(*op.criteria(), &op)
            .with_graph(&graph)
            .solve(&units, 0, None, &Deadline::unbounded())
            .unwrap();

        let a: HashSet<_> = plain.teams.iter().map(|t| t.members.clone()).collect();
        let b: HashSet<_> = cached.teams.iter().map(|t| t.members.clone()).collect();
        assert!(!a.is_empty());
        assert_eq!(a, b);
    }

    #[test]
    fn test_oversized_units_never_placed() {
        let op = operator();
        let units = vec![unit(1, 2, 3), unit(2, 6, 3)];
        let outcome = TeamFinder::new(*op.criteria(), &op)
            .solve(&units, 0, None, &Deadline::unbounded())
            .unwrap();
        assert!(outcome.teams.is_empty());
        assert_eq!(outcome.status, SolveStatus::Optimal);
    }
}
