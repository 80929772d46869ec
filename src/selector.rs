use crate::bitset::UnitSet;
use crate::budget::Deadline;
use crate::error::{MatchmakingError, Result};
use crate::game_finder::FeasibleGame;
use crate::oracle::{Model, OptimizationOracle, VarId};
use crate::types::*;
use log::{debug, warn};
use std::collections::HashSet;

/// Games picked for this tick, as unit ids
#[derive(Debug)]
pub struct Selection {
    /// Indices into the candidate list, best score first
    pub indices: Vec<usize>,
    pub games: Vec<Vec<Vec<u64>>>,
    pub status: SolveStatus,
}

/// Chooses a unit-disjoint subset of candidate games (weighted set packing)
pub struct GlobalSelector<'a, B: OptimizationOracle + ?Sized> {
    oracle: &'a B,
    objective: SelectionObjective,
}

impl<'a, B: OptimizationOracle + ?Sized> GlobalSelector<'a, B> {
    pub fn new(oracle: &'a B, objective: SelectionObjective) -> Self {
        Self { oracle, objective }
    }

    pub fn solve(
        &self,
        units: &[MatchUnit],
        games: &[FeasibleGame],
        parameters: &SolverParameters,
        deadline: &Deadline,
    ) -> Result<Selection> {
        if games.is_empty() {
            return Ok(Selection {
                indices: Vec::new(),
                games: Vec::new(),
                status: SolveStatus::Optimal,
            });
        }

        // Best candidates first so the first complete assignment is greedy
        let mut order: Vec<usize> = (0..games.len()).collect();
        order.sort_by(|&a, &b| games[b].score().total_cmp(&games[a].score()));

        let mut model = Model::new();
        let vars: Vec<VarId> = order
            .iter()
            .map(|&g| model.new_bool_var(format!("game_{}", g)))
            .collect();

        let mut games_by_unit: Vec<Vec<VarId>> = vec![Vec::new(); units.len()];
        for (&g, &var) in order.iter().zip(&vars) {
            for unit in games[g].members().iter() {
                let slot = games_by_unit.get_mut(unit).ok_or_else(|| {
                    MatchmakingError::InvalidSelection(format!(
                        "game {} references unit index {} outside snapshot of {}",
                        g,
                        unit,
                        units.len()
                    ))
                })?;
                slot.push(var);
            }
        }
        for group in &games_by_unit {
            model.add_at_most_one(group);
        }
        // Head count also caps the number of games
        let users: usize = units.iter().map(MatchUnit::member_count).sum();
        let smallest_game = games
            .iter()
            .map(|g| g.teams().iter().map(|t| t.user_count).sum::<usize>())
            .min()
            .unwrap_or(1)
            .max(1);
        let head_room = users / smallest_game;
        let limit = parameters.game_limit().map_or(head_room, |cap| cap.min(head_room));
        if limit < games.len() {
            model.add_less_or_equal(vars.iter().map(|&v| (v, 1)).collect(), limit as i64);
        }
        model.maximize(self.objective_terms(games, &order, &vars));

        let solution = self.oracle.solve(&model, deadline)?;
        let (indices, status) = match (solution.status, solution.assignment) {
            (SolveStatus::Infeasible, _) => {
                return Err(MatchmakingError::Unsolvable(format!(
                    "selection over {} candidate games reported infeasible",
                    games.len()
                )))
            }
            (status, None) => {
                warn!(
                    "game selection ended {:?} without an assignment, packing greedily",
                    status
                );
                let picked = greedy_packing(games, &order, parameters.game_limit());
                let status = if picked.is_empty() {
                    status
                } else {
                    SolveStatus::Feasible
                };
                (picked, status)
            }
            (status, Some(assignment)) => {
                let picked = order
                    .iter()
                    .zip(&vars)
                    .filter(|(_, &v)| assignment.value(v))
                    .map(|(&g, _)| g)
                    .collect();
                (picked, status)
            }
        };

        let selected: Vec<Vec<Vec<u64>>> = indices.iter().map(|&g| games[g].to_raw(units)).collect();
        verify_disjoint(&selected)?;

        debug!(
            "selection: {} of {} candidate games, objective {:.3}, {:?}",
            indices.len(),
            games.len(),
            solution.objective_value,
            status
        );
        Ok(Selection {
            indices,
            games: selected,
            status,
        })
    }

    fn objective_terms(&self, games: &[FeasibleGame], order: &[usize], vars: &[VarId]) -> Vec<(VarId, f64)> {
        match self.objective {
            SelectionObjective::MaxScore => order
                .iter()
                .zip(vars)
                .map(|(&g, &v)| (v, games[g].score()))
                .collect(),
            SelectionObjective::MaxGames => {
                // Score tie-breaks sum to less than one game
                let low = games.iter().map(FeasibleGame::score).fold(f64::INFINITY, f64::min);
                let high = games.iter().map(FeasibleGame::score).fold(f64::NEG_INFINITY, f64::max);
                let spread = high - low;
                let scale = (games.len() + 1) as f64;
                order
                    .iter()
                    .zip(vars)
                    .map(|(&g, &v)| {
                        let normalized = if spread > 0.0 {
                            (games[g].score() - low) / spread
                        } else {
                            0.0
                        };
                        (v, 1.0 + normalized / scale)
                    })
                    .collect()
            }
        }
    }
}

/// Take games in `order` while they stay disjoint from those already taken
fn greedy_packing(games: &[FeasibleGame], order: &[usize], cap: Option<usize>) -> Vec<usize> {
    let mut taken = UnitSet::new();
    let mut picked = Vec::new();
    for &g in order {
        if cap.map_or(false, |c| picked.len() >= c) {
            break;
        }
        if !games[g].members().intersects(&taken) {
            taken.union_with(games[g].members());
            picked.push(g);
        }
    }
    picked
}

/// Every unit id may appear in at most one team of the whole selection
pub fn verify_disjoint(games: &[Vec<Vec<u64>>]) -> Result<()> {
    let mut seen = HashSet::new();
    for unit_id in games.iter().flatten().flatten() {
        if !seen.insert(*unit_id) {
            return Err(MatchmakingError::DisjointnessViolated { unit_id: *unit_id });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::BranchAndBoundOracle;
    use crate::team_finder::FeasibleTeam;
    use std::collections::HashMap;

    fn units(n: u64) -> Vec<MatchUnit> {
        (0..n)
            .map(|id| {
                MatchUnit::new(id + 1, vec![id + 100], HashMap::new(), 0.5, AffinityState::new(0, 4, 1.0, 0))
                    .unwrap()
            })
            .collect()
    }

    fn team(members: &[usize], enter: i64, rank: i32) -> FeasibleTeam {
        FeasibleTeam {
            members: members.iter().copied().collect::<UnitSet>(),
            affinity: AffinityState::new(enter, rank, 1.0, 0),
            user_count: members.len(),
        }
    }

    /// A two-team game; `enter` controls the score at t=600
    fn game(a: &[usize], b: &[usize], enter: i64) -> FeasibleGame {
        FeasibleGame::new(vec![team(a, enter, 4), team(b, enter, 4)], 600)
    }

    #[test]
    fn test_single_game_cap_picks_best() {
        let units = units(6);
        let games = vec![game(&[0], &[1], 300), game(&[2], &[3], 0), game(&[4], &[5], 120)];
        let oracle = BranchAndBoundOracle::default();
        let params = SolverParameters {
            max_game_count: 1,
            ..SolverParameters::default()
        };

        let selection = GlobalSelector::new(&oracle, SelectionObjective::MaxGames)
            .solve(&units, &games, &params, &Deadline::unbounded())
            .unwrap();
        assert_eq!(selection.indices, vec![1]);
        assert_eq!(selection.games, vec![vec![vec![3], vec![4]]]);
        assert_eq!(selection.status, SolveStatus::Optimal);
    }

    #[test]
    fn test_max_games_beats_one_high_score() {
        let units = units(4);
        // One great game covering everything versus two modest disjoint ones
        let games = vec![
            FeasibleGame::new(vec![team(&[0, 1], 0, 4), team(&[2, 3], 0, 4)], 600),
            game(&[0], &[1], 500),
            game(&[2], &[3], 500),
        ];
        let oracle = BranchAndBoundOracle::default();
        let params = SolverParameters::default();

        let by_count = GlobalSelector::new(&oracle, SelectionObjective::MaxGames)
            .solve(&units, &games, &params, &Deadline::unbounded())
            .unwrap();
        let mut picked = by_count.indices.clone();
        picked.sort();
        assert_eq!(picked, vec![1, 2]);

        let by_score = GlobalSelector::new(&oracle, SelectionObjective::MaxScore)
            .solve(&units, &games, &params, &Deadline::unbounded())
            .unwrap();
        // 10 minutes waited beats 2 x 100 seconds
        assert_eq!(by_score.indices, vec![0]);
    }

    #[test]
    fn test_overlapping_games_never_both_selected() {
        let units = units(5);
        let games = vec![game(&[0], &[1], 0), game(&[1], &[2], 0), game(&[3], &[4], 0)];
        let oracle = BranchAndBoundOracle::default();
        let selection = GlobalSelector::new(&oracle, SelectionObjective::MaxGames)
            .solve(&units, &games, &SolverParameters::default(), &Deadline::unbounded())
            .unwrap();
        assert_eq!(selection.indices.len(), 2);
        assert!(selection.indices.contains(&2));
        assert!(verify_disjoint(&selection.games).is_ok());
    }

    #[test]
    fn test_no_candidates() {
        let oracle = BranchAndBoundOracle::default();
        let selection = GlobalSelector::new(&oracle, SelectionObjective::MaxGames)
            .solve(&units(2), &[], &SolverParameters::default(), &Deadline::unbounded())
            .unwrap();
        assert!(selection.games.is_empty());
        assert_eq!(selection.status, SolveStatus::Optimal);
    }

    #[test]
    fn test_game_outside_snapshot_is_rejected() {
        let oracle = BranchAndBoundOracle::default();
        let games = vec![game(&[0], &[7], 0)];
        let result = GlobalSelector::new(&oracle, SelectionObjective::MaxGames).solve(
            &units(2),
            &games,
            &SolverParameters::default(),
            &Deadline::unbounded(),
        );
        assert!(matches!(result, Err(MatchmakingError::InvalidSelection(_))));
    }

    #[test]
    fn test_greedy_packing_respects_order_and_cap() {
        let games = vec![game(&[0], &[1], 0), game(&[1], &[2], 0), game(&[3], &[4], 0), game(&[5], &[6], 0)];
        assert_eq!(greedy_packing(&games, &[1, 0, 2, 3], None), vec![1, 2, 3]);
        assert_eq!(greedy_packing(&games, &[0, 1, 2, 3], Some(2)), vec![0, 2]);
    }

    #[test]
    fn test_verify_disjoint_flags_repeat() {
        let games = vec![vec![vec![1, 2], vec![3]], vec![vec![4], vec![2]]];
        assert!(matches!(
            verify_disjoint(&games),
            Err(MatchmakingError::DisjointnessViolated { unit_id: 2 })
        ));
    }
}
