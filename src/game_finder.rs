use crate::bitset::UnitSet;
use crate::budget::Deadline;
use crate::error::Result;
use crate::operator::AffinityOperator;
use crate::oracle::{Model, OptimizationOracle, StopSignal, VarId};
use crate::team_finder::FeasibleTeam;
use crate::types::*;
use log::{debug, warn};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Explored states between two deadline checks
const POLL_INTERVAL: usize = 256;

/// Teams that can play each other: pairwise disjoint and compatible
#[derive(Clone, Debug)]
pub struct FeasibleGame {
    teams: Vec<FeasibleTeam>,
    members: UnitSet,
    score: f64,
}

impl FeasibleGame {
    pub fn new(teams: Vec<FeasibleTeam>, current_timestamp: i64) -> Self {
        let mut members = UnitSet::new();
        for team in &teams {
            members.union_with(&team.members);
        }
        let score = game_score(&teams, current_timestamp);
        Self {
            teams,
            members,
            score,
        }
    }

    pub fn teams(&self) -> &[FeasibleTeam] {
        &self.teams
    }

    /// Snapshot indices of every unit in the game
    pub fn members(&self) -> &UnitSet {
        &self.members
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn contains(&self, unit_index: usize) -> bool {
        self.members.contains(unit_index)
    }

    /// Teams as lists of unit ids
    pub fn to_raw(&self, units: &[MatchUnit]) -> Vec<Vec<u64>> {
        self.teams.iter().map(|t| t.unit_ids(units)).collect()
    }
}

/// Minutes waited by the longest-waiting team, minus the rank and skill
/// spread across teams. Higher is better.
pub fn game_score(teams: &[FeasibleTeam], current_timestamp: i64) -> f64 {
    if teams.is_empty() {
        return 0.0;
    }
    let mut min_rank = i32::MAX;
    let mut max_rank = i32::MIN;
    let mut min_skill = f64::INFINITY;
    let mut max_skill = f64::NEG_INFINITY;
    let mut earliest_enter = i64::MAX;
    for team in teams {
        let affinity = &team.affinity;
        min_rank = min_rank.min(affinity.rank);
        max_rank = max_rank.max(affinity.rank);
        min_skill = min_skill.min(affinity.skill);
        max_skill = max_skill.max(affinity.skill);
        earliest_enter = earliest_enter.min(affinity.enter_timestamp);
    }
    let waited = current_timestamp.saturating_sub(earliest_enter) as f64 / 60.0;
    waited - (max_rank as f64 - min_rank as f64) - (max_skill - min_skill)
}

struct ByScore(FeasibleGame);

impl PartialEq for ByScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByScore {}

impl PartialOrd for ByScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.score.total_cmp(&other.0.score)
    }
}

/// Keeps the best `capacity` games by score; unbounded when `None`
pub struct TopGames {
    capacity: Option<usize>,
    heap: BinaryHeap<Reverse<ByScore>>,
}

impl TopGames {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::new(),
        }
    }

    /// Insert `game`, evicting the worst kept game if it scores lower
    pub fn offer(&mut self, game: FeasibleGame) {
        match self.capacity {
            Some(cap) if self.heap.len() >= cap => {
                let replaces_worst = self
                    .heap
                    .peek()
                    .map_or(false, |Reverse(worst)| game.score > worst.0.score);
                if replaces_worst {
                    self.heap.pop();
                    self.heap.push(Reverse(ByScore(game)));
                }
            }
            _ => self.heap.push(Reverse(ByScore(game))),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.map_or(false, |cap| self.heap.len() >= cap)
    }

    /// Kept games, best first
    pub fn into_sorted_vec(self) -> Vec<FeasibleGame> {
        // Ascending over Reverse is descending by score
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(ByScore(game))| game)
            .collect()
    }
}

#[derive(Debug)]
pub struct GameSearchOutcome {
    pub games: Vec<FeasibleGame>,
    pub status: SolveStatus,
}

/// Turns feasible teams into feasible games
pub trait GameFinder {
    fn solve(
        &self,
        units: &[MatchUnit],
        teams: &[FeasibleTeam],
        parameters: &SolverParameters,
        current_timestamp: i64,
        deadline: &Deadline,
    ) -> Result<GameSearchOutcome>;

    fn name(&self) -> &'static str;
}

/// Backtracking search state: teams before `explored` are decided,
/// `chosen` holds the picked team indices.
struct GameSearchState {
    explored: usize,
    chosen: Vec<usize>,
}

/// Explicit-stack search over team combinations in ascending index order
pub struct BacktrackGameFinder<'a, O: AffinityOperator + ?Sized> {
    criteria: MatchmakingCriteria,
    operator: &'a O,
}

impl<'a, O: AffinityOperator + ?Sized> BacktrackGameFinder<'a, O> {
    pub fn new(criteria: MatchmakingCriteria, operator: &'a O) -> Self {
        Self { criteria, operator }
    }
}

impl<O: AffinityOperator + ?Sized> GameFinder for BacktrackGameFinder<'_, O> {
    fn solve(
        &self,
        _units: &[MatchUnit],
        teams: &[FeasibleTeam],
        parameters: &SolverParameters,
        current_timestamp: i64,
        deadline: &Deadline,
    ) -> Result<GameSearchOutcome> {
        let per_game = self.criteria.teams_per_game;
        let mut kept = TopGames::new(parameters.game_limit());
        let mut states = vec![GameSearchState {
            explored: 0,
            chosen: Vec::with_capacity(per_game),
        }];
        let mut visited = 0usize;
        let mut status = SolveStatus::Optimal;

        while let Some(state) = states.pop() {
            visited += 1;
            if visited % POLL_INTERVAL == 0 && deadline.is_expired() {
                warn!("game search hit its time budget after {} states", visited);
                status = if kept.is_empty() {
                    SolveStatus::Timeout
                } else {
                    SolveStatus::Feasible
                };
                break;
            }

            let idx = state.explored;
            let still_needed = per_game - state.chosen.len();
            if teams.len().saturating_sub(idx) < still_needed {
                continue;
            }

            states.push(GameSearchState {
                explored: idx + 1,
                chosen: state.chosen.clone(),
            });

            let candidate = &teams[idx];
            if !state
                .chosen
                .iter()
                .all(|&t| self.operator.is_fit_one_game(candidate, &teams[t]))
            {
                continue;
            }
            let mut chosen = state.chosen;
            chosen.push(idx);
            if chosen.len() == per_game {
                let picked = chosen.iter().map(|&t| teams[t].clone()).collect();
                kept.offer(FeasibleGame::new(picked, current_timestamp));
            } else {
                states.push(GameSearchState {
                    explored: idx + 1,
                    chosen,
                });
            }
        }

        debug!(
            "backtrack game search: {} teams, {} states, {} games kept, {:?}",
            teams.len(),
            visited,
            kept.len(),
            status
        );
        Ok(GameSearchOutcome {
            games: kept.into_sorted_vec(),
            status,
        })
    }

    fn name(&self) -> &'static str {
        "backtrack"
    }
}

/// Hands team combination to an optimization oracle: one boolean per team,
/// exactly `teams_per_game` of them true, at most one team per unit.
/// Rank and skill compatibility is not in the model and is re-checked on
/// every assignment.
pub struct ConstraintGameFinder<'a, O: AffinityOperator + ?Sized, B: OptimizationOracle + ?Sized> {
    criteria: MatchmakingCriteria,
    operator: &'a O,
    oracle: &'a B,
}

impl<'a, O: AffinityOperator + ?Sized, B: OptimizationOracle + ?Sized> ConstraintGameFinder<'a, O, B> {
    pub fn new(criteria: MatchmakingCriteria, operator: &'a O, oracle: &'a B) -> Self {
        Self {
            criteria,
            operator,
            oracle,
        }
    }

    fn build_model(&self, unit_count: usize, teams: &[FeasibleTeam]) -> (Model, Vec<VarId>) {
        let mut model = Model::new();
        let vars: Vec<VarId> = (0..teams.len())
            .map(|t| model.new_bool_var(format!("team_{}", t)))
            .collect();
        model.add_equality(
            vars.iter().map(|&v| (v, 1)).collect(),
            self.criteria.teams_per_game as i64,
        );

        let mut teams_by_unit: Vec<Vec<VarId>> = vec![Vec::new(); unit_count];
        for (team, &var) in teams.iter().zip(&vars) {
            for unit in team.members.iter() {
                if let Some(slot) = teams_by_unit.get_mut(unit) {
                    slot.push(var);
                }
            }
        }
        for group in &teams_by_unit {
            model.add_at_most_one(group);
        }
        (model, vars)
    }
}

impl<O: AffinityOperator + ?Sized, B: OptimizationOracle + ?Sized> GameFinder
    for ConstraintGameFinder<'_, O, B>
{
    fn solve(
        &self,
        units: &[MatchUnit],
        teams: &[FeasibleTeam],
        parameters: &SolverParameters,
        current_timestamp: i64,
        deadline: &Deadline,
    ) -> Result<GameSearchOutcome> {
        if teams.len() < self.criteria.teams_per_game {
            return Ok(GameSearchOutcome {
                games: Vec::new(),
                status: SolveStatus::Optimal,
            });
        }

        let (model, vars) = self.build_model(units.len(), teams);
        let stop = StopSignal::new();
        let mut stream = self
            .oracle
            .enumerate(&model, deadline.clone(), None, stop.clone())?;
        let mut kept = TopGames::new(parameters.game_limit());
        let mut rejected = 0usize;

        for assignment in stream.by_ref() {
            let picked: Vec<&FeasibleTeam> = vars
                .iter()
                .zip(teams)
                .filter(|(&v, _)| assignment.value(v))
                .map(|(_, team)| team)
                .collect();
            let compatible = picked.iter().enumerate().all(|(i, a)| {
                picked[i + 1..]
                    .iter()
                    .all(|b| self.operator.is_fit_one_game(a, b))
            });
            if !compatible {
                rejected += 1;
                continue;
            }
            kept.offer(FeasibleGame::new(
                picked.into_iter().cloned().collect(),
                current_timestamp,
            ));
            if kept.is_full() {
                stop.raise();
            }
        }

        let status = match stream.status() {
            // No team combination at all is a complete, empty answer
            SolveStatus::Infeasible => SolveStatus::Optimal,
            SolveStatus::Timeout if !kept.is_empty() => SolveStatus::Feasible,
            other => other,
        };
        if status == SolveStatus::Timeout {
            warn!("constraint game search hit its time budget before finding a game");
        }
        debug!(
            "constraint game search: {} teams, {} games kept, {} rejected, {:?}",
            teams.len(),
            kept.len(),
            rejected,
            status
        );
        Ok(GameSearchOutcome {
            games: kept.into_sorted_vec(),
            status,
        })
    }

    fn name(&self) -> &'static str {
        "constraint"
    }
}
