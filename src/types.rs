use crate::error::{MatchmakingError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimum spacing between two effective affinity updates (seconds)
pub const UPDATE_COOLDOWN: i64 = 60;

/// Closed interval `[min, max]`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClosedRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: PartialOrd + Copy> ClosedRange<T> {
    pub fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn point(value: T) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn is_superset_of(&self, other: &ClosedRange<T>) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Smallest range covering both
    pub fn hull(&self, other: &ClosedRange<T>) -> ClosedRange<T> {
        ClosedRange {
            min: if other.min < self.min { other.min } else { self.min },
            max: if other.max > self.max { other.max } else { self.max },
        }
    }
}

/// Time-widening tolerance of a match unit (or of a merged team).
///
/// The matched ranges start as the unit's own rank/skill point and only ever
/// grow as the unit waits. Updates closer than [`UPDATE_COOLDOWN`] to the
/// previous effective update are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AffinityState {
    pub enter_timestamp: i64,
    /// `None` until the first effective update
    pub last_update_timestamp: Option<i64>,
    pub rank: i32,
    pub skill: f64,
    /// Role flags, bit `i` set when the unit covers position `i`
    pub positions: u64,
    pub matched_rank_range: ClosedRange<i32>,
    pub matched_skill_range: ClosedRange<f64>,
}

impl AffinityState {
    pub fn new(enter_timestamp: i64, rank: i32, skill: f64, positions: u64) -> Self {
        Self {
            enter_timestamp,
            last_update_timestamp: None,
            rank,
            skill,
            positions,
            matched_rank_range: ClosedRange::point(rank),
            matched_skill_range: ClosedRange::point(skill),
        }
    }

    /// Widen the matched ranges for the time waited up to `current_timestamp`.
    ///
    /// Rank widens by `delta_rank` per full `rank_window`; skill widens
    /// continuously by `delta_skill_ratio * |skill|` per `skill_window`.
    pub fn update(&mut self, current_timestamp: i64, config: &TimeVaryingConfig) {
        if let Some(last) = self.last_update_timestamp {
            if current_timestamp.saturating_sub(last) < UPDATE_COOLDOWN {
                return;
            }
        }
        self.last_update_timestamp = Some(current_timestamp);

        let elapsed = current_timestamp.saturating_sub(self.enter_timestamp).max(0);
        let rank_steps = elapsed / config.rank_window.max(1);
        let delta_rank = (rank_steps.saturating_mul(config.delta_rank as i64))
            .clamp(0, i32::MAX as i64) as i32;
        let delta_skill = (self.skill.abs() * config.delta_skill_ratio * elapsed as f64
            / config.skill_window.max(1) as f64)
            .max(0.0);

        let rank_range = ClosedRange::new(
            self.rank.saturating_sub(delta_rank),
            self.rank.saturating_add(delta_rank),
        );
        let skill_range = ClosedRange::new(self.skill - delta_skill, self.skill + delta_skill);
        self.matched_rank_range = self.matched_rank_range.hull(&rank_range);
        self.matched_skill_range = self.matched_skill_range.hull(&skill_range);
    }

    /// Fold another state into this one: latest entry, earliest update, the
    /// most demanding rank and skill, and every covered position. Ranges are
    /// reset to the merged point and widen again on the next update.
    pub fn merge(&mut self, other: &AffinityState) {
        self.enter_timestamp = self.enter_timestamp.max(other.enter_timestamp);
        self.last_update_timestamp = self.last_update_timestamp.min(other.last_update_timestamp);
        self.rank = self.rank.max(other.rank);
        self.skill = self.skill.max(other.skill);
        self.positions |= other.positions;
        self.matched_rank_range = ClosedRange::point(self.rank);
        self.matched_skill_range = ClosedRange::point(self.skill);
    }

    /// Bidirectional containment: each side's point lies in the other's range.
    pub fn is_compatible(&self, other: &AffinityState) -> bool {
        self.matched_rank_range.contains(other.rank)
            && other.matched_rank_range.contains(self.rank)
            && self.matched_skill_range.contains(other.skill)
            && other.matched_skill_range.contains(self.skill)
    }
}

/// A party queued together. Its members always land on the same team.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchUnit {
    pub id: u64,
    member_ids: Vec<u64>,
    /// Relay group id -> latency in ms
    pub relay_latency_by_group: HashMap<u32, u32>,
    pub expected_win_probability: f64,
    pub affinity: AffinityState,
}

impl MatchUnit {
    pub fn new(
        id: u64,
        member_ids: Vec<u64>,
        relay_latency_by_group: HashMap<u32, u32>,
        expected_win_probability: f64,
        affinity: AffinityState,
    ) -> Result<Self> {
        if member_ids.is_empty() {
            return Err(MatchmakingError::EmptyUnit { unit_id: id });
        }
        Ok(Self {
            id,
            member_ids,
            relay_latency_by_group,
            expected_win_probability,
            affinity,
        })
    }

    pub fn member_ids(&self) -> &[u64] {
        &self.member_ids
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }
}

/// Shape of a game and the bounds units are validated against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchmakingCriteria {
    pub teams_per_game: usize,
    pub users_per_team: usize,
    pub max_rank: i32,
    pub max_positions: usize,
    pub max_relay_groups: usize,
}

impl Default for MatchmakingCriteria {
    fn default() -> Self {
        Self {
            teams_per_game: 2,
            users_per_team: 5,
            max_rank: 10,
            max_positions: 5,
            max_relay_groups: 2,
        }
    }
}

impl MatchmakingCriteria {
    pub fn new(teams_per_game: usize, users_per_team: usize) -> Self {
        Self {
            teams_per_game,
            users_per_team,
            ..Self::default()
        }
    }

    pub fn users_per_game(&self) -> usize {
        self.teams_per_game * self.users_per_team
    }

    pub fn validate(&self) -> Result<()> {
        if self.teams_per_game == 0 {
            return Err(MatchmakingError::Configuration(
                "teams_per_game must be positive".to_string(),
            ));
        }
        if self.users_per_team == 0 {
            return Err(MatchmakingError::Configuration(
                "users_per_team must be positive".to_string(),
            ));
        }
        if self.max_positions > 64 {
            return Err(MatchmakingError::Configuration(format!(
                "max_positions {} exceeds the 64 supported position flags",
                self.max_positions
            )));
        }
        Ok(())
    }

    /// Check a unit's positions and relay groups against the configured bounds
    pub fn validate_unit(&self, unit: &MatchUnit) -> Result<()> {
        // Deserialized units skip the constructor
        if unit.member_ids.is_empty() {
            return Err(MatchmakingError::EmptyUnit { unit_id: unit.id });
        }
        let allowed = if self.max_positions >= 64 {
            u64::MAX
        } else {
            (1u64 << self.max_positions) - 1
        };
        if unit.affinity.positions & !allowed != 0 {
            return Err(MatchmakingError::Configuration(format!(
                "unit {} declares positions {:#b} beyond max_positions {}",
                unit.id, unit.affinity.positions, self.max_positions
            )));
        }
        if unit.relay_latency_by_group.len() > self.max_relay_groups {
            return Err(MatchmakingError::Configuration(format!(
                "unit {} reports {} relay groups, max_relay_groups is {}",
                unit.id,
                unit.relay_latency_by_group.len(),
                self.max_relay_groups
            )));
        }
        Ok(())
    }
}

/// How fast affinity windows widen
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeVaryingConfig {
    /// Seconds per rank widening step
    pub rank_window: i64,
    /// Rank added on each side per step
    pub delta_rank: i32,
    /// Seconds over which skill widens by `delta_skill_ratio`
    pub skill_window: i64,
    pub delta_skill_ratio: f64,
}

impl Default for TimeVaryingConfig {
    fn default() -> Self {
        Self {
            rank_window: 60,
            delta_rank: 1,
            skill_window: 60,
            delta_skill_ratio: 0.2,
        }
    }
}

impl TimeVaryingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rank_window <= 0 || self.skill_window <= 0 {
            return Err(MatchmakingError::Configuration(
                "rank_window and skill_window must be positive".to_string(),
            ));
        }
        if self.delta_rank < 0 || !(self.delta_skill_ratio >= 0.0) {
            return Err(MatchmakingError::Configuration(
                "delta_rank and delta_skill_ratio must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which game search strategy the engine runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameFinderKind {
    #[default]
    Backtrack,
    Constraint,
}

/// What the global selection maximizes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionObjective {
    /// Number of games, ties broken by score
    #[default]
    MaxGames,
    /// Sum of game scores
    MaxScore,
}

/// Search caps and budget for one solve
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverParameters {
    /// Cap on games kept and selected, `<= 0` for unbounded
    pub max_game_count: i32,
    /// Cap on feasible teams enumerated, `<= 0` for unbounded
    pub max_team_count: i32,
    /// Wall-clock budget in seconds, `0` for unbounded
    pub max_solve_time_seconds: f64,
    pub game_finder: GameFinderKind,
    pub objective: SelectionObjective,
    pub use_compatibility_graph: bool,
}

impl Default for SolverParameters {
    fn default() -> Self {
        Self {
            max_game_count: 0,
            max_team_count: 0,
            max_solve_time_seconds: 5.0,
            game_finder: GameFinderKind::default(),
            objective: SelectionObjective::default(),
            use_compatibility_graph: false,
        }
    }
}

impl SolverParameters {
    pub fn game_limit(&self) -> Option<usize> {
        (self.max_game_count > 0).then_some(self.max_game_count as usize)
    }

    pub fn team_limit(&self) -> Option<usize> {
        (self.max_team_count > 0).then_some(self.max_team_count as usize)
    }

    pub fn validate(&self) -> Result<()> {
        let budget = self.max_solve_time_seconds;
        if !budget.is_finite() || budget < 0.0 {
            return Err(MatchmakingError::Configuration(format!(
                "max_solve_time_seconds must be finite and non-negative, got {}",
                budget
            )));
        }
        Ok(())
    }
}

/// Everything an engine instance needs, as one JSON document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub criteria: MatchmakingCriteria,
    pub time_varying: TimeVaryingConfig,
    pub solver: SolverParameters,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.criteria.validate()?;
        self.time_varying.validate()?;
        self.solver.validate()
    }
}

/// Outcome quality of a stage or of a whole solve
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// Search space exhausted, answer is complete
    Optimal,
    /// Budget ran out after a valid answer was found
    Feasible,
    Infeasible,
    /// Budget ran out before any answer was found
    Timeout,
}

impl SolveStatus {
    /// Combine stage statuses: any truncated stage truncates the whole run
    pub fn and(self, other: SolveStatus) -> SolveStatus {
        use SolveStatus::*;
        match (self, other) {
            (Infeasible, _) | (_, Infeasible) => Infeasible,
            (Timeout, _) | (_, Timeout) => Timeout,
            (Feasible, _) | (_, Feasible) => Feasible,
            (Optimal, Optimal) => Optimal,
        }
    }
}

/// Counters and timings for one solve tick
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SolveStats {
    pub unit_count: usize,
    pub user_count: usize,
    /// Size-only upper bound on disjoint teams, when computed
    pub team_capacity_bound: Option<u64>,
    pub feasible_teams: usize,
    pub feasible_games: usize,
    pub selected_games: usize,
    pub team_search_ms: f64,
    pub game_search_ms: f64,
    pub selection_ms: f64,
}

/// Public answer: games -> teams -> match unit ids
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchmakingResults {
    pub games: Vec<Vec<Vec<u64>>>,
    pub status: SolveStatus,
    pub stats: SolveStats,
}

impl MatchmakingResults {
    pub fn empty(status: SolveStatus, stats: SolveStats) -> Self {
        Self {
            games: Vec::new(),
            status,
            stats,
        }
    }

    /// Every match unit id placed in some game
    pub fn matched_unit_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.games.iter().flatten().flatten().copied()
    }
}
