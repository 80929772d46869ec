use crate::budget::Deadline;
use crate::error::{MatchmakingError, Result};
use crate::game_finder::{BacktrackGameFinder, ConstraintGameFinder, GameFinder};
use crate::operator::DefaultAffinityOperator;
use crate::oracle::{BranchAndBoundOracle, OptimizationOracle};
use crate::partition::{instance_ceiling, max_partitions, total_instances};
use crate::pool::{CompatibilityGraph, MatchmakingPool};
use crate::selector::GlobalSelector;
use crate::team_finder::TeamFinder;
use crate::types::*;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Budget shares handed to each stage, as fractions of what is left
const PARTITION_SHARE: f64 = 0.05;
const TEAM_SHARE: f64 = 0.4;
const GAME_SHARE: f64 = 0.6;

/// The matchmaking engine: one solve tick turns a pool snapshot into
/// unit-disjoint games.
pub struct Matchmaker<B: OptimizationOracle = BranchAndBoundOracle> {
    operator: DefaultAffinityOperator,
    oracle: B,
}

impl Matchmaker {
    pub fn new(criteria: MatchmakingCriteria, time_config: TimeVaryingConfig) -> Self {
        Self::with_oracle(criteria, time_config, BranchAndBoundOracle::default())
    }
}

impl<B: OptimizationOracle> Matchmaker<B> {
    pub fn with_oracle(criteria: MatchmakingCriteria, time_config: TimeVaryingConfig, oracle: B) -> Self {
        Self {
            operator: DefaultAffinityOperator::new(criteria, time_config),
            oracle,
        }
    }

    pub fn criteria(&self) -> &MatchmakingCriteria {
        self.operator.criteria()
    }

    pub fn time_config(&self) -> &TimeVaryingConfig {
        self.operator.time_config()
    }

    pub fn operator(&self) -> &DefaultAffinityOperator {
        &self.operator
    }

    /// Solve over a caller-held snapshot. The snapshot is copied; the
    /// caller's units are not touched.
    pub fn solve(
        &self,
        snapshot: &[MatchUnit],
        parameters: &SolverParameters,
        current_timestamp: i64,
    ) -> Result<MatchmakingResults> {
        self.run(snapshot, None, parameters, current_timestamp)
    }

    /// Bring the pool up to `current_timestamp` and solve over its snapshot,
    /// reusing the pool's compatibility graph when it keeps one. Matched
    /// units stay in the pool; removing them is up to the caller.
    pub fn solve_pool(
        &self,
        pool: &mut dyn MatchmakingPool,
        parameters: &SolverParameters,
        current_timestamp: i64,
    ) -> Result<MatchmakingResults> {
        if pool.criteria() != self.criteria() {
            return Err(MatchmakingError::Configuration(format!(
                "pool '{}' was built for different criteria",
                pool.name()
            )));
        }
        pool.update(current_timestamp);
        let snapshot = pool.match_units();
        let graph = if parameters.use_compatibility_graph {
            pool.compatibility_graph()
        } else {
            None
        };
        self.run(&snapshot, graph, parameters, current_timestamp)
    }

    fn validate(&self, snapshot: &[MatchUnit], parameters: &SolverParameters) -> Result<()> {
        self.criteria().validate()?;
        self.time_config().validate()?;
        parameters.validate()?;
        for unit in snapshot {
            self.criteria().validate_unit(unit)?;
        }
        Ok(())
    }

    fn run(
        &self,
        snapshot: &[MatchUnit],
        pool_graph: Option<&CompatibilityGraph>,
        parameters: &SolverParameters,
        current_timestamp: i64,
    ) -> Result<MatchmakingResults> {
        self.validate(snapshot, parameters)?;
        let criteria = *self.criteria();
        let deadline = Deadline::after_seconds(parameters.max_solve_time_seconds);

        let mut units = snapshot.to_vec();
        for unit in &mut units {
            unit.affinity.update(current_timestamp, self.time_config());
        }
        units.sort_by_key(|u| u.member_count());

        let mut stats = SolveStats {
            unit_count: units.len(),
            user_count: units.iter().map(MatchUnit::member_count).sum(),
            ..SolveStats::default()
        };
        if stats.user_count < criteria.users_per_game() {
            debug!(
                "{} users cannot fill a game of {}",
                stats.user_count,
                criteria.users_per_game()
            );
            return Ok(MatchmakingResults::empty(SolveStatus::Optimal, stats));
        }

        let bound = self.team_capacity_bound(&units, &deadline.share(PARTITION_SHARE));
        stats.team_capacity_bound = Some(bound);
        if bound < criteria.teams_per_game as u64 {
            debug!("unit sizes allow only {} disjoint teams", bound);
            return Ok(MatchmakingResults::empty(SolveStatus::Optimal, stats));
        }

        // Teams
        let local_graph;
        let graph = match pool_graph {
            Some(graph) if graph.matches_snapshot(&units) => Some(graph),
            Some(_) => {
                warn!("pool compatibility graph does not match the snapshot, rebuilding");
                local_graph = CompatibilityGraph::build(&units, &self.operator);
                Some(&local_graph)
            }
            None if parameters.use_compatibility_graph => {
                local_graph = CompatibilityGraph::build(&units, &self.operator);
                Some(&local_graph)
            }
            None => None,
        };
        let mut team_finder = TeamFinder::new(criteria, &self.operator);
        if let Some(graph) = graph {
            team_finder = team_finder.with_graph(graph);
        }
        let team_deadline = deadline.share(TEAM_SHARE);
        let teams = team_finder.solve(&units, current_timestamp, parameters.team_limit(), &team_deadline)?;
        stats.feasible_teams = teams.teams.len();
        stats.team_search_ms = team_deadline.elapsed_ms();

        // Games
        let finder: Box<dyn GameFinder + '_> = match parameters.game_finder {
            GameFinderKind::Backtrack => Box::new(BacktrackGameFinder::new(criteria, &self.operator)),
            GameFinderKind::Constraint => {
                Box::new(ConstraintGameFinder::new(criteria, &self.operator, &self.oracle))
            }
        };
        let game_deadline = deadline.share(GAME_SHARE);
        let games = finder.solve(&units, &teams.teams, parameters, current_timestamp, &game_deadline)?;
        stats.feasible_games = games.games.len();
        stats.game_search_ms = game_deadline.elapsed_ms();

        // Selection gets whatever is left
        let selection_deadline = deadline.share(1.0);
        let selection = GlobalSelector::new(&self.oracle, parameters.objective).solve(
            &units,
            &games.games,
            parameters,
            &selection_deadline,
        )?;
        stats.selected_games = selection.games.len();
        stats.selection_ms = selection_deadline.elapsed_ms();

        let status = teams.status.and(games.status).and(selection.status);
        info!(
            "solve at {}: {} units, {} teams, {} games via {}, {} selected, {:?} in {:.1}ms",
            current_timestamp,
            stats.unit_count,
            stats.feasible_teams,
            stats.feasible_games,
            finder.name(),
            stats.selected_games,
            status,
            deadline.elapsed_ms()
        );
        Ok(MatchmakingResults {
            games: selection.games,
            status,
            stats,
        })
    }

    /// Most disjoint teams the unit sizes allow, ignoring compatibility
    fn team_capacity_bound(&self, units: &[MatchUnit], deadline: &Deadline) -> u64 {
        let team_size = self.criteria().users_per_team;
        let mut sizes: BTreeMap<u32, u32> = BTreeMap::new();
        for unit in units.iter().filter(|u| u.member_count() <= team_size) {
            *sizes.entry(unit.member_count() as u32).or_insert(0) += 1;
        }
        let outcome = max_partitions(&sizes, team_size as u32, deadline);
        match outcome.status {
            SolveStatus::Optimal => total_instances(&outcome.plans),
            _ => instance_ceiling(&sizes, team_size as u32),
        }
    }
}
