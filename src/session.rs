use crate::error::{MatchmakingError, Result};
use crate::generator::PoolGenerator;
use crate::matchmaker::Matchmaker;
use crate::pool::{GraphPool, MatchmakingPool};
use crate::types::*;
use log::{debug, info};
use serde::{Deserialize, Serialize};

const POOL_NAME: &str = "default";

/// Running totals across solve ticks
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub ticks: u64,
    pub games_formed: u64,
    pub units_matched: u64,
    pub users_matched: u64,
    pub last_status: Option<SolveStatus>,
    /// Ticks cut short by the solve budget
    pub truncated_ticks: u64,
}

/// A pool plus the engine that drains it, advanced one tick at a time
pub struct MatchmakingSession {
    config: EngineConfig,
    pool: GraphPool,
    matchmaker: Matchmaker,
    generator: PoolGenerator,
    pub stats: SessionStats,
    last_results: Option<MatchmakingResults>,
}

impl MatchmakingSession {
    pub fn new(config: EngineConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pool: GraphPool::new(POOL_NAME, config.criteria, config.time_varying)?,
            matchmaker: Matchmaker::new(config.criteria, config.time_varying),
            generator: PoolGenerator::new(config.criteria, seed),
            config,
            stats: SessionStats::default(),
            last_results: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pool(&self) -> &dyn MatchmakingPool {
        &self.pool
    }

    pub fn last_results(&self) -> Option<&MatchmakingResults> {
        self.last_results.as_ref()
    }

    /// Queue a unit. Returns false when its id is already queued.
    pub fn add_unit(&mut self, unit: MatchUnit) -> Result<bool> {
        self.config.criteria.validate_unit(&unit)?;
        Ok(self.pool.add_match_unit(unit))
    }

    pub fn remove_unit(&mut self, unit_id: u64) -> bool {
        self.pool.remove_match_unit(unit_id)
    }

    /// Queue `count` random units that entered shortly before
    /// `current_timestamp`. Generated ids start above every queued unit and
    /// member id. Returns how many were actually added.
    pub fn generate_units(&mut self, count: usize, current_timestamp: i64) -> Result<usize> {
        let units = self.pool.match_units();
        let max_unit = units.iter().map(|u| u.id).max().unwrap_or(0);
        let max_member = units
            .iter()
            .flat_map(|u| u.member_ids().iter().copied())
            .max()
            .unwrap_or(0);
        self.generator.skip_ids_past(max_unit, max_member);

        let mut added = 0;
        for unit in self.generator.random_units(count, current_timestamp)? {
            if self.pool.add_match_unit(unit) {
                added += 1;
            }
        }
        debug!("generated {} units, pool holds {}", added, self.pool.match_unit_count());
        Ok(added)
    }

    /// One matchmaking tick: solve over the pool and dequeue every matched unit
    pub fn tick(&mut self, current_timestamp: i64) -> Result<MatchmakingResults> {
        let results = self
            .matchmaker
            .solve_pool(&mut self.pool, &self.config.solver, current_timestamp)?;

        let mut users = 0;
        let matched: Vec<u64> = results.matched_unit_ids().collect();
        for &unit_id in &matched {
            if let Some(unit) = self.pool.match_unit(unit_id) {
                users += unit.member_count() as u64;
            }
            self.pool.remove_match_unit(unit_id);
        }

        self.stats.ticks += 1;
        self.stats.games_formed += results.games.len() as u64;
        self.stats.units_matched += matched.len() as u64;
        self.stats.users_matched += users;
        self.stats.last_status = Some(results.status);
        if matches!(results.status, SolveStatus::Feasible | SolveStatus::Timeout) {
            self.stats.truncated_ticks += 1;
        }
        info!(
            "tick {}: {} games, {} units left in pool",
            self.stats.ticks,
            results.games.len(),
            self.pool.match_unit_count()
        );

        self.last_results = Some(results.clone());
        Ok(results)
    }

    /// Swap the configuration. Queued units carry over and must satisfy the
    /// new criteria; on any error the session is left unchanged.
    pub fn update_config(&mut self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let units = self.pool.match_units();
        for unit in &units {
            config.criteria.validate_unit(unit).map_err(|e| {
                MatchmakingError::Configuration(format!("queued unit no longer valid: {}", e))
            })?;
        }

        let mut pool = GraphPool::new(POOL_NAME, config.criteria, config.time_varying)?;
        for unit in units {
            pool.add_match_unit(unit);
        }
        self.pool = pool;
        self.matchmaker = Matchmaker::new(config.criteria, config.time_varying);
        self.generator.set_criteria(config.criteria);
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        SessionState {
            pool_name: self.pool.name().to_string(),
            unit_count: self.pool.match_unit_count(),
            user_count: self.pool.user_count(),
            max_game_count: self.pool.max_game_count(),
            units: self.pool.match_units(),
            stats: self.stats.clone(),
            config: self.config.clone(),
        }
    }

    /// Current state as JSON for the frontend
    pub fn state_json(&self) -> String {
        serde_json::to_string(&self.state()).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize)]
pub struct SessionState {
    pub pool_name: String,
    pub unit_count: usize,
    pub user_count: usize,
    pub max_game_count: usize,
    pub units: Vec<MatchUnit>,
    pub stats: SessionStats,
    pub config: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn solo_config() -> EngineConfig {
        EngineConfig {
            criteria: MatchmakingCriteria::new(2, 2),
            solver: SolverParameters {
                max_solve_time_seconds: 0.0,
                ..SolverParameters::default()
            },
            ..EngineConfig::default()
        }
    }

    fn solo(id: u64) -> MatchUnit {
        MatchUnit::new(id, vec![id * 10], HashMap::new(), 0.5, AffinityState::new(0, 2, 1.0, 0b1)).unwrap()
    }

    #[test]
    fn test_tick_dequeues_matched_units() {
        let mut session = MatchmakingSession::new(solo_config(), 42).unwrap();
        for id in 1..=9 {
            assert!(session.add_unit(solo(id)).unwrap());
        }

        let results = session.tick(0).unwrap();
        assert_eq!(results.games.len(), 2);
        assert_eq!(results.status, SolveStatus::Optimal);

        let matched: HashSet<u64> = results.matched_unit_ids().collect();
        assert_eq!(matched.len(), 8);
        assert_eq!(session.pool().match_unit_count(), 1);
        for id in matched {
            assert!(session.pool().match_unit(id).is_none());
        }
        assert_eq!(session.stats.games_formed, 2);
        assert_eq!(session.stats.users_matched, 8);
        assert_eq!(session.stats.last_status, Some(SolveStatus::Optimal));
        assert!(session.last_results().is_some());

        // The leftover unit cannot fill a game on its own
        let results = session.tick(10).unwrap();
        assert!(results.games.is_empty());
        assert_eq!(session.stats.ticks, 2);
    }

    #[test]
    fn test_duplicate_and_invalid_units() {
        let mut session = MatchmakingSession::new(solo_config(), 1).unwrap();
        assert!(session.add_unit(solo(1)).unwrap());
        assert!(!session.add_unit(solo(1)).unwrap());

        let mut far = solo(2);
        far.affinity.positions = 1 << 20;
        assert!(matches!(session.add_unit(far), Err(MatchmakingError::Configuration(_))));

        assert!(session.remove_unit(1));
        assert!(!session.remove_unit(1));
    }

    #[test]
    fn test_generated_units_are_queued() {
        let mut session = MatchmakingSession::new(EngineConfig::default(), 7).unwrap();
        assert_eq!(session.generate_units(25, 1_000).unwrap(), 25);
        let state = session.state();
        assert_eq!(state.unit_count, 25);
        assert_eq!(state.units.len(), 25);
        assert_eq!(state.max_game_count, state.user_count / 10);
    }

    #[test]
    fn test_generated_ids_skip_added_units() {
        let mut session = MatchmakingSession::new(solo_config(), 11).unwrap();
        assert!(session.add_unit(solo(1)).unwrap());
        assert!(session.add_unit(solo(4)).unwrap());
        assert_eq!(session.generate_units(3, 0).unwrap(), 3);

        let state = session.state();
        assert_eq!(state.unit_count, 5);
        let generated: Vec<&MatchUnit> = state.units.iter().filter(|u| u.id != 1 && u.id != 4).collect();
        assert_eq!(generated.len(), 3);
        for unit in generated {
            assert!(unit.id > 4);
            assert!(unit.member_ids().iter().all(|&m| m > 40));
        }
    }

    #[test]
    fn test_update_config_keeps_units() {
        let mut session = MatchmakingSession::new(solo_config(), 3).unwrap();
        for id in 1..=4 {
            session.add_unit(solo(id)).unwrap();
        }
        let mut config = solo_config();
        config.criteria = MatchmakingCriteria::new(2, 1);
        session.update_config(config.clone()).unwrap();
        assert_eq!(session.config(), &config);
        assert_eq!(session.pool().match_unit_count(), 4);
        assert_eq!(session.tick(0).unwrap().games.len(), 2);
    }

    #[test]
    fn test_update_config_rejects_stranded_units() {
        let mut session = MatchmakingSession::new(solo_config(), 3).unwrap();
        let mut unit = solo(1);
        unit.affinity.positions = 0b10000;
        session.add_unit(unit).unwrap();

        let mut config = solo_config();
        config.criteria.max_positions = 2;
        assert!(session.update_config(config).is_err());
        assert_eq!(session.config(), &solo_config());
        assert_eq!(session.pool().match_unit_count(), 1);

        let mut broken = solo_config();
        broken.criteria.teams_per_game = 0;
        assert!(session.update_config(broken).is_err());
    }

    #[test]
    fn test_state_json_parses() {
        let mut session = MatchmakingSession::new(solo_config(), 9).unwrap();
        session.add_unit(solo(5)).unwrap();
        let state: SessionState = serde_json::from_str(&session.state_json()).unwrap();
        assert_eq!(state.pool_name, POOL_NAME);
        assert_eq!(state.units[0].id, 5);
    }
}
