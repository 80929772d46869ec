pub mod bitset;
pub mod budget;
#[cfg(target_arch = "wasm32")]
mod console_log;
pub mod error;
pub mod game_finder;
pub mod generator;
pub mod matchmaker;
pub mod operator;
pub mod oracle;
pub mod partition;
pub mod pool;
pub mod selector;
pub mod session;
pub mod team_finder;
pub mod types;

pub use error::{MatchmakingError, Result as MatchmakingResult};
pub use matchmaker::Matchmaker;
pub use pool::{BasicPool, GraphPool, MatchmakingPool};
pub use session::MatchmakingSession;
pub use types::*;

use generator::PoolGenerator;
use wasm_bindgen::prelude::*;

/// Install the panic hook and route `log` output to the browser console
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    #[cfg(target_arch = "wasm32")]
    console_log::init(log::LevelFilter::Info);
}

fn to_js(e: MatchmakingError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn parse_config(config_json: &str) -> Result<EngineConfig, JsValue> {
    serde_json::from_str(config_json).map_err(|e| JsValue::from_str(&format!("Config parse error: {}", e)))
}

/// WASM-exposed matchmaking session
#[wasm_bindgen]
pub struct MatchmakingEngine {
    session: MatchmakingSession,
}

#[wasm_bindgen]
impl MatchmakingEngine {
    /// Create an engine with the default config
    #[wasm_bindgen(constructor)]
    pub fn new(seed: u64) -> Result<MatchmakingEngine, JsValue> {
        let session = MatchmakingSession::new(EngineConfig::default(), seed).map_err(to_js)?;
        Ok(MatchmakingEngine { session })
    }

    /// Create with custom config
    pub fn new_with_config(seed: u64, config_json: &str) -> Result<MatchmakingEngine, JsValue> {
        let config = parse_config(config_json)?;
        let session = MatchmakingSession::new(config, seed).map_err(to_js)?;
        Ok(MatchmakingEngine { session })
    }

    /// Queue a match unit given as JSON. False when the id is already queued.
    pub fn add_unit(&mut self, unit_json: &str) -> Result<bool, JsValue> {
        let unit: MatchUnit = serde_json::from_str(unit_json)
            .map_err(|e| JsValue::from_str(&format!("Unit parse error: {}", e)))?;
        self.session.add_unit(unit).map_err(to_js)
    }

    pub fn remove_unit(&mut self, unit_id: u64) -> bool {
        self.session.remove_unit(unit_id)
    }

    /// Queue random units that entered within ten minutes of `now`
    pub fn generate_units(&mut self, count: usize, now: i64) -> Result<usize, JsValue> {
        self.session.generate_units(count, now).map_err(to_js)
    }

    /// Run one tick and return its results as JSON. Matched units leave the pool.
    pub fn solve(&mut self, now: i64) -> Result<String, JsValue> {
        let results = self.session.tick(now).map_err(to_js)?;
        serde_json::to_string(&results).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    /// Get pool, stats and config as JSON
    pub fn get_pool_state(&self) -> String {
        self.session.state_json()
    }

    pub fn get_unit_count(&self) -> usize {
        self.session.pool().match_unit_count()
    }

    pub fn get_user_count(&self) -> usize {
        self.session.pool().user_count()
    }

    /// Get session statistics JSON
    pub fn get_stats(&self) -> String {
        serde_json::to_string(&self.session.stats).unwrap_or_default()
    }

    /// Results of the latest tick, `null` before the first one
    pub fn get_last_results(&self) -> String {
        serde_json::to_string(&self.session.last_results()).unwrap_or_default()
    }

    /// Update engine config; queued units are kept
    pub fn update_config(&mut self, config_json: &str) -> Result<(), JsValue> {
        let config = parse_config(config_json)?;
        self.session.update_config(config).map_err(to_js)
    }

    /// Get default config as JSON
    pub fn get_default_config() -> String {
        serde_json::to_string(&EngineConfig::default()).unwrap_or_default()
    }
}

/// Stateless solve over a caller-held snapshot
#[wasm_bindgen]
pub fn solve_snapshot(config_json: &str, units_json: &str, now: i64) -> Result<String, JsValue> {
    let config = parse_config(config_json)?;
    let units: Vec<MatchUnit> = serde_json::from_str(units_json)
        .map_err(|e| JsValue::from_str(&format!("Units parse error: {}", e)))?;

    let results = Matchmaker::new(config.criteria, config.time_varying)
        .solve(&units, &config.solver, now)
        .map_err(to_js)?;
    serde_json::to_string(&results).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Number of ways unit sizes can add up to one team
#[wasm_bindgen]
pub fn count_team_partitions(users_per_team: u32) -> u64 {
    let sizes: Vec<u32> = (1..=users_per_team).collect();
    partition::count_partitions(&sizes, users_per_team)
}

/// Solve one seeded random pool with both game finders
#[wasm_bindgen]
pub fn compare_game_finders(config_json: &str, population: usize, now: i64, seed: u64) -> Result<String, JsValue> {
    let config = parse_config(config_json)?;
    let units = PoolGenerator::new(config.criteria, seed)
        .random_units(population, now)
        .map_err(to_js)?;
    let matchmaker = Matchmaker::new(config.criteria, config.time_varying);

    let mut runs = Vec::new();
    for finder in [GameFinderKind::Backtrack, GameFinderKind::Constraint] {
        let parameters = SolverParameters {
            game_finder: finder,
            ..config.solver
        };
        let results = matchmaker.solve(&units, &parameters, now).map_err(to_js)?;
        runs.push(serde_json::json!({
            "game_finder": finder,
            "games": results.games.len(),
            "status": results.status,
            "stats": results.stats,
        }));
    }

    let comparison = serde_json::json!({
        "backtrack": runs[0],
        "constraint": runs[1],
    });
    serde_json::to_string(&comparison).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}
