use crate::bitset::UnitSet;
use crate::error::Result;
use crate::operator::{AffinityOperator, DefaultAffinityOperator};
use crate::types::*;
use std::collections::BTreeMap;

/// Queue of match units waiting for a game.
///
/// Snapshots come out sorted by member count, then id, so two snapshots of
/// an unchanged pool are identical and already in search order. A pool must
/// not be mutated while a solve over its snapshot is in flight.
pub trait MatchmakingPool {
    /// Returns false when the id is already queued
    fn add_match_unit(&mut self, unit: MatchUnit) -> bool;

    /// Returns false when the id is unknown
    fn remove_match_unit(&mut self, unit_id: u64) -> bool;

    /// Widen every unit's affinity up to `current_timestamp`
    fn update(&mut self, current_timestamp: i64);

    fn match_unit(&self, unit_id: u64) -> Option<&MatchUnit>;

    fn match_units(&self) -> Vec<MatchUnit>;

    fn match_unit_count(&self) -> usize;

    fn user_count(&self) -> usize;

    fn criteria(&self) -> &MatchmakingCriteria;

    fn name(&self) -> &str;

    /// Upper bound on simultaneous games by head count alone
    fn max_game_count(&self) -> usize {
        self.user_count()
            .checked_div(self.criteria().users_per_game())
            .unwrap_or(0)
    }

    /// Compatibility graph over the current snapshot, if this pool keeps one
    fn compatibility_graph(&mut self) -> Option<&CompatibilityGraph> {
        None
    }
}

/// Map-backed pool
#[derive(Clone, Debug)]
pub struct BasicPool {
    name: String,
    criteria: MatchmakingCriteria,
    time_config: TimeVaryingConfig,
    units: BTreeMap<u64, MatchUnit>,
    user_count: usize,
}

impl BasicPool {
    /// Fails when the criteria or time config are invalid
    pub fn new(name: &str, criteria: MatchmakingCriteria, time_config: TimeVaryingConfig) -> Result<Self> {
        criteria.validate()?;
        time_config.validate()?;
        Ok(Self {
            name: name.to_string(),
            criteria,
            time_config,
            units: BTreeMap::new(),
            user_count: 0,
        })
    }

    pub fn time_config(&self) -> &TimeVaryingConfig {
        &self.time_config
    }
}

impl MatchmakingPool for BasicPool {
    fn add_match_unit(&mut self, unit: MatchUnit) -> bool {
        if self.units.contains_key(&unit.id) {
            return false;
        }
        self.user_count += unit.member_count();
        self.units.insert(unit.id, unit);
        true
    }

    fn remove_match_unit(&mut self, unit_id: u64) -> bool {
        match self.units.remove(&unit_id) {
            Some(unit) => {
                self.user_count -= unit.member_count();
                true
            }
            None => false,
        }
    }

    fn update(&mut self, current_timestamp: i64) {
        for unit in self.units.values_mut() {
            unit.affinity.update(current_timestamp, &self.time_config);
        }
    }

    fn match_unit(&self, unit_id: u64) -> Option<&MatchUnit> {
        self.units.get(&unit_id)
    }

    fn match_units(&self) -> Vec<MatchUnit> {
        let mut snapshot: Vec<MatchUnit> = self.units.values().cloned().collect();
        // BTreeMap yields ids ascending; a stable sort keeps that within a size
        snapshot.sort_by_key(|u| u.member_count());
        snapshot
    }

    fn match_unit_count(&self) -> usize {
        self.units.len()
    }

    fn user_count(&self) -> usize {
        self.user_count
    }

    fn criteria(&self) -> &MatchmakingCriteria {
        &self.criteria
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Which snapshot units may share a team, keyed by snapshot index
#[derive(Clone, Debug)]
pub struct CompatibilityGraph {
    unit_ids: Vec<u64>,
    adjacency: Vec<UnitSet>,
}

impl CompatibilityGraph {
    pub fn build<O: AffinityOperator + ?Sized>(units: &[MatchUnit], operator: &O) -> Self {
        let n = units.len();
        let mut adjacency = vec![UnitSet::with_capacity(n); n];
        for i in 0..n {
            for j in (i + 1)..n {
                if operator.is_fit_one_team(&units[i], &units[j]) {
                    adjacency[i].insert(j);
                    adjacency[j].insert(i);
                }
            }
        }
        Self {
            unit_ids: units.iter().map(|u| u.id).collect(),
            adjacency,
        }
    }

    pub fn len(&self) -> usize {
        self.unit_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unit_ids.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(UnitSet::len).sum::<usize>() / 2
    }

    pub fn are_compatible(&self, a: usize, b: usize) -> bool {
        self.adjacency.get(a).map_or(false, |n| n.contains(b))
    }

    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency[index].iter()
    }

    /// Later snapshot indices that can never share a team with `index`
    pub fn exclusive_units(&self, index: usize) -> Vec<usize> {
        ((index + 1)..self.len())
            .filter(|&j| !self.are_compatible(index, j))
            .collect()
    }

    /// Whether this graph was built over exactly these units, in this order
    pub fn matches_snapshot(&self, units: &[MatchUnit]) -> bool {
        self.unit_ids.len() == units.len()
            && self.unit_ids.iter().zip(units).all(|(&id, u)| id == u.id)
    }
}

/// Pool that keeps a compatibility graph of its snapshot. The graph is
/// derived state: any add, remove or update drops it and the next request
/// rebuilds it.
#[derive(Clone, Debug)]
pub struct GraphPool {
    inner: BasicPool,
    operator: DefaultAffinityOperator,
    graph: Option<CompatibilityGraph>,
}

impl GraphPool {
    pub fn new(name: &str, criteria: MatchmakingCriteria, time_config: TimeVaryingConfig) -> Result<Self> {
        Ok(Self {
            inner: BasicPool::new(name, criteria, time_config)?,
            operator: DefaultAffinityOperator::new(criteria, time_config),
            graph: None,
        })
    }

    pub fn is_graph_cached(&self) -> bool {
        self.graph.is_some()
    }
}

impl MatchmakingPool for GraphPool {
    fn add_match_unit(&mut self, unit: MatchUnit) -> bool {
        let added = self.inner.add_match_unit(unit);
        if added {
            self.graph = None;
        }
        added
    }

    fn remove_match_unit(&mut self, unit_id: u64) -> bool {
        let removed = self.inner.remove_match_unit(unit_id);
        if removed {
            self.graph = None;
        }
        removed
    }

    fn update(&mut self, current_timestamp: i64) {
        self.inner.update(current_timestamp);
        self.graph = None;
    }

    fn match_unit(&self, unit_id: u64) -> Option<&MatchUnit> {
        self.inner.match_unit(unit_id)
    }

    fn match_units(&self) -> Vec<MatchUnit> {
        self.inner.match_units()
    }

    fn match_unit_count(&self) -> usize {
        self.inner.match_unit_count()
    }

    fn user_count(&self) -> usize {
        self.inner.user_count()
    }

    fn criteria(&self) -> &MatchmakingCriteria {
        self.inner.criteria()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn compatibility_graph(&mut self) -> Option<&CompatibilityGraph> {
        if self.graph.is_none() {
            let snapshot = self.inner.match_units();
            self.graph = Some(CompatibilityGraph::build(&snapshot, &self.operator));
        }
        self.graph.as_ref()
    }
}
