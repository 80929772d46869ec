//! 0/1 optimization oracle used by the constraint game finder and the
//! global selector.
//!
//! Callers build a [`Model`] of boolean variables, integer linear rows and a
//! linear objective, then either ask for the best assignment or pull
//! feasible assignments one at a time from an [`AssignmentStream`].
//!
//! [`BranchAndBoundOracle`] is the in-process backend. It assigns variables
//! in index order on an explicit trail, tracks each row's fixed sum and the
//! still-possible slack so a violated row is detected as soon as it becomes
//! unreachable, and bounds the objective by the sum of the remaining
//! positive coefficients. When some `<=` row counts every variable with
//! coefficient one, the bound is also capped by the room left in that row
//! times the largest remaining coefficient.

use crate::budget::Deadline;
use crate::error::{MatchmakingError, Result};
use crate::types::SolveStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const OBJECTIVE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    LessEqual,
    GreaterEqual,
    Equal,
}

/// `sum(coef * var) <cmp> rhs`
#[derive(Clone, Debug)]
pub struct LinearConstraint {
    pub terms: Vec<(VarId, i64)>,
    pub comparison: Comparison,
    pub rhs: i64,
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    names: Vec<String>,
    constraints: Vec<LinearConstraint>,
    objective: Vec<(VarId, f64)>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_bool_var(&mut self, name: impl Into<String>) -> VarId {
        self.names.push(name.into());
        VarId(self.names.len() - 1)
    }

    pub fn var_count(&self) -> usize {
        self.names.len()
    }

    pub fn var_name(&self, var: VarId) -> Option<&str> {
        self.names.get(var.0).map(String::as_str)
    }

    pub fn add_linear_constraint(&mut self, terms: Vec<(VarId, i64)>, comparison: Comparison, rhs: i64) {
        self.constraints.push(LinearConstraint {
            terms,
            comparison,
            rhs,
        });
    }

    pub fn add_equality(&mut self, terms: Vec<(VarId, i64)>, rhs: i64) {
        self.add_linear_constraint(terms, Comparison::Equal, rhs);
    }

    pub fn add_less_or_equal(&mut self, terms: Vec<(VarId, i64)>, rhs: i64) {
        self.add_linear_constraint(terms, Comparison::LessEqual, rhs);
    }

    pub fn add_greater_or_equal(&mut self, terms: Vec<(VarId, i64)>, rhs: i64) {
        self.add_linear_constraint(terms, Comparison::GreaterEqual, rhs);
    }

    /// At most one of `vars` is true. Rows over fewer than two variables
    /// are trivially satisfied and skipped.
    pub fn add_at_most_one(&mut self, vars: &[VarId]) {
        if vars.len() > 1 {
            self.add_less_or_equal(vars.iter().map(|&v| (v, 1)).collect(), 1);
        }
    }

    /// Replace the objective with `maximize sum(coef * var)`
    pub fn maximize(&mut self, terms: Vec<(VarId, f64)>) {
        self.objective = terms;
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &[(VarId, f64)] {
        &self.objective
    }

    fn validate(&self) -> Result<()> {
        let n = self.var_count();
        for (i, constraint) in self.constraints.iter().enumerate() {
            if let Some((var, _)) = constraint.terms.iter().find(|(v, _)| v.0 >= n) {
                return Err(MatchmakingError::Backend(format!(
                    "constraint {} references unknown variable {}",
                    i, var.0
                )));
            }
        }
        for (var, coef) in &self.objective {
            if var.0 >= n {
                return Err(MatchmakingError::Backend(format!(
                    "objective references unknown variable {}",
                    var.0
                )));
            }
            if !coef.is_finite() {
                return Err(MatchmakingError::Backend(format!(
                    "objective coefficient for {} is not finite",
                    self.names[var.0]
                )));
            }
        }
        Ok(())
    }
}

/// Values of every model variable
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    values: Vec<bool>,
}

impl Assignment {
    pub fn value(&self, var: VarId) -> bool {
        self.values.get(var.0).copied().unwrap_or(false)
    }

    pub fn selected(&self) -> impl Iterator<Item = VarId> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(|(i, _)| VarId(i))
    }
}

#[derive(Clone, Debug)]
pub struct Solution {
    pub status: SolveStatus,
    /// Best assignment found, absent when infeasible or out of time
    pub assignment: Option<Assignment>,
    pub objective_value: f64,
}

/// Cooperative stop flag shared between a caller and a running enumeration
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Feasible assignments pulled one at a time. The stream is finite and not
/// restartable; `status` reports how it ended once it returns `None`.
pub trait AssignmentStream: Iterator<Item = Assignment> {
    fn status(&self) -> SolveStatus;
}

pub trait OptimizationOracle {
    /// Best assignment under the model's objective within `deadline`
    fn solve(&self, model: &Model, deadline: &Deadline) -> Result<Solution>;

    /// Feasible assignments, ignoring the objective, until the model is
    /// exhausted, `limit` assignments were produced, the deadline passes or
    /// `stop` is raised.
    fn enumerate<'m>(
        &self,
        model: &'m Model,
        deadline: Deadline,
        limit: Option<usize>,
        stop: StopSignal,
    ) -> Result<Box<dyn AssignmentStream + 'm>>;
}

/// Exact branch-and-bound over 0/1 variables
#[derive(Clone, Debug)]
pub struct BranchAndBoundOracle {
    /// Nodes explored between two deadline/stop checks
    pub poll_interval: u64,
}

impl Default for BranchAndBoundOracle {
    fn default() -> Self {
        Self { poll_interval: 1024 }
    }
}

impl OptimizationOracle for BranchAndBoundOracle {
    fn solve(&self, model: &Model, deadline: &Deadline) -> Result<Solution> {
        model.validate()?;
        let mut search = Search::new(model, deadline.clone(), None, self.poll_interval);
        let ceiling = search.optimistic();
        let mut best: Option<(f64, Vec<bool>)> = None;

        let status = loop {
            let bound = best.as_ref().map(|(value, _)| *value);
            match search.next_leaf(bound) {
                Leaf::Found => {
                    let value = search.objective_value;
                    if bound.map_or(true, |b| value > b + OBJECTIVE_EPSILON) {
                        best = Some((value, search.values()));
                    }
                    if value >= ceiling - OBJECTIVE_EPSILON {
                        break SolveStatus::Optimal;
                    }
                }
                Leaf::Exhausted if best.is_some() => break SolveStatus::Optimal,
                Leaf::Exhausted => break SolveStatus::Infeasible,
                Leaf::Interrupted if best.is_some() => break SolveStatus::Feasible,
                Leaf::Interrupted => break SolveStatus::Timeout,
            }
        };

        Ok(match best {
            Some((objective_value, values)) => Solution {
                status,
                assignment: Some(Assignment { values }),
                objective_value,
            },
            None => Solution {
                status,
                assignment: None,
                objective_value: 0.0,
            },
        })
    }

    fn enumerate<'m>(
        &self,
        model: &'m Model,
        deadline: Deadline,
        limit: Option<usize>,
        stop: StopSignal,
    ) -> Result<Box<dyn AssignmentStream + 'm>> {
        model.validate()?;
        Ok(Box::new(BranchAndBoundStream {
            search: Search::new(model, deadline, Some(stop), self.poll_interval),
            limit,
            produced: 0,
            status: None,
        }))
    }
}

/// Every variable appears exactly once, with coefficient one
fn counts_every_var(constraint: &LinearConstraint, var_count: usize) -> bool {
    if constraint.terms.len() != var_count || constraint.terms.iter().any(|&(_, c)| c != 1) {
        return false;
    }
    let mut seen = vec![false; var_count];
    constraint
        .terms
        .iter()
        .all(|&(v, _)| !std::mem::replace(&mut seen[v.0], true))
}

enum Leaf {
    Found,
    Exhausted,
    Interrupted,
}

/// One trail entry: the value given to the variable at this depth and
/// whether its other value is still to be tried.
struct Frame {
    value: bool,
    alternative: bool,
}

struct Search<'m> {
    model: &'m Model,
    deadline: Deadline,
    stop: Option<StopSignal>,
    poll_interval: u64,
    /// Per variable: (row, coefficient)
    occurrences: Vec<Vec<(usize, i64)>>,
    fixed: Vec<i64>,
    min_rest: Vec<i64>,
    max_rest: Vec<i64>,
    objective_coef: Vec<f64>,
    /// Sum of positive objective coefficients from each depth on
    optimistic_suffix: Vec<f64>,
    /// Largest positive objective coefficient from each depth on
    best_suffix_coef: Vec<f64>,
    /// A `<=` row over all variables with unit coefficients
    cardinality_row: Option<usize>,
    preferred: Vec<bool>,
    objective_value: f64,
    trail: Vec<Frame>,
    descending: bool,
    root_feasible: bool,
    nodes: u64,
}

impl<'m> Search<'m> {
    fn new(model: &'m Model, deadline: Deadline, stop: Option<StopSignal>, poll_interval: u64) -> Self {
        let n = model.var_count();
        let rows = model.constraints().len();
        let mut occurrences = vec![Vec::new(); n];
        let mut min_rest = vec![0i64; rows];
        let mut max_rest = vec![0i64; rows];
        for (row, constraint) in model.constraints().iter().enumerate() {
            for &(var, coef) in &constraint.terms {
                occurrences[var.0].push((row, coef));
                if coef > 0 {
                    max_rest[row] += coef;
                } else {
                    min_rest[row] += coef;
                }
            }
        }

        let mut objective_coef = vec![0.0; n];
        for &(var, coef) in model.objective() {
            objective_coef[var.0] += coef;
        }
        let mut optimistic_suffix = vec![0.0; n + 1];
        let mut best_suffix_coef = vec![0.0f64; n + 1];
        for i in (0..n).rev() {
            optimistic_suffix[i] = optimistic_suffix[i + 1] + objective_coef[i].max(0.0);
            best_suffix_coef[i] = best_suffix_coef[i + 1].max(objective_coef[i]);
        }
        let cardinality_row = model
            .constraints()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.comparison == Comparison::LessEqual && counts_every_var(c, n))
            .min_by_key(|(_, c)| c.rhs)
            .map(|(row, _)| row);
        let preferred = objective_coef.iter().map(|&c| c >= 0.0).collect();

        let mut search = Self {
            model,
            deadline,
            stop,
            poll_interval: poll_interval.max(1),
            occurrences,
            fixed: vec![0; rows],
            min_rest,
            max_rest,
            objective_coef,
            optimistic_suffix,
            best_suffix_coef,
            cardinality_row,
            preferred,
            objective_value: 0.0,
            trail: Vec::with_capacity(n),
            descending: true,
            root_feasible: true,
            nodes: 0,
        };
        search.root_feasible = (0..rows).all(|row| search.row_consistent(row));
        search
    }

    fn row_consistent(&self, row: usize) -> bool {
        let constraint = &self.model.constraints()[row];
        let low = self.fixed[row] + self.min_rest[row];
        let high = self.fixed[row] + self.max_rest[row];
        match constraint.comparison {
            Comparison::LessEqual => low <= constraint.rhs,
            Comparison::GreaterEqual => high >= constraint.rhs,
            Comparison::Equal => low <= constraint.rhs && constraint.rhs <= high,
        }
    }

    /// Fix `var`, returning whether every row it touches stays satisfiable
    fn assign(&mut self, var: usize, value: bool) -> bool {
        let mut consistent = true;
        for &(row, coef) in &self.occurrences[var] {
            if coef > 0 {
                self.max_rest[row] -= coef;
            } else {
                self.min_rest[row] -= coef;
            }
            if value {
                self.fixed[row] += coef;
            }
        }
        for &(row, _) in &self.occurrences[var] {
            consistent &= self.row_consistent(row);
        }
        if value {
            self.objective_value += self.objective_coef[var];
        }
        consistent
    }

    fn unassign(&mut self, var: usize, value: bool) {
        for &(row, coef) in &self.occurrences[var] {
            if coef > 0 {
                self.max_rest[row] += coef;
            } else {
                self.min_rest[row] += coef;
            }
            if value {
                self.fixed[row] -= coef;
            }
        }
        if value {
            self.objective_value -= self.objective_coef[var];
        }
    }

    /// Most the objective can still gain below the current depth
    fn optimistic(&self) -> f64 {
        let depth = self.trail.len();
        let mut gain = self.optimistic_suffix[depth];
        if let Some(row) = self.cardinality_row {
            let room = (self.model.constraints()[row].rhs - self.fixed[row]).max(0) as f64;
            gain = gain.min(room * self.best_suffix_coef[depth]);
        }
        gain
    }

    fn cannot_improve(&self, bound: Option<f64>) -> bool {
        match bound {
            Some(best) => self.objective_value + self.optimistic() <= best + OBJECTIVE_EPSILON,
            None => false,
        }
    }

    fn interrupted(&self) -> bool {
        self.deadline.is_expired() || self.stop.as_ref().map_or(false, StopSignal::is_raised)
    }

    fn values(&self) -> Vec<bool> {
        self.trail.iter().map(|f| f.value).collect()
    }

    /// Advance to the next complete, consistent assignment
    fn next_leaf(&mut self, bound: Option<f64>) -> Leaf {
        if !self.root_feasible {
            return Leaf::Exhausted;
        }
        let n = self.model.var_count();

        loop {
            self.nodes += 1;
            if self.nodes % self.poll_interval == 0 && self.interrupted() {
                return Leaf::Interrupted;
            }

            if self.descending {
                let var = self.trail.len();
                if var == n {
                    self.descending = false;
                    return Leaf::Found;
                }
                let value = self.preferred[var];
                let consistent = self.assign(var, value);
                self.trail.push(Frame {
                    value,
                    alternative: true,
                });
                if !consistent || self.cannot_improve(bound) {
                    self.descending = false;
                }
                continue;
            }

            // Backtrack to the deepest frame with an untried value
            loop {
                let Some(frame) = self.trail.pop() else {
                    return Leaf::Exhausted;
                };
                let var = self.trail.len();
                self.unassign(var, frame.value);
                if frame.alternative {
                    let value = !frame.value;
                    let consistent = self.assign(var, value);
                    self.trail.push(Frame {
                        value,
                        alternative: false,
                    });
                    if consistent && !self.cannot_improve(bound) {
                        self.descending = true;
                    }
                    break;
                }
            }
        }
    }
}

struct BranchAndBoundStream<'m> {
    search: Search<'m>,
    limit: Option<usize>,
    produced: usize,
    status: Option<SolveStatus>,
}

impl BranchAndBoundStream<'_> {
    fn cut_short(&self) -> SolveStatus {
        if self.produced > 0 {
            SolveStatus::Feasible
        } else {
            SolveStatus::Timeout
        }
    }
}

impl Iterator for BranchAndBoundStream<'_> {
    type Item = Assignment;

    fn next(&mut self) -> Option<Assignment> {
        if self.status.is_some() {
            return None;
        }
        if self.limit.map_or(false, |cap| self.produced >= cap) || self.search.interrupted() {
            self.status = Some(self.cut_short());
            return None;
        }

        match self.search.next_leaf(None) {
            Leaf::Found => {
                self.produced += 1;
                Some(Assignment {
                    values: self.search.values(),
                })
            }
            Leaf::Exhausted => {
                self.status = Some(if self.produced > 0 {
                    SolveStatus::Optimal
                } else {
                    SolveStatus::Infeasible
                });
                None
            }
            Leaf::Interrupted => {
                self.status = Some(self.cut_short());
                None
            }
        }
    }
}

impl AssignmentStream for BranchAndBoundStream<'_> {
    fn status(&self) -> SolveStatus {
        self.status.unwrap_or(SolveStatus::Feasible)
    }
}
