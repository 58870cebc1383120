/// Implementation of `argmin::State` shared by tunebox solvers
use argmin::core::{Problem, State, TerminationReason, TerminationStatus};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maintains the state from iteration to iteration of the tunebox solvers.
///
/// Single point methods only use `param`/`cost`, population methods also keep the
/// current population with its costs. The best point is tracked by [State::update].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptimState {
    /// Current parameter vector
    pub param: Option<Array1<f64>>,
    /// Previous parameter vector
    pub prev_param: Option<Array1<f64>>,
    /// Current best parameter vector
    pub best_param: Option<Array1<f64>>,
    /// Previous best parameter vector
    pub prev_best_param: Option<Array1<f64>>,

    /// Current cost function value
    pub cost: f64,
    /// Previous cost function value
    pub prev_cost: f64,
    /// Current best cost function value
    pub best_cost: f64,
    /// Previous best cost function value
    pub prev_best_cost: f64,
    /// Target cost function value
    pub target_cost: f64,

    /// Current iteration
    pub iter: u64,
    /// Iteration number of last best cost
    pub last_best_iter: u64,
    /// Maximum number of iterations
    pub max_iters: u64,
    /// Evaluation counts
    pub counts: HashMap<String, u64>,
    /// Time required so far
    pub time: Option<web_time::Duration>,
    /// Optimization status
    pub termination_status: TerminationStatus,

    /// Current population as a (np, nx) matrix
    pub population: Option<Array2<f64>>,
    /// Costs of the population members, one row per member
    pub population_costs: Option<Array2<f64>>,
    /// Evaluated samples (x, y) of surrogate based methods
    pub data: Option<(Array2<f64>, Array1<f64>)>,
    /// Best cost after each iteration
    pub history: Vec<f64>,
}

impl OptimState {
    /// Set parameter vector. This shifts the stored parameter vector to the previous one.
    #[must_use]
    pub fn param(mut self, param: Array1<f64>) -> Self {
        std::mem::swap(&mut self.prev_param, &mut self.param);
        self.param = Some(param);
        self
    }

    /// Set the current cost function value. This shifts the stored cost to the previous one.
    #[must_use]
    pub fn cost(mut self, cost: f64) -> Self {
        std::mem::swap(&mut self.prev_cost, &mut self.cost);
        self.cost = cost;
        self
    }

    /// Set target cost, the run stops when reached
    #[must_use]
    pub fn target_cost(mut self, target_cost: f64) -> Self {
        self.target_cost = target_cost;
        self
    }

    /// Set maximum number of iterations
    #[must_use]
    pub fn max_iters(mut self, iters: u64) -> Self {
        self.max_iters = iters;
        self
    }

    /// Set the current population and its costs
    #[must_use]
    pub fn population(mut self, population: Array2<f64>, costs: Array2<f64>) -> Self {
        self.population = Some(population);
        self.population_costs = Some(costs);
        self
    }

    /// Moves the population and its costs out of the state
    pub fn take_population(&mut self) -> Option<(Array2<f64>, Array2<f64>)> {
        match (self.population.take(), self.population_costs.take()) {
            (Some(p), Some(c)) => Some((p, c)),
            _ => None,
        }
    }

    /// Set the evaluated samples
    #[must_use]
    pub fn data(mut self, data: (Array2<f64>, Array1<f64>)) -> Self {
        self.data = Some(data);
        self
    }

    /// Moves the evaluated samples out of the state
    pub fn take_data(&mut self) -> Option<(Array2<f64>, Array1<f64>)> {
        self.data.take()
    }
}

impl State for OptimState {
    type Param = Array1<f64>;
    type Float = f64;

    fn new() -> Self {
        OptimState {
            param: None,
            prev_param: None,
            best_param: None,
            prev_best_param: None,

            cost: f64::INFINITY,
            prev_cost: f64::INFINITY,
            best_cost: f64::INFINITY,
            prev_best_cost: f64::INFINITY,
            target_cost: f64::NEG_INFINITY,

            iter: 0,
            last_best_iter: 0,
            max_iters: u64::MAX,
            counts: HashMap::new(),
            time: Some(web_time::Duration::new(0, 0)),
            termination_status: TerminationStatus::NotTerminated,

            population: None,
            population_costs: None,
            data: None,
            history: vec![],
        }
    }

    /// Checks whether the current parameter vector is better than the best one
    /// so far and records the best cost trajectory.
    fn update(&mut self) {
        if let Some(param) = self.param.as_ref() {
            if self.best_param.is_none() || self.cost < self.best_cost {
                let param = param.clone();
                std::mem::swap(&mut self.prev_best_param, &mut self.best_param);
                self.best_param = Some(param);
                std::mem::swap(&mut self.prev_best_cost, &mut self.best_cost);
                self.best_cost = self.cost;
                self.last_best_iter = self.iter;
            }
        }
        self.history.push(self.best_cost);
    }

    fn get_param(&self) -> Option<&Array1<f64>> {
        self.param.as_ref()
    }

    fn get_best_param(&self) -> Option<&Array1<f64>> {
        self.best_param.as_ref()
    }

    fn terminate_with(mut self, reason: TerminationReason) -> Self {
        self.termination_status = TerminationStatus::Terminated(reason);
        self
    }

    fn time(&mut self, time: Option<web_time::Duration>) -> &mut Self {
        self.time = time;
        self
    }

    fn get_cost(&self) -> f64 {
        self.cost
    }

    fn get_best_cost(&self) -> f64 {
        self.best_cost
    }

    fn get_target_cost(&self) -> f64 {
        self.target_cost
    }

    fn get_iter(&self) -> u64 {
        self.iter
    }

    fn get_last_best_iter(&self) -> u64 {
        self.last_best_iter
    }

    fn get_max_iters(&self) -> u64 {
        self.max_iters
    }

    fn get_termination_status(&self) -> &TerminationStatus {
        &self.termination_status
    }

    fn get_termination_reason(&self) -> Option<&TerminationReason> {
        match &self.termination_status {
            TerminationStatus::Terminated(reason) => Some(reason),
            TerminationStatus::NotTerminated => None,
        }
    }

    fn get_time(&self) -> Option<web_time::Duration> {
        self.time
    }

    fn increment_iter(&mut self) {
        self.iter += 1;
    }

    fn func_counts<O>(&mut self, problem: &Problem<O>) {
        for (k, &v) in problem.counts.iter() {
            let count = self.counts.entry(k.to_string()).or_insert(0);
            *count = v
        }
    }

    fn get_func_counts(&self) -> &HashMap<String, u64> {
        &self.counts
    }

    fn is_best(&self) -> bool {
        self.last_best_iter == self.iter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_update_tracks_best() {
        let mut state = OptimState::new().param(array![1.]).cost(3.);
        state.update();
        assert_eq!(state.best_cost, 3.);
        state.increment_iter();

        let mut state = state.param(array![2.]).cost(5.);
        state.update();
        assert_eq!(state.best_param, Some(array![1.]));
        assert!(!state.is_best());
        state.increment_iter();

        let mut state = state.param(array![0.5]).cost(1.);
        state.update();
        assert_eq!(state.best_param, Some(array![0.5]));
        assert_eq!(state.prev_best_cost, 3.);
        assert_eq!(state.last_best_iter, 2);
        assert!(state.is_best());
        assert_eq!(state.history, vec![3., 3., 1.]);
    }

    #[test]
    fn test_infinite_first_cost_is_kept_as_best() {
        let mut state = OptimState::new().param(array![1.]).cost(f64::INFINITY);
        state.update();
        assert_eq!(state.best_param, Some(array![1.]));
        assert_eq!(state.prev_param, None);
        let state = state.terminate_with(TerminationReason::MaxItersReached);
        assert!(state.terminated());
    }
}
