//! Multi-objective optimization: scalarizing methods (weighted sum, epsilon
//! constraint, Pareto sampling) delegating to single-objective solvers, and the
//! NSGA-II population method.
mod metrics;
mod nsga2;
mod pareto;
mod weights;

pub use metrics::{hypervolume, reference_point, spacing, spread, tradeoffs};
pub use metrics::{QualityMetrics, Relationship, TradeOff};
pub use nsga2::Nsga2;
pub use pareto::{crowding_distance, dominates, fast_non_dominated_sort, non_dominated_indices};
pub use weights::{ahp_weights, comparison_matrix, entropy_weights, equal_weights, normalized};

use crate::config::{Preferences, SolverConfig, ValidSolverConfig};
use crate::errors::{OptimError, Result};
use crate::method::Method;
use crate::problem::{OptimizationProblem, ScalarCost, VectorCost};
use crate::solver::{minimize, LogObserver, OptimState, RunContext, SolveOutcome, CANCELLED};
use crate::utils::{is_near_any, rng_from};

use argmin::core::observers::ObserverMode;
use argmin::core::{Executor, TerminationReason, TerminationStatus};
use log::{info, warn};
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use pareto::VIOLATION_TOLERANCE;
use weights::resolve_weights;

/// Relative distance under which two solutions are considered identical
const DUPLICATE_TOLERANCE: f64 = 1e-4;

/// A solution of the Pareto front
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParetoSolution {
    pub parameters: BTreeMap<String, f64>,
    /// Raw objective values
    pub objectives: BTreeMap<String, f64>,
    pub feasible: bool,
    /// Scalarization weights which produced the solution, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
}

/// Outcome of a multi-objective run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiObjectiveResult {
    pub method: String,
    /// Objective weights used to scalarize or to pick the compromise
    pub weights: Vec<f64>,
    pub pareto_front: Vec<ParetoSolution>,
    /// Index in `pareto_front` of the returned solution
    pub compromise: Option<usize>,
    pub tradeoffs: Vec<TradeOff>,
    pub quality: QualityMetrics,
    /// Whether every search ended on the same solution
    pub degenerate: bool,
    pub recommendations: Vec<String>,
}

/// Multi-objective result with the solve summary of the returned point
#[derive(Clone, Debug)]
pub struct MultiObjectiveOutcome {
    /// Returned point, its penalized cost under `coefficients` and the aggregated counters
    pub solve: SolveOutcome,
    /// Coefficients of the signed objectives giving the reported objective value
    pub coefficients: Array1<f64>,
    pub result: MultiObjectiveResult,
}

/// A point found by one of the searches
#[derive(Clone, Debug)]
struct Candidate {
    x: Array1<f64>,
    signed: Array1<f64>,
    feasible: bool,
    weights: Option<Array1<f64>>,
}

/// Runs a multi-objective method on a problem
pub struct MultiObjectiveOptimizer<'a> {
    problem: Arc<OptimizationProblem>,
    config: &'a SolverConfig,
    preferences: &'a Preferences,
    ctx: &'a RunContext,
}

impl<'a> MultiObjectiveOptimizer<'a> {
    pub fn new(
        problem: Arc<OptimizationProblem>,
        config: &'a SolverConfig,
        preferences: &'a Preferences,
        ctx: &'a RunContext,
    ) -> Self {
        MultiObjectiveOptimizer {
            problem,
            config,
            preferences,
            ctx,
        }
    }

    /// Runs `method` and builds the Pareto analysis of the solutions found
    pub fn optimize(&self, method: Method) -> Result<MultiObjectiveOutcome> {
        self.preferences.check()?;
        let inner: Method = self.preferences.inner_method.parse()?;
        let inner_config = self.config.check(inner, self.problem.dim())?;
        let seed = inner_config.seed;
        let weights = resolve_weights(&self.problem, self.preferences, rng_from(seed))?;
        info!(
            "[{}] {method} over {} objectives, weights={weights}",
            self.ctx.run_id,
            self.problem.n_objectives()
        );

        let (candidates, runs, coefficients) = match method {
            Method::WeightedSum => {
                let (candidates, runs) = self.weighted_sum(inner, &inner_config, &weights)?;
                (candidates, runs, weights.clone())
            }
            Method::EpsilonConstraint => {
                let (candidates, runs) = self.epsilon_constraint(inner, &inner_config)?;
                let mut primary = Array1::<f64>::zeros(self.problem.n_objectives());
                primary[0] = 1.;
                (candidates, runs, primary)
            }
            Method::ParetoFront => {
                let (candidates, runs) = self.pareto_sampling(inner, &inner_config)?;
                (candidates, runs, weights.clone())
            }
            Method::Nsga2 => {
                let (candidates, runs) = self.nsga2(seed)?;
                (candidates, runs, weights.clone())
            }
            other => {
                return Err(OptimError::UnsupportedMethodError(format!(
                    "{other} is not a multi-objective method"
                )))
            }
        };
        self.analyze(method, candidates, runs, weights, coefficients)
    }

    fn candidate(&self, x: Array1<f64>, weights: Option<Array1<f64>>) -> Candidate {
        let xs = x.to_vec();
        Candidate {
            signed: self.problem.signed_objectives(&xs),
            feasible: self.problem.constraints().is_feasible(&xs),
            x,
            weights,
        }
    }

    fn weighted_sum(
        &self,
        inner: Method,
        config: &ValidSolverConfig,
        weights: &Array1<f64>,
    ) -> Result<(Vec<Candidate>, Vec<SolveOutcome>)> {
        let cost = ScalarCost::new(self.problem.clone()).coefficients(weights.clone());
        let outcome = minimize(inner, cost, config, self.ctx)?;
        let candidate = self.candidate(outcome.x.clone(), Some(weights.clone()));
        Ok((vec![candidate], vec![outcome]))
    }

    /// Minimizes the primary objective under `signed objective i <= epsilon_i` bounds
    fn epsilon_constraint(
        &self,
        inner: Method,
        config: &ValidSolverConfig,
    ) -> Result<(Vec<Candidate>, Vec<SolveOutcome>)> {
        let m = self.problem.n_objectives();
        let objectives = self.problem.objectives();
        let one_hot = |k: usize| {
            let mut c = Array1::<f64>::zeros(m);
            c[k] = 1.;
            c
        };
        let solve = |bounds: &[(usize, f64)], suffix: &str, config: &ValidSolverConfig| -> Result<SolveOutcome> {
            let constraints = self.problem.with_epsilon_constraints(bounds)?;
            let cost = ScalarCost::new(self.problem.clone())
                .coefficients(one_hot(0))
                .constraints(constraints);
            minimize(inner, cost, config, &self.ctx.child(suffix))
        };

        if let Some(values) = &self.preferences.epsilon_values {
            if values.len() != m - 1 {
                return Err(OptimError::InvalidConfigError(format!(
                    "{} epsilon values given for {} secondary objectives",
                    values.len(),
                    m - 1
                )));
            }
            let bounds: Vec<(usize, f64)> = values
                .iter()
                .enumerate()
                .map(|(k, eps)| (k + 1, objectives[k + 1].target.sign() * eps))
                .collect();
            let outcome = solve(&bounds, "eps", config)?;
            let candidate = self.candidate(outcome.x.clone(), None);
            return Ok((vec![candidate], vec![outcome]));
        }

        // Anchors: each objective minimized on its own
        let mut runs = Vec::with_capacity(m + self.preferences.pareto_points);
        let mut candidates = vec![];
        let mut anchors = Vec::with_capacity(m);
        for k in 0..m {
            let cost = ScalarCost::new(self.problem.clone()).coefficients(one_hot(k));
            let outcome = minimize(inner, cost, config, &self.ctx.child(&format!("anchor{k}")))?;
            let candidate = self.candidate(outcome.x.clone(), None);
            anchors.push(candidate.signed.clone());
            candidates.push(candidate);
            let cancelled = outcome.cancelled;
            runs.push(outcome);
            if cancelled {
                return Ok((candidates, runs));
            }
        }
        if m < 2 {
            return Ok((candidates, runs));
        }

        // Bounds move from the secondary values at the primary optimum down to their anchors
        let n = self.preferences.pareto_points;
        let sweep: Vec<Vec<(usize, f64)>> = (0..n)
            .map(|p| {
                let t = if n > 1 { p as f64 / (n - 1) as f64 } else { 1. };
                (1..m)
                    .map(|k| (k, anchors[k][k] + t * (anchors[0][k] - anchors[k][k])))
                    .filter(|(_, eps)| eps.is_finite())
                    .collect()
            })
            .collect();
        let outcomes: Vec<Result<SolveOutcome>> = sweep
            .par_iter()
            .enumerate()
            .map(|(p, bounds)| {
                let config = config.with_seed(config.seed.map(|s| s + p as u64));
                solve(bounds, &format!("eps{p}"), &config)
            })
            .collect();
        for outcome in outcomes {
            let outcome = outcome?;
            candidates.push(self.candidate(outcome.x.clone(), None));
            runs.push(outcome);
        }
        Ok((candidates, runs))
    }

    /// Weighted sums over `pareto_points` weight vectors drawn uniformly on the simplex
    fn pareto_sampling(
        &self,
        inner: Method,
        config: &ValidSolverConfig,
    ) -> Result<(Vec<Candidate>, Vec<SolveOutcome>)> {
        let m = self.problem.n_objectives();
        let mut rng = rng_from(config.seed);
        let draws: Vec<Array1<f64>> = (0..self.preferences.pareto_points)
            .map(|_| {
                let w: Array1<f64> = (0..m)
                    .map(|_| -(1. - rng.gen::<f64>()).ln())
                    .collect();
                let total = w.sum();
                if total > 0. {
                    w / total
                } else {
                    equal_weights(m)
                }
            })
            .collect();
        let outcomes: Vec<Result<(Candidate, SolveOutcome)>> = draws
            .into_par_iter()
            .enumerate()
            .map(|(k, w)| {
                let cost = ScalarCost::new(self.problem.clone()).coefficients(w.clone());
                let config = config.with_seed(config.seed.map(|s| s + k as u64));
                let outcome = minimize(inner, cost, &config, &self.ctx.child(&format!("w{k}")))?;
                Ok((self.candidate(outcome.x.clone(), Some(w)), outcome))
            })
            .collect();
        let mut candidates = Vec::with_capacity(outcomes.len());
        let mut runs = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let (candidate, run) = outcome?;
            candidates.push(candidate);
            runs.push(run);
        }
        Ok((candidates, runs))
    }

    fn nsga2(&self, seed: Option<u64>) -> Result<(Vec<Candidate>, Vec<SolveOutcome>)> {
        let generations = self
            .config
            .max_iterations
            .unwrap_or(self.preferences.max_generations);
        let population_size = self
            .config
            .population_size
            .unwrap_or(self.preferences.population_size);
        let solver = Nsga2::new(
            self.problem.xlimits().clone(),
            self.ctx.token.clone(),
            rng_from(seed),
        )
        .population_size(population_size)
        .initial_design(self.config.initial_design.unwrap_or_default());
        let x0 = self.problem.x0().clone();
        let result = Executor::new(VectorCost::new(self.problem.clone()), solver)
            .configure(|state: OptimState| state.param(x0).max_iters(generations))
            .add_observer(LogObserver::new(self.ctx.run_id.clone()), ObserverMode::Always)
            .ctrlc(self.ctx.interruptible)
            .run()?;
        let state = result.state;

        let (cancelled, message) = match &state.termination_status {
            TerminationStatus::Terminated(TerminationReason::SolverExit(msg)) if msg == CANCELLED => {
                (true, "Optimization cancelled, last population returned".to_string())
            }
            TerminationStatus::Terminated(TerminationReason::Interrupt) => {
                (true, "Optimization interrupted, last population returned".to_string())
            }
            TerminationStatus::Terminated(reason) => (false, reason.to_string()),
            TerminationStatus::NotTerminated => (false, "Not terminated".to_string()),
        };
        let population = state.population.clone().unwrap_or_else(|| Array2::zeros((0, 0)));
        let costs = state.population_costs.clone().unwrap_or_else(|| Array2::zeros((0, 0)));
        let m = self.problem.n_objectives();
        let candidates = population
            .rows()
            .into_iter()
            .zip(costs.rows())
            .map(|(x, c)| Candidate {
                x: x.to_owned(),
                signed: c.iter().take(m).copied().collect(),
                feasible: c[m] <= VIOLATION_TOLERANCE,
                weights: None,
            })
            .collect();
        let outcome = SolveOutcome {
            x: state.best_param.clone().unwrap_or_else(|| self.problem.x0().clone()),
            cost: state.best_cost,
            iterations: state.iter,
            evaluations: state.counts.get("cost_count").copied().unwrap_or(0),
            success: !cancelled,
            message,
            cancelled,
            history: state.history,
        };
        Ok((candidates, vec![outcome]))
    }

    fn analyze(
        &self,
        method: Method,
        candidates: Vec<Candidate>,
        runs: Vec<SolveOutcome>,
        weights: Array1<f64>,
        coefficients: Array1<f64>,
    ) -> Result<MultiObjectiveOutcome> {
        let n_searches = candidates.len();
        let evaluated: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.signed.iter().all(|v| v.is_finite()))
            .collect();
        let any_feasible = evaluated.iter().any(|c| c.feasible);
        let pool: Vec<Candidate> = evaluated
            .into_iter()
            .filter(|c| c.feasible || !any_feasible)
            .collect();
        if !any_feasible && !pool.is_empty() {
            warn!("[{}] no feasible solution found, front built on infeasible points", self.ctx.run_id);
        }

        let m = self.problem.n_objectives();
        let mut signed = Array2::zeros((pool.len(), m));
        let mut xs = Array2::zeros((pool.len(), self.problem.dim()));
        for (i, c) in pool.iter().enumerate() {
            signed.row_mut(i).assign(&c.signed);
            xs.row_mut(i).assign(&c.x);
        }
        let mut kept: Vec<usize> = vec![];
        for i in non_dominated_indices(&signed) {
            let previous = xs.select(Axis(0), &kept);
            if !is_near_any(&xs.row(i), &previous, self.problem.xlimits(), DUPLICATE_TOLERANCE) {
                kept.push(i);
            }
        }
        let front: Vec<Candidate> = kept.iter().map(|&i| pool[i].clone()).collect();

        let mut front_signed = Array2::zeros((front.len(), m));
        for (i, c) in front.iter().enumerate() {
            front_signed.row_mut(i).assign(&c.signed);
        }
        let compromise = compromise_index(&front_signed, &weights);

        let names: Vec<String> = self.problem.objectives().iter().map(|o| o.name.clone()).collect();
        let signs: Array1<f64> = self.problem.objectives().iter().map(|o| o.target.sign()).collect();
        let raw = &front_signed * &signs;
        let tradeoffs = tradeoffs(&names, &front_signed);
        let quality = QualityMetrics::compute(&front_signed);
        let degenerate = front.len() == 1 && n_searches > 1;

        let pareto_front: Vec<ParetoSolution> = front
            .iter()
            .enumerate()
            .map(|(i, c)| ParetoSolution {
                parameters: self.problem.binding(&c.x.to_vec()),
                objectives: names.iter().cloned().zip(raw.row(i).iter().copied()).collect(),
                feasible: c.feasible,
                weights: c.weights.as_ref().map(|w| w.to_vec()),
            })
            .collect();
        let recommendations = recommendations(&names, &weights, &tradeoffs, front.len(), degenerate);

        let chosen = match compromise {
            Some(i) => front[i].x.clone(),
            None => runs
                .first()
                .map(|r| r.x.clone())
                .unwrap_or_else(|| self.problem.x0().clone()),
        };
        let cost = ScalarCost::new(self.problem.clone())
            .coefficients(coefficients.clone())
            .value(&chosen.to_vec());
        let cancelled = runs.iter().any(|r| r.cancelled);
        let success = !runs.is_empty() && !cancelled && runs.iter().any(|r| r.success) && !front.is_empty();
        let message = if front.is_empty() {
            "No solution with finite objective values was found".to_string()
        } else if cancelled {
            format!("Optimization cancelled, {} Pareto solutions kept", front.len())
        } else {
            let converged = runs.iter().filter(|r| r.success).count();
            format!(
                "{} Pareto solutions from {n_searches} points, {converged}/{} searches converged",
                front.len(),
                runs.len()
            )
        };
        let solve = SolveOutcome {
            x: chosen,
            cost,
            iterations: runs.iter().map(|r| r.iterations).sum(),
            evaluations: runs.iter().map(|r| r.evaluations).sum(),
            success,
            message,
            cancelled,
            history: runs.iter().flat_map(|r| r.history.iter().copied()).collect(),
        };
        info!(
            "[{}] {method}: {} Pareto solutions, hypervolume={:.4e}",
            self.ctx.run_id,
            pareto_front.len(),
            quality.hypervolume
        );
        Ok(MultiObjectiveOutcome {
            solve,
            coefficients,
            result: MultiObjectiveResult {
                method: method.name().to_string(),
                weights: weights.to_vec(),
                pareto_front,
                compromise,
                tradeoffs,
                quality,
                degenerate,
                recommendations,
            },
        })
    }
}

/// Front member minimizing the weighted sum of min-max normalized objectives
fn compromise_index(front: &Array2<f64>, weights: &Array1<f64>) -> Option<usize> {
    if front.nrows() == 0 {
        return None;
    }
    let mut scores = Array1::<f64>::zeros(front.nrows());
    for (j, column) in front.columns().into_iter().enumerate() {
        let lo = column.fold(f64::INFINITY, |a, &v| a.min(v));
        let hi = column.fold(f64::NEG_INFINITY, |a, &v| a.max(v));
        if hi > lo {
            scores.zip_mut_with(&column, |s, &v| *s += weights[j] * (v - lo) / (hi - lo));
        }
    }
    scores
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}

fn recommendations(
    names: &[String],
    weights: &Array1<f64>,
    tradeoffs: &[TradeOff],
    n_solutions: usize,
    degenerate: bool,
) -> Vec<String> {
    let mut result = vec![format!(
        "Generated {n_solutions} non-dominated solutions on Pareto front"
    )];
    if degenerate {
        result.push(
            "All searches reached the same solution - objectives do not conflict in the feasible region"
                .to_string(),
        );
    } else if n_solutions > 10 {
        result.push("Large Pareto front - consider preference-based selection".to_string());
    } else if n_solutions < 3 {
        result.push("Small Pareto front - objectives may be highly correlated".to_string());
    }
    if let Some((k, _)) = weights
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
    {
        result.push(format!("Highest weight given to: {}", names[k]));
    }
    for t in tradeoffs
        .iter()
        .filter(|t| t.relationship == Relationship::Conflicting)
    {
        result.push(format!(
            "Conflicting objectives {} vs {} (strength {:.2}) - improving one degrades the other",
            t.first, t.second, t.strength
        ));
    }
    result
}
