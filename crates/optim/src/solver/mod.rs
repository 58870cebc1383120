//! Single-objective solvers implemented as argmin solvers over [OptimState].
mod bayesian;
mod cancel;
mod differential_evolution;
mod observer;
mod quasi_newton;
mod state;

pub use bayesian::BayesianOptimizer;
pub use cancel::CancellationToken;
pub use differential_evolution::DifferentialEvolution;
pub use observer::LogObserver;
pub use quasi_newton::ProjectedBfgs;
use quasi_newton::LINE_SEARCH_FAILED;
pub use state::OptimState;

use crate::config::ValidSolverConfig;
use crate::errors::{OptimError, Result};
use crate::method::Method;
use crate::problem::ScalarCost;
use crate::utils::rng_from;

use argmin::core::observers::ObserverMode;
use argmin::core::{CostFunction, Executor, Solver, TerminationReason, TerminationStatus};
use log::{info, warn};
use ndarray::Array1;
use std::sync::Arc;
use tunebox_surrogate::SurrogateRegistry;

/// Exit message of a cancelled solver
pub(crate) const CANCELLED: &str = "cancelled";
/// Exit message of a search without improvement
pub(crate) const STALLED: &str = "stalled";

/// What a solve shares with its caller
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub token: CancellationToken,
    pub surrogates: Arc<SurrogateRegistry>,
    /// Whether Ctrl-C interrupts the run
    pub interruptible: bool,
}

impl RunContext {
    pub fn new(run_id: impl Into<String>, surrogates: Arc<SurrogateRegistry>) -> Self {
        RunContext {
            run_id: run_id.into(),
            token: CancellationToken::new(),
            surrogates,
            interruptible: false,
        }
    }

    /// Same context for a sub-run identified by `suffix`
    pub(crate) fn child(&self, suffix: &str) -> Self {
        RunContext {
            run_id: format!("{}-{suffix}", self.run_id),
            ..self.clone()
        }
    }
}

/// Outcome of a single-objective solve
#[derive(Clone, Debug)]
pub struct SolveOutcome {
    pub x: Array1<f64>,
    /// Penalized cost at `x`
    pub cost: f64,
    pub iterations: u64,
    pub evaluations: u64,
    pub success: bool,
    pub message: String,
    pub cancelled: bool,
    pub history: Vec<f64>,
}

/// Minimizes `cost` from its problem initial point with the single-objective `method`
pub fn minimize(
    method: Method,
    cost: ScalarCost,
    config: &ValidSolverConfig,
    ctx: &RunContext,
) -> Result<SolveOutcome> {
    let run = method.entry().run.ok_or_else(|| {
        OptimError::UnsupportedMethodError(format!("{method} is not a single-objective method"))
    })?;
    info!("[{}] minimize with {method}", ctx.run_id);
    run(cost, config, ctx)
}

pub(crate) fn run_quasi_newton(
    cost: ScalarCost,
    config: &ValidSolverConfig,
    ctx: &RunContext,
) -> Result<SolveOutcome> {
    let problem = cost.problem().clone();
    let solver = ProjectedBfgs::new(problem.xlimits().clone(), config.tolerance, ctx.token.clone());
    execute(solver, cost, problem.x0().clone(), config.max_iterations, ctx, false)
}

pub(crate) fn run_differential_evolution(
    cost: ScalarCost,
    config: &ValidSolverConfig,
    ctx: &RunContext,
) -> Result<SolveOutcome> {
    let problem = cost.problem().clone();
    let solver = DifferentialEvolution::new(
        problem.xlimits().clone(),
        ctx.token.clone(),
        rng_from(config.seed),
    )
    .population_size(config.population_size)
    .mutation(config.mutation)
    .recombination(config.recombination)
    .initial_design(config.initial_design)
    .tolerance(config.tolerance);
    let outcome = execute(
        solver,
        cost.clone(),
        problem.x0().clone(),
        config.max_iterations,
        ctx,
        false,
    )?;
    if config.polish && !outcome.cancelled {
        polish(outcome, cost, config, ctx)
    } else {
        Ok(outcome)
    }
}

pub(crate) fn run_bayesian(
    cost: ScalarCost,
    config: &ValidSolverConfig,
    ctx: &RunContext,
) -> Result<SolveOutcome> {
    let problem = cost.problem().clone();
    let model_id = format!("bayesian-{}", ctx.run_id);
    let solver = BayesianOptimizer::new(
        problem.xlimits().clone(),
        ctx.surrogates.clone(),
        model_id.clone(),
        ctx.token.clone(),
        rng_from(config.seed),
    )
    .n_initial(config.n_initial_points)
    .n_candidates(config.n_candidates)
    .z(config.acquisition_z)
    .stall_iterations(config.stall_iterations)
    .refine(config.bo_refine)
    .initial_design(config.initial_design)
    .tolerance(config.tolerance)
    .gp_restarts(config.gp_restarts);
    let outcome = execute(solver, cost, problem.x0().clone(), config.max_iterations, ctx, true);
    if ctx.surrogates.contains(&model_id) {
        ctx.surrogates.delete(&model_id)?;
    }
    outcome
}

/// Local gradient refinement of a global search result, kept only when it improves
fn polish(
    outcome: SolveOutcome,
    cost: ScalarCost,
    config: &ValidSolverConfig,
    ctx: &RunContext,
) -> Result<SolveOutcome> {
    let xlimits = cost.problem().xlimits().clone();
    let solver = ProjectedBfgs::new(xlimits, 1e-8, ctx.token.clone());
    let polished = execute(solver, cost, outcome.x.clone(), config.max_iterations.max(100), ctx, false)?;
    let mut outcome = SolveOutcome {
        evaluations: outcome.evaluations + polished.evaluations,
        cancelled: polished.cancelled,
        ..outcome
    };
    if polished.cost < outcome.cost {
        outcome.x = polished.x;
        outcome.cost = polished.cost;
        outcome.history.push(polished.cost);
    }
    Ok(outcome)
}

fn execute<S>(
    solver: S,
    cost: ScalarCost,
    x0: Array1<f64>,
    max_iterations: u64,
    ctx: &RunContext,
    budget_is_success: bool,
) -> Result<SolveOutcome>
where
    S: Solver<ScalarCost, OptimState>,
{
    let fallback = x0.clone();
    let result = Executor::new(cost, solver)
        .configure(|state| state.param(x0).max_iters(max_iterations))
        .add_observer(LogObserver::new(ctx.run_id.clone()), ObserverMode::Always)
        .ctrlc(ctx.interruptible)
        .run()?;
    let state = result.state;
    let evaluations = state.counts.get("cost_count").copied().unwrap_or(0);

    let (success, cancelled, message) = match &state.termination_status {
        TerminationStatus::Terminated(reason) => {
            let cancelled = matches!(reason, TerminationReason::Interrupt)
                || matches!(reason, TerminationReason::SolverExit(msg) if msg == CANCELLED);
            let success = match reason {
                TerminationReason::SolverConverged | TerminationReason::TargetCostReached => true,
                TerminationReason::SolverExit(msg) => msg == STALLED,
                TerminationReason::MaxItersReached => budget_is_success,
                _ => false,
            };
            let message = match reason {
                TerminationReason::SolverExit(msg) if msg == CANCELLED => {
                    "Optimization cancelled, best point so far returned".to_string()
                }
                TerminationReason::SolverExit(msg) if msg == STALLED => {
                    "No improvement over the last iterations".to_string()
                }
                TerminationReason::SolverExit(msg) if msg == LINE_SEARCH_FAILED => {
                    "Line search failed away from a stationary point".to_string()
                }
                other => other.to_string(),
            };
            (success, cancelled, message)
        }
        TerminationStatus::NotTerminated => (false, false, "Not terminated".to_string()),
    };

    let (x, cost) = match state.best_param {
        Some(x) => (x, state.best_cost),
        None => {
            let problem = result.problem.problem.as_ref();
            let cost = problem
                .map(|p| p.cost(&fallback))
                .transpose()?
                .unwrap_or(f64::INFINITY);
            (fallback, cost)
        }
    };
    if !cost.is_finite() {
        warn!("[{}] no point with a finite cost was found", ctx.run_id);
    }
    Ok(SolveOutcome {
        x,
        cost,
        iterations: state.iter,
        evaluations,
        success: success && cost.is_finite(),
        message,
        cancelled,
        history: state.history,
    })
}
