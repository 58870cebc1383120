//! Top level optimization entry point.
//!
//! [OptimizationSolver] turns an [OptimizationRequest] into a validated problem,
//! dispatches it to a single-objective solver or to the multi-objective optimizer,
//! checks the feasibility of the returned point independently of the penalty and
//! reports the run to the performance monitor.
//!
//! ```no_run
//! use tunebox_optim::{ConstraintSpec, ObjectiveSpec, OptimizationRequest, OptimizationSolver, ParameterSpec};
//!
//! let request = OptimizationRequest::new("gradient_descent")
//!     .parameter(ParameterSpec::new("x", 0., [0., 2.]))
//!     .parameter(ParameterSpec::new("y", 0., [0., 3.]))
//!     .objective(ObjectiveSpec::expression("distance", "(x-1)^2 + (y-2)^2"))
//!     .constraint(ConstraintSpec::inequality("capacity", "x + y", 3.));
//! let response = OptimizationSolver::new().optimize_system(&request).expect("solved");
//! println!("{:?}", response.optimal_parameters);
//! ```
use crate::errors::Result;
use crate::evaluator::EvaluatorRegistry;
use crate::method::Method;
use crate::multiobjective::MultiObjectiveOptimizer;
use crate::performance::{PerformanceMonitor, PerformanceReport, RunMetrics};
use crate::problem::{OptimizationProblem, ScalarCost};
use crate::runs::{RunRegistry, RunStatus};
use crate::solver::{minimize, CancellationToken, RunContext};
use crate::types::{
    ConvergenceMetrics, FeasibilityCheck, OptimizationReport, OptimizationRequest,
    OptimizationResponse,
};
use crate::utils::init_logger;

use log::{error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use tunebox_expr::ExpressionEngine;
use tunebox_surrogate::SurrogateRegistry;
use web_time::Instant;

/// Constrained single and multi-objective optimization of systems described by requests.
///
/// The solver owns the shared registries: parsed expressions, surrogate models,
/// host evaluators, run records and performance history. It is cheap to share
/// behind an `Arc` and runs requests concurrently.
pub struct OptimizationSolver {
    engine: Arc<ExpressionEngine>,
    surrogates: Arc<SurrogateRegistry>,
    evaluators: Arc<EvaluatorRegistry>,
    runs: Arc<RunRegistry>,
    monitor: Arc<PerformanceMonitor>,
    interruptible: bool,
}

impl Default for OptimizationSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationSolver {
    pub fn new() -> Self {
        init_logger();
        OptimizationSolver {
            engine: Arc::new(ExpressionEngine::new()),
            surrogates: Arc::new(SurrogateRegistry::new()),
            evaluators: Arc::new(EvaluatorRegistry::new()),
            runs: Arc::new(RunRegistry::new()),
            monitor: Arc::new(PerformanceMonitor::new()),
            interruptible: false,
        }
    }

    /// Uses an existing surrogate registry, shared with its other users
    pub fn surrogates(mut self, surrogates: Arc<SurrogateRegistry>) -> Self {
        self.surrogates = surrogates;
        self
    }

    /// Uses an existing evaluator registry
    pub fn evaluators(mut self, evaluators: Arc<EvaluatorRegistry>) -> Self {
        self.evaluators = evaluators;
        self
    }

    /// Lets Ctrl-C stop running solves with their best point so far
    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    pub fn engine(&self) -> &Arc<ExpressionEngine> {
        &self.engine
    }

    pub fn surrogate_registry(&self) -> &Arc<SurrogateRegistry> {
        &self.surrogates
    }

    pub fn evaluator_registry(&self) -> &Arc<EvaluatorRegistry> {
        &self.evaluators
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Solves `request` in the calling thread
    pub fn optimize_system(&self, request: &OptimizationRequest) -> Result<OptimizationResponse> {
        let run_id = self.runs.create(request);
        self.execute(&run_id, request, CancellationToken::new())
    }

    /// Performance report of the runs tracked under `system_id`
    pub fn get_performance_metrics(&self, system_id: &str) -> PerformanceReport {
        self.monitor.get_performance_metrics(system_id)
    }

    /// Runs the pending run `run_id` of `request` until it reaches a terminal status.
    /// A cancelled run still returns the best point found before the cancellation.
    pub(crate) fn execute(
        &self,
        run_id: &str,
        request: &OptimizationRequest,
        token: CancellationToken,
    ) -> Result<OptimizationResponse> {
        // a token cancelled beforehand stops the solver at its first check
        self.runs.start(run_id)?;
        match self.solve(run_id, request, token) {
            Ok(response) => {
                self.runs.finish(run_id, &response)?;
                Ok(response)
            }
            Err(err) => {
                error!("[{run_id}] optimization failed: {err}");
                self.runs.fail(run_id, err.to_string())?;
                Err(err)
            }
        }
    }

    fn solve(
        &self,
        run_id: &str,
        request: &OptimizationRequest,
        token: CancellationToken,
    ) -> Result<OptimizationResponse> {
        let start = Instant::now();
        let method: Method = request.method.parse()?;
        let config = request.config.check(method, request.parameters.len().max(1))?;
        let problem = Arc::new(OptimizationProblem::from_request(
            request,
            &self.engine,
            &self.surrogates,
            &self.evaluators,
            config.penalty_weight,
        )?);
        info!(
            "[{run_id}] {method} on {} parameters, {} objectives, {} constraints",
            problem.dim(),
            problem.n_objectives(),
            problem.constraints().len()
        );
        let ctx = RunContext {
            run_id: run_id.to_string(),
            token,
            surrogates: self.surrogates.clone(),
            interruptible: self.interruptible,
        };

        let (outcome, coefficients, multi_objective) = if method.is_multi_objective() {
            let mo = MultiObjectiveOptimizer::new(
                problem.clone(),
                &request.config,
                &request.preferences,
                &ctx,
            )
            .optimize(method)?;
            (mo.solve, mo.coefficients, Some(mo.result))
        } else {
            let outcome = minimize(method, ScalarCost::new(problem.clone()), &config, &ctx)?;
            (outcome, problem.weights(), None)
        };

        let x = outcome.x.to_vec();
        let scalar = ScalarCost::new(problem.clone()).coefficients(coefficients);
        let constraints = problem.constraints();
        let constraint_evaluations = constraints.evaluate_feasibility(&x);
        let violations: Vec<String> = constraint_evaluations
            .iter()
            .filter(|c| !c.feasible)
            .map(|c| c.name.clone())
            .collect();
        let final_feasibility_check = FeasibilityCheck {
            is_feasible: violations.is_empty(),
            final_penalty: constraints.penalty(&x),
            violations,
        };
        if !final_feasibility_check.is_feasible {
            warn!(
                "[{run_id}] returned point violates {:?}",
                final_feasibility_check.violations
            );
        }

        let binding = problem.binding(&x);
        let objective_values: BTreeMap<String, f64> = problem
            .objectives()
            .iter()
            .map(|o| (o.name.clone(), o.value(&x)))
            .collect();
        let sensitivities: BTreeMap<String, BTreeMap<String, f64>> = problem
            .objectives()
            .iter()
            .filter_map(|o| o.expression.as_ref().map(|expr| (o, expr)))
            .map(|(o, expr)| {
                let derivatives: BTreeMap<String, f64> = self
                    .engine
                    .gradient(expr, problem.names())
                    .into_iter()
                    .map(|(name, d)| (name, d.evaluate(&binding).unwrap_or(f64::NAN)))
                    .collect();
                (o.name.clone(), derivatives)
            })
            .collect();

        let status = if outcome.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Succeeded
        };
        let report_status = match (outcome.cancelled, outcome.success) {
            (true, _) => "cancelled",
            (false, true) => "converged",
            (false, false) => "not_converged",
        };
        let elapsed_seconds = start.elapsed().as_secs_f64();
        let initial_cost = scalar.value(&problem.x0().to_vec());
        let improvement = initial_cost - outcome.cost;
        self.monitor.track_optimization_performance(
            request.system_id.as_deref().unwrap_or(run_id),
            RunMetrics {
                success: outcome.success,
                convergence_time: elapsed_seconds,
                objective_improvement: if improvement.is_finite() { improvement } else { 0. },
                iterations: outcome.iterations,
            },
        );
        info!(
            "[{run_id}] {report_status} after {} iterations ({} evaluations) in {elapsed_seconds:.3}s, cost={:e}",
            outcome.iterations, outcome.evaluations, outcome.cost
        );

        Ok(OptimizationResponse {
            run_id: run_id.to_string(),
            status,
            method_used: method.name().to_string(),
            optimal_parameters: binding,
            optimal_objective_value: scalar.objective(&x),
            convergence_metrics: ConvergenceMetrics {
                iterations: outcome.iterations,
                evaluations: outcome.evaluations,
                success: outcome.success,
                message: outcome.message.clone(),
                elapsed_seconds,
                best_cost_history: outcome.history,
            },
            optimization_report: OptimizationReport {
                status: report_status.to_string(),
                message: outcome.message,
                method_used: method.name().to_string(),
                objective_values,
                constraint_evaluations,
                sensitivities,
                multi_objective,
            },
            final_feasibility_check,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::OptimError;
    use crate::types::{ConstraintSpec, ObjectiveSpec, ParameterSpec, Target};
    use approx::assert_abs_diff_eq;

    fn quadratic(method: &str) -> OptimizationRequest {
        OptimizationRequest::new(method)
            .system_id("quadratic")
            .parameter(ParameterSpec::new("x", 0., [0., 2.]))
            .parameter(ParameterSpec::new("y", 0., [0., 3.]))
            .objective(ObjectiveSpec::expression("f", "(x-1)^2 + (y-2)^2"))
            .constraint(ConstraintSpec::inequality("capacity", "x + y", 3.))
    }

    #[test]
    fn test_gradient_response() {
        let solver = OptimizationSolver::new();
        let response = solver.optimize_system(&quadratic("quasi_newton")).unwrap();
        assert_eq!(response.status, RunStatus::Succeeded);
        assert_eq!(response.method_used, "gradient_descent");
        assert!(response.convergence_metrics.success);
        assert_abs_diff_eq!(response.optimal_parameters["x"], 1., epsilon = 1e-2);
        assert_abs_diff_eq!(response.optimal_parameters["y"], 2., epsilon = 1e-2);
        assert_abs_diff_eq!(response.optimal_objective_value, 0., epsilon = 1e-4);
        assert!(response.final_feasibility_check.is_feasible);
        let report = &response.optimization_report;
        assert_eq!(report.status, "converged");
        assert_eq!(report.constraint_evaluations.len(), 1);
        // d/dx (x-1)^2 + (y-2)^2 vanishes at the optimum
        assert_abs_diff_eq!(report.sensitivities["f"]["x"], 0., epsilon = 1e-2);
        assert!(report.multi_objective.is_none());

        let run = solver.runs().get(&response.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(run.trajectory, response.convergence_metrics.best_cost_history);
        let perf = solver.get_performance_metrics("quadratic");
        let summary = perf.performance_summary.unwrap();
        assert_eq!(summary.total_optimizations, 1);
        assert_abs_diff_eq!(summary.average_improvement, 5., epsilon = 1e-3);
    }

    #[test]
    fn test_infeasible_point_is_reported() {
        // penalty too weak to enforce x >= 1.5 against the objective pull
        let request = OptimizationRequest::new("gradient_descent")
            .parameter(ParameterSpec::new("x", 0., [0., 2.]))
            .objective(ObjectiveSpec::expression("f", "x^2"))
            .constraint(ConstraintSpec {
                penalty_weight: Some(1.),
                ..ConstraintSpec::inequality("floor", "-x", -1.5)
            });
        let response = OptimizationSolver::new().optimize_system(&request).unwrap();
        assert_abs_diff_eq!(response.optimal_parameters["x"], 0.75, epsilon = 1e-2);
        assert!(!response.final_feasibility_check.is_feasible);
        assert_eq!(response.final_feasibility_check.violations, vec!["floor"]);
        assert!(response.final_feasibility_check.final_penalty > 0.);
    }

    #[test]
    fn test_failures_mark_the_run() {
        let solver = OptimizationSolver::new();
        let unsupported = quadratic("simulated_annealing");
        assert!(matches!(
            solver.optimize_system(&unsupported),
            Err(OptimError::UnsupportedMethodError(_))
        ));
        let bad_expression = quadratic("gradient_descent")
            .objective(ObjectiveSpec::expression("g", "x +* y"));
        assert!(solver.optimize_system(&bad_expression).is_err());
        let runs = solver.runs().list();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RunStatus::Failed && r.error.is_some()));
    }

    #[test]
    fn test_cancelled_before_start_returns_initial_point() {
        let solver = OptimizationSolver::new();
        let request = quadratic("gradient_descent");
        let run_id = solver.runs().create(&request);
        let token = CancellationToken::new();
        token.cancel();
        let response = solver.execute(&run_id, &request, token).unwrap();
        assert_eq!(response.status, RunStatus::Cancelled);
        assert_eq!(response.optimization_report.status, "cancelled");
        assert_eq!(response.convergence_metrics.iterations, 0);
        assert_abs_diff_eq!(response.optimal_parameters["x"], 0.);
        assert_abs_diff_eq!(response.optimal_parameters["y"], 0.);
        let run = solver.runs().get(&run_id).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.started_at.is_some());
        assert_eq!(run.result, Some(response));
    }

    #[test]
    fn test_host_evaluator_maximized() {
        let solver = OptimizationSolver::new();
        solver
            .evaluator_registry()
            .register_fn("yield", |x: &[f64]| -(x[0] - 0.3).powi(2) + 1.);
        let request = OptimizationRequest::new("genetic_algorithm")
            .parameter(ParameterSpec::new("x", 0., [0., 1.]))
            .objective(ObjectiveSpec::evaluator("yield", "yield").target(Target::Maximize))
            .configure(|c| c.seed(3));
        let response = solver.optimize_system(&request).unwrap();
        assert_abs_diff_eq!(response.optimal_parameters["x"], 0.3, epsilon = 1e-2);
        assert_abs_diff_eq!(
            response.optimization_report.objective_values["yield"],
            1.,
            epsilon = 1e-4
        );
        assert_abs_diff_eq!(response.optimal_objective_value, -1., epsilon = 1e-4);
        assert!(response.optimization_report.sensitivities.is_empty());
    }
}
