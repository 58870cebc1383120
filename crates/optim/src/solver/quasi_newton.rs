//! Projected BFGS: quasi-Newton local search within box bounds.
use crate::problem::ScalarCost;
use crate::solver::{CancellationToken, OptimState, CANCELLED};
use crate::utils::clamp;

use argmin::argmin_error_closure;
use argmin::core::{
    Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV,
};
use finitediff::FiniteDiff;
use log::debug;
use ndarray::{Array1, Array2};

/// Armijo sufficient decrease coefficient
const ARMIJO_C1: f64 = 1e-4;
/// Max number of step halvings in the line search
const MAX_BACKTRACKS: usize = 30;
/// Relative curvature `s.y / (|s| |y|)` under which the inverse hessian is reset
const CURVATURE_EPS: f64 = 1e-10;
/// Exit message when no step along the projected path decreases the cost
pub(crate) const LINE_SEARCH_FAILED: &str = "line search failed";

/// Quasi-Newton solver keeping iterates within a box.
///
/// Gradients are computed by central finite differences of the penalized cost.
/// Components lying on an active bound with a gradient pointing outside are frozen,
/// steps are projected onto the box and accepted by an Armijo backtracking line search.
/// The inverse hessian is reset to identity whenever a step is cut by a bound.
///
/// The search converges when the projected gradient falls under `tolerance` (relative
/// to the cost magnitude), or when the cost stalls at a point whose projected gradient
/// is under `sqrt(tolerance)`. A line search failure away from such a point is a failure.
pub struct ProjectedBfgs {
    xlimits: Array2<f64>,
    tolerance: f64,
    token: CancellationToken,
    grad: Option<Array1<f64>>,
    inv_hessian: Option<Array2<f64>>,
}

impl ProjectedBfgs {
    pub fn new(xlimits: Array2<f64>, tolerance: f64, token: CancellationToken) -> Self {
        ProjectedBfgs {
            xlimits,
            tolerance,
            token,
            grad: None,
            inv_hessian: None,
        }
    }

    fn gradient(
        problem: &mut Problem<ScalarCost>,
        x: &Array1<f64>,
    ) -> Result<Array1<f64>, Error> {
        let n = x.len();
        problem.bulk_problem("cost_count", 2 * n, |cost| {
            let f = |p: &Vec<f64>| -> f64 { cost.value(p) };
            let grad = x.to_vec().central_diff(&f);
            Ok(grad
                .into_iter()
                .map(|g| if g.is_finite() { g } else { 0. })
                .collect())
        })
    }

    /// Mask of the components free to move: not on a bound the gradient pushes against
    fn free_components(&self, x: &Array1<f64>, grad: &Array1<f64>) -> Array1<f64> {
        Array1::from_shape_fn(x.len(), |i| {
            let (lo, hi) = (self.xlimits[[i, 0]], self.xlimits[[i, 1]]);
            let at_lower = x[i] <= lo && grad[i] > 0.;
            let at_upper = x[i] >= hi && grad[i] < 0.;
            if at_lower || at_upper || lo == hi {
                0.
            } else {
                1.
            }
        })
    }

    /// Infinity norm of the projected gradient step `x - P(x - g)`
    fn projected_gradient_norm(&self, x: &Array1<f64>, grad: &Array1<f64>) -> f64 {
        let moved = clamp(&(x - grad), &self.xlimits);
        (x - &moved).iter().fold(0., |acc, v| acc.max(v.abs()))
    }

    /// (stationary, nearly stationary) tests of the projected gradient at a point of cost `f`
    fn stationarity(&self, x: &Array1<f64>, grad: &Array1<f64>, f: f64) -> (bool, bool) {
        let norm = self.projected_gradient_norm(x, grad);
        let scale = f.abs().max(1.);
        (
            norm <= self.tolerance * scale,
            norm <= self.tolerance.sqrt() * scale,
        )
    }
}

impl Solver<ScalarCost, OptimState> for ProjectedBfgs {
    const NAME: &'static str = "Projected BFGS";

    fn init(
        &mut self,
        problem: &mut Problem<ScalarCost>,
        state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let x0 = state.get_param().ok_or_else(argmin_error_closure!(
            NotInitialized,
            "ProjectedBfgs requires an initial parameter vector"
        ))?;
        let x0 = clamp(x0, &self.xlimits);
        let cost = problem.cost(&x0)?;
        self.grad = Some(Self::gradient(problem, &x0)?);
        self.inv_hessian = Some(Array2::eye(x0.len()));
        Ok((state.param(x0).cost(cost), None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<ScalarCost>,
        state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let x = state
            .get_param()
            .cloned()
            .ok_or_else(argmin_error_closure!(NotInitialized, "ProjectedBfgs: no param"))?;
        let f = state.get_cost();
        let grad = self
            .grad
            .take()
            .ok_or_else(argmin_error_closure!(PotentialBug, "ProjectedBfgs: no gradient"))?;
        let mut h = self
            .inv_hessian
            .take()
            .ok_or_else(argmin_error_closure!(PotentialBug, "ProjectedBfgs: no hessian"))?;

        let (stationary, nearly_stationary) = self.stationarity(&x, &grad, f);
        if stationary {
            self.grad = Some(grad);
            self.inv_hessian = Some(h);
            return Ok((
                state.terminate_with(TerminationReason::SolverConverged),
                None,
            ));
        }

        let free = self.free_components(&x, &grad);
        let g_free = &grad * &free;
        let mut direction = -(h.dot(&g_free)) * &free;
        if direction.dot(&g_free) >= 0. {
            debug!("BFGS direction is not a descent direction, reset to steepest descent");
            h = Array2::eye(x.len());
            direction = -&g_free;
        }

        let mut step = 1.;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let target = &x + &(&direction * step);
            let candidate = clamp(&target, &self.xlimits);
            let f_new = problem.cost(&candidate)?;
            let decrease = grad.dot(&(&candidate - &x));
            if f_new.is_finite() && f_new <= f + ARMIJO_C1 * decrease {
                let cut = candidate != target;
                accepted = Some((candidate, f_new, cut));
                break;
            }
            step *= 0.5;
        }
        let Some((x_new, f_new, cut)) = accepted else {
            self.grad = Some(grad);
            self.inv_hessian = Some(h);
            let reason = if nearly_stationary {
                TerminationReason::SolverConverged
            } else {
                debug!("No decrease along the projected path, stop");
                TerminationReason::SolverExit(LINE_SEARCH_FAILED.to_string())
            };
            return Ok((state.terminate_with(reason), None));
        };

        let grad_new = Self::gradient(problem, &x_new)?;
        let s = &x_new - &x;
        let y = &grad_new - &grad;
        let sy = s.dot(&y);
        let scale = s.dot(&s).sqrt() * y.dot(&y).sqrt();
        if cut || !(sy > CURVATURE_EPS * scale) {
            debug!("Step cut by a bound or poor curvature, reset inverse hessian");
            h = Array2::eye(x.len());
        } else {
            let rho = 1. / sy;
            let n = x.len();
            let eye = Array2::<f64>::eye(n);
            let s_col = s.view().insert_axis(ndarray::Axis(1));
            let y_row = y.view().insert_axis(ndarray::Axis(0));
            let left = &eye - &(s_col.dot(&y_row) * rho);
            let right = &eye - &(y_row.t().dot(&s_col.t()) * rho);
            h = left.dot(&h).dot(&right) + s_col.dot(&s_col.t()) * rho;
        }

        let relative = (f - f_new) / f.abs().max(f_new.abs()).max(1.);
        let (stationary, nearly_stationary) = self.stationarity(&x_new, &grad_new, f_new);
        let converged = stationary || (relative.abs() <= self.tolerance && nearly_stationary);
        self.grad = Some(grad_new);
        self.inv_hessian = Some(h);

        let state = state.param(x_new).cost(f_new);
        if converged {
            Ok((state.terminate_with(TerminationReason::SolverConverged), None))
        } else {
            Ok((state, None))
        }
    }

    fn terminate(&mut self, _state: &OptimState) -> TerminationStatus {
        if self.token.is_cancelled() {
            TerminationStatus::Terminated(TerminationReason::SolverExit(CANCELLED.to_string()))
        } else {
            TerminationStatus::NotTerminated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::tests::{build, quadratic_request};
    use crate::types::{ConstraintSpec, ObjectiveSpec, OptimizationRequest, ParameterSpec};
    use approx::assert_abs_diff_eq;
    use argmin::core::Executor;
    use ndarray::array;
    use std::sync::Arc;

    fn solve(request: &OptimizationRequest, max_iters: u64) -> OptimState {
        let problem = Arc::new(build(request).unwrap());
        let solver = ProjectedBfgs::new(
            problem.xlimits().clone(),
            1e-8,
            CancellationToken::new(),
        );
        let x0 = problem.x0().clone();
        Executor::new(ScalarCost::new(problem), solver)
            .configure(|state| state.param(x0).max_iters(max_iters))
            .ctrlc(false)
            .run()
            .unwrap()
            .state
    }

    #[test]
    fn test_rosenbrock_unconstrained() {
        let request = OptimizationRequest::new("gradient_descent")
            .parameter(ParameterSpec::new("x", -1.2, [-2., 2.]))
            .parameter(ParameterSpec::new("y", 1., [-2., 2.]))
            .objective(ObjectiveSpec::expression(
                "rosen",
                "(1 - x)^2 + 100 * (y - x^2)^2",
            ));
        let state = solve(&request, 500);
        let best = state.best_param.unwrap();
        assert_abs_diff_eq!(best, array![1., 1.], epsilon = 1e-3);
    }

    #[test]
    fn test_active_bound() {
        let request = OptimizationRequest::new("gradient_descent")
            .parameter(ParameterSpec::new("x", 0.5, [0., 1.]))
            .objective(ObjectiveSpec::expression("f", "(x - 3)^2"));
        let state = solve(&request, 50);
        assert_abs_diff_eq!(state.best_param.unwrap()[0], 1., epsilon = 1e-12);
        assert_eq!(
            state.termination_status,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
    }

    #[test]
    fn test_infeasible_start_reaches_constrained_optimum() {
        // feasible set is [2, 4], the first step lands on the upper bound
        let request = OptimizationRequest::new("gradient_descent")
            .parameter(ParameterSpec::new("x", 1., [0., 4.]))
            .objective(ObjectiveSpec::expression("f", "x^2"))
            .constraint(ConstraintSpec::inequality("band", "(x - 3)^2", 1.));
        let state = solve(&request, 100);
        assert_eq!(
            state.termination_status,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
        );
        let best = state.best_param.unwrap();
        assert_abs_diff_eq!(best[0], 2., epsilon = 1e-3);
        assert_abs_diff_eq!(state.best_cost, 4., epsilon = 1e-2);
    }

    #[test]
    fn test_penalized_quadratic() {
        let state = solve(&quadratic_request(), 200);
        let best = state.best_param.unwrap();
        assert_abs_diff_eq!(best, array![1., 2.], epsilon = 1e-2);
        assert!(best[0] + best[1] <= 3. + 1e-3);
    }

    #[test]
    fn test_cancelled_before_first_iteration() {
        let problem = Arc::new(build(&quadratic_request()).unwrap());
        let token = CancellationToken::new();
        token.cancel();
        let solver = ProjectedBfgs::new(problem.xlimits().clone(), 1e-8, token);
        let x0 = problem.x0().clone();
        let state = Executor::new(ScalarCost::new(problem), solver)
            .configure(|state| state.param(x0).max_iters(100))
            .ctrlc(false)
            .run()
            .unwrap()
            .state;
        assert_eq!(state.iter, 0);
        assert_eq!(state.best_param, Some(array![0., 0.]));
    }
}
