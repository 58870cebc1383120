//! Bayesian optimization with a gaussian process surrogate and a lower confidence
//! bound acquisition.
use crate::problem::ScalarCost;
use crate::solver::{CancellationToken, OptimState, CANCELLED, STALLED};
use crate::utils::{clamp, is_near_any};

use argmin::argmin_error_closure;
use argmin::core::{Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV};
use log::{debug, info};
use ndarray::{concatenate, s, Array1, Array2, Axis};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use std::sync::Arc;
use tunebox_doe::{Lhs, LhsKind, Random, SamplingMethod};
use tunebox_surrogate::{GpParams, SurrogateConfig, SurrogateKind, SurrogateRegistry};

/// Relative distance under which a candidate duplicates an evaluated point
const DUPLICATE_TOLERANCE: f64 = 1e-6;
/// Half width of the refinement box around the best point, relative to the box widths
const REFINE_RADIUS: f64 = 0.1;

/// Sequential surrogate based search for expensive objectives.
///
/// An initial Latin hypercube sample is evaluated and a gaussian process is trained
/// on it in the shared surrogate registry under `model_id`. Each iteration scores
/// random candidates (plus a local cloud around the best point when `refine` is set)
/// with `mean - z * std`, evaluates the true objective at the minimizer and updates
/// the model. The search stops after `stall_iterations` iterations without improvement.
pub struct BayesianOptimizer {
    xlimits: Array2<f64>,
    registry: Arc<SurrogateRegistry>,
    model_id: String,
    token: CancellationToken,
    rng: Xoshiro256Plus,
    n_initial: usize,
    n_candidates: usize,
    z: f64,
    stall_iterations: u64,
    refine: bool,
    tolerance: f64,
    design: LhsKind,
    gp_config: SurrogateConfig,
    stall: u64,
}

impl BayesianOptimizer {
    pub fn new(
        xlimits: Array2<f64>,
        registry: Arc<SurrogateRegistry>,
        model_id: impl Into<String>,
        token: CancellationToken,
        rng: Xoshiro256Plus,
    ) -> Self {
        BayesianOptimizer {
            xlimits,
            registry,
            model_id: model_id.into(),
            token,
            rng,
            n_initial: 5,
            n_candidates: 500,
            z: 1.96,
            stall_iterations: 10,
            refine: true,
            tolerance: 1e-6,
            design: LhsKind::default(),
            gp_config: SurrogateConfig::default()
                .test_fraction(0.)
                .gaussian_process(GpParams::default().n_start(3)),
            stall: 0,
        }
    }

    pub fn n_initial(mut self, n_initial: usize) -> Self {
        self.n_initial = n_initial;
        self
    }

    pub fn n_candidates(mut self, n_candidates: usize) -> Self {
        self.n_candidates = n_candidates.max(1);
        self
    }

    /// Sets the exploration coefficient of the acquisition
    pub fn z(mut self, z: f64) -> Self {
        self.z = z;
        self
    }

    pub fn stall_iterations(mut self, stall_iterations: u64) -> Self {
        self.stall_iterations = stall_iterations;
        self
    }

    /// Sets the latin hypercube kind of the initial samples
    pub fn initial_design(mut self, design: LhsKind) -> Self {
        self.design = design;
        self
    }

    pub fn refine(mut self, refine: bool) -> Self {
        self.refine = refine;
        self
    }

    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the number of GP hyper-parameters optimization starts
    pub fn gp_restarts(mut self, n_start: usize) -> Self {
        self.gp_config = self
            .gp_config
            .gaussian_process(GpParams::default().n_start(n_start));
        self
    }

    fn next_rng(&mut self) -> Xoshiro256Plus {
        Xoshiro256Plus::seed_from_u64(self.rng.gen())
    }

    /// Failed evaluations are fitted as the worst finite value
    fn fit_values(y: &Array1<f64>) -> Array1<f64> {
        let worst = y
            .iter()
            .filter(|v| v.is_finite())
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        let worst = if worst.is_finite() { worst } else { 0. };
        y.mapv(|v| if v.is_finite() { v } else { worst })
    }

    fn candidates(&mut self, best: Option<&Array1<f64>>) -> Array2<f64> {
        let rng = self.next_rng();
        let global = Random::new_with_rng(&self.xlimits, rng).sample(self.n_candidates);
        match best {
            Some(best) if self.refine => {
                let mut local_limits = self.xlimits.clone();
                for (i, mut row) in local_limits.rows_mut().into_iter().enumerate() {
                    let radius = REFINE_RADIUS * (self.xlimits[[i, 1]] - self.xlimits[[i, 0]]);
                    row[0] = (best[i] - radius).max(self.xlimits[[i, 0]]);
                    row[1] = (best[i] + radius).min(self.xlimits[[i, 1]]);
                }
                let rng = self.next_rng();
                let local = Random::new_with_rng(&local_limits, rng)
                    .sample((self.n_candidates / 5).max(1));
                concatenate(Axis(0), &[global.view(), local.view()]).unwrap_or(global)
            }
            _ => global,
        }
    }
}

impl Solver<ScalarCost, OptimState> for BayesianOptimizer {
    const NAME: &'static str = "Bayesian Optimization";

    fn init(
        &mut self,
        problem: &mut Problem<ScalarCost>,
        state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let x0 = state.get_param().ok_or_else(argmin_error_closure!(
            NotInitialized,
            "BayesianOptimizer requires an initial parameter vector"
        ))?;
        let x0 = clamp(x0, &self.xlimits);
        let rng = self.next_rng();
        let mut doe = Lhs::new(&self.xlimits)
            .kind(self.design)
            .with_rng(rng)
            .sample(self.n_initial);
        doe.row_mut(0).assign(&x0);

        let points: Vec<Array1<f64>> = doe.rows().into_iter().map(|r| r.to_owned()).collect();
        let y = Array1::from(problem.bulk_cost(&points)?);
        self.registry.train(
            &self.model_id,
            SurrogateKind::GaussianProcess,
            &doe.view(),
            &Self::fit_values(&y).view(),
            &self.gp_config,
        )?;
        let best = y
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |(bi, bc), (i, &c)| if c < bc { (i, c) } else { (bi, bc) })
            .0;
        info!(
            "Bayesian optimization initial sample of {} points, best cost={:e}",
            self.n_initial, y[best]
        );
        let state = state
            .param(doe.row(best).to_owned())
            .cost(y[best])
            .data((doe, y));
        Ok((state, None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<ScalarCost>,
        mut state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let (x_data, y_data) = state
            .take_data()
            .ok_or_else(argmin_error_closure!(PotentialBug, "BayesianOptimizer: no data"))?;
        let best_cost = state.get_best_cost();

        let candidates = self.candidates(state.get_best_param());
        let (mean, std) = self
            .registry
            .predict_with_uncertainty(&self.model_id, &candidates.view())?;
        let acquisition = &mean - &(std * self.z);
        let chosen = acquisition
            .iter()
            .enumerate()
            .filter(|(i, a)| {
                a.is_finite()
                    && !is_near_any(
                        &candidates.row(*i),
                        &x_data,
                        &self.xlimits,
                        DUPLICATE_TOLERANCE,
                    )
            })
            .fold(None, |acc: Option<(usize, f64)>, (i, &a)| match acc {
                Some((_, best)) if best <= a => acc,
                _ => Some((i, a)),
            });
        let Some((index, lcb)) = chosen else {
            debug!("No new candidate away from evaluated points");
            let state = state.data((x_data, y_data));
            return Ok((
                state.terminate_with(TerminationReason::SolverExit(STALLED.to_string())),
                None,
            ));
        };

        let x_new = candidates.row(index).to_owned();
        let cost = problem.cost(&x_new)?;
        debug!("BO candidate lcb={lcb:e} cost={cost:e}");

        let mut y_all = y_data.to_vec();
        y_all.push(cost);
        let y_all = Array1::from(y_all);
        let fitted = Self::fit_values(&y_all);
        let n = fitted.len();
        self.registry.update(
            &self.model_id,
            &x_new.view().insert_axis(Axis(0)),
            &fitted.slice(s![n - 1..]),
        )?;
        let x_all = concatenate(Axis(0), &[x_data.view(), x_new.view().insert_axis(Axis(0))])?;

        let improved = cost < best_cost - self.tolerance * best_cost.abs().max(1.);
        self.stall = if improved { 0 } else { self.stall + 1 };
        let state = state.param(x_new).cost(cost).data((x_all, y_all));
        if self.stall >= self.stall_iterations {
            info!("Bayesian optimization stalled for {} iterations", self.stall);
            Ok((
                state.terminate_with(TerminationReason::SolverExit(STALLED.to_string())),
                None,
            ))
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
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_fit_values_caps_failures() {
        let y = array![1., f64::INFINITY, 3., f64::NAN];
        assert_eq!(BayesianOptimizer::fit_values(&y), array![1., 3., 3., 3.]);
        let all_failed = array![f64::INFINITY, f64::INFINITY];
        assert_eq!(BayesianOptimizer::fit_values(&all_failed), array![0., 0.]);
    }

    #[test]
    fn test_refine_candidates_stay_in_box() {
        let xlimits = array![[0., 10.], [-1., 1.]];
        let mut bo = BayesianOptimizer::new(
            xlimits.clone(),
            Arc::new(SurrogateRegistry::new()),
            "bo",
            CancellationToken::new(),
            Xoshiro256Plus::seed_from_u64(0),
        )
        .n_candidates(50);
        let candidates = bo.candidates(Some(&array![9.9, 0.]));
        assert_eq!(candidates.nrows(), 60);
        let local = candidates.slice(s![50.., ..]);
        for row in local.rows() {
            assert!(row[0] >= 8.9 && row[0] <= 10.);
            assert_abs_diff_eq!(row[1], 0., epsilon = 0.2 + 1e-12);
        }
    }
}
