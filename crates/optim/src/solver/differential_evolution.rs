//! Differential evolution global search (best/1/bin with dithering).
use crate::problem::ScalarCost;
use crate::solver::{CancellationToken, OptimState, CANCELLED};
use crate::utils::clamp;

use argmin::argmin_error_closure;
use argmin::core::{Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV};
use log::debug;
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::seq::index::sample;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use tunebox_doe::{Lhs, LhsKind, SamplingMethod};

/// Differential evolution solver over a box.
///
/// The initial population is a Latin hypercube sample whose first member is the
/// starting point. At each generation every member `i` competes with a trial vector
/// made of `best + F (x_r1 - x_r2)` crossed over with `x_i`, F being drawn in the
/// mutation range. The run converges when `std(costs) <= tol * |mean(costs)|`.
pub struct DifferentialEvolution {
    xlimits: Array2<f64>,
    population_size: usize,
    mutation: (f64, f64),
    recombination: f64,
    tolerance: f64,
    design: LhsKind,
    token: CancellationToken,
    rng: Xoshiro256Plus,
}

impl DifferentialEvolution {
    pub fn new(xlimits: Array2<f64>, token: CancellationToken, rng: Xoshiro256Plus) -> Self {
        let dim = xlimits.nrows();
        DifferentialEvolution {
            xlimits,
            population_size: (15 * dim).max(5),
            mutation: (0.5, 1.0),
            recombination: 0.7,
            tolerance: 0.01,
            design: LhsKind::default(),
            token,
            rng,
        }
    }

    /// Sets the population size (at least 5)
    pub fn population_size(mut self, population_size: usize) -> Self {
        self.population_size = population_size.max(5);
        self
    }

    /// Sets the dithering range of the mutation factor
    pub fn mutation(mut self, mutation: (f64, f64)) -> Self {
        self.mutation = mutation;
        self
    }

    /// Sets the latin hypercube kind of the initial population
    pub fn initial_design(mut self, design: LhsKind) -> Self {
        self.design = design;
        self
    }

    /// Sets the crossover probability
    pub fn recombination(mut self, recombination: f64) -> Self {
        self.recombination = recombination;
        self
    }

    /// Sets the relative convergence tolerance on the population costs
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Two distinct member indices different from `exclude`
    fn pick_pair(&mut self, exclude: usize) -> (usize, usize) {
        let picked = sample(&mut self.rng, self.population_size - 1, 2);
        let shift = |k: usize| if k >= exclude { k + 1 } else { k };
        (shift(picked.index(0)), shift(picked.index(1)))
    }

    fn has_converged(&self, costs: &Array1<f64>) -> bool {
        if costs.iter().any(|c| !c.is_finite()) {
            return false;
        }
        let mean = costs.mean().unwrap_or(f64::INFINITY);
        let std = costs.std(0.);
        std <= self.tolerance * mean.abs()
    }
}

fn best_index(costs: &Array1<f64>) -> usize {
    costs
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |(bi, bc), (i, &c)| {
            if c < bc {
                (i, c)
            } else {
                (bi, bc)
            }
        })
        .0
}

impl Solver<ScalarCost, OptimState> for DifferentialEvolution {
    const NAME: &'static str = "Differential Evolution";

    fn init(
        &mut self,
        problem: &mut Problem<ScalarCost>,
        state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let x0 = state.get_param().ok_or_else(argmin_error_closure!(
            NotInitialized,
            "DifferentialEvolution requires an initial parameter vector"
        ))?;
        let x0 = clamp(x0, &self.xlimits);
        let lhs_rng = Xoshiro256Plus::seed_from_u64(self.rng.gen());
        let mut population = Lhs::new(&self.xlimits)
            .kind(self.design)
            .with_rng(lhs_rng)
            .sample(self.population_size);
        population.row_mut(0).assign(&x0);

        let members: Vec<Array1<f64>> = population.rows().into_iter().map(|r| r.to_owned()).collect();
        let costs = Array1::from(problem.bulk_cost(&members)?);
        let best = best_index(&costs);
        debug!(
            "DE initial population of {} members, best cost={:e}",
            self.population_size, costs[best]
        );
        let state = state
            .param(population.row(best).to_owned())
            .cost(costs[best])
            .population(population, costs.insert_axis(Axis(1)));
        Ok((state, None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<ScalarCost>,
        mut state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let (mut population, costs) = state
            .take_population()
            .ok_or_else(argmin_error_closure!(PotentialBug, "DE: no population"))?;
        let mut costs = costs.column(0).to_owned();
        let best = best_index(&costs);
        let (lo, hi) = self.mutation;
        let factor = if hi > lo {
            self.rng.gen_range(lo..hi)
        } else {
            lo
        };
        let dim = population.ncols();

        let mut trials = Vec::with_capacity(self.population_size);
        for i in 0..self.population_size {
            let (r1, r2) = self.pick_pair(i);
            let mutant = &population.row(best) + &((&population.row(r1) - &population.row(r2)) * factor);
            let forced = self.rng.gen_range(0..dim);
            let mut trial = population.row(i).to_owned();
            for j in 0..dim {
                if j == forced || self.rng.gen::<f64>() < self.recombination {
                    trial[j] = mutant[j];
                }
            }
            trials.push(clamp(&trial, &self.xlimits));
        }
        let trial_costs = problem.bulk_cost(&trials)?;

        for (i, (trial, cost)) in trials.into_iter().zip(trial_costs).enumerate() {
            if cost <= costs[i] {
                population.row_mut(i).assign(&trial);
                costs[i] = cost;
            }
        }
        let best = best_index(&costs);
        let converged = self.has_converged(&costs);
        let state = state
            .param(population.row(best).to_owned())
            .cost(costs[best])
            .population(population, costs.insert_axis(Axis(1)));
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
    use crate::problem::tests::build;
    use crate::types::{ObjectiveSpec, OptimizationRequest, ParameterSpec};
    use approx::assert_abs_diff_eq;
    use argmin::core::Executor;
    use std::sync::Arc;

    #[test]
    fn test_multimodal_rastrigin() {
        let request = OptimizationRequest::new("genetic_algorithm")
            .parameter(ParameterSpec::new("x", 4., [-5.12, 5.12]))
            .parameter(ParameterSpec::new("y", -4., [-5.12, 5.12]))
            .objective(ObjectiveSpec::expression(
                "rastrigin",
                "20 + x^2 - 10*cos(2*pi*x) + y^2 - 10*cos(2*pi*y)",
            ));
        let problem = Arc::new(build(&request).unwrap());
        let solver = DifferentialEvolution::new(
            problem.xlimits().clone(),
            CancellationToken::new(),
            Xoshiro256Plus::seed_from_u64(42),
        )
        .population_size(40)
        .tolerance(1e-8);
        let x0 = problem.x0().clone();
        let state = Executor::new(ScalarCost::new(problem), solver)
            .configure(|state| state.param(x0).max_iters(300))
            .ctrlc(false)
            .run()
            .unwrap()
            .state;
        assert_abs_diff_eq!(state.best_cost, 0., epsilon = 1e-2);
        assert_eq!(state.counts["cost_count"], 40 * (state.iter + 1));
    }

    #[test]
    fn test_population_stays_in_box() {
        let request = OptimizationRequest::new("genetic_algorithm")
            .parameter(ParameterSpec::new("x", 0., [0., 1.]))
            .objective(ObjectiveSpec::expression("f", "-x"));
        let problem = Arc::new(build(&request).unwrap());
        let solver = DifferentialEvolution::new(
            problem.xlimits().clone(),
            CancellationToken::new(),
            Xoshiro256Plus::seed_from_u64(0),
        );
        let state = Executor::new(ScalarCost::new(problem), solver)
            .configure(|state| state.param(ndarray::array![0.]).max_iters(20))
            .ctrlc(false)
            .run()
            .unwrap()
            .state;
        let population = state.population.unwrap();
        assert!(population.iter().all(|v| (0. ..=1.).contains(v)));
        assert_abs_diff_eq!(state.best_param.unwrap()[0], 1., epsilon = 1e-6);
    }
}
