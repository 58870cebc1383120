//! NSGA-II elitist genetic algorithm with constrained domination.
use crate::multiobjective::pareto::{crowding_distance, fast_non_dominated_sort, VIOLATION_TOLERANCE};
use crate::problem::VectorCost;
use crate::solver::{CancellationToken, OptimState, CANCELLED};
use crate::utils::clamp;

use argmin::argmin_error_closure;
use argmin::core::{Error, Problem, Solver, State, TerminationReason, TerminationStatus, KV};
use log::debug;
use ndarray::{concatenate, s, Array1, Array2, Axis};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use tunebox_doe::{Lhs, LhsKind, SamplingMethod};

/// Distribution index of the simulated binary crossover
const SBX_ETA: f64 = 20.;
const SBX_PROBABILITY: f64 = 0.9;
/// Distribution index of the polynomial mutation
const MUTATION_ETA: f64 = 20.;

/// NSGA-II over a box.
///
/// Costs are `[objectives.., violation]` rows as computed by [VectorCost]. The
/// population and its costs live in [OptimState]; the state parameter is the
/// feasible first-front member with the smallest sum of objectives.
pub struct Nsga2 {
    xlimits: Array2<f64>,
    population_size: usize,
    design: LhsKind,
    token: CancellationToken,
    rng: Xoshiro256Plus,
}

impl Nsga2 {
    pub fn new(xlimits: Array2<f64>, token: CancellationToken, rng: Xoshiro256Plus) -> Self {
        Nsga2 {
            xlimits,
            population_size: 100,
            design: LhsKind::default(),
            token,
            rng,
        }
    }

    /// Sets the population size, rounded up to an even number of at least 4
    pub fn population_size(mut self, population_size: usize) -> Self {
        let n = population_size.max(4);
        self.population_size = n + n % 2;
        self
    }

    /// Sets the latin hypercube kind of the initial population
    pub fn initial_design(mut self, design: LhsKind) -> Self {
        self.design = design;
        self
    }

    /// Rank and crowding distance of each member
    fn rank_and_crowding(costs: &Array2<f64>) -> (Vec<usize>, Array1<f64>) {
        let (objectives, violations) = split(costs);
        let n = costs.nrows();
        let mut rank = vec![usize::MAX; n];
        let mut crowding = Array1::zeros(n);
        for (r, front) in fast_non_dominated_sort(&objectives, &violations).iter().enumerate() {
            let distance = crowding_distance(&objectives, front);
            for (k, &i) in front.iter().enumerate() {
                rank[i] = r;
                crowding[i] = distance[k];
            }
        }
        (rank, crowding)
    }

    fn tournament(&mut self, rank: &[usize], crowding: &Array1<f64>) -> usize {
        let a = self.rng.gen_range(0..rank.len());
        let b = self.rng.gen_range(0..rank.len());
        if rank[a] < rank[b] || (rank[a] == rank[b] && crowding[a] > crowding[b]) {
            a
        } else {
            b
        }
    }

    /// Simulated binary crossover of two parents
    fn crossover(&mut self, p1: &Array1<f64>, p2: &Array1<f64>) -> (Array1<f64>, Array1<f64>) {
        let (mut c1, mut c2) = (p1.clone(), p2.clone());
        if self.rng.gen::<f64>() > SBX_PROBABILITY {
            return (c1, c2);
        }
        for j in 0..p1.len() {
            if self.rng.gen::<f64>() > 0.5 || (p1[j] - p2[j]).abs() < 1e-14 {
                continue;
            }
            let u: f64 = self.rng.gen();
            let beta = if u <= 0.5 {
                (2. * u).powf(1. / (SBX_ETA + 1.))
            } else {
                (1. / (2. * (1. - u))).powf(1. / (SBX_ETA + 1.))
            };
            c1[j] = 0.5 * ((1. + beta) * p1[j] + (1. - beta) * p2[j]);
            c2[j] = 0.5 * ((1. - beta) * p1[j] + (1. + beta) * p2[j]);
        }
        (clamp(&c1, &self.xlimits), clamp(&c2, &self.xlimits))
    }

    /// Polynomial mutation with probability 1/dim per variable
    fn mutate(&mut self, x: &mut Array1<f64>) {
        let dim = x.len();
        for j in 0..dim {
            if self.rng.gen::<f64>() >= 1. / dim as f64 {
                continue;
            }
            let u: f64 = self.rng.gen();
            let delta = if u < 0.5 {
                (2. * u).powf(1. / (MUTATION_ETA + 1.)) - 1.
            } else {
                1. - (2. * (1. - u)).powf(1. / (MUTATION_ETA + 1.))
            };
            let (lo, hi) = (self.xlimits[[j, 0]], self.xlimits[[j, 1]]);
            x[j] = (x[j] + delta * (hi - lo)).clamp(lo, hi);
        }
    }

    fn offspring(&mut self, population: &Array2<f64>, costs: &Array2<f64>) -> Vec<Array1<f64>> {
        let (rank, crowding) = Self::rank_and_crowding(costs);
        let mut children = Vec::with_capacity(self.population_size);
        while children.len() < self.population_size {
            let a = self.tournament(&rank, &crowding);
            let b = self.tournament(&rank, &crowding);
            let (mut c1, mut c2) =
                self.crossover(&population.row(a).to_owned(), &population.row(b).to_owned());
            self.mutate(&mut c1);
            self.mutate(&mut c2);
            children.push(c1);
            children.push(c2);
        }
        children.truncate(self.population_size);
        children
    }

    /// Elitist truncation of a merged population to the population size
    fn select(&self, costs: &Array2<f64>) -> Vec<usize> {
        let (objectives, violations) = split(costs);
        let mut selected = Vec::with_capacity(self.population_size);
        for front in fast_non_dominated_sort(&objectives, &violations) {
            if selected.len() + front.len() <= self.population_size {
                selected.extend(front);
            } else {
                let distance = crowding_distance(&objectives, &front);
                let mut order: Vec<usize> = (0..front.len()).collect();
                order.sort_by(|&a, &b| distance[b].total_cmp(&distance[a]));
                let missing = self.population_size - selected.len();
                selected.extend(order.into_iter().take(missing).map(|k| front[k]));
            }
            if selected.len() == self.population_size {
                break;
            }
        }
        selected
    }
}

/// Splits `[objectives.., violation]` rows
fn split(costs: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let m = costs.ncols() - 1;
    (
        costs.slice(s![.., ..m]).to_owned(),
        costs.column(m).to_owned(),
    )
}

/// Member with the smallest objective sum among feasible ones, or the least violating
/// one, with its scalar cost (infinite when infeasible)
fn representative(costs: &Array2<f64>) -> (usize, f64) {
    let (objectives, violations) = split(costs);
    let feasible = (0..costs.nrows())
        .filter(|&i| violations[i] <= VIOLATION_TOLERANCE)
        .map(|i| (i, objectives.row(i).sum()))
        .filter(|(_, s)| !s.is_nan())
        .min_by(|a, b| a.1.total_cmp(&b.1));
    match feasible {
        Some(best) => best,
        None => {
            let least = (0..costs.nrows())
                .min_by(|&a, &b| violations[a].total_cmp(&violations[b]))
                .unwrap_or(0);
            (least, f64::INFINITY)
        }
    }
}

fn to_matrix(rows: &[Array1<f64>]) -> Result<Array2<f64>, Error> {
    let views: Vec<_> = rows.iter().map(|r| r.view().insert_axis(Axis(0))).collect();
    Ok(concatenate(Axis(0), &views)?)
}

impl Solver<VectorCost, OptimState> for Nsga2 {
    const NAME: &'static str = "NSGA-II";

    fn init(
        &mut self,
        problem: &mut Problem<VectorCost>,
        state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let x0 = state.get_param().ok_or_else(argmin_error_closure!(
            NotInitialized,
            "Nsga2 requires an initial parameter vector"
        ))?;
        let x0 = clamp(x0, &self.xlimits);
        let lhs_rng = Xoshiro256Plus::seed_from_u64(self.rng.gen());
        let mut population = Lhs::new(&self.xlimits)
            .kind(self.design)
            .with_rng(lhs_rng)
            .sample(self.population_size);
        population.row_mut(0).assign(&x0);

        let members: Vec<Array1<f64>> = population.rows().into_iter().map(|r| r.to_owned()).collect();
        let costs = to_matrix(&problem.bulk_cost(&members)?)?;
        let (best, cost) = representative(&costs);
        debug!("NSGA-II initial population of {} members", self.population_size);
        let state = state
            .param(population.row(best).to_owned())
            .cost(cost)
            .population(population, costs);
        Ok((state, None))
    }

    fn next_iter(
        &mut self,
        problem: &mut Problem<VectorCost>,
        mut state: OptimState,
    ) -> Result<(OptimState, Option<KV>), Error> {
        let (population, costs) = state
            .take_population()
            .ok_or_else(argmin_error_closure!(PotentialBug, "NSGA-II: no population"))?;
        let children = self.offspring(&population, &costs);
        let children_costs = to_matrix(&problem.bulk_cost(&children)?)?;

        let merged = concatenate(Axis(0), &[population.view(), to_matrix(&children)?.view()])?;
        let merged_costs = concatenate(Axis(0), &[costs.view(), children_costs.view()])?;
        let selected = self.select(&merged_costs);
        let population = merged.select(Axis(0), &selected);
        let costs = merged_costs.select(Axis(0), &selected);

        let (best, cost) = representative(&costs);
        let state = state
            .param(population.row(best).to_owned())
            .cost(cost)
            .population(population, costs);
        Ok((state, None))
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
    use crate::multiobjective::pareto::non_dominated_indices;
    use crate::problem::tests::build;
    use crate::types::{ConstraintSpec, ObjectiveSpec, OptimizationRequest, ParameterSpec};
    use argmin::core::Executor;
    use ndarray::array;
    use std::sync::Arc;

    #[test]
    fn test_select_prefers_first_front_then_spread() {
        let nsga = Nsga2::new(array![[0., 1.]], CancellationToken::new(), Xoshiro256Plus::seed_from_u64(0))
            .population_size(4);
        let costs = array![
            [0., 4., 0.],
            [1., 3., 0.],
            [2., 2., 0.],
            [4., 0., 0.],
            [3., 3., 0.],
            [0., 0., 1.]
        ];
        let mut selected = nsga.select(&costs);
        selected.sort();
        assert_eq!(selected, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_representative() {
        let costs = array![[1., 1., 0.], [0., 0., 2.], [0., 1., 0.]];
        assert_eq!(representative(&costs), (2, 1.));
        let infeasible = array![[1., 1., 3.], [0., 0., 2.]];
        assert_eq!(representative(&infeasible), (1, f64::INFINITY));
    }

    #[test]
    fn test_schaffer_front() {
        // min x^2 and (x-2)^2: Pareto set is [0, 2]
        let request = OptimizationRequest::new("nsga2")
            .parameter(ParameterSpec::new("x", 5., [-5., 5.]))
            .objective(ObjectiveSpec::expression("f1", "x^2"))
            .objective(ObjectiveSpec::expression("f2", "(x-2)^2"))
            .constraint(ConstraintSpec::inequality("cap", "x", 1.5));
        let problem = Arc::new(build(&request).unwrap());
        let solver = Nsga2::new(
            problem.xlimits().clone(),
            CancellationToken::new(),
            Xoshiro256Plus::seed_from_u64(3),
        )
        .population_size(20);
        let x0 = problem.x0().clone();
        let state = Executor::new(VectorCost::new(problem), solver)
            .configure(|state| state.param(x0).max_iters(40))
            .ctrlc(false)
            .run()
            .unwrap()
            .state;
        assert_eq!(state.counts["cost_count"], 20 * 41);
        let population = state.population.unwrap();
        let costs = state.population_costs.unwrap();
        assert_eq!(population.nrows(), 20);
        let front = non_dominated_indices(&costs.slice(s![.., ..2]).to_owned());
        for i in front {
            assert!(costs[[i, 2]] <= VIOLATION_TOLERANCE);
            let x = population[[i, 0]];
            assert!((-0.5..=1.5 + 1e-9).contains(&x), "x = {x}");
        }
    }
}
