//! Solver and multi-objective preferences configuration.
use crate::errors::{OptimError, Result};
use crate::method::Method;

use serde::{Deserialize, Serialize};
use tunebox_doe::LhsKind;
use tunebox_expr::DEFAULT_PENALTY_WEIGHT;
use tunebox_surrogate::MIN_TRAINING_SAMPLES;

/// Lower confidence bound coefficient used by bayesian optimization
pub const DEFAULT_ACQUISITION_Z: f64 = 1.96;
/// Number of random candidates scored by the acquisition at each bayesian iteration
pub const DEFAULT_N_CANDIDATES: usize = 500;
/// Differential evolution population size is this multiplier times the dimension
pub const DEFAULT_POPULATION_MULTIPLIER: usize = 15;

/// Solver configuration as given in a request, absent fields take method defaults
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Iteration (or generation) budget
    #[serde(alias = "maxIterations", alias = "max_generations")]
    pub max_iterations: Option<u64>,
    /// Population size of evolutionary methods
    #[serde(alias = "populationSize")]
    pub population_size: Option<usize>,
    /// Convergence tolerance
    pub tolerance: Option<f64>,
    /// Size of the initial space filling sample of bayesian optimization
    #[serde(alias = "nInitialPoints")]
    pub n_initial_points: Option<usize>,
    /// Number of random candidates scored by the acquisition rule
    #[serde(alias = "nCandidates")]
    pub n_candidates: Option<usize>,
    /// Exploration coefficient z of the `mean - z * std` acquisition
    #[serde(alias = "acquisitionZ")]
    pub acquisition_z: Option<f64>,
    /// Iterations without improvement before bayesian optimization stops
    #[serde(alias = "stallIterations")]
    pub stall_iterations: Option<u64>,
    /// Random seed
    pub seed: Option<u64>,
    /// Differential evolution dithering range of the mutation factor
    pub mutation: Option<(f64, f64)>,
    /// Differential evolution crossover probability
    pub recombination: Option<f64>,
    /// Penalty weight of constraints without an explicit one
    #[serde(alias = "penaltyWeight")]
    pub penalty_weight: Option<f64>,
    /// Whether bayesian candidates include a cloud around the current best point
    #[serde(alias = "boRefine")]
    pub bo_refine: Option<bool>,
    /// Whether differential evolution result is polished by a local gradient search
    pub polish: Option<bool>,
    /// Number of gaussian process hyper-parameters optimization starts
    #[serde(alias = "gpRestarts")]
    pub gp_restarts: Option<usize>,
    /// Latin hypercube kind of initial populations and bayesian initial samples
    #[serde(alias = "initialDesign")]
    pub initial_design: Option<LhsKind>,
}

impl SolverConfig {
    /// Sets the iteration budget
    pub fn max_iterations(mut self, max_iterations: u64) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Sets the latin hypercube kind of initial designs
    pub fn initial_design(mut self, initial_design: LhsKind) -> Self {
        self.initial_design = Some(initial_design);
        self
    }

    /// Sets the population size
    pub fn population_size(mut self, population_size: usize) -> Self {
        self.population_size = Some(population_size);
        self
    }

    /// Sets the convergence tolerance
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Sets the initial sample size of bayesian optimization
    pub fn n_initial_points(mut self, n_initial_points: usize) -> Self {
        self.n_initial_points = Some(n_initial_points);
        self
    }

    /// Sets the number of acquisition candidates
    pub fn n_candidates(mut self, n_candidates: usize) -> Self {
        self.n_candidates = Some(n_candidates);
        self
    }

    /// Sets the lower confidence bound coefficient
    pub fn acquisition_z(mut self, z: f64) -> Self {
        self.acquisition_z = Some(z);
        self
    }

    /// Sets the stall budget of bayesian optimization
    pub fn stall_iterations(mut self, stall_iterations: u64) -> Self {
        self.stall_iterations = Some(stall_iterations);
        self
    }

    /// Sets the random seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets the mutation dithering range
    pub fn mutation(mut self, lower: f64, upper: f64) -> Self {
        self.mutation = Some((lower, upper));
        self
    }

    /// Sets the crossover probability
    pub fn recombination(mut self, recombination: f64) -> Self {
        self.recombination = Some(recombination);
        self
    }

    /// Sets the default constraint penalty weight
    pub fn penalty_weight(mut self, weight: f64) -> Self {
        self.penalty_weight = Some(weight);
        self
    }

    /// Enables or disables local refinement candidates
    pub fn bo_refine(mut self, bo_refine: bool) -> Self {
        self.bo_refine = Some(bo_refine);
        self
    }

    /// Enables or disables the final local polish of differential evolution
    pub fn polish(mut self, polish: bool) -> Self {
        self.polish = Some(polish);
        self
    }

    /// Sets the number of GP hyper-parameters optimization starts
    pub fn gp_restarts(mut self, gp_restarts: usize) -> Self {
        self.gp_restarts = Some(gp_restarts);
        self
    }

    /// Checks the configuration and resolves the defaults of `method` for a problem
    /// of dimension `dim`.
    pub fn check(&self, method: Method, dim: usize) -> Result<ValidSolverConfig> {
        let (iterations, tolerance) = match method {
            Method::GeneticAlgorithm | Method::Nsga2 => (50, 0.01),
            Method::BayesianOptimization => (20, 1e-6),
            _ => (100, 1e-6),
        };
        let valid = ValidSolverConfig {
            max_iterations: self.max_iterations.unwrap_or(iterations),
            population_size: self
                .population_size
                .unwrap_or(DEFAULT_POPULATION_MULTIPLIER * dim.max(1))
                .max(5),
            tolerance: self.tolerance.unwrap_or(tolerance),
            n_initial_points: self.n_initial_points.unwrap_or(MIN_TRAINING_SAMPLES),
            n_candidates: self.n_candidates.unwrap_or(DEFAULT_N_CANDIDATES),
            acquisition_z: self.acquisition_z.unwrap_or(DEFAULT_ACQUISITION_Z),
            stall_iterations: self.stall_iterations.unwrap_or(10),
            seed: self.seed,
            mutation: self.mutation.unwrap_or((0.5, 1.0)),
            recombination: self.recombination.unwrap_or(0.7),
            penalty_weight: self.penalty_weight.unwrap_or(DEFAULT_PENALTY_WEIGHT),
            bo_refine: self.bo_refine.unwrap_or(true),
            polish: self.polish.unwrap_or(true),
            gp_restarts: self.gp_restarts.unwrap_or(3),
            initial_design: self.initial_design.unwrap_or_default(),
        };
        valid.validate()?;
        Ok(valid)
    }
}

/// Solver configuration with every default resolved
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidSolverConfig {
    pub max_iterations: u64,
    pub population_size: usize,
    pub tolerance: f64,
    pub n_initial_points: usize,
    pub n_candidates: usize,
    pub acquisition_z: f64,
    pub stall_iterations: u64,
    pub seed: Option<u64>,
    pub mutation: (f64, f64),
    pub recombination: f64,
    pub penalty_weight: f64,
    pub bo_refine: bool,
    pub polish: bool,
    pub gp_restarts: usize,
    pub initial_design: LhsKind,
}

impl ValidSolverConfig {
    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(OptimError::InvalidConfigError(msg));
        if !(self.tolerance.is_finite() && self.tolerance >= 0.) {
            return invalid(format!("tolerance should be >= 0, got {}", self.tolerance));
        }
        if self.n_initial_points < MIN_TRAINING_SAMPLES {
            return invalid(format!(
                "n_initial_points should be at least {MIN_TRAINING_SAMPLES}, got {}",
                self.n_initial_points
            ));
        }
        if self.n_candidates == 0 {
            return invalid("n_candidates should be > 0".to_string());
        }
        if !(self.acquisition_z.is_finite() && self.acquisition_z >= 0.) {
            return invalid(format!(
                "acquisition_z should be >= 0, got {}",
                self.acquisition_z
            ));
        }
        let (lo, hi) = self.mutation;
        if !(0. ..=2.).contains(&lo) || !(0. ..=2.).contains(&hi) || lo > hi {
            return invalid(format!("mutation range should be within [0, 2], got ({lo}, {hi})"));
        }
        if !(0. ..=1.).contains(&self.recombination) {
            return invalid(format!(
                "recombination should be in [0, 1], got {}",
                self.recombination
            ));
        }
        if !(self.penalty_weight.is_finite() && self.penalty_weight > 0.) {
            return invalid(format!(
                "penalty_weight should be > 0, got {}",
                self.penalty_weight
            ));
        }
        Ok(())
    }

    /// Same configuration with another seed, used to derive independent sub-runs
    pub(crate) fn with_seed(&self, seed: Option<u64>) -> Self {
        ValidSolverConfig {
            seed,
            ..self.clone()
        }
    }
}

/// How objective weights are derived in multi-objective runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightModel {
    /// Same weight for every objective
    #[default]
    #[serde(alias = "equal_weights")]
    Equal,
    /// Normalized user weights (objective weights or `preferences.weights`)
    #[serde(alias = "user")]
    UserDefined,
    /// Entropy weight method over a sampled objective matrix
    #[serde(alias = "entropy_weights")]
    Entropy,
    /// Analytic hierarchy process over pairwise comparisons
    #[serde(alias = "analytic_hierarchy")]
    Ahp,
}

/// Preferences of a multi-objective run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    #[serde(alias = "weight_method", alias = "weightMethod")]
    pub weight_model: WeightModel,
    /// Explicit weights, one per objective, overriding the objective weights
    pub weights: Option<Vec<f64>>,
    /// Priorities used to build the AHP pairwise comparison matrix
    pub priorities: Option<Vec<f64>>,
    /// Explicit AHP pairwise comparison matrix
    #[serde(alias = "pairwiseComparisons")]
    pub pairwise_comparisons: Option<Vec<Vec<f64>>>,
    /// Upper bounds on secondary objectives (epsilon-constraint)
    #[serde(alias = "epsilonValues")]
    pub epsilon_values: Option<Vec<f64>>,
    /// Number of weight or epsilon vectors of Pareto sweeps
    #[serde(alias = "paretto_points", alias = "paretoPoints")]
    pub pareto_points: usize,
    /// NSGA-II population size
    #[serde(alias = "populationSize")]
    pub population_size: usize,
    /// NSGA-II number of generations
    #[serde(alias = "maxGenerations")]
    pub max_generations: u64,
    /// Single-objective method used by scalarizing methods
    #[serde(alias = "innerMethod")]
    pub inner_method: String,
    /// Sample size used by the entropy weight method
    #[serde(alias = "entropySamples")]
    pub entropy_samples: usize,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            weight_model: WeightModel::Equal,
            weights: None,
            priorities: None,
            pairwise_comparisons: None,
            epsilon_values: None,
            pareto_points: 20,
            population_size: 100,
            max_generations: 200,
            inner_method: "gradient_descent".to_string(),
            entropy_samples: 50,
        }
    }
}

impl Preferences {
    /// Sets the weight model
    pub fn weight_model(mut self, weight_model: WeightModel) -> Self {
        self.weight_model = weight_model;
        self
    }

    /// Sets explicit weights
    pub fn weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Sets AHP priorities
    pub fn priorities(mut self, priorities: Vec<f64>) -> Self {
        self.priorities = Some(priorities);
        self
    }

    /// Sets epsilon bounds of secondary objectives
    pub fn epsilon_values(mut self, epsilon_values: Vec<f64>) -> Self {
        self.epsilon_values = Some(epsilon_values);
        self
    }

    /// Sets the number of Pareto points
    pub fn pareto_points(mut self, pareto_points: usize) -> Self {
        self.pareto_points = pareto_points;
        self
    }

    /// Sets NSGA-II population size
    pub fn population_size(mut self, population_size: usize) -> Self {
        self.population_size = population_size;
        self
    }

    /// Sets NSGA-II generations
    pub fn max_generations(mut self, max_generations: u64) -> Self {
        self.max_generations = max_generations;
        self
    }

    /// Sets the inner single-objective method
    pub fn inner_method(mut self, method: impl Into<String>) -> Self {
        self.inner_method = method.into();
        self
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.pareto_points == 0 {
            return Err(OptimError::InvalidConfigError(
                "pareto_points should be > 0".to_string(),
            ));
        }
        if self.population_size < 4 {
            return Err(OptimError::InvalidConfigError(format!(
                "population_size should be at least 4, got {}",
                self.population_size
            )));
        }
        let inner: Method = self.inner_method.parse()?;
        if inner.is_multi_objective() {
            return Err(OptimError::InvalidConfigError(format!(
                "inner method should be single-objective, got {}",
                self.inner_method
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_defaults() {
        let config = SolverConfig::default();
        let gd = config.check(Method::GradientDescent, 2).unwrap();
        assert_eq!(gd.max_iterations, 100);
        assert_eq!(gd.tolerance, 1e-6);
        let ga = config.check(Method::GeneticAlgorithm, 2).unwrap();
        assert_eq!(ga.max_iterations, 50);
        assert_eq!(ga.tolerance, 0.01);
        assert_eq!(ga.population_size, 30);
        let bo = config.check(Method::BayesianOptimization, 1).unwrap();
        assert_eq!(bo.max_iterations, 20);
        assert_eq!(bo.n_initial_points, 5);
        assert_eq!(bo.acquisition_z, DEFAULT_ACQUISITION_Z);
        assert_eq!(bo.penalty_weight, DEFAULT_PENALTY_WEIGHT);
    }

    #[test]
    fn test_invalid_config() {
        let check = |c: SolverConfig| c.check(Method::BayesianOptimization, 1);
        assert!(check(SolverConfig::default().n_initial_points(3)).is_err());
        assert!(check(SolverConfig::default().tolerance(-1.)).is_err());
        assert!(check(SolverConfig::default().recombination(1.5)).is_err());
        assert!(check(SolverConfig::default().mutation(1., 0.5)).is_err());
        assert!(check(SolverConfig::default().penalty_weight(0.)).is_err());
        assert!(check(SolverConfig::default().max_iterations(3).seed(1)).is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: SolverConfig =
            serde_json::from_str(r#"{"maxIterations": 10, "nInitialPoints": 6}"#).unwrap();
        assert_eq!(config.max_iterations, Some(10));
        assert_eq!(config.n_initial_points, Some(6));
        assert_eq!(config.tolerance, None);
        let centered: SolverConfig =
            serde_json::from_str(r#"{"initialDesign": "centered"}"#).unwrap();
        let valid = centered.check(Method::GeneticAlgorithm, 1).unwrap();
        assert_eq!(valid.initial_design, LhsKind::Centered);
        let valid = SolverConfig::default().check(Method::Nsga2, 1).unwrap();
        assert_eq!(valid.initial_design, LhsKind::Maximin);

        let prefs: Preferences =
            serde_json::from_str(r#"{"weight_method": "entropy_weights", "paretto_points": 5}"#)
                .unwrap();
        assert_eq!(prefs.weight_model, WeightModel::Entropy);
        assert_eq!(prefs.pareto_points, 5);
        assert_eq!(prefs.population_size, 100);
        assert!(prefs.check().is_ok());
        assert!(prefs.inner_method("nsga2").check().is_err());
    }
}
