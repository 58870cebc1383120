use crate::config::ValidSolverConfig;
use crate::errors::{OptimError, Result};
use crate::problem::ScalarCost;
use crate::solver::{self, RunContext, SolveOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Optimization methods available to a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Projected quasi-Newton (BFGS) with box bounds
    GradientDescent,
    /// Differential evolution
    GeneticAlgorithm,
    /// Gaussian process assisted search with a lower confidence bound acquisition
    BayesianOptimization,
    /// Weighted sum scalarization
    WeightedSum,
    /// Primary objective under epsilon bounds on the others
    EpsilonConstraint,
    /// Non-dominated filtering of random weighted sums
    ParetoFront,
    /// Non-dominated sorting genetic algorithm
    Nsga2,
}

/// Minimization of a scalar cost from its problem initial point
pub type SingleObjectiveRun = fn(ScalarCost, &ValidSolverConfig, &RunContext) -> Result<SolveOutcome>;

/// Registration entry of a method
pub struct MethodEntry {
    pub method: Method,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub description: &'static str,
    /// Solver of a single-objective method, `None` for trade-off methods
    pub run: Option<SingleObjectiveRun>,
}

/// Registered methods
pub static METHODS: &[MethodEntry] = &[
    MethodEntry {
        method: Method::GradientDescent,
        name: "gradient_descent",
        aliases: &["quasi_newton", "bfgs", "gradient"],
        description: "Projected BFGS with box bounds, fast on smooth objectives, local",
        run: Some(solver::run_quasi_newton),
    },
    MethodEntry {
        method: Method::GeneticAlgorithm,
        name: "genetic_algorithm",
        aliases: &["differential_evolution", "evolution"],
        description: "Differential evolution, robust on multi-modal or non-smooth objectives",
        run: Some(solver::run_differential_evolution),
    },
    MethodEntry {
        method: Method::BayesianOptimization,
        name: "bayesian_optimization",
        aliases: &["bayesian", "bo"],
        description: "Gaussian process surrogate driven search for expensive objectives",
        run: Some(solver::run_bayesian),
    },
    MethodEntry {
        method: Method::WeightedSum,
        name: "weighted_sum",
        aliases: &[],
        description: "Objectives combined with equal, user, entropy or AHP weights",
        run: None,
    },
    MethodEntry {
        method: Method::EpsilonConstraint,
        name: "epsilon_constraint",
        aliases: &["epsilon"],
        description: "Primary objective with secondary objectives bounded by epsilons",
        run: None,
    },
    MethodEntry {
        method: Method::ParetoFront,
        name: "pareto_front",
        aliases: &["paretto_front", "pareto_sampling", "pareto"],
        description: "Non-dominated set of weighted sums with random weights",
        run: None,
    },
    MethodEntry {
        method: Method::Nsga2,
        name: "nsga2",
        aliases: &["nsga_ii", "nsga"],
        description: "Population based Pareto front approximation",
        run: None,
    },
];

impl Method {
    /// Registration entry of the method
    pub fn entry(&self) -> &'static MethodEntry {
        // table is ordered as the variants
        &METHODS[*self as usize]
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        self.entry().name
    }

    /// Whether the method handles several objectives as a trade-off
    pub fn is_multi_objective(&self) -> bool {
        self.entry().run.is_none()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Method {
    type Err = OptimError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        METHODS
            .iter()
            .find(|e| e.name == key || e.aliases.contains(&key.as_str()))
            .map(|e| e.method)
            .ok_or_else(|| OptimError::UnsupportedMethodError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!("quasi_newton".parse::<Method>().unwrap(), Method::GradientDescent);
        assert_eq!(
            "Differential-Evolution".parse::<Method>().unwrap(),
            Method::GeneticAlgorithm
        );
        assert_eq!("paretto_front".parse::<Method>().unwrap(), Method::ParetoFront);
        assert!(matches!(
            "simplex".parse::<Method>(),
            Err(OptimError::UnsupportedMethodError(_))
        ));
    }

    #[test]
    fn test_registry_consistency() {
        for entry in METHODS {
            assert_eq!(entry.name.parse::<Method>().unwrap(), entry.method);
            assert_eq!(entry.method.to_string(), entry.name);
        }
        assert!(Method::Nsga2.is_multi_objective());
        assert!(Method::GradientDescent.entry().run.is_some());
        assert_eq!(METHODS.iter().filter(|e| e.run.is_some()).count(), 3);
        assert!(!Method::BayesianOptimization.is_multi_objective());
    }
}
