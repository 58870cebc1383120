//! This library implements the constrained optimization engine of tunebox.
//!
//! An [OptimizationRequest] describes bounded parameters, one or more objectives
//! and constraints. Objectives are analytic expressions, trained surrogate models
//! or evaluators registered by the host; constraints are expressions enforced
//! through a quadratic penalty and checked again on the returned point.
//!
//! Single-objective methods, driven by [argmin](https://argmin-rs.org) executors:
//! * `gradient_descent`: projected BFGS with box bounds and finite difference gradients,
//! * `genetic_algorithm`: differential evolution (`best/1/bin`) with optional polishing,
//! * `bayesian_optimization`: Gaussian process surrogate with a lower confidence bound.
//!
//! Multi-objective methods:
//! * `weighted_sum` with equal, user defined, entropy or AHP weights,
//! * `epsilon_constraint` bounding secondary objectives,
//! * `pareto_front` sampling random weight vectors,
//! * `nsga2`, the non-dominated sorting genetic algorithm.
//!
//! Every run is registered with its lifecycle status (see [RunRegistry]) and
//! tracked by the [PerformanceMonitor]. An [OptimizationService] runs requests in
//! background threads and lets callers cancel them.
//!
//! # Example
//!
//! ```
//! use tunebox_optim::{ConstraintSpec, ObjectiveSpec, OptimizationRequest, OptimizationSolver, ParameterSpec};
//!
//! let request = OptimizationRequest::new("gradient_descent")
//!     .parameter(ParameterSpec::new("x", 0., [0., 2.]))
//!     .parameter(ParameterSpec::new("y", 0., [0., 3.]))
//!     .objective(ObjectiveSpec::expression("distance", "(x-1)^2 + (y-2)^2"))
//!     .constraint(ConstraintSpec::inequality("capacity", "x + y", 3.));
//!
//! let response = OptimizationSolver::new().optimize_system(&request).expect("solved");
//! assert!((response.optimal_parameters["x"] - 1.).abs() < 1e-2);
//! assert!((response.optimal_parameters["y"] - 2.).abs() < 1e-2);
//! assert!(response.final_feasibility_check.is_feasible);
//! ```
//!
//! Logs are emitted through the [log](https://docs.rs/log) facade, the solver
//! installs an `env_logger` reading its filter from the `TUNEBOX_LOG` variable
//! (ex: `TUNEBOX_LOG=info`).
#![warn(rustdoc::broken_intra_doc_links)]
pub mod multiobjective;
pub mod solver;

mod config;
mod errors;
mod evaluator;
mod method;
mod optimizer;
mod performance;
mod problem;
mod runs;
mod service;
mod types;
mod utils;

pub use crate::config::*;
pub use crate::errors::*;
pub use crate::evaluator::*;
pub use crate::method::*;
pub use crate::multiobjective::{MultiObjectiveResult, ParetoSolution};
pub use crate::optimizer::*;
pub use crate::performance::*;
pub use crate::problem::*;
pub use crate::runs::*;
pub use crate::service::*;
pub use crate::solver::{minimize, CancellationToken, RunContext, SolveOutcome};
pub use crate::types::*;
pub use crate::utils::TUNEBOX_LOG;
