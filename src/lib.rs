//! `tunebox` is a toolbox for constrained multi-objective parameter tuning.
//!
//! It gathers the crates of the workspace:
//!
//! * [doe]: space-filling designs of experiments (Latin hypercube, random),
//! * [expr]: safe symbolic expressions and constraint sets,
//! * [surrogate]: Gaussian process, random forest and neural network surrogates
//!   with their registry,
//! * [optim]: single and multi-objective solvers, run tracking and performance
//!   monitoring.
//!
//! The most used items of [optim] are re-exported at the crate root.
//!
//! ```
//! use tunebox::{ObjectiveSpec, OptimizationRequest, OptimizationSolver, ParameterSpec, Target};
//!
//! let request = OptimizationRequest::new("pareto_front")
//!     .parameter(ParameterSpec::new("x", 1., [0., 4.]))
//!     .objective(ObjectiveSpec::expression("cost", "x^2"))
//!     .objective(ObjectiveSpec::expression("quality", "4 - (x-3)^2").target(Target::Maximize))
//!     .configure(|c| c.seed(42))
//!     .prefer(|p| p.pareto_points(8));
//! let response = OptimizationSolver::new().optimize_system(&request).expect("solved");
//! let front = response.optimization_report.multi_objective.expect("pareto front").pareto_front;
//! assert!(!front.is_empty());
//! ```
pub use tunebox_doe as doe;
pub use tunebox_expr as expr;
pub use tunebox_optim as optim;
pub use tunebox_surrogate as surrogate;

pub use tunebox_optim::{
    CancellationToken, ConstraintSpec, Method, ObjectiveSpec, OptimError, OptimizationRequest,
    OptimizationResponse, OptimizationService, OptimizationSolver, ParameterSpec, Preferences,
    RunStatus, SolverConfig, Target, WeightModel, METHODS, TUNEBOX_LOG,
};
