use approx::assert_abs_diff_eq;
use ndarray::{Array, Axis};
use tunebox_optim::{
    ConstraintSpec, Method, ObjectiveSpec, OptimError, OptimizationRequest, OptimizationSolver,
    ParameterSpec, RunStatus,
};
use tunebox_doe::LhsKind;
use tunebox_surrogate::{SurrogateConfig, SurrogateKind};

fn constrained_quadratic(method: &str) -> OptimizationRequest {
    OptimizationRequest::new(method)
        .parameter(ParameterSpec::new("x", 0., [0., 2.]))
        .parameter(ParameterSpec::new("y", 0., [0., 3.]))
        .objective(ObjectiveSpec::expression("f", "(x-1)^2 + (y-2)^2"))
        .constraint(ConstraintSpec::inequality("capacity", "x + y", 3.))
}

#[test]
fn test_constrained_quadratic_gradient() {
    let response = OptimizationSolver::new()
        .optimize_system(&constrained_quadratic("gradient_descent"))
        .expect("solved");

    // the unconstrained minimizer (1, 2) lies on x + y = 3
    assert_abs_diff_eq!(response.optimal_parameters["x"], 1., epsilon = 1e-2);
    assert_abs_diff_eq!(response.optimal_parameters["y"], 2., epsilon = 1e-2);
    assert_abs_diff_eq!(response.optimal_objective_value, 0., epsilon = 1e-4);
    assert!(response.final_feasibility_check.is_feasible);
    let capacity = &response.optimization_report.constraint_evaluations[0];
    assert_eq!(capacity.name, "capacity");
    assert_abs_diff_eq!(capacity.value, 3., epsilon = 2e-2);
    assert!(capacity.feasible);
    assert!(response.convergence_metrics.success);
    assert!(response.convergence_metrics.evaluations > 0);
}

#[test]
fn test_constrained_quadratic_evolution() {
    let request = constrained_quadratic("differential_evolution").configure(|c| c.seed(42));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    assert_eq!(response.method_used, "genetic_algorithm");
    assert_abs_diff_eq!(response.optimal_parameters["x"], 1., epsilon = 5e-2);
    assert_abs_diff_eq!(response.optimal_parameters["y"], 2., epsilon = 5e-2);
    assert!(response.final_feasibility_check.final_penalty < 1e-2);
}

#[test]
fn test_evolution_from_centered_design() {
    let request = constrained_quadratic("genetic_algorithm")
        .configure(|c| c.seed(3).initial_design(LhsKind::Centered));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    assert_abs_diff_eq!(response.optimal_parameters["x"], 1., epsilon = 5e-2);
    assert_abs_diff_eq!(response.optimal_parameters["y"], 2., epsilon = 5e-2);
}

#[test]
fn test_active_constraint() {
    // the constraint cuts the unconstrained minimizer (2, 2) off
    let request = OptimizationRequest::new("gradient_descent")
        .parameter(ParameterSpec::new("x", 0., [0., 3.]))
        .parameter(ParameterSpec::new("y", 0., [0., 3.]))
        .objective(ObjectiveSpec::expression("f", "(x-2)^2 + (y-2)^2"))
        .constraint(ConstraintSpec::inequality("capacity", "x + y", 3.));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    assert_abs_diff_eq!(response.optimal_parameters["x"], 1.5, epsilon = 1e-2);
    assert_abs_diff_eq!(response.optimal_parameters["y"], 1.5, epsilon = 1e-2);
    assert_abs_diff_eq!(response.optimal_objective_value, 0.5, epsilon = 1e-2);
    let capacity = &response.optimization_report.constraint_evaluations[0];
    assert_abs_diff_eq!(capacity.value, 3., epsilon = 1e-3);
}

#[test]
fn test_gradient_from_infeasible_start() {
    // x0 = 1 violates (x-3)^2 <= 1, the constrained minimizer of x^2 is x = 2
    let request = OptimizationRequest::new("gradient_descent")
        .parameter(ParameterSpec::new("x", 1., [0., 4.]))
        .objective(ObjectiveSpec::expression("f", "x^2"))
        .constraint(ConstraintSpec::inequality("band", "(x-3)^2", 1.));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    assert!(
        response.convergence_metrics.success,
        "{}",
        response.convergence_metrics.message
    );
    assert_abs_diff_eq!(response.optimal_parameters["x"], 2., epsilon = 1e-3);
    assert_abs_diff_eq!(response.optimal_objective_value, 4., epsilon = 1e-2);
    assert!(response.final_feasibility_check.final_penalty < 1e-4);
}

#[test]
fn test_equality_constraint() {
    let request = OptimizationRequest::new("gradient_descent")
        .parameter(ParameterSpec::new("x", 0., [-2., 2.]))
        .parameter(ParameterSpec::new("y", 0., [-2., 2.]))
        .objective(ObjectiveSpec::expression("norm", "x^2 + y^2"))
        .constraint(ConstraintSpec::equality("sum", "x + y", 1.));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    assert_abs_diff_eq!(response.optimal_parameters["x"], 0.5, epsilon = 1e-2);
    assert_abs_diff_eq!(response.optimal_parameters["y"], 0.5, epsilon = 1e-2);
}

#[test]
fn test_bayesian_optimization() {
    let request = OptimizationRequest::new("bayesian_optimization")
        .parameter(ParameterSpec::new("x", 1., [0., 10.]))
        .objective(ObjectiveSpec::expression("f", "(x-5)^2"))
        .configure(|c| c.n_initial_points(5).max_iterations(15).seed(42));
    let solver = OptimizationSolver::new();
    let response = solver.optimize_system(&request).expect("solved");
    assert!((response.optimal_parameters["x"] - 5.).abs() < 0.5);
    // the working surrogate of the run is released
    assert!(solver.surrogate_registry().list().is_empty());
}

#[test]
fn test_surrogate_objective() {
    let solver = OptimizationSolver::new();
    let x = Array::linspace(0., 4., 30).insert_axis(Axis(1));
    let y = x.column(0).mapv(|v: f64| (v - 2.).powi(2));
    solver
        .surrogate_registry()
        .train(
            "bowl",
            SurrogateKind::GaussianProcess,
            &x.view(),
            &y.view(),
            &SurrogateConfig::default(),
        )
        .expect("trained");
    let request = OptimizationRequest::new("gradient_descent")
        .parameter(ParameterSpec::new("x", 0.5, [0., 4.]))
        .objective(ObjectiveSpec::surrogate("bowl", "bowl"));
    let response = solver.optimize_system(&request).expect("solved");
    assert_abs_diff_eq!(response.optimal_parameters["x"], 2., epsilon = 0.1);

    let unknown = OptimizationRequest::new("gradient_descent")
        .parameter(ParameterSpec::new("x", 0.5, [0., 4.]))
        .objective(ObjectiveSpec::surrogate("bowl", "missing"));
    assert!(solver.optimize_system(&unknown).is_err());
}

#[test]
fn test_initial_value_outside_bounds_rejected() {
    let request = OptimizationRequest::new("gradient_descent")
        .parameter(ParameterSpec::new("x", 5., [0., 2.]))
        .objective(ObjectiveSpec::expression("f", "x^2"));
    let solver = OptimizationSolver::new();
    let err = solver.optimize_system(&request).unwrap_err();
    assert!(matches!(err, OptimError::InvalidParameterError(_)));
    let runs = solver.runs().list();
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[test]
fn test_unsupported_method() {
    assert!("simulated_annealing".parse::<Method>().is_err());
    let err = OptimizationSolver::new()
        .optimize_system(&constrained_quadratic("simulated_annealing"))
        .unwrap_err();
    assert!(matches!(err, OptimError::UnsupportedMethodError(_)));
}

#[test]
fn test_undefined_variable_rejected_before_solving() {
    let request = OptimizationRequest::new("gradient_descent")
        .parameter(ParameterSpec::new("x", 0., [0., 2.]))
        .objective(ObjectiveSpec::expression("f", "x^2 + z"));
    assert!(matches!(
        OptimizationSolver::new().optimize_system(&request),
        Err(OptimError::ExprError(_))
    ));
}

#[test]
fn test_json_request() {
    let json = r#"{
        "simulation_id": "twin_001",
        "method": "quasi_newton",
        "parameters_to_optimize": [
            {"name": "x", "initialValue": 0.0, "bounds": [0.0, 2.0]},
            {"name": "y", "initialValue": 0.0, "bounds": [0.0, 3.0]}
        ],
        "objectives": [
            {"name": "distance", "target": "minimize", "expression": "(x-1)^2 + (y-2)^2"}
        ],
        "constraints": [
            {"name": "capacity", "type": "inequality", "expression": "x + y", "bound": 3.0}
        ],
        "config": {"max_iterations": 200}
    }"#;
    let request: OptimizationRequest = serde_json::from_str(json).expect("valid request");
    assert_eq!(request.system_id.as_deref(), Some("twin_001"));

    let solver = OptimizationSolver::new();
    let response = solver.optimize_system(&request).expect("solved");
    let value = serde_json::to_value(&response).expect("serialized");
    assert_eq!(value["status"], "succeeded");
    assert_eq!(value["method_used"], "gradient_descent");
    assert_eq!(value["final_feasibility_check"]["is_feasible"], true);
    assert!(value["optimal_parameters"]["x"].is_number());
    assert!(value["optimization_report"]["sensitivities"]["distance"]["y"].is_number());

    let report = solver.get_performance_metrics("twin_001");
    assert_eq!(report.performance_summary.map(|s| s.total_optimizations), Some(1));
}
