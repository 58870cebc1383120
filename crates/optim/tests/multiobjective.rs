use approx::assert_abs_diff_eq;
use ndarray::array;
use tunebox_optim::multiobjective::{non_dominated_indices, Relationship};
use tunebox_optim::{
    ConstraintSpec, ObjectiveSpec, OptimizationRequest, OptimizationSolver, ParameterSpec,
    RunStatus, Target, WeightModel,
};

/// Cost against quality of a single design variable
fn cost_quality(method: &str) -> OptimizationRequest {
    OptimizationRequest::new(method)
        .system_id("plant")
        .parameter(ParameterSpec::new("x", 1., [0., 4.]))
        .objective(ObjectiveSpec::expression("cost", "x^2"))
        .objective(ObjectiveSpec::expression("quality", "4 - (x-3)^2").target(Target::Maximize))
}

#[test]
fn test_non_dominated_filtering() {
    let objectives = array![[1., 4.], [2., 3.], [3., 2.], [4., 1.], [2., 2.]];
    let mut front = non_dominated_indices(&objectives);
    front.sort();
    assert_eq!(front, vec![0, 3, 4]);
}

#[test]
fn test_weighted_sum_user_weights() {
    let request = cost_quality("weighted_sum").prefer(|p| {
        p.weight_model(WeightModel::UserDefined)
            .weights(vec![1., 3.])
    });
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    // 0.25 x^2 - 0.75 (4 - (x-3)^2) minimal at x = 2.25
    assert_abs_diff_eq!(response.optimal_parameters["x"], 2.25, epsilon = 1e-2);
    let mo = response.optimization_report.multi_objective.expect("pareto result");
    assert_eq!(mo.method, "weighted_sum");
    assert_eq!(mo.weights, vec![0.25, 0.75]);
    assert_abs_diff_eq!(
        response.optimization_report.objective_values["quality"],
        4. - 0.75f64.powi(2),
        epsilon = 1e-2
    );
    assert!(mo
        .recommendations
        .iter()
        .any(|r| r == "Highest weight given to: quality"));
}

#[test]
fn test_ahp_priorities() {
    let request = cost_quality("weighted_sum").prefer(|p| {
        p.weight_model(WeightModel::Ahp)
            .priorities(vec![3., 1.])
    });
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    let mo = response.optimization_report.multi_objective.expect("pareto result");
    assert_abs_diff_eq!(mo.weights[0], 0.75, epsilon = 1e-6);
    assert_abs_diff_eq!(mo.weights[1], 0.25, epsilon = 1e-6);
    // 0.75 x^2 - 0.25 (4 - (x-3)^2) minimal at x = 0.75
    assert_abs_diff_eq!(response.optimal_parameters["x"], 0.75, epsilon = 1e-2);
}

#[test]
fn test_pareto_front_analysis() {
    let request = cost_quality("paretto_front")
        .configure(|c| c.seed(7))
        .prefer(|p| p.pareto_points(15));
    let solver = OptimizationSolver::new();
    let response = solver.optimize_system(&request).expect("solved");
    assert_eq!(response.status, RunStatus::Succeeded);
    assert_eq!(response.method_used, "pareto_front");

    let mo = response.optimization_report.multi_objective.as_ref().expect("pareto result");
    assert!(mo.pareto_front.len() >= 3);
    assert!(!mo.degenerate);
    assert_eq!(mo.quality.n_solutions, mo.pareto_front.len());
    // efficient designs lie between the two individual optima
    for solution in mo.pareto_front.iter() {
        let x = solution.parameters["x"];
        assert!((-1e-2..=3. + 1e-2).contains(&x), "x = {x}");
        assert!(solution.feasible);
    }
    let compromise = &mo.pareto_front[mo.compromise.expect("compromise")];
    assert_abs_diff_eq!(
        compromise.parameters["x"],
        response.optimal_parameters["x"],
        epsilon = 1e-12
    );
    // cost grows while quality grows: conflicting in minimization terms
    assert_eq!(mo.tradeoffs.len(), 1);
    assert_eq!(mo.tradeoffs[0].relationship, Relationship::Conflicting);
    assert!(mo.tradeoffs[0].strength > 0.5);

    let json = serde_json::to_value(&response).expect("serialized");
    assert!(json["optimization_report"]["multi_objective"]["pareto_front"].is_array());
}

#[test]
fn test_nsga2_front() {
    let request = cost_quality("nsga2")
        .constraint(ConstraintSpec::inequality("budget", "x", 2.5))
        .configure(|c| c.seed(3))
        .prefer(|p| p.population_size(20).max_generations(25));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    assert!(response.convergence_metrics.success);
    assert_eq!(response.convergence_metrics.iterations, 25);
    let mo = response.optimization_report.multi_objective.expect("pareto result");
    assert!(mo.pareto_front.len() >= 5);
    assert!(mo
        .pareto_front
        .iter()
        .all(|s| s.feasible && s.parameters["x"] <= 2.5 + 1e-6));
    assert!(mo.quality.hypervolume > 0.);
    assert!(response.final_feasibility_check.is_feasible);
}

#[test]
fn test_epsilon_constraint_request() {
    // minimize cost while keeping quality >= 3
    let request = cost_quality("epsilon_constraint").prefer(|p| p.epsilon_values(vec![3.]));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    // 4 - (x-3)^2 >= 3 <=> x >= 2
    assert_abs_diff_eq!(response.optimal_parameters["x"], 2., epsilon = 1e-2);
    assert_abs_diff_eq!(response.optimal_objective_value, 4., epsilon = 5e-2);
    assert!(response.convergence_metrics.success);
}

#[test]
fn test_degenerate_front_is_reported() {
    let request = OptimizationRequest::new("pareto_front")
        .parameter(ParameterSpec::new("x", 0., [-2., 2.]))
        .objective(ObjectiveSpec::expression("a", "(x-1)^2"))
        .objective(ObjectiveSpec::expression("b", "abs(x-1)"))
        .configure(|c| c.seed(1))
        .prefer(|p| p.pareto_points(6));
    let response = OptimizationSolver::new()
        .optimize_system(&request)
        .expect("solved");
    assert_eq!(response.status, RunStatus::Succeeded);
    let mo = response.optimization_report.multi_objective.expect("pareto result");
    assert!(mo.degenerate);
    assert_eq!(mo.pareto_front.len(), 1);
    assert_abs_diff_eq!(response.optimal_parameters["x"], 1., epsilon = 1e-2);
}
