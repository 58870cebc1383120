//! Optimization request and response
use crate::config::{Preferences, SolverConfig};
use crate::multiobjective::MultiObjectiveResult;
use crate::runs::RunStatus;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tunebox_expr::ConstraintEvaluation;

/// A continuous design parameter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(alias = "initialValue", alias = "initial")]
    pub initial_value: f64,
    /// `[lower, upper]`
    pub bounds: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, initial_value: f64, bounds: [f64; 2]) -> Self {
        ParameterSpec {
            name: name.into(),
            initial_value,
            bounds,
            unit: None,
        }
    }
}

/// Optimization sense of an objective
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    #[serde(alias = "min")]
    Minimize,
    #[serde(alias = "max")]
    Maximize,
}

impl Target {
    /// Sign applied to an objective value so that the search always minimizes
    pub fn sign(&self) -> f64 {
        match self {
            Target::Minimize => 1.,
            Target::Maximize => -1.,
        }
    }
}

/// An objective, computed by exactly one of an expression, a registered surrogate
/// model or a host evaluator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    pub name: String,
    #[serde(default)]
    pub target: Target,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Id of a model of the surrogate registry
    #[serde(default, alias = "surrogate_model", skip_serializing_if = "Option::is_none")]
    pub surrogate: Option<String>,
    /// Name of an evaluator registered by the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<String>,
}

fn default_weight() -> f64 {
    1.
}

impl ObjectiveSpec {
    /// Expression objective to minimize with unit weight
    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        ObjectiveSpec {
            name: name.into(),
            target: Target::Minimize,
            weight: 1.,
            expression: Some(expression.into()),
            surrogate: None,
            evaluator: None,
        }
    }

    /// Objective computed by the host evaluator registered under `evaluator`
    pub fn evaluator(name: impl Into<String>, evaluator: impl Into<String>) -> Self {
        ObjectiveSpec {
            expression: None,
            evaluator: Some(evaluator.into()),
            ..ObjectiveSpec::expression(name, "")
        }
    }

    /// Objective predicted by the surrogate model `model_id`
    pub fn surrogate(name: impl Into<String>, model_id: impl Into<String>) -> Self {
        ObjectiveSpec {
            expression: None,
            surrogate: Some(model_id.into()),
            ..ObjectiveSpec::expression(name, "")
        }
    }

    /// Sets the target
    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Sets the weight
    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// A named constraint `expression (<=|==) bound`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub name: String,
    /// `equality` or `inequality`
    #[serde(rename = "type")]
    pub kind: String,
    pub expression: String,
    #[serde(default)]
    pub bound: f64,
    #[serde(default, alias = "penaltyWeight", skip_serializing_if = "Option::is_none")]
    pub penalty_weight: Option<f64>,
}

impl ConstraintSpec {
    pub fn inequality(name: impl Into<String>, expression: impl Into<String>, bound: f64) -> Self {
        ConstraintSpec {
            name: name.into(),
            kind: "inequality".to_string(),
            expression: expression.into(),
            bound,
            penalty_weight: None,
        }
    }

    pub fn equality(name: impl Into<String>, expression: impl Into<String>, bound: f64) -> Self {
        ConstraintSpec {
            kind: "equality".to_string(),
            ..ConstraintSpec::inequality(name, expression, bound)
        }
    }
}

fn default_method() -> String {
    "gradient_descent".to_string()
}

/// A request to optimize a system
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    /// Identifier of the optimized system, used to group performance records
    #[serde(default, alias = "simulation_id", alias = "systemId", skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(alias = "parameters_to_optimize")]
    pub parameters: Vec<ParameterSpec>,
    pub objectives: Vec<ObjectiveSpec>,
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub config: SolverConfig,
    #[serde(default)]
    pub preferences: Preferences,
}

impl OptimizationRequest {
    pub fn new(method: impl Into<String>) -> Self {
        OptimizationRequest {
            system_id: None,
            method: method.into(),
            parameters: vec![],
            objectives: vec![],
            constraints: vec![],
            config: SolverConfig::default(),
            preferences: Preferences::default(),
        }
    }

    pub fn system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = Some(system_id.into());
        self
    }

    pub fn parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn objective(mut self, objective: ObjectiveSpec) -> Self {
        self.objectives.push(objective);
        self
    }

    pub fn constraint(mut self, constraint: ConstraintSpec) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Configures the solver with a closure
    pub fn configure<F: FnOnce(SolverConfig) -> SolverConfig>(mut self, init: F) -> Self {
        self.config = init(self.config);
        self
    }

    /// Sets multi-objective preferences with a closure
    pub fn prefer<F: FnOnce(Preferences) -> Preferences>(mut self, init: F) -> Self {
        self.preferences = init(self.preferences);
        self
    }
}

/// Convergence information of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceMetrics {
    pub iterations: u64,
    /// Number of objective evaluations
    pub evaluations: u64,
    pub success: bool,
    pub message: String,
    pub elapsed_seconds: f64,
    /// Best cost after each iteration
    pub best_cost_history: Vec<f64>,
}

/// Feasibility of the returned point, computed independently of the penalty
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityCheck {
    pub is_feasible: bool,
    pub final_penalty: f64,
    /// Names of the violated constraints
    pub violations: Vec<String>,
}

/// Detailed report of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub status: String,
    pub message: String,
    pub method_used: String,
    /// Raw objective values at the optimum
    pub objective_values: BTreeMap<String, f64>,
    pub constraint_evaluations: Vec<ConstraintEvaluation>,
    /// Derivatives of each expression objective wrt each parameter at the optimum
    pub sensitivities: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_objective: Option<MultiObjectiveResult>,
}

/// Result of an optimization request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub method_used: String,
    pub optimal_parameters: BTreeMap<String, f64>,
    /// Weighted sum of signed objectives, penalty excluded
    pub optimal_objective_value: f64,
    pub convergence_metrics: ConvergenceMetrics,
    pub optimization_report: OptimizationReport,
    pub final_feasibility_check: FeasibilityCheck,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json() {
        let request: OptimizationRequest = serde_json::from_str(
            r#"{
                "simulation_id": "beam",
                "method": "gradient_descent",
                "parameters_to_optimize": [
                    {"name": "x", "initialValue": 0.0, "bounds": [0, 2]},
                    {"name": "y", "initial_value": 0.0, "bounds": [0, 3], "unit": "m"}
                ],
                "objectives": [{"name": "f", "target": "min", "expression": "(x-1)^2 + (y-2)^2"}],
                "constraints": [{"name": "c", "type": "inequality", "expression": "x + y", "bound": 3}],
                "config": {"maxIterations": 50}
            }"#,
        )
        .unwrap();
        assert_eq!(request.system_id.as_deref(), Some("beam"));
        assert_eq!(request.parameters.len(), 2);
        assert_eq!(request.parameters[1].unit.as_deref(), Some("m"));
        assert_eq!(request.objectives[0].weight, 1.);
        assert_eq!(request.objectives[0].target, Target::Minimize);
        assert_eq!(request.constraints[0].kind, "inequality");
        assert_eq!(request.config.max_iterations, Some(50));
        assert_eq!(request.preferences.pareto_points, 20);
    }

    #[test]
    fn test_builders() {
        let request = OptimizationRequest::new("nsga2")
            .parameter(ParameterSpec::new("x", 0.5, [0., 1.]))
            .objective(ObjectiveSpec::expression("f1", "x^2"))
            .objective(ObjectiveSpec::evaluator("f2", "sim").target(Target::Maximize))
            .constraint(ConstraintSpec::equality("c", "x", 0.5))
            .configure(|c| c.seed(3));
        assert_eq!(request.objectives[1].evaluator.as_deref(), Some("sim"));
        assert!(request.objectives[1].expression.is_none());
        assert_eq!(request.objectives[1].target.sign(), -1.);
        assert_eq!(request.constraints[0].kind, "equality");
        assert_eq!(request.config.seed, Some(3));
    }
}
