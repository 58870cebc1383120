//! Validated optimization problem and the argmin cost functions built on it.
use crate::errors::{OptimError, Result};
use crate::evaluator::{EvaluatorRegistry, ObjectiveEvaluator, SurrogateObjective};
use crate::types::{OptimizationRequest, Target};
use crate::utils::clamp;

use argmin::core::CostFunction;
use log::debug;
use ndarray::{Array1, Array2};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tunebox_expr::{
    ConstraintFunction, ConstraintKind, ConstraintSet, Expr, ExpressionEngine, ParameterBinding,
};
use tunebox_surrogate::SurrogateRegistry;

/// An objective of the problem with its resolved evaluator
#[derive(Clone)]
pub struct ObjectiveTerm {
    pub name: String,
    pub target: Target,
    pub weight: f64,
    pub(crate) evaluator: Arc<dyn ObjectiveEvaluator>,
    /// Parsed expression when the objective is analytic
    pub(crate) expression: Option<Arc<Expr>>,
}

impl ObjectiveTerm {
    /// Raw objective value, NaN when the evaluation fails
    pub fn value(&self, x: &[f64]) -> f64 {
        match self.evaluator.evaluate(x) {
            Ok(v) => v,
            Err(err) => {
                debug!("Objective '{}' evaluation failed: {err}", self.name);
                f64::NAN
            }
        }
    }

    /// Value in minimization convention, +inf when not finite
    pub fn signed_value(&self, x: &[f64]) -> f64 {
        let v = self.target.sign() * self.value(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    }
}

impl fmt::Debug for ObjectiveTerm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObjectiveTerm")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("weight", &self.weight)
            .field("expression", &self.expression.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// Signed objective used as the left-hand side of an epsilon constraint
struct SignedObjective(ObjectiveTerm);

impl ConstraintFunction for SignedObjective {
    fn value(&self, x: &[f64]) -> f64 {
        self.0.signed_value(x)
    }
}

/// Parameters, objectives and constraints of a request, checked once before solving
#[derive(Clone, Debug)]
pub struct OptimizationProblem {
    names: Vec<String>,
    x0: Array1<f64>,
    xlimits: Array2<f64>,
    objectives: Vec<ObjectiveTerm>,
    constraints: ConstraintSet,
}

impl OptimizationProblem {
    /// Builds the problem of `request`.
    ///
    /// Parameters are rejected (never clamped) when their initial value lies outside
    /// their bounds. Each objective should define exactly one of an expression,
    /// a surrogate model id or an evaluator name.
    pub fn from_request(
        request: &OptimizationRequest,
        engine: &Arc<ExpressionEngine>,
        surrogates: &Arc<SurrogateRegistry>,
        evaluators: &EvaluatorRegistry,
        penalty_weight: f64,
    ) -> Result<Self> {
        if request.parameters.is_empty() {
            return Err(OptimError::InvalidParameterError(
                "at least one parameter is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let mut xlimits = Array2::zeros((request.parameters.len(), 2));
        let mut x0 = Array1::zeros(request.parameters.len());
        for (i, p) in request.parameters.iter().enumerate() {
            if !seen.insert(p.name.as_str()) {
                return Err(OptimError::InvalidParameterError(format!(
                    "duplicated parameter name '{}'",
                    p.name
                )));
            }
            let [lo, hi] = p.bounds;
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(OptimError::InvalidParameterError(format!(
                    "parameter '{}' bounds [{lo}, {hi}] are invalid",
                    p.name
                )));
            }
            if !(lo..=hi).contains(&p.initial_value) {
                return Err(OptimError::InvalidParameterError(format!(
                    "parameter '{}' initial value {} lies outside [{lo}, {hi}]",
                    p.name, p.initial_value
                )));
            }
            xlimits[[i, 0]] = lo;
            xlimits[[i, 1]] = hi;
            x0[i] = p.initial_value;
        }
        let names: Vec<String> = request.parameters.iter().map(|p| p.name.clone()).collect();

        if request.objectives.is_empty() {
            return Err(OptimError::InvalidConfigError(
                "at least one objective is required".to_string(),
            ));
        }
        let mut objectives = Vec::with_capacity(request.objectives.len());
        for spec in request.objectives.iter() {
            if !(spec.weight.is_finite() && spec.weight >= 0.) {
                return Err(OptimError::InvalidConfigError(format!(
                    "objective '{}' weight should be >= 0, got {}",
                    spec.name, spec.weight
                )));
            }
            let (evaluator, expression): (Arc<dyn ObjectiveEvaluator>, _) = match (
                spec.expression.as_deref(),
                spec.surrogate.as_deref(),
                spec.evaluator.as_deref(),
            ) {
                (Some(src), None, None) => {
                    let expr = engine.parse(src)?;
                    (Arc::new(expr.bind(&names)?), Some(expr))
                }
                (None, Some(model_id), None) => {
                    let info = surrogates.info(model_id)?;
                    if info.n_features != names.len() {
                        return Err(OptimError::InvalidConfigError(format!(
                            "surrogate '{model_id}' expects {} inputs, {} parameters given",
                            info.n_features,
                            names.len()
                        )));
                    }
                    (
                        Arc::new(SurrogateObjective::new(surrogates.clone(), model_id)),
                        None,
                    )
                }
                (None, None, Some(name)) => (evaluators.get(name)?, None),
                _ => {
                    return Err(OptimError::InvalidConfigError(format!(
                        "objective '{}' should define exactly one of expression, surrogate or evaluator",
                        spec.name
                    )))
                }
            };
            objectives.push(ObjectiveTerm {
                name: spec.name.clone(),
                target: spec.target,
                weight: spec.weight,
                evaluator,
                expression,
            });
        }

        let mut constraints = ConstraintSet::new(engine.clone(), names.clone())
            .default_penalty_weight(penalty_weight);
        for c in request.constraints.iter() {
            constraints.add(&c.name, &c.kind, &c.expression, c.bound, c.penalty_weight)?;
        }

        Ok(OptimizationProblem {
            names,
            x0,
            xlimits,
            objectives,
            constraints,
        })
    }

    /// Number of parameters
    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Initial parameter vector
    pub fn x0(&self) -> &Array1<f64> {
        &self.x0
    }

    /// Box as a (dim, 2) matrix of [lower, upper] bounds
    pub fn xlimits(&self) -> &Array2<f64> {
        &self.xlimits
    }

    pub fn objectives(&self) -> &[ObjectiveTerm] {
        &self.objectives
    }

    pub fn n_objectives(&self) -> usize {
        self.objectives.len()
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Objective weights as given in the request
    pub fn weights(&self) -> Array1<f64> {
        self.objectives.iter().map(|o| o.weight).collect()
    }

    /// Raw objective values, NaN for failed evaluations
    pub fn objective_values(&self, x: &[f64]) -> Array1<f64> {
        self.objectives.iter().map(|o| o.value(x)).collect()
    }

    /// Objective values in minimization convention, +inf for failed evaluations
    pub fn signed_objectives(&self, x: &[f64]) -> Array1<f64> {
        self.objectives.iter().map(|o| o.signed_value(x)).collect()
    }

    /// Σ cᵢ·signedᵢ over objectives with a non-zero coefficient
    pub fn weighted_objective(&self, x: &[f64], coefficients: &Array1<f64>) -> f64 {
        let value: f64 = self
            .objectives
            .iter()
            .zip(coefficients.iter())
            .filter(|(_, &c)| c != 0.)
            .map(|(o, c)| c * o.signed_value(x))
            .sum();
        if value.is_nan() {
            f64::INFINITY
        } else {
            value
        }
    }

    /// Name to value mapping of `x`
    pub fn binding(&self, x: &[f64]) -> ParameterBinding {
        self.constraints.to_binding(x)
    }

    /// Projection of `x` onto the parameter box
    pub fn clamp(&self, x: &Array1<f64>) -> Array1<f64> {
        clamp(x, &self.xlimits)
    }

    /// Constraint set extended with `signed objective i <= epsilon` for each (i, epsilon)
    pub(crate) fn with_epsilon_constraints(
        &self,
        bounds: &[(usize, f64)],
    ) -> Result<ConstraintSet> {
        let mut constraints = self.constraints.clone();
        for &(i, epsilon) in bounds {
            let objective = &self.objectives[i];
            constraints.add_function(
                &format!("epsilon_{}", objective.name),
                ConstraintKind::Inequality,
                Arc::new(SignedObjective(objective.clone())),
                epsilon,
                None,
            )?;
        }
        Ok(constraints)
    }
}

/// Scalarized penalized objective `Σ cᵢ·signedᵢ(x) + penalty(x)`
#[derive(Clone)]
pub struct ScalarCost {
    problem: Arc<OptimizationProblem>,
    coefficients: Array1<f64>,
    constraints: Arc<ConstraintSet>,
}

impl ScalarCost {
    /// Cost weighting objectives by their request weights
    pub fn new(problem: Arc<OptimizationProblem>) -> Self {
        let coefficients = problem.weights();
        let constraints = Arc::new(problem.constraints().clone());
        ScalarCost {
            problem,
            coefficients,
            constraints,
        }
    }

    /// Replaces objective coefficients
    pub fn coefficients(mut self, coefficients: Array1<f64>) -> Self {
        self.coefficients = coefficients;
        self
    }

    /// Replaces the constraint set
    pub fn constraints(mut self, constraints: ConstraintSet) -> Self {
        self.constraints = Arc::new(constraints);
        self
    }

    pub fn problem(&self) -> &Arc<OptimizationProblem> {
        &self.problem
    }

    pub fn constraint_set(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Weighted objective without penalty
    pub fn objective(&self, x: &[f64]) -> f64 {
        self.problem.weighted_objective(x, &self.coefficients)
    }

    /// Penalized cost, +inf when not finite
    pub fn value(&self, x: &[f64]) -> f64 {
        let value = self.objective(x) + self.constraints.penalty(x);
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    }
}

impl CostFunction for ScalarCost {
    type Param = Array1<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.value(&x.to_vec()))
    }
}

/// Vector of signed objectives followed by the total constraint violation
#[derive(Clone)]
pub struct VectorCost {
    problem: Arc<OptimizationProblem>,
}

impl VectorCost {
    pub fn new(problem: Arc<OptimizationProblem>) -> Self {
        VectorCost { problem }
    }

    pub fn problem(&self) -> &Arc<OptimizationProblem> {
        &self.problem
    }
}

impl CostFunction for VectorCost {
    type Param = Array1<f64>;
    type Output = Array1<f64>;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let x = x.to_vec();
        let mut values = self.problem.signed_objectives(&x).to_vec();
        values.push(self.problem.constraints().total_violation(&x));
        Ok(Array1::from(values))
    }
}
