//! Named equality/inequality constraints turned into a quadratic penalty.
use crate::ast::BoundExpr;
use crate::engine::ExpressionEngine;
use crate::errors::{ExprError, Result};

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Tolerance under which a violation is considered satisfied
pub const FEASIBILITY_TOLERANCE: f64 = 1e-6;
/// Penalty weight used when none is given for a constraint
pub const DEFAULT_PENALTY_WEIGHT: f64 = 1e6;

/// Complete name to value mapping of the parameters
pub type ParameterBinding = BTreeMap<String, f64>;

/// Kind of constraint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintKind {
    /// `value == bound` within tolerance
    #[serde(alias = "eq")]
    Equality,
    /// `value <= bound` within tolerance
    #[serde(alias = "ineq")]
    Inequality,
}

impl FromStr for ConstraintKind {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "equality" | "eq" => Ok(ConstraintKind::Equality),
            "inequality" | "ineq" => Ok(ConstraintKind::Inequality),
            _ => Err(ExprError::InvalidConstraintTypeError(s.to_string())),
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConstraintKind::Equality => write!(f, "equality"),
            ConstraintKind::Inequality => write!(f, "inequality"),
        }
    }
}

/// A constraint left-hand side computed from the parameter vector
pub trait ConstraintFunction: Send + Sync {
    /// Value at `x`, a non-finite value means the evaluation failed
    fn value(&self, x: &[f64]) -> f64;
}

impl ConstraintFunction for BoundExpr {
    fn value(&self, x: &[f64]) -> f64 {
        self.eval(x)
    }
}

/// Per-constraint evaluation result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintEvaluation {
    /// Constraint name
    pub name: String,
    /// Left-hand side value
    pub value: f64,
    /// Violation amount, 0 when satisfied
    pub violation: f64,
    /// Whether the violation is within tolerance
    pub feasible: bool,
}

#[derive(Clone)]
struct Constraint {
    name: String,
    kind: ConstraintKind,
    source: Option<String>,
    function: Arc<dyn ConstraintFunction>,
    bound: f64,
    penalty_weight: f64,
}

impl Constraint {
    fn violation(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return f64::INFINITY;
        }
        match self.kind {
            ConstraintKind::Inequality => (value - self.bound).max(0.),
            ConstraintKind::Equality => (value - self.bound).abs(),
        }
    }
}

/// Ordered collection of named constraints over a fixed list of parameters.
///
/// Expressions are parsed through a shared [ExpressionEngine] and bound to the
/// parameter order once, evaluation then works on parameter vectors.
#[derive(Clone)]
pub struct ConstraintSet {
    engine: Arc<ExpressionEngine>,
    variables: Vec<String>,
    constraints: Vec<Constraint>,
    tolerance: f64,
    default_penalty_weight: f64,
}

impl fmt::Debug for ConstraintSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let constraints: Vec<_> = self
            .constraints
            .iter()
            .map(|c| {
                format!(
                    "{} ({}): {} vs {} [w={}]",
                    c.name,
                    c.kind,
                    c.source.as_deref().unwrap_or("<fn>"),
                    c.bound,
                    c.penalty_weight
                )
            })
            .collect();
        f.debug_struct("ConstraintSet")
            .field("variables", &self.variables)
            .field("constraints", &constraints)
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl ConstraintSet {
    /// Constructor of an empty set over the given ordered parameter names
    pub fn new(engine: Arc<ExpressionEngine>, variables: Vec<String>) -> Self {
        ConstraintSet {
            engine,
            variables,
            constraints: vec![],
            tolerance: FEASIBILITY_TOLERANCE,
            default_penalty_weight: DEFAULT_PENALTY_WEIGHT,
        }
    }

    /// Sets the feasibility tolerance
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the penalty weight used by constraints added without one
    pub fn default_penalty_weight(mut self, weight: f64) -> Self {
        self.default_penalty_weight = weight;
        self
    }

    /// Adds a constraint `expression <= bound` (inequality) or `expression == bound` (equality).
    ///
    /// `kind` is `equality`/`eq` or `inequality`/`ineq`. Fails when the name is
    /// already used, the kind is unknown, the weight is not positive, the
    /// expression is malformed or refers to a variable which is not a parameter.
    pub fn add(
        &mut self,
        name: &str,
        kind: &str,
        expression: &str,
        bound: f64,
        penalty_weight: Option<f64>,
    ) -> Result<()> {
        self.check_name(name)?;
        let kind = ConstraintKind::from_str(kind)?;
        let expr = self.engine.parse(expression)?;
        let bound_expr = expr.bind(&self.variables)?;
        self.push(Constraint {
            name: name.to_string(),
            kind,
            source: Some(expression.to_string()),
            function: Arc::new(bound_expr),
            bound,
            penalty_weight: penalty_weight.unwrap_or(self.default_penalty_weight),
        })
    }

    /// Adds a constraint whose left-hand side is computed by host code
    pub fn add_function(
        &mut self,
        name: &str,
        kind: ConstraintKind,
        function: Arc<dyn ConstraintFunction>,
        bound: f64,
        penalty_weight: Option<f64>,
    ) -> Result<()> {
        self.check_name(name)?;
        self.push(Constraint {
            name: name.to_string(),
            kind,
            source: None,
            function,
            bound,
            penalty_weight: penalty_weight.unwrap_or(self.default_penalty_weight),
        })
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.constraints.iter().any(|c| c.name == name) {
            return Err(ExprError::DuplicateConstraintError(name.to_string()));
        }
        Ok(())
    }

    fn push(&mut self, constraint: Constraint) -> Result<()> {
        if !(constraint.penalty_weight.is_finite() && constraint.penalty_weight > 0.) {
            return Err(ExprError::InvalidValueError(format!(
                "penalty weight of constraint '{}' should be positive, got {}",
                constraint.name, constraint.penalty_weight
            )));
        }
        if !constraint.bound.is_finite() {
            return Err(ExprError::InvalidValueError(format!(
                "bound of constraint '{}' should be finite",
                constraint.name
            )));
        }
        debug!(
            "Add {} constraint '{}' bound={} weight={}",
            constraint.kind, constraint.name, constraint.bound, constraint.penalty_weight
        );
        self.constraints.push(constraint);
        Ok(())
    }

    /// Per-constraint value, violation and feasibility at `x`
    pub fn evaluate_feasibility(&self, x: &[f64]) -> Vec<ConstraintEvaluation> {
        self.constraints
            .iter()
            .map(|c| {
                let value = c.function.value(x);
                let violation = c.violation(value);
                ConstraintEvaluation {
                    name: c.name.clone(),
                    value,
                    violation,
                    feasible: violation <= self.tolerance,
                }
            })
            .collect()
    }

    /// Quadratic penalty `sum(weight * violation^2)`, infinite when a constraint fails to evaluate
    pub fn penalty(&self, x: &[f64]) -> f64 {
        self.constraints
            .iter()
            .map(|c| {
                let v = c.violation(c.function.value(x));
                c.penalty_weight * v * v
            })
            .sum()
    }

    /// Sum of violations, used to rank infeasible points
    pub fn total_violation(&self, x: &[f64]) -> f64 {
        self.constraints
            .iter()
            .map(|c| c.violation(c.function.value(x)))
            .sum()
    }

    /// Whether every violation is within tolerance
    pub fn is_feasible(&self, x: &[f64]) -> bool {
        self.constraints
            .iter()
            .all(|c| c.violation(c.function.value(x)) <= self.tolerance)
    }

    /// Parameter vector ordered as the set variables from a complete binding
    pub fn to_vector(&self, binding: &ParameterBinding) -> Result<Vec<f64>> {
        self.variables
            .iter()
            .map(|v| {
                binding
                    .get(v)
                    .copied()
                    .ok_or_else(|| ExprError::UndefinedVariableError(v.clone()))
            })
            .collect()
    }

    /// Binding built from a parameter vector ordered as the set variables
    pub fn to_binding(&self, x: &[f64]) -> ParameterBinding {
        self.variables
            .iter()
            .cloned()
            .zip(x.iter().copied())
            .collect()
    }

    /// [ConstraintSet::penalty] taking a binding
    pub fn penalty_of(&self, binding: &ParameterBinding) -> Result<f64> {
        Ok(self.penalty(&self.to_vector(binding)?))
    }

    /// [ConstraintSet::is_feasible] taking a binding
    pub fn is_feasible_binding(&self, binding: &ParameterBinding) -> Result<bool> {
        Ok(self.is_feasible(&self.to_vector(binding)?))
    }

    /// Ordered parameter names
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Constraint names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.constraints.iter().map(|c| c.name.as_str()).collect()
    }

    /// Feasibility tolerance
    pub fn feasibility_tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Shared expression engine
    pub fn engine(&self) -> &Arc<ExpressionEngine> {
        &self.engine
    }

    /// Number of constraints
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Whether there is no constraint
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn xy_set() -> ConstraintSet {
        let mut cs = ConstraintSet::new(
            Arc::new(ExpressionEngine::new()),
            vec!["x".to_string(), "y".to_string()],
        );
        cs.add("sum", "inequality", "x + y", 3., None).unwrap();
        cs.add("diff", "equality", "x - y", -1., Some(10.)).unwrap();
        cs
    }

    #[test]
    fn test_feasibility_and_violation() {
        let cs = xy_set();
        let evals = cs.evaluate_feasibility(&[1., 2.]);
        assert_eq!(evals.len(), 2);
        assert!(evals.iter().all(|e| e.feasible));
        assert!(cs.is_feasible(&[1., 2.]));

        let evals = cs.evaluate_feasibility(&[2., 2.5]);
        assert_abs_diff_eq!(evals[0].value, 4.5);
        assert_abs_diff_eq!(evals[0].violation, 1.5);
        assert!(!evals[0].feasible);
        assert_abs_diff_eq!(evals[1].violation, 0.5);
        assert!(!cs.is_feasible(&[2., 2.5]));
    }

    #[test]
    fn test_penalty_zero_when_feasible_and_increasing() {
        let cs = xy_set();
        assert!(cs.penalty(&[1., 2.]) < 1e-9);
        assert!(cs.penalty(&[0., 1.]) < 1e-9);
        let mut previous = 0.;
        for step in 1..6 {
            let d = step as f64 * 0.1;
            let p = cs.penalty(&[1. + d, 2. + d]);
            assert!(p > previous);
            previous = p;
        }
        assert_abs_diff_eq!(cs.penalty(&[2., 2.5]), 1e6 * 1.5 * 1.5 + 10. * 0.25);
    }

    #[test]
    fn test_tolerance() {
        let cs = xy_set();
        assert!(cs.is_feasible(&[1. + 4e-7, 2. + 4e-7]));
        assert!(!cs.is_feasible(&[1. + 1e-5, 2. + 1e-5]));
    }

    #[test]
    fn test_add_errors() {
        let mut cs = xy_set();
        assert_eq!(
            cs.add("sum", "inequality", "x", 0., None),
            Err(ExprError::DuplicateConstraintError("sum".to_string()))
        );
        assert_eq!(
            cs.add("c", "greater", "x", 0., None),
            Err(ExprError::InvalidConstraintTypeError("greater".to_string()))
        );
        assert!(matches!(
            cs.add("c", "ineq", "x + z", 0., None),
            Err(ExprError::UndefinedVariableError(v)) if v == "z"
        ));
        assert!(matches!(
            cs.add("c", "ineq", "x +", 0., None),
            Err(ExprError::ExpressionSyntaxError { .. })
        ));
        assert!(matches!(
            cs.add("c", "ineq", "x", 0., Some(0.)),
            Err(ExprError::InvalidValueError(_))
        ));
        assert_eq!(cs.len(), 2);
    }

    #[test]
    fn test_failed_evaluation_is_infinite_penalty() {
        let mut cs = ConstraintSet::new(Arc::new(ExpressionEngine::new()), vec!["x".to_string()]);
        cs.add("logx", "ineq", "log(x)", 1., None).unwrap();
        assert!(cs.penalty(&[-1.]).is_infinite());
        assert!(!cs.is_feasible(&[-1.]));
        assert!(cs.is_feasible(&[1.]));
    }

    struct Square;
    impl ConstraintFunction for Square {
        fn value(&self, x: &[f64]) -> f64 {
            x[0] * x[0]
        }
    }

    #[test]
    fn test_function_constraint_and_bindings() {
        let mut cs = ConstraintSet::new(Arc::new(ExpressionEngine::new()), vec!["x".to_string()]);
        cs.add_function("sq", ConstraintKind::Inequality, Arc::new(Square), 4., Some(1.))
            .unwrap();
        let binding = cs.to_binding(&[3.]);
        assert_abs_diff_eq!(cs.penalty_of(&binding).unwrap(), 25.);
        assert!(!cs.is_feasible_binding(&binding).unwrap());
        assert!(cs.penalty_of(&ParameterBinding::new()).is_err());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("EQ".parse::<ConstraintKind>().unwrap(), ConstraintKind::Equality);
        assert_eq!(
            serde_json::from_str::<ConstraintKind>("\"ineq\"").ok(),
            Some(ConstraintKind::Inequality)
        );
    }
}
