//! Objective evaluation capabilities: expressions, surrogate models and host functions.
use crate::errors::{OptimError, Result};

use ndarray::ArrayView2;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tunebox_expr::BoundExpr;
use tunebox_surrogate::SurrogateRegistry;

/// Computes an objective value from an ordered parameter vector.
///
/// Implementations may block while waiting for an external computation.
/// An error or a non-finite value makes the point rejected by the search.
pub trait ObjectiveEvaluator: Send + Sync {
    fn evaluate(&self, x: &[f64]) -> Result<f64>;
}

impl ObjectiveEvaluator for BoundExpr {
    fn evaluate(&self, x: &[f64]) -> Result<f64> {
        Ok(self.eval(x))
    }
}

/// Objective predicted by a model of the surrogate registry
pub struct SurrogateObjective {
    registry: Arc<SurrogateRegistry>,
    model_id: String,
}

impl SurrogateObjective {
    pub fn new(registry: Arc<SurrogateRegistry>, model_id: impl Into<String>) -> Self {
        SurrogateObjective {
            registry,
            model_id: model_id.into(),
        }
    }
}

impl ObjectiveEvaluator for SurrogateObjective {
    fn evaluate(&self, x: &[f64]) -> Result<f64> {
        let x = ArrayView2::from_shape((1, x.len()), x)
            .map_err(|e| OptimError::InvalidParameterError(e.to_string()))?;
        let y = self.registry.predict(&self.model_id, &x)?;
        y.first()
            .copied()
            .ok_or_else(|| OptimError::InvalidParameterError("empty prediction".to_string()))
    }
}

/// Host function used as an objective
pub struct FnEvaluator<F>(pub F);

impl<F> ObjectiveEvaluator for FnEvaluator<F>
where
    F: Fn(&[f64]) -> f64 + Send + Sync,
{
    fn evaluate(&self, x: &[f64]) -> Result<f64> {
        Ok((self.0)(x))
    }
}

/// Evaluators registered by the host under a name, referenced by requests
#[derive(Default)]
pub struct EvaluatorRegistry {
    evaluators: RwLock<HashMap<String, Arc<dyn ObjectiveEvaluator>>>,
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `evaluator` under `name`, replacing any previous one
    pub fn register(&self, name: impl Into<String>, evaluator: Arc<dyn ObjectiveEvaluator>) {
        let mut evaluators = self.evaluators.write().unwrap_or_else(|e| e.into_inner());
        evaluators.insert(name.into(), evaluator);
    }

    /// Registers a closure under `name`
    pub fn register_fn<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnEvaluator(f)));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ObjectiveEvaluator>> {
        let evaluators = self.evaluators.read().unwrap_or_else(|e| e.into_inner());
        evaluators
            .get(name)
            .cloned()
            .ok_or_else(|| OptimError::UnknownEvaluatorError(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let evaluators = self.evaluators.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<_> = evaluators.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, Axis};
    use tunebox_surrogate::{SurrogateConfig, SurrogateKind};

    #[test]
    fn test_registry() {
        let registry = EvaluatorRegistry::new();
        registry.register_fn("sum", |x: &[f64]| x.iter().sum::<f64>());
        assert_eq!(registry.get("sum").unwrap().evaluate(&[1., 2.]).unwrap(), 3.);
        assert!(matches!(
            registry.get("sim"),
            Err(OptimError::UnknownEvaluatorError(_))
        ));
        assert_eq!(registry.names(), vec!["sum".to_string()]);
    }

    #[test]
    fn test_surrogate_objective() {
        let registry = Arc::new(SurrogateRegistry::new());
        let x = Array::linspace(0., 4., 10).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| 3. * v - 1.);
        registry
            .train(
                "line",
                SurrogateKind::GaussianProcess,
                &x.view(),
                &y.view(),
                &SurrogateConfig::default().test_fraction(0.),
            )
            .unwrap();
        let objective = SurrogateObjective::new(registry, "line");
        assert_abs_diff_eq!(objective.evaluate(&[2.]).unwrap(), 5., epsilon = 1e-2);
        let missing = SurrogateObjective::new(Arc::new(SurrogateRegistry::new()), "line");
        assert!(missing.evaluate(&[2.]).is_err());
    }
}
