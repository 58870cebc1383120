//! Objective weight models of scalarizing multi-objective methods.
use crate::config::{Preferences, WeightModel};
use crate::errors::{OptimError, Result};
use crate::problem::OptimizationProblem;

use log::{debug, warn};
use ndarray::{Array1, Array2};
use rand_xoshiro::Xoshiro256Plus;
use tunebox_doe::{Lhs, SamplingMethod};

const AHP_MAX_ITERATIONS: usize = 100;
const AHP_TOLERANCE: f64 = 1e-10;

/// `1/m` for each of the `m` objectives
pub fn equal_weights(m: usize) -> Array1<f64> {
    Array1::from_elem(m, 1. / m.max(1) as f64)
}

/// Weights normalized to sum 1, None when they are negative, not finite or sum to 0
pub fn normalized(weights: &[f64]) -> Option<Array1<f64>> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.) {
        return None;
    }
    let total: f64 = weights.iter().sum();
    if total > 0. {
        Some(weights.iter().map(|w| w / total).collect())
    } else {
        None
    }
}

/// Entropy weight method: objectives with more contrast over the sample get more weight.
///
/// `objectives` is a (n, m) matrix of minimized values, rows with a non finite value
/// are ignored. Falls back to equal weights when no objective discriminates.
pub fn entropy_weights(objectives: &Array2<f64>) -> Array1<f64> {
    let m = objectives.ncols();
    let rows: Vec<_> = objectives
        .rows()
        .into_iter()
        .filter(|r| r.iter().all(|v| v.is_finite()))
        .collect();
    let n = rows.len();
    if n < 2 {
        return equal_weights(m);
    }
    let ln_n = (n as f64).ln();
    let divergence: Array1<f64> = (0..m)
        .map(|j| {
            let lo = rows.iter().map(|r| r[j]).fold(f64::INFINITY, f64::min);
            let hi = rows.iter().map(|r| r[j]).fold(f64::NEG_INFINITY, f64::max);
            if hi - lo <= 0. {
                return 0.;
            }
            let scaled: Vec<f64> = rows.iter().map(|r| (r[j] - lo) / (hi - lo)).collect();
            let total: f64 = scaled.iter().sum();
            let entropy = -scaled
                .iter()
                .map(|v| v / total)
                .filter(|p| *p > 0.)
                .map(|p| p * p.ln())
                .sum::<f64>()
                / ln_n;
            1. - entropy
        })
        .collect();
    normalized(divergence.as_slice().unwrap_or(&[])).unwrap_or_else(|| equal_weights(m))
}

/// Reciprocal comparison matrix `a_ij = p_i / p_j` of positive priorities
pub fn comparison_matrix(priorities: &[f64]) -> Result<Array2<f64>> {
    if priorities.iter().any(|p| !(p.is_finite() && *p > 0.)) {
        return Err(OptimError::InvalidConfigError(
            "AHP priorities should be positive".to_string(),
        ));
    }
    let m = priorities.len();
    Ok(Array2::from_shape_fn((m, m), |(i, j)| {
        priorities[i] / priorities[j]
    }))
}

/// Principal eigenvector of a positive pairwise comparison matrix by power iteration,
/// normalized to sum 1
pub fn ahp_weights(matrix: &Array2<f64>) -> Result<Array1<f64>> {
    let m = matrix.nrows();
    if m == 0 || matrix.ncols() != m || matrix.iter().any(|v| !(v.is_finite() && *v > 0.)) {
        return Err(OptimError::InvalidConfigError(
            "AHP comparison matrix should be square with positive entries".to_string(),
        ));
    }
    let mut w = equal_weights(m);
    for _ in 0..AHP_MAX_ITERATIONS {
        let next = matrix.dot(&w);
        let next = &next / next.sum();
        let delta = (&next - &w).mapv(f64::abs).sum();
        w = next;
        if delta < AHP_TOLERANCE {
            break;
        }
    }
    let lambda = matrix.dot(&w).sum();
    if m > 2 {
        // Saaty consistency index
        let ci = (lambda - m as f64) / (m - 1) as f64;
        debug!("AHP consistency index = {ci:.4}");
    }
    Ok(w)
}

/// Weights of `problem` objectives according to the preference weight model
pub(crate) fn resolve_weights(
    problem: &OptimizationProblem,
    preferences: &Preferences,
    rng: Xoshiro256Plus,
) -> Result<Array1<f64>> {
    let m = problem.n_objectives();
    let weights = match preferences.weight_model {
        WeightModel::Equal => equal_weights(m),
        WeightModel::UserDefined => {
            let given = preferences
                .weights
                .clone()
                .unwrap_or_else(|| problem.weights().to_vec());
            match (given.len() == m).then(|| normalized(&given)).flatten() {
                Some(w) => w,
                None => {
                    warn!("User weights {given:?} unusable for {m} objectives, equal weights used");
                    equal_weights(m)
                }
            }
        }
        WeightModel::Entropy => {
            let n = preferences.entropy_samples.max(2);
            let doe = Lhs::new(problem.xlimits()).with_rng(rng).sample(n);
            let mut values = Array2::zeros((n, m));
            for (i, x) in doe.rows().into_iter().enumerate() {
                values
                    .row_mut(i)
                    .assign(&problem.signed_objectives(&x.to_vec()));
            }
            entropy_weights(&values)
        }
        WeightModel::Ahp => match (&preferences.pairwise_comparisons, &preferences.priorities) {
            (Some(rows), _) => {
                if rows.len() != m || rows.iter().any(|r| r.len() != m) {
                    return Err(OptimError::InvalidConfigError(format!(
                        "AHP comparison matrix should be {m}x{m}"
                    )));
                }
                let matrix = Array2::from_shape_fn((m, m), |(i, j)| rows[i][j]);
                ahp_weights(&matrix)?
            }
            (None, Some(priorities)) if priorities.len() == m => {
                ahp_weights(&comparison_matrix(priorities)?)?
            }
            _ => {
                warn!("No AHP comparisons given, equal weights used");
                equal_weights(m)
            }
        },
    };
    debug!("{:?} weights = {weights}", preferences.weight_model);
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::tests::build;
    use crate::types::{ObjectiveSpec, OptimizationRequest, ParameterSpec};
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use ndarray_rand::rand::SeedableRng;

    #[test]
    fn test_normalized() {
        assert_eq!(normalized(&[1., 3.]), Some(array![0.25, 0.75]));
        assert_eq!(normalized(&[0., 0.]), None);
        assert_eq!(normalized(&[1., -1.]), None);
    }

    #[test]
    fn test_entropy_weights() {
        // second column constant: no information
        let values = array![[0., 1.], [1., 1.], [2., 1.], [f64::INFINITY, 0.]];
        assert_eq!(entropy_weights(&values), array![1., 0.]);
        let constant = array![[1., 1.], [1., 1.]];
        assert_eq!(entropy_weights(&constant), array![0.5, 0.5]);
        // a single outlier carries more contrast than a uniform spread
        let values = array![[0., 0.], [0., 1.], [0., 2.], [1., 3.]];
        let w = entropy_weights(&values);
        assert!(w[0] > w[1]);
        assert_abs_diff_eq!(w.sum(), 1., epsilon = 1e-12);
    }

    #[test]
    fn test_ahp_weights() {
        let matrix = comparison_matrix(&[4., 2., 2.]).unwrap();
        let w = ahp_weights(&matrix).unwrap();
        assert_abs_diff_eq!(w, array![0.5, 0.25, 0.25], epsilon = 1e-9);
        assert!(comparison_matrix(&[1., 0.]).is_err());
        assert!(ahp_weights(&Array2::zeros((2, 3))).is_err());
    }

    #[test]
    fn test_resolve_weights() {
        let request = OptimizationRequest::new("weighted_sum")
            .parameter(ParameterSpec::new("x", 0., [0., 1.]))
            .objective(ObjectiveSpec::expression("a", "x").weight(3.))
            .objective(ObjectiveSpec::expression("b", "1 - x"));
        let problem = build(&request).unwrap();
        let rng = || Xoshiro256Plus::seed_from_u64(0);

        let prefs = Preferences::default();
        assert_eq!(resolve_weights(&problem, &prefs, rng()).unwrap(), array![0.5, 0.5]);
        let prefs = Preferences::default().weight_model(WeightModel::UserDefined);
        assert_eq!(resolve_weights(&problem, &prefs, rng()).unwrap(), array![0.75, 0.25]);
        let prefs = prefs.weights(vec![1.]);
        assert_eq!(resolve_weights(&problem, &prefs, rng()).unwrap(), array![0.5, 0.5]);
        let prefs = Preferences::default()
            .weight_model(WeightModel::Ahp)
            .priorities(vec![1., 3.]);
        let w = resolve_weights(&problem, &prefs, rng()).unwrap();
        assert_abs_diff_eq!(w, array![0.25, 0.75], epsilon = 1e-9);
        let prefs = Preferences::default().weight_model(WeightModel::Entropy);
        let w = resolve_weights(&problem, &prefs, rng()).unwrap();
        assert_abs_diff_eq!(w.sum(), 1., epsilon = 1e-12);
    }
}
