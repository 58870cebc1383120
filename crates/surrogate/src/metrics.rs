//! Accuracy metrics of a surrogate model on a test set
use ndarray::{ArrayBase, Data, Ix1, Zip};
use serde::{Deserialize, Serialize};

/// Regression accuracy of predictions against reference values
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Coefficient of determination
    pub r2: f64,
    /// Mean squared error
    pub mse: f64,
    /// Root mean squared error
    pub rmse: f64,
    /// Mean absolute error
    pub mae: f64,
    /// Largest absolute error
    pub max_error: f64,
}

impl RegressionMetrics {
    /// Metrics of `y_pred` against `y_true`, both of the same length.
    ///
    /// With constant reference values the r2 score is 1 for a perfect prediction and 0 otherwise.
    pub fn compute(
        y_true: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        y_pred: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Self {
        let n = y_true.len();
        if n == 0 {
            return RegressionMetrics {
                r2: f64::NAN,
                mse: f64::NAN,
                rmse: f64::NAN,
                mae: f64::NAN,
                max_error: f64::NAN,
            };
        }
        let residuals = y_true - y_pred;
        let sse = residuals.mapv(|v| v * v).sum();
        let mse = sse / n as f64;
        let mae = residuals.mapv(f64::abs).sum() / n as f64;
        let max_error = residuals.iter().fold(0., |acc: f64, v| acc.max(v.abs()));
        let mean = y_true.sum() / n as f64;
        let tss = y_true.mapv(|v| (v - mean) * (v - mean)).sum();
        let r2 = if tss > 0. {
            1. - sse / tss
        } else if sse == 0. {
            1.
        } else {
            0.
        };
        RegressionMetrics {
            r2,
            mse,
            rmse: mse.sqrt(),
            mae,
            max_error,
        }
    }
}

/// Calibration of a probabilistic prediction
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyMetrics {
    /// Fraction of reference values within one standard deviation
    pub coverage_1std: f64,
    /// Fraction of reference values within two standard deviations
    pub coverage_2std: f64,
    /// Mean predicted standard deviation
    pub average_uncertainty: f64,
}

impl UncertaintyMetrics {
    pub fn compute(
        y_true: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        y_mean: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        y_std: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Self {
        let n = y_true.len().max(1) as f64;
        let mut within1 = 0usize;
        let mut within2 = 0usize;
        Zip::from(y_true)
            .and(y_mean)
            .and(y_std)
            .for_each(|&t, &m, &s| {
                let err = (t - m).abs();
                if err <= s {
                    within1 += 1;
                }
                if err <= 2. * s {
                    within2 += 1;
                }
            });
        UncertaintyMetrics {
            coverage_1std: within1 as f64 / n,
            coverage_2std: within2 as f64 / n,
            average_uncertainty: y_std.sum() / n,
        }
    }
}
