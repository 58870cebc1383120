//! Correlation kernels `r(x, x')` of the gaussian process, expressed on componentwise
//! absolute differences `d = |x - x'|` and scaled by the `theta` hyperparameters
//! (inverse of length scales).
use ndarray::{Array1, ArrayBase, Axis, Data, Ix1, Ix2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SurrogateError;

/// Stationary correlation kernel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    /// `exp(-0.5 * sum(theta^2 d^2))`
    #[default]
    SquaredExponential,
    /// Matern 5/2 kernel, twice differentiable
    Matern52,
}

impl Kernel {
    /// Correlation values for each row of differences `d` (n, nx), returned as (n,)
    pub fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Array1<f64> {
        match self {
            Kernel::SquaredExponential => {
                let theta2 = theta.mapv(|v| v * v);
                d.mapv(|v| v * v)
                    .dot(&theta2)
                    .mapv(|v| f64::exp(-0.5 * v))
            }
            Kernel::Matern52 => {
                let sqrt5 = 5f64.sqrt();
                let scaled = d * theta;
                let a = scaled
                    .mapv(|v| 1. + sqrt5 * v + 5. / 3. * v * v)
                    .map_axis(Axis(1), |row| row.product());
                let b = scaled.sum_axis(Axis(1)).mapv(|v| f64::exp(-sqrt5 * v));
                a * b
            }
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Kernel::SquaredExponential => write!(f, "SquaredExponential"),
            Kernel::Matern52 => write!(f, "Matern52"),
        }
    }
}

impl FromStr for Kernel {
    type Err = SurrogateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rbf" | "squared_exponential" | "squaredexponential" => Ok(Kernel::SquaredExponential),
            "matern" | "matern52" | "matern_52" => Ok(Kernel::Matern52),
            other => Err(SurrogateError::InvalidValueError(format!(
                "unknown kernel '{other}'"
            ))),
        }
    }
}
