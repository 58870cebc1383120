use crate::correlation::Kernel;
use crate::errors::{Result, SurrogateError};
use crate::optimization::{optimize_params, prepare_multistart, CobylaParams};
use crate::utils::{pairwise_differences, DiffMatrix, NormalizedData};

use linfa::prelude::{DatasetBase, Fit, PredictInplace};
use linfa::ParamGuard;
use linfa_linalg::{cholesky::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use web_time::Instant;

/// Default number of multistart for hyperparameters optimization
pub const GP_OPTIM_N_START: usize = 10;
/// Minimum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MIN_EVAL: usize = 25;
/// Maximum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MAX_EVAL: usize = 1000;
/// Default nugget added to the correlation matrix diagonal
pub const GP_DEFAULT_NUGGET: f64 = 1e-10;

/// Number of nugget escalations tried when the correlation matrix is not positive definite
const NUGGET_ESCALATIONS: i32 = 4;

/// A set of validated GP parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpValidParams {
    /// Correlation kernel
    pub(crate) kernel: Kernel,
    /// Initial guess of theta, either one value for all components or one per input component
    pub(crate) theta_init: Array1<f64>,
    /// Search space of each theta component
    pub(crate) theta_bounds: (f64, f64),
    /// Number of internal likelihood optimization restarts
    #[serde(alias = "n_restarts")]
    pub(crate) n_start: usize,
    /// Max number of internal likelihood evaluations during optimization
    pub(crate) max_eval: usize,
    /// Parameter to improve numerical stability
    #[serde(alias = "alpha")]
    pub(crate) nugget: f64,
}

impl Default for GpValidParams {
    fn default() -> GpValidParams {
        GpValidParams {
            kernel: Kernel::default(),
            theta_init: Array1::from_elem(1, 1e-1),
            theta_bounds: (1e-2, 1e1),
            n_start: GP_OPTIM_N_START,
            max_eval: GP_COBYLA_MAX_EVAL,
            nugget: GP_DEFAULT_NUGGET,
        }
    }
}

impl GpValidParams {
    /// Get correlation kernel
    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Get starting theta value for optimization
    pub fn theta_init(&self) -> &Array1<f64> {
        &self.theta_init
    }

    /// Get theta search space
    pub fn theta_bounds(&self) -> (f64, f64) {
        self.theta_bounds
    }

    /// Get the number of internal optimization restart
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the max number of internal likelihood evaluations during one optimization
    pub fn max_eval(&self) -> usize {
        self.max_eval
    }

    /// Get nugget, floored at `100 * f64::EPSILON`
    pub fn nugget(&self) -> f64 {
        self.nugget.max(100. * f64::EPSILON)
    }
}

/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](GaussianProcess).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GpParams(GpValidParams);

impl GpParams {
    /// A constructor for GP parameters given a correlation kernel
    pub fn new(kernel: Kernel) -> GpParams {
        Self(GpValidParams {
            kernel,
            ..Default::default()
        })
    }

    /// Set correlation kernel.
    pub fn kernel(mut self, kernel: Kernel) -> Self {
        self.0.kernel = kernel;
        self
    }

    /// Set initial theta, either one value or one value per input component.
    pub fn theta_init(mut self, theta_init: Array1<f64>) -> Self {
        self.0.theta_init = theta_init;
        self
    }

    /// Set theta hyper parameter search space.
    pub fn theta_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.0.theta_bounds = (lower, upper);
        self
    }

    /// Set the number of internal GP hyperparameter theta optimization restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the max number of internal likelihood evaluations during one optimization,
    /// floored at [GP_COBYLA_MIN_EVAL].
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = GP_COBYLA_MIN_EVAL.max(max_eval);
        self
    }

    /// Set nugget.
    ///
    /// Nugget is used to improve numerical stability
    pub fn nugget(mut self, nugget: f64) -> Self {
        self.0.nugget = nugget;
        self
    }
}

impl From<GpValidParams> for GpParams {
    fn from(valid: GpValidParams) -> Self {
        GpParams(valid)
    }
}

impl ParamGuard for GpParams {
    type Checked = GpValidParams;
    type Error = SurrogateError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let (lo, up) = self.0.theta_bounds;
        if !(lo > 0. && lo < up && up.is_finite()) {
            return Err(SurrogateError::InvalidValueError(format!(
                "theta bounds should satisfy 0 < lower < upper, got ({lo}, {up})"
            )));
        }
        if self.0.theta_init.is_empty() || self.0.theta_init.iter().any(|t| !(*t > 0.)) {
            return Err(SurrogateError::InvalidValueError(
                "initial theta values should be strictly positive".to_string(),
            ));
        }
        if !(self.0.nugget >= 0. && self.0.nugget.is_finite()) {
            return Err(SurrogateError::InvalidValueError(format!(
                "nugget should be a non negative value, got {}",
                self.0.nugget
            )));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// Internal parameters computed during training
/// used later on in prediction computations
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub(crate) struct GpInnerParams {
    /// Gaussian process variance
    sigma2: f64,
    /// Constant mean estimated by generalized least-squares
    beta: f64,
    /// Gaussian Process weights
    gamma: Array2<f64>,
    /// Cholesky decomposition of the correlation matrix \[R\]
    r_chol: Array2<f64>,
    /// Solution of the linear equation system : \[R\] x Ft = 1
    ft: Array2<f64>,
    /// Norm of ft
    ft_norm: f64,
}

/// Gaussian process regression (ordinary kriging) with a constant mean.
///
/// The output is modeled as `Y(x) = beta + Z(x)` where `Z` is a zero mean gaussian process
/// of variance `sigma^2` and correlation `r(x, x')` given by the [Kernel].
/// Inputs and outputs are standardized, `theta` is tuned by maximizing the reduced
/// likelihood with COBYLA restarted from maximin LHS points in log10 space.
///
/// ```no_run
/// use tunebox_surrogate::{GaussianProcess, Kernel};
/// use linfa::prelude::*;
/// use ndarray::{arr2, Array, Axis};
///
/// let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]]);
/// let yt = xt.column(0).mapv(|v| (v - 3.5) * ((v - 3.5) / std::f64::consts::PI).sin());
///
/// let gp = GaussianProcess::params(Kernel::SquaredExponential)
///     .fit(&Dataset::new(xt, yt))
///     .expect("GP trained");
///
/// let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
/// let (mean, variance) = gp.predict_valvar(&xtest).expect("GP prediction");
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GaussianProcess {
    /// Parameter of the autocorrelation model equal to the inverse of length scale
    theta: Array1<f64>,
    /// Reduced likelihood value (result from internal optimization)
    likelihood: f64,
    /// Gaussian process internal fitted params
    inner_params: GpInnerParams,
    /// Training inputs
    xt_norm: NormalizedData,
    /// Training outputs
    yt_norm: NormalizedData,
    /// Training dataset (input, output)
    pub(crate) training_data: (Array2<f64>, Array1<f64>),
    /// Parameters used to fit this model
    pub(crate) params: GpValidParams,
}

impl fmt::Display for GaussianProcess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(kernel={}, theta={}, variance={}, likelihood={})",
            self.params.kernel, self.theta, self.inner_params.sigma2, self.likelihood,
        )
    }
}

impl GaussianProcess {
    /// Gp parameters contructor
    pub fn params(kernel: Kernel) -> GpParams {
        GpParams::new(kernel)
    }

    /// Predict output values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n scalar output values as a vector (n,).
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        let xnorm = self.normalize_input(x)?;
        let corr = self._compute_correlation(&xnorm)?;
        Ok(self._mean(&corr))
    }

    /// Predict variance values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n variance values as (n,) column vector.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        let xnorm = self.normalize_input(x)?;
        let corr = self._compute_correlation(&xnorm)?;
        self._variance(&corr)
    }

    /// Predict both output values and variance at n given `x` points of nx components
    pub fn predict_valvar(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let xnorm = self.normalize_input(x)?;
        let corr = self._compute_correlation(&xnorm)?;
        Ok((self._mean(&corr), self._variance(&corr)?))
    }

    fn normalize_input(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array2<f64>> {
        if x.ncols() != self.xt_norm.data.ncols() {
            return Err(SurrogateError::InvalidValueError(format!(
                "expected inputs with {} components, got {}",
                self.xt_norm.data.ncols(),
                x.ncols()
            )));
        }
        Ok(self.xt_norm.apply(x))
    }

    fn _mean(&self, corr: &Array2<f64>) -> Array1<f64> {
        let y_ = corr.dot(&self.inner_params.gamma).remove_axis(Axis(1)) + self.inner_params.beta;
        self.yt_norm.revert(&y_)
    }

    fn _variance(&self, corr: &Array2<f64>) -> Result<Array1<f64>> {
        let inners = &self.inner_params;
        let rt = inners.r_chol.solve_triangular(&corr.t(), UPLO::Lower)?;
        let u = inners
            .ft
            .t()
            .dot(&rt)
            .remove_axis(Axis(0))
            .mapv(|v| (v - 1.) / inners.ft_norm);
        let mse = (1. - rt.mapv(|v| v * v).sum_axis(Axis(0)) + u.mapv(|v| v * v))
            .mapv(|v| inners.sigma2 * v);
        // Mean Squared Error might be slightly negative depending on
        // machine precision: set to zero in that case
        Ok(mse.mapv(|v| if v < 0. { 0. } else { v }))
    }

    /// Correlation (n, nt) between normalized points and training points
    fn _compute_correlation(&self, xnorm: &Array2<f64>) -> Result<Array2<f64>> {
        let dx = pairwise_differences(xnorm, &self.xt_norm.data);
        let r = self.params.kernel.value(&dx, &self.theta);
        let nt = self.xt_norm.data.nrows();
        r.into_shape((xnorm.nrows(), nt))
            .map_err(|e| SurrogateError::InvalidValueError(e.to_string()))
    }

    /// Optimized theta hyperparameters
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Process variance in output units
    pub fn variance(&self) -> f64 {
        self.inner_params.sigma2
    }

    /// Reduced likelihood at the optimum
    pub fn likelihood(&self) -> f64 {
        self.likelihood
    }

    /// Input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.training_data.0.ncols(), 1)
    }

    /// Training inputs and outputs
    pub fn training_data(&self) -> &(Array2<f64>, Array1<f64>) {
        &self.training_data
    }

    /// Parameters used to fit this model
    pub fn params_used(&self) -> &GpValidParams {
        &self.params
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for GaussianProcess {
    fn predict_inplace(&self, x: &ArrayBase<D, Ix2>, y: &mut Array1<f64>) {
        assert_eq!(
            x.nrows(),
            y.len(),
            "The number of data points must match the number of output targets."
        );
        *y = self
            .predict(x)
            .unwrap_or_else(|_| Array1::from_elem(x.nrows(), f64::NAN));
    }

    fn default_target(&self, x: &ArrayBase<D, Ix2>) -> Array1<f64> {
        Array1::zeros(x.nrows())
    }
}

impl<D: Data<Elem = f64>> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, SurrogateError>
    for GpValidParams
{
    type Object = GaussianProcess;

    /// Fit GP parameters using maximum likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets().to_owned().insert_axis(Axis(1));
        if x.nrows() < 2 {
            return Err(SurrogateError::InsufficientDataError {
                required: 2,
                actual: x.nrows(),
            });
        }
        let dim = x.ncols();
        let theta0 = match self.theta_init.len() {
            1 => Array1::from_elem(dim, self.theta_init[0]),
            n if n == dim => self.theta_init.to_owned(),
            n => {
                return Err(SurrogateError::InvalidValueError(format!(
                    "initial theta should be either 1-dim or {dim}-dim, got {n}"
                )))
            }
        };

        let xtrain = NormalizedData::new(x);
        let ytrain = NormalizedData::new(&y);
        let x_distances = DiffMatrix::new(&xtrain.data);
        if x_distances
            .d
            .rows()
            .into_iter()
            .any(|row| row.iter().all(|v| *v == 0.))
        {
            warn!("Multiple training inputs share the same value (at least same row twice)");
        }

        let kernel = self.kernel;
        let nugget = self.nugget();
        let objfn = |x: &[f64]| -> f64 {
            let theta = Array1::from_iter(x.iter().map(|v| 10f64.powf(*v)));
            if theta.iter().any(|v| v.is_nan()) {
                return f64::INFINITY;
            }
            let rxx = kernel.value(&x_distances.d, &theta);
            match reduced_likelihood(&rxx, &x_distances, &ytrain, nugget) {
                Ok(r) if !r.0.is_nan() => -r.0,
                _ => f64::INFINITY,
            }
        };

        let bounds = vec![self.theta_bounds; dim];
        let (theta_inits, bounds) = prepare_multistart(self.n_start, &theta0, &bounds);
        debug!("Optimize with multistart theta = {theta_inits:?} and bounds = {bounds:?}");
        let now = Instant::now();
        let opt_params = (0..theta_inits.nrows())
            .into_par_iter()
            .map(|i| {
                optimize_params(
                    objfn,
                    &theta_inits.row(i).to_owned(),
                    &bounds,
                    CobylaParams {
                        maxeval: (10 * theta_inits.ncols())
                            .clamp(GP_COBYLA_MIN_EVAL, self.max_eval.max(GP_COBYLA_MIN_EVAL)),
                        ..CobylaParams::default()
                    },
                )
            })
            .reduce(
                || (f64::INFINITY, theta_inits.row(0).to_owned()),
                |a, b| if b.0 < a.0 { b } else { a },
            );
        debug!("elapsed optim = {:?}", now.elapsed().as_millis());
        let theta = opt_params.1.mapv(|v| 10f64.powf(v));

        let rxx = kernel.value(&x_distances.d, &theta);
        let mut attempt = 0;
        let (likelihood, inner_params) = loop {
            let jitter = nugget * 1e3f64.powi(attempt);
            match reduced_likelihood(&rxx, &x_distances, &ytrain, jitter) {
                Ok(res) => break res,
                Err(err) if attempt < NUGGET_ESCALATIONS => {
                    warn!("GP fit failed with nugget {jitter:e} ({err}), retrying with a larger one");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        };
        Ok(GaussianProcess {
            theta,
            likelihood,
            inner_params,
            xt_norm: xtrain,
            yt_norm: ytrain,
            training_data: (x.to_owned(), y.remove_axis(Axis(1))),
            params: self.clone(),
        })
    }
}

/// Compute reduced likelihood function
/// rxx: correlation values of distinct pairs of training points,
/// x_distances: pairwise distances between x samples
/// ytrain: normalized output training values
/// nugget: factor to improve numerical stability
fn reduced_likelihood(
    rxx: &Array1<f64>,
    x_distances: &DiffMatrix,
    ytrain: &NormalizedData,
    nugget: f64,
) -> Result<(f64, GpInnerParams)> {
    let n_obs = x_distances.n_obs;
    let mut r_mx: Array2<f64> = Array2::eye(n_obs).mapv(|v: f64| v + v * nugget);
    for (i, ij) in x_distances.d_indices.outer_iter().enumerate() {
        r_mx[[ij[0], ij[1]]] = rxx[i];
        r_mx[[ij[1], ij[0]]] = rxx[i];
    }
    let r_chol = r_mx.cholesky()?;
    // Solve generalized least squared problem for the constant mean
    let ft = r_chol.solve_triangular(&Array2::ones((n_obs, 1)), UPLO::Lower)?;
    let ft_norm2 = ft.mapv(|v| v * v).sum();
    if !(ft_norm2 > f64::EPSILON) {
        return Err(SurrogateError::LikelihoodComputationError(
            "ft is too ill conditioned, try another theta again".to_string(),
        ));
    }
    let yt = r_chol.solve_triangular(&ytrain.data, UPLO::Lower)?;
    let beta = ft.t().dot(&yt)[[0, 0]] / ft_norm2;
    let rho = yt - &ft * beta;
    let rho_sqr = rho.mapv(|v| v * v).sum();
    let gamma = r_chol.t().solve_triangular_into(rho, UPLO::Upper)?;

    // The determinant of R is equal to the squared product of
    // the diagonal elements of its Cholesky decomposition r_chol
    let n = n_obs as f64;
    let logdet = r_chol.diag().mapv(f64::log10).sum() * 2. / n;
    let sigma2 = rho_sqr / n;
    let reduced_likelihood = -n * (sigma2.max(f64::MIN_POSITIVE).log10() + logdet);

    Ok((
        reduced_likelihood,
        GpInnerParams {
            sigma2: sigma2 * ytrain.std[0] * ytrain.std[0],
            beta,
            gamma,
            r_chol,
            ft,
            ft_norm: ft_norm2.sqrt(),
        },
    ))
}
