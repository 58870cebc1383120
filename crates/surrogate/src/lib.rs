//! This library implements the surrogate models used by tunebox to approximate
//! expensive objectives and the registry managing their lifecycle.
//!
//! Three kinds of regressors are available, all fitted through the
//! [linfa](https://github.com/rust-ml/linfa) `Fit` interface:
//!
//! * [GaussianProcess] with a constant mean and a squared exponential or Matérn 5/2
//!   kernel, the only model giving a prediction variance,
//! * [RandomForest], an ensemble of bagged regression trees,
//! * [NeuralNetwork], a fully connected network trained with Adam.
//!
//! Trained models are boxed as [SurrogateModel] trait objects and kept by a
//! [SurrogateRegistry] keyed by model id, which splits training data, measures
//! held-out accuracy, updates models with new samples and persists them as JSON.
//!
//! # Example
//!
//! ```
//! use linfa::prelude::*;
//! use ndarray::{array, Array, Axis};
//! use tunebox_surrogate::{GaussianProcess, Kernel};
//!
//! let xt = Array::linspace(0., 4., 8).insert_axis(Axis(1));
//! let yt = xt.column(0).mapv(f64::sin);
//!
//! let gp = GaussianProcess::params(Kernel::SquaredExponential)
//!     .fit(&Dataset::new(xt, yt))
//!     .expect("GP fitted");
//! let (mean, var) = gp.predict_valvar(&array![[1.5]]).expect("GP prediction");
//! assert!((mean[0] - 1.5f64.sin()).abs() < 1e-2);
//! assert!(var[0] >= 0.);
//! ```
mod correlation;
mod errors;
mod forest;
mod gaussian_process;
mod metrics;
mod model;
mod network;
mod optimization;
mod registry;
mod utils;

pub use correlation::Kernel;
pub use errors::*;
pub use forest::*;
pub use gaussian_process::*;
pub use metrics::*;
pub use model::*;
pub use network::*;
pub use registry::*;
pub use utils::{normalize, train_test_split, Split};
