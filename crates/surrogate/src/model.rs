use crate::errors::{Result, SurrogateError};
use crate::forest::{ForestParams, RandomForest};
use crate::gaussian_process::{GaussianProcess, GpParams};
use crate::network::{MlpParams, NeuralNetwork};

use linfa::prelude::{Dataset, Fit};
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of surrogate model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurrogateKind {
    /// Gaussian process regression, the only kind giving an uncertainty
    GaussianProcess,
    /// Bagged regression trees
    EnsembleTree,
    /// Feed-forward neural network
    NeuralNetwork,
}

impl fmt::Display for SurrogateKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SurrogateKind::GaussianProcess => "gaussian_process",
            SurrogateKind::EnsembleTree => "ensemble_tree",
            SurrogateKind::NeuralNetwork => "neural_network",
        };
        write!(f, "{name}")
    }
}

impl FromStr for SurrogateKind {
    type Err = SurrogateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "gaussian_process" | "gp" | "kriging" => Ok(SurrogateKind::GaussianProcess),
            "ensemble_tree" | "random_forest" | "forest" => Ok(SurrogateKind::EnsembleTree),
            "neural_network" | "mlp" | "nn" => Ok(SurrogateKind::NeuralNetwork),
            other => Err(SurrogateError::UnsupportedOperationError(format!(
                "unknown surrogate model kind '{other}'"
            ))),
        }
    }
}

/// Training configuration of a surrogate model, every field has a default
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateConfig {
    /// Fraction of samples held out to measure accuracy, 0 for in-sample metrics
    pub test_fraction: f64,
    /// Seed of the train/held-out shuffling
    pub seed: u64,
    pub gaussian_process: GpParams,
    pub ensemble_tree: ForestParams,
    pub neural_network: MlpParams,
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        SurrogateConfig {
            test_fraction: 0.2,
            seed: 42,
            gaussian_process: GpParams::default(),
            ensemble_tree: ForestParams::default(),
            neural_network: MlpParams::default(),
        }
    }
}

impl SurrogateConfig {
    /// Set the held-out fraction
    pub fn test_fraction(mut self, test_fraction: f64) -> Self {
        self.test_fraction = test_fraction;
        self
    }

    /// Set the split seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set gaussian process parameters
    pub fn gaussian_process(mut self, params: GpParams) -> Self {
        self.gaussian_process = params;
        self
    }

    /// Set forest parameters
    pub fn ensemble_tree(mut self, params: ForestParams) -> Self {
        self.ensemble_tree = params;
        self
    }

    /// Set network parameters
    pub fn neural_network(mut self, params: MlpParams) -> Self {
        self.neural_network = params;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(SurrogateError::InvalidValueError(format!(
                "test fraction should be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        Ok(())
    }

    /// Fits a model of the given kind on (x, y)
    pub fn fit(
        &self,
        kind: SurrogateKind,
        x: &ArrayView2<f64>,
        y: &ArrayView1<f64>,
    ) -> Result<Box<dyn SurrogateModel>> {
        let dataset = Dataset::new(x.to_owned(), y.to_owned());
        let model: Box<dyn SurrogateModel> = match kind {
            SurrogateKind::GaussianProcess => {
                Box::new(self.gaussian_process.clone().fit(&dataset)?)
            }
            SurrogateKind::EnsembleTree => Box::new(self.ensemble_tree.clone().fit(&dataset)?),
            SurrogateKind::NeuralNetwork => Box::new(self.neural_network.clone().fit(&dataset)?),
        };
        Ok(model)
    }
}

/// A trained surrogate model
#[typetag::serde(tag = "type")]
pub trait SurrogateModel: fmt::Display + Send + Sync {
    /// Kind of the model
    fn kind(&self) -> SurrogateKind;
    /// Returns input/output dims
    fn dims(&self) -> (usize, usize);
    /// Predict output values at n points given as (n, xdim) matrix.
    fn predict(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>>;
    /// Predict both output values and variance at n points
    fn predict_valvar(&self, x: &ArrayView2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        let _ = x;
        Err(SurrogateError::UnsupportedOperationError(format!(
            "uncertainty is not available for {} models",
            self.kind()
        )))
    }
    /// Relative importance of each input component when the model provides one
    fn feature_importances(&self) -> Option<Array1<f64>> {
        None
    }
    /// Returns a model updated with new samples, `x_all`/`y_all` hold every sample
    /// seen so far, new ones included.
    fn updated(
        &self,
        x_all: &ArrayView2<f64>,
        y_all: &ArrayView1<f64>,
        x_new: &ArrayView2<f64>,
        y_new: &ArrayView1<f64>,
        config: &SurrogateConfig,
    ) -> Result<Box<dyn SurrogateModel>>;
}

#[typetag::serde]
impl SurrogateModel for GaussianProcess {
    fn kind(&self) -> SurrogateKind {
        SurrogateKind::GaussianProcess
    }

    fn dims(&self) -> (usize, usize) {
        GaussianProcess::dims(self)
    }

    fn predict(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        GaussianProcess::predict(self, x)
    }

    fn predict_valvar(&self, x: &ArrayView2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        GaussianProcess::predict_valvar(self, x)
    }

    fn updated(
        &self,
        x_all: &ArrayView2<f64>,
        y_all: &ArrayView1<f64>,
        _x_new: &ArrayView2<f64>,
        _y_new: &ArrayView1<f64>,
        config: &SurrogateConfig,
    ) -> Result<Box<dyn SurrogateModel>> {
        config.fit(SurrogateKind::GaussianProcess, x_all, y_all)
    }
}

#[typetag::serde]
impl SurrogateModel for RandomForest {
    fn kind(&self) -> SurrogateKind {
        SurrogateKind::EnsembleTree
    }

    fn dims(&self) -> (usize, usize) {
        (self.feature_importances().len(), 1)
    }

    fn predict(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        RandomForest::predict(self, x)
    }

    fn feature_importances(&self) -> Option<Array1<f64>> {
        Some(RandomForest::feature_importances(self).to_owned())
    }

    fn updated(
        &self,
        x_all: &ArrayView2<f64>,
        y_all: &ArrayView1<f64>,
        _x_new: &ArrayView2<f64>,
        _y_new: &ArrayView1<f64>,
        config: &SurrogateConfig,
    ) -> Result<Box<dyn SurrogateModel>> {
        config.fit(SurrogateKind::EnsembleTree, x_all, y_all)
    }
}

#[typetag::serde]
impl SurrogateModel for NeuralNetwork {
    fn kind(&self) -> SurrogateKind {
        SurrogateKind::NeuralNetwork
    }

    fn dims(&self) -> (usize, usize) {
        (self.n_inputs(), 1)
    }

    fn predict(&self, x: &ArrayView2<f64>) -> Result<Array1<f64>> {
        NeuralNetwork::predict(self, x)
    }

    /// Warm-starts on the new samples only
    fn updated(
        &self,
        _x_all: &ArrayView2<f64>,
        _y_all: &ArrayView1<f64>,
        x_new: &ArrayView2<f64>,
        y_new: &ArrayView1<f64>,
        _config: &SurrogateConfig,
    ) -> Result<Box<dyn SurrogateModel>> {
        let mut network = self.clone();
        let epochs = self.params_used().additional_epochs();
        network.partial_fit(x_new, y_new, epochs)?;
        Ok(Box::new(network))
    }
}
