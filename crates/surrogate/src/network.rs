//! Fully connected feed-forward network regressor trained with Adam.
use crate::errors::{Result, SurrogateError};
use crate::utils::normalize;

use linfa::prelude::{DatasetBase, Fit, PredictInplace};
use linfa::ParamGuard;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use log::debug;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPSILON: f64 = 1e-8;

/// Activation of hidden layers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Logistic,
}

impl Activation {
    fn apply(&self, z: Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv_into(|v| v.max(0.)),
            Activation::Tanh => z.mapv_into(f64::tanh),
            Activation::Logistic => z.mapv_into(|v| 1. / (1. + (-v).exp())),
        }
    }

    /// Derivative expressed with the activated values
    fn derivative(&self, a: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => a.mapv(|v| if v > 0. { 1. } else { 0. }),
            Activation::Tanh => a.mapv(|v| 1. - v * v),
            Activation::Logistic => a.mapv(|v| v * (1. - v)),
        }
    }
}

impl FromStr for Activation {
    type Err = SurrogateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "relu" => Ok(Activation::Relu),
            "tanh" => Ok(Activation::Tanh),
            "logistic" | "sigmoid" => Ok(Activation::Logistic),
            other => Err(SurrogateError::InvalidValueError(format!(
                "unknown activation '{other}'"
            ))),
        }
    }
}

/// A set of validated network parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpValidParams {
    /// Sizes of hidden layers
    #[serde(alias = "hidden_layer_sizes")]
    pub(crate) hidden_layers: Vec<usize>,
    pub(crate) activation: Activation,
    pub(crate) learning_rate: f64,
    /// L2 regularization factor
    pub(crate) alpha: f64,
    /// Maximum number of epochs
    pub(crate) max_iter: usize,
    pub(crate) batch_size: usize,
    /// Minimum loss improvement to reset the early stopping counter
    pub(crate) tol: f64,
    /// Number of epochs without improvement before stopping
    pub(crate) n_iter_no_change: usize,
    /// Number of epochs of a warm-start update
    pub(crate) additional_epochs: usize,
    pub(crate) seed: u64,
}

impl Default for MlpValidParams {
    fn default() -> Self {
        MlpValidParams {
            hidden_layers: vec![100, 50],
            activation: Activation::Relu,
            learning_rate: 1e-3,
            alpha: 1e-4,
            max_iter: 1000,
            batch_size: 200,
            tol: 1e-4,
            n_iter_no_change: 10,
            additional_epochs: 100,
            seed: 42,
        }
    }
}

impl MlpValidParams {
    /// Number of epochs run by a warm-start update
    pub fn additional_epochs(&self) -> usize {
        self.additional_epochs
    }
}

/// Parameters of the [NeuralNetwork] regressor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MlpParams(MlpValidParams);

impl MlpParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set hidden layer sizes
    pub fn hidden_layers(mut self, hidden_layers: Vec<usize>) -> Self {
        self.0.hidden_layers = hidden_layers;
        self
    }

    /// Set hidden layers activation
    pub fn activation(mut self, activation: Activation) -> Self {
        self.0.activation = activation;
        self
    }

    /// Set Adam learning rate
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.0.learning_rate = learning_rate;
        self
    }

    /// Set L2 regularization factor
    pub fn alpha(mut self, alpha: f64) -> Self {
        self.0.alpha = alpha;
        self
    }

    /// Set maximum number of epochs
    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.0.max_iter = max_iter;
        self
    }

    /// Set mini-batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.0.batch_size = batch_size;
        self
    }

    /// Set early stopping tolerance
    pub fn tol(mut self, tol: f64) -> Self {
        self.0.tol = tol;
        self
    }

    /// Set number of epochs of a warm-start update
    pub fn additional_epochs(mut self, additional_epochs: usize) -> Self {
        self.0.additional_epochs = additional_epochs;
        self
    }

    /// Set random seed of weights initialization and batch shuffling
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl ParamGuard for MlpParams {
    type Checked = MlpValidParams;
    type Error = SurrogateError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        let p = &self.0;
        if p.hidden_layers.iter().any(|&n| n == 0) {
            return Err(SurrogateError::InvalidValueError(
                "hidden layer sizes should be positive".to_string(),
            ));
        }
        if !(p.learning_rate > 0. && p.learning_rate.is_finite()) {
            return Err(SurrogateError::InvalidValueError(format!(
                "learning rate should be positive, got {}",
                p.learning_rate
            )));
        }
        if !(p.alpha >= 0.) || p.batch_size == 0 || p.max_iter == 0 {
            return Err(SurrogateError::InvalidValueError(
                "alpha should be non negative, batch size and max_iter positive".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Layer {
    w: Array2<f64>,
    b: Array1<f64>,
    // Adam first and second moments
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

impl Layer {
    fn new(n_in: usize, n_out: usize, activation: Activation, rng: &mut Xoshiro256Plus) -> Self {
        let factor = if activation == Activation::Logistic { 2. } else { 6. };
        let bound = (factor / (n_in + n_out) as f64).sqrt();
        let dist = Uniform::new(-bound, bound);
        Layer {
            w: Array2::random_using((n_in, n_out), dist, rng),
            b: Array1::random_using(n_out, dist, rng),
            m_w: Array2::zeros((n_in, n_out)),
            v_w: Array2::zeros((n_in, n_out)),
            m_b: Array1::zeros(n_out),
            v_b: Array1::zeros(n_out),
        }
    }

    fn adam_step(&mut self, gw: &Array2<f64>, gb: &Array1<f64>, lr_t: f64) {
        self.m_w = &self.m_w * ADAM_BETA1 + gw * (1. - ADAM_BETA1);
        self.v_w = &self.v_w * ADAM_BETA2 + gw.mapv(|g| g * g) * (1. - ADAM_BETA2);
        self.m_b = &self.m_b * ADAM_BETA1 + gb * (1. - ADAM_BETA1);
        self.v_b = &self.v_b * ADAM_BETA2 + gb.mapv(|g| g * g) * (1. - ADAM_BETA2);
        ndarray::Zip::from(&mut self.w)
            .and(&self.m_w)
            .and(&self.v_w)
            .for_each(|w, m, v| *w -= lr_t * m / (v.sqrt() + ADAM_EPSILON));
        ndarray::Zip::from(&mut self.b)
            .and(&self.m_b)
            .and(&self.v_b)
            .for_each(|b, m, v| *b -= lr_t * m / (v.sqrt() + ADAM_EPSILON));
    }
}

/// Multi-layer perceptron regressor with standardized inputs and output.
///
/// Training runs mini-batch Adam epochs with L2 regularization and stops early when the
/// epoch loss does not improve by `tol` during `n_iter_no_change` epochs.
/// [NeuralNetwork::partial_fit] resumes training from the current weights.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NeuralNetwork {
    layers: Vec<Layer>,
    /// Adam time step
    t: u64,
    x_mean: Array1<f64>,
    x_std: Array1<f64>,
    y_mean: f64,
    y_std: f64,
    loss_curve: Vec<f64>,
    rng: Xoshiro256Plus,
    params: MlpValidParams,
}

impl fmt::Display for NeuralNetwork {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "NeuralNetwork(hidden_layers={:?}, activation={:?}, epochs={})",
            self.params.hidden_layers,
            self.params.activation,
            self.loss_curve.len()
        )
    }
}

impl NeuralNetwork {
    /// Network parameters constructor
    pub fn params() -> MlpParams {
        MlpParams::new()
    }

    fn forward(&self, x: &Array2<f64>) -> Vec<Array2<f64>> {
        let n_layers = self.layers.len();
        let mut acts = Vec::with_capacity(n_layers + 1);
        acts.push(x.to_owned());
        for (l, layer) in self.layers.iter().enumerate() {
            let z = acts[l].dot(&layer.w) + &layer.b;
            let a = if l + 1 < n_layers {
                self.params.activation.apply(z)
            } else {
                z
            };
            acts.push(a);
        }
        acts
    }

    /// One mini-batch Adam step, returns the batch loss
    fn train_batch(&mut self, xb: &Array2<f64>, yb: &Array2<f64>) -> f64 {
        let n_b = xb.nrows() as f64;
        let acts = self.forward(xb);
        let err = &acts[acts.len() - 1] - yb;
        let l2: f64 = self.layers.iter().map(|l| l.w.mapv(|v| v * v).sum()).sum();
        let loss = 0.5 * err.mapv(|v| v * v).sum() / n_b + 0.5 * self.params.alpha * l2 / n_b;

        self.t += 1;
        let t = self.t as f64;
        let lr_t = self.params.learning_rate * (1. - ADAM_BETA2.powf(t)).sqrt()
            / (1. - ADAM_BETA1.powf(t));
        let mut delta = err / n_b;
        for l in (0..self.layers.len()).rev() {
            let gw = acts[l].t().dot(&delta) + &self.layers[l].w * (self.params.alpha / n_b);
            let gb = delta.sum_axis(Axis(0));
            if l > 0 {
                delta = delta.dot(&self.layers[l].w.t()) * self.params.activation.derivative(&acts[l]);
            }
            self.layers[l].adam_step(&gw, &gb, lr_t);
        }
        loss
    }

    /// Runs at most `epochs` epochs on normalized data, returns the number run
    fn train_epochs(&mut self, xnorm: &Array2<f64>, ynorm: &Array2<f64>, epochs: usize) -> usize {
        let n = xnorm.nrows();
        let batch_size = self.params.batch_size.min(n).max(1);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut best_loss = f64::INFINITY;
        let mut no_improvement = 0;
        for epoch in 0..epochs {
            indices.shuffle(&mut self.rng);
            let mut accumulated = 0.;
            for batch in indices.chunks(batch_size) {
                let xb = xnorm.select(Axis(0), batch);
                let yb = ynorm.select(Axis(0), batch);
                accumulated += self.train_batch(&xb, &yb) * batch.len() as f64;
            }
            let loss = accumulated / n as f64;
            self.loss_curve.push(loss);
            if loss > best_loss - self.params.tol {
                no_improvement += 1;
            } else {
                no_improvement = 0;
            }
            best_loss = best_loss.min(loss);
            if no_improvement > self.params.n_iter_no_change {
                debug!("Network training stopped at epoch {epoch}, loss={loss}");
                return epoch + 1;
            }
        }
        epochs
    }

    /// Continues training from the current weights on the given data only
    /// for at most `epochs` epochs. Normalization statistics are kept from the initial fit.
    pub fn partial_fit(
        &mut self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        epochs: usize,
    ) -> Result<usize> {
        self.check_input(x)?;
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(SurrogateError::InvalidValueError(format!(
                "expected as many outputs as inputs, got {} and {}",
                y.len(),
                x.nrows()
            )));
        }
        let xnorm = (x - &self.x_mean) / &self.x_std;
        let ynorm = y
            .mapv(|v| (v - self.y_mean) / self.y_std)
            .insert_axis(Axis(1));
        Ok(self.train_epochs(&xnorm, &ynorm, epochs))
    }

    fn check_input(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<()> {
        if x.ncols() != self.x_mean.len() {
            return Err(SurrogateError::InvalidValueError(format!(
                "expected inputs with {} components, got {}",
                self.x_mean.len(),
                x.ncols()
            )));
        }
        Ok(())
    }

    /// Predict output values at n points given as a (n, nx) matrix
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        self.check_input(x)?;
        let xnorm = (x - &self.x_mean) / &self.x_std;
        let acts = self.forward(&xnorm);
        let out = acts[acts.len() - 1].column(0).to_owned();
        Ok(out.mapv(|v| v * self.y_std + self.y_mean))
    }

    /// Number of input components
    pub fn n_inputs(&self) -> usize {
        self.x_mean.len()
    }

    /// Loss of each training epoch so far
    pub fn loss_curve(&self) -> &[f64] {
        &self.loss_curve
    }

    /// Parameters used to fit this network
    pub fn params_used(&self) -> &MlpValidParams {
        &self.params
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for NeuralNetwork {
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
    for MlpValidParams
{
    type Object = NeuralNetwork;

    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets().to_owned().insert_axis(Axis(1));
        if x.nrows() == 0 {
            return Err(SurrogateError::InsufficientDataError {
                required: 1,
                actual: 0,
            });
        }
        let (xnorm, x_mean, x_std) = normalize(x);
        let (ynorm, y_mean, y_std) = normalize(&y);

        let mut rng = Xoshiro256Plus::seed_from_u64(self.seed);
        let mut sizes = vec![x.ncols()];
        sizes.extend(&self.hidden_layers);
        sizes.push(1);
        let layers = sizes
            .windows(2)
            .map(|w| Layer::new(w[0], w[1], self.activation, &mut rng))
            .collect();

        let mut network = NeuralNetwork {
            layers,
            t: 0,
            x_mean,
            x_std,
            y_mean: y_mean[0],
            y_std: y_std[0],
            loss_curve: Vec::new(),
            rng,
            params: self.clone(),
        };
        let epochs = network.train_epochs(&xnorm, &ynorm, self.max_iter);
        debug!("Network trained in {epochs} epochs");
        Ok(network)
    }
}
