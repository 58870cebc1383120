//! Ensemble of bagged regression trees (random forest).
use crate::errors::{Result, SurrogateError};

use linfa::prelude::{DatasetBase, Fit, PredictInplace};
use linfa::ParamGuard;
use ndarray::{Array1, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A set of validated forest parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestValidParams {
    /// Number of trees
    pub(crate) n_estimators: usize,
    /// Maximum depth of a tree, unbounded when None
    pub(crate) max_depth: Option<usize>,
    /// Minimum number of samples to split a node
    pub(crate) min_samples_split: usize,
    /// Minimum number of samples in a leaf
    pub(crate) min_samples_leaf: usize,
    /// Whether trees are fitted on bootstrap samples
    pub(crate) bootstrap: bool,
    /// Seed of the bootstrap sampling
    pub(crate) seed: u64,
}

impl Default for ForestValidParams {
    fn default() -> Self {
        ForestValidParams {
            n_estimators: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestValidParams {
    /// Number of trees
    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }

    /// Maximum tree depth
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }
}

/// Parameters of the [RandomForest] regressor
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForestParams(ForestValidParams);

impl ForestParams {
    /// Default forest parameters: 100 fully grown bootstrapped trees
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of trees
    pub fn n_estimators(mut self, n_estimators: usize) -> Self {
        self.0.n_estimators = n_estimators;
        self
    }

    /// Set the maximum depth of the trees
    pub fn max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.0.max_depth = max_depth;
        self
    }

    /// Set the minimum number of samples required to split a node
    pub fn min_samples_split(mut self, min_samples_split: usize) -> Self {
        self.0.min_samples_split = min_samples_split;
        self
    }

    /// Set the minimum number of samples of a leaf
    pub fn min_samples_leaf(mut self, min_samples_leaf: usize) -> Self {
        self.0.min_samples_leaf = min_samples_leaf;
        self
    }

    /// Enable or disable bootstrap sampling
    pub fn bootstrap(mut self, bootstrap: bool) -> Self {
        self.0.bootstrap = bootstrap;
        self
    }

    /// Set the random seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl ParamGuard for ForestParams {
    type Checked = ForestValidParams;
    type Error = SurrogateError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.n_estimators == 0 {
            return Err(SurrogateError::InvalidValueError(
                "`n_estimators` should be at least 1".to_string(),
            ));
        }
        if self.0.min_samples_split < 2 {
            return Err(SurrogateError::InvalidValueError(
                "`min_samples_split` should be at least 2".to_string(),
            ));
        }
        if self.0.min_samples_leaf == 0 {
            return Err(SurrogateError::InvalidValueError(
                "`min_samples_leaf` should be at least 1".to_string(),
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
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART regression tree stored as a flat node arena, root at index 0
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'a, S: Data<Elem = f64>, T: Data<Elem = f64>> {
    x: &'a ArrayBase<S, Ix2>,
    y: &'a ArrayBase<T, Ix1>,
    params: &'a ForestValidParams,
    nodes: Vec<Node>,
    importances: Array1<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    position: usize,
    sse: f64,
}

impl<S: Data<Elem = f64>, T: Data<Elem = f64>> TreeBuilder<'_, S, T> {
    fn grow(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let n = indices.len();
        let (sum, sumsq) = indices.iter().fold((0., 0.), |(s, q), &i| {
            let v = self.y[i];
            (s + v, q + v * v)
        });
        let mean = sum / n as f64;
        let sse = (sumsq - sum * sum / n as f64).max(0.);
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        let depth_reached = self.params.max_depth.is_some_and(|d| depth >= d);
        if depth_reached || n < self.params.min_samples_split || sse <= 1e-12 * n as f64 {
            return node;
        }
        let Some(best) = self.best_split(indices) else {
            return node;
        };
        self.importances[best.feature] += sse - best.sse;

        indices.sort_by(|&a, &b| self.x[[a, best.feature]].total_cmp(&self.x[[b, best.feature]]));
        let (left_idx, right_idx) = indices.split_at_mut(best.position);
        let left = self.grow(left_idx, depth + 1);
        let right = self.grow(right_idx, depth + 1);
        self.nodes[node] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node
    }

    fn best_split(&self, indices: &[usize]) -> Option<BestSplit> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf;
        let mut best: Option<BestSplit> = None;
        let mut sorted = indices.to_vec();
        for feature in 0..self.x.ncols() {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));
            let total: f64 = sorted.iter().map(|&i| self.y[i]).sum();
            let total_sq: f64 = sorted.iter().map(|&i| self.y[i] * self.y[i]).sum();
            let (mut sum_l, mut sq_l) = (0., 0.);
            for k in 1..n {
                let v = self.y[sorted[k - 1]];
                sum_l += v;
                sq_l += v * v;
                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let (xa, xb) = (self.x[[sorted[k - 1], feature]], self.x[[sorted[k], feature]]);
                if xa == xb {
                    continue;
                }
                let (nl, nr) = (k as f64, (n - k) as f64);
                let (sum_r, sq_r) = (total - sum_l, total_sq - sq_l);
                let sse = (sq_l - sum_l * sum_l / nl) + (sq_r - sum_r * sum_r / nr);
                if best.as_ref().map_or(true, |b| sse < b.sse) {
                    best = Some(BestSplit {
                        feature,
                        threshold: 0.5 * (xa + xb),
                        position: k,
                        sse,
                    });
                }
            }
        }
        best
    }
}

impl RegressionTree {
    fn predict_one(&self, x: &ArrayView1<f64>) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    }
                }
            }
        }
    }

    /// Number of nodes of the tree
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }
}

/// Random forest regressor: trees fitted in parallel on bootstrap samples,
/// predictions averaged over trees.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    feature_importances: Array1<f64>,
    params: ForestValidParams,
}

impl fmt::Display for RandomForest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RandomForest(n_estimators={}, max_depth={:?})",
            self.trees.len(),
            self.params.max_depth
        )
    }
}

impl RandomForest {
    /// Forest parameters constructor
    pub fn params() -> ForestParams {
        ForestParams::new()
    }

    /// Predict output values at n points given as a (n, nx) matrix
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(SurrogateError::InvalidValueError(format!(
                "expected inputs with {} components, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let n_trees = self.trees.len() as f64;
        Ok(x.map_axis(Axis(1), |row| {
            self.trees.iter().map(|t| t.predict_one(&row)).sum::<f64>() / n_trees
        }))
    }

    /// Normalized impurity decrease per input component
    pub fn feature_importances(&self) -> &Array1<f64> {
        &self.feature_importances
    }

    /// Fitted trees
    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Parameters used to fit this forest
    pub fn params_used(&self) -> &ForestValidParams {
        &self.params
    }
}

impl<D: Data<Elem = f64>> PredictInplace<ArrayBase<D, Ix2>, Array1<f64>> for RandomForest {
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

impl<D: Data<Elem = f64> + Sync> Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, SurrogateError>
    for ForestValidParams
{
    type Object = RandomForest;

    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets();
        let n = x.nrows();
        if n == 0 {
            return Err(SurrogateError::InsufficientDataError {
                required: 1,
                actual: 0,
            });
        }
        let fitted: Vec<(RegressionTree, Array1<f64>)> = (0..self.n_estimators)
            .into_par_iter()
            .map(|k| {
                let mut indices: Vec<usize> = if self.bootstrap {
                    let mut rng = Xoshiro256Plus::seed_from_u64(self.seed.wrapping_add(k as u64));
                    (0..n).map(|_| rng.gen_range(0..n)).collect()
                } else {
                    (0..n).collect()
                };
                let mut builder = TreeBuilder {
                    x,
                    y,
                    params: self,
                    nodes: Vec::new(),
                    importances: Array1::zeros(x.ncols()),
                };
                builder.grow(&mut indices, 0);
                let total = builder.importances.sum();
                if total > 0. {
                    builder.importances /= total;
                }
                (
                    RegressionTree {
                        nodes: builder.nodes,
                    },
                    builder.importances,
                )
            })
            .collect();

        let mut feature_importances = Array1::<f64>::zeros(x.ncols());
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, importances) in fitted {
            feature_importances += &importances;
            trees.push(tree);
        }
        let total = feature_importances.sum();
        if total > 0. {
            feature_importances /= total;
        }
        Ok(RandomForest {
            trees,
            n_features: x.ncols(),
            feature_importances,
            params: self.clone(),
        })
    }
}
