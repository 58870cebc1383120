use ndarray::{s, Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};

/// A structure to store (n, xdim) matrix data and its mean and standard deviation vectors.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct NormalizedData {
    /// normalized data
    pub data: Array2<f64>,
    /// mean vector computed from data
    pub mean: Array1<f64>,
    /// standard deviation vector computed from data
    pub std: Array1<f64>,
}

impl NormalizedData {
    pub fn new(x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> NormalizedData {
        let (data, mean, std) = normalize(x);
        NormalizedData { data, mean, std }
    }

    /// Normalizes `x` with the statistics of the stored data
    pub fn apply(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array2<f64> {
        (x - &self.mean) / &self.std
    }

    /// Reverts normalization of a column of values (first component statistics)
    pub fn revert(&self, y: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Array1<f64> {
        y.mapv(|v| v * self.std[0] + self.mean[0])
    }
}

/// Centers and scales columns, a zero standard deviation is replaced by one
pub fn normalize(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> (Array2<f64>, Array1<f64>, Array1<f64>) {
    let x_mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let mut x_std = x.std_axis(Axis(0), if x.nrows() > 1 { 1. } else { 0. });
    x_std.mapv_inplace(|v| if v == 0. || !v.is_finite() { 1. } else { v });
    let xnorm = (x - &x_mean) / &x_std;
    (xnorm, x_mean, x_std)
}

/// Absolute differences between distinct pairs of rows of a (n_obs, nx) matrix
#[derive(Debug)]
pub(crate) struct DiffMatrix {
    /// Differences as (n_obs * (n_obs-1))/2, nx) array
    pub d: Array2<f64>,
    /// Indices (i, j), i < j, of each difference row
    pub d_indices: Array2<usize>,
    /// Number of observations
    pub n_obs: usize,
}

impl DiffMatrix {
    pub fn new(x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> DiffMatrix {
        let n_obs = x.nrows();
        let n_pairs = n_obs * n_obs.saturating_sub(1) / 2;
        let mut d = Array2::zeros((n_pairs, x.ncols()));
        let mut d_indices = Array2::<usize>::zeros((n_pairs, 2));
        let mut r = 0;
        for i in 0..n_obs {
            for j in (i + 1)..n_obs {
                d.row_mut(r)
                    .assign(&(&x.row(i) - &x.row(j)).mapv(f64::abs));
                d_indices[[r, 0]] = i;
                d_indices[[r, 1]] = j;
                r += 1;
            }
        }
        DiffMatrix {
            d,
            d_indices,
            n_obs,
        }
    }
}

/// Computes differences between each row of x and each row of y
/// resulting in a 2d array of shape (nrows(x) * nrows(y), ncols(x))
pub(crate) fn pairwise_differences(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Array2<f64> {
    let ny = y.nrows();
    let mut result = Array2::zeros((x.nrows() * ny, x.ncols()));
    for (i, xi) in x.rows().into_iter().enumerate() {
        let diff = &xi - y;
        result
            .slice_mut(s![i * ny..(i + 1) * ny, ..])
            .assign(&diff.mapv(f64::abs));
    }
    result
}

/// Training and held-out parts of a dataset
pub struct Split {
    /// Training inputs
    pub x_train: Array2<f64>,
    /// Training outputs
    pub y_train: Array1<f64>,
    /// Held-out inputs, empty when no held-out part is requested
    pub x_test: Array2<f64>,
    /// Held-out outputs
    pub y_test: Array1<f64>,
}

/// Shuffles rows with a seeded generator and holds out `ceil(n * test_fraction)` of them.
///
/// A `test_fraction` of 0 keeps every sample for training.
pub fn train_test_split(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    y: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    test_fraction: f64,
    seed: u64,
) -> Split {
    let n = x.nrows();
    let n_test = if test_fraction > 0. {
        ((n as f64 * test_fraction).ceil() as usize).min(n.saturating_sub(1))
    } else {
        0
    };
    let mut indices: Vec<usize> = (0..n).collect();
    if n_test > 0 {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        indices.shuffle(&mut rng);
    }
    let (test, train) = indices.split_at(n_test);
    Split {
        x_train: x.select(Axis(0), train),
        y_train: y.select(Axis(0), train),
        x_test: x.select(Axis(0), test),
        y_test: y.select(Axis(0), test),
    }
}
