use crate::utils::min_distance;
use crate::SamplingMethod;
use ndarray::{Array, Array2, ArrayBase, Data, Ix2};
use ndarray_rand::{
    rand::seq::SliceRandom, rand::Rng, rand::SeedableRng, rand_distr::Uniform, RandomExt,
};
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Number of candidate designs drawn by [LhsKind::Maximin]
pub const LHS_MAXIMIN_ITERATIONS: usize = 10;

/// Kinds of Latin Hypercube Design
#[derive(Clone, Debug, Default, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LhsKind {
    /// sample is chosen randomly within its latin hypercube intervals
    Classic,
    /// sample is the middle of its latin hypercube intervals
    Centered,
    /// best of several classic designs wrt the minimal distance between points
    #[default]
    Maximin,
}

type RngRef<R> = Arc<RwLock<R>>;

/// The LHS design is built as follows: each dimension space is divided into ns sections
/// where ns is the number of sampling points, and one point is selected in each section.
/// The selection method gives different kind of LHS (see [LhsKind])
#[derive(Clone, Debug)]
pub struct Lhs<R: Rng> {
    xlimits: Array2<f64>,
    kind: LhsKind,
    rng: RngRef<R>,
}

impl Lhs<Xoshiro256Plus> {
    /// Constructor given a design space as a (nx, 2) matrix \[\[lower bound, upper bound\], ...\]
    ///
    /// ```
    /// use tunebox_doe::Lhs;
    /// use ndarray::arr2;
    ///
    /// let doe = Lhs::new(&arr2(&[[0.0, 1.0], [5.0, 10.0]]));
    /// ```
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<R: Rng> Lhs<R> {
    /// Constructor with given design space and random generator.
    ///
    /// **Panics** if xlimits number of columns is different from 2.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>, rng: R) -> Self {
        assert_eq!(xlimits.ncols(), 2, "xlimits must have 2 columns (lower, upper)");
        Lhs {
            xlimits: xlimits.to_owned(),
            kind: LhsKind::default(),
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Sets the kind of LHS
    pub fn kind(mut self, kind: LhsKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Lhs<R2> {
        Lhs {
            xlimits: self.xlimits,
            kind: self.kind,
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    fn lhs(&self, ns: usize, centered: bool) -> Array2<f64> {
        let nx = self.xlimits.nrows();
        let mut rng = self.rng.write().unwrap_or_else(|e| e.into_inner());
        let offsets = if centered {
            Array2::from_elem((ns, nx), 0.5)
        } else {
            Array::random_using((ns, nx), Uniform::new(0., 1.), &mut *rng)
        };
        let mut doe = Array2::zeros((ns, nx));
        let mut perm: Vec<usize> = (0..ns).collect();
        for j in 0..nx {
            perm.shuffle(&mut *rng);
            for (i, &k) in perm.iter().enumerate() {
                doe[[i, j]] = (k as f64 + offsets[[i, j]]) / ns as f64;
            }
        }
        doe
    }

    fn maximin(&self, ns: usize) -> Array2<f64> {
        let mut best = self.lhs(ns, false);
        let mut best_dist = min_distance(&best);
        for _ in 1..LHS_MAXIMIN_ITERATIONS {
            let candidate = self.lhs(ns, false);
            let dist = min_distance(&candidate);
            if dist > best_dist {
                best = candidate;
                best_dist = dist;
            }
        }
        best
    }
}

impl<R: Rng> SamplingMethod for Lhs<R> {
    fn sampling_space(&self) -> &Array2<f64> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<f64> {
        if ns == 0 {
            return Array2::zeros((0, self.xlimits.nrows()));
        }
        match self.kind {
            LhsKind::Classic => self.lhs(ns, false),
            LhsKind::Centered => self.lhs(ns, true),
            LhsKind::Maximin => self.maximin(ns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Axis};

    fn strata_are_latin(doe: &Array2<f64>, xlimits: &Array2<f64>) -> bool {
        let ns = doe.nrows();
        doe.axis_iter(Axis(1)).enumerate().all(|(j, col)| {
            let (lo, up) = (xlimits[[j, 0]], xlimits[[j, 1]]);
            let mut strata: Vec<usize> = col
                .iter()
                .map(|v| (((v - lo) / (up - lo)) * ns as f64).floor().min(ns as f64 - 1.) as usize)
                .collect();
            strata.sort_unstable();
            strata == (0..ns).collect::<Vec<_>>()
        })
    }

    #[test]
    fn test_lhs_kinds_are_latin() {
        let xlimits = arr2(&[[5., 10.], [0., 1.], [-3., 3.]]);
        for kind in [LhsKind::Classic, LhsKind::Centered, LhsKind::Maximin] {
            let doe = Lhs::new(&xlimits)
                .kind(kind)
                .with_rng(Xoshiro256Plus::seed_from_u64(42))
                .sample(8);
            assert_eq!(doe.shape(), &[8, 3]);
            assert!(strata_are_latin(&doe, &xlimits), "{kind:?}");
        }
    }

    #[test]
    fn test_centered_lhs_values() {
        let xlimits = arr2(&[[0., 1.]]);
        let doe = Lhs::new(&xlimits).kind(LhsKind::Centered).sample(4);
        let mut values = doe.column(0).to_vec();
        values.sort_by(|a, b| a.total_cmp(b));
        assert_abs_diff_eq!(
            ndarray::Array1::from(values),
            ndarray::array![0.125, 0.375, 0.625, 0.875],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_maximin_not_worse_than_classic() {
        let xlimits = arr2(&[[0., 1.], [0., 1.]]);
        let classic = Lhs::new(&xlimits)
            .kind(LhsKind::Classic)
            .with_rng(Xoshiro256Plus::seed_from_u64(3))
            .sample(10);
        let maximin = Lhs::new(&xlimits)
            .kind(LhsKind::Maximin)
            .with_rng(Xoshiro256Plus::seed_from_u64(3))
            .sample(10);
        assert!(min_distance(&maximin) >= min_distance(&classic));
    }
}
