use std::sync::{Arc, RwLock};

use crate::SamplingMethod;
use ndarray::{Array, Array2, ArrayBase, Data, Ix2};
use ndarray_rand::{rand::Rng, rand::SeedableRng, rand_distr::Uniform, RandomExt};
use rand_xoshiro::Xoshiro256Plus;

type RngRef<R> = Arc<RwLock<R>>;

/// Uniform random design
#[derive(Clone, Debug)]
pub struct Random<R: Rng> {
    xlimits: Array2<f64>,
    rng: RngRef<R>,
}

impl Random<Xoshiro256Plus> {
    /// Constructor given a design space as a (nx, 2) matrix \[\[lower bound, upper bound\], ...\]
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<R: Rng> Random<R> {
    /// Constructor with given design space and random generator
    ///
    /// **Panics** if xlimits number of columns is different from 2.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>, rng: R) -> Self {
        assert_eq!(xlimits.ncols(), 2, "xlimits must have 2 columns (lower, upper)");
        Random {
            xlimits: xlimits.to_owned(),
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Sets the random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Random<R2> {
        Random {
            xlimits: self.xlimits,
            rng: Arc::new(RwLock::new(rng)),
        }
    }
}

impl<R: Rng> SamplingMethod for Random<R> {
    fn sampling_space(&self) -> &Array2<f64> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<f64> {
        let mut rng = self.rng.write().unwrap_or_else(|e| e.into_inner());
        let nx = self.xlimits.nrows();
        Array::random_using((ns, nx), Uniform::new(0., 1.), &mut *rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_random_within_bounds() {
        let xlimits = arr2(&[[5., 10.], [0., 1.]]);
        let doe = Random::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
            .sample(50);
        assert_eq!(doe.shape(), &[50, 2]);
        assert!(doe.column(0).iter().all(|&v| (5. ..=10.).contains(&v)));
        assert!(doe.column(1).iter().all(|&v| (0. ..=1.).contains(&v)));
    }

    #[test]
    fn test_random_reproducible() {
        let xlimits = arr2(&[[-1., 1.]]);
        let a = Random::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(7))
            .sample(4);
        let b = Random::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(7))
            .sample(4);
        assert_eq!(a, b);
    }
}
