/*!
This library implements the design of experiments (DoE) methods used by tunebox,
mainly [Latin Hypercube sampling](https://en.wikipedia.org/wiki/Latin_hypercube_sampling)
used to get space-filling initial samples for surrogate-based and population-based solvers.

A design space is defined as a 2D ndarray `(nx, 2)`, specifying the lower bound and the
upper bound of each of the `nx` components of the samples `x`.

Example:
```
use tunebox_doe::{Lhs, LhsKind, Random, SamplingMethod};
use ndarray::arr2;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

// Design space is [5., 10.] x [0., 1.], samples are 2-dimensional.
let xlimits = arr2(&[[5., 10.], [0., 1.]]);
// Five samples using centered Latin Hypercube sampling
let samples = Lhs::new(&xlimits).kind(LhsKind::Centered).sample(5);
assert_eq!(samples.shape(), &[5, 2]);
// or else randomly with a seeded generator for reproducibility
let samples = Random::new(&xlimits).with_rng(Xoshiro256Plus::seed_from_u64(42)).sample(5);
assert!(samples.column(0).iter().all(|&v| (5. ..=10.).contains(&v)));
```
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod lhs;
mod random;
mod traits;
mod utils;

pub use lhs::*;
pub use random::*;
pub use traits::*;
pub use utils::{cdist, min_distance, pdist};
