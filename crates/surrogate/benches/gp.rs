use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use linfa::prelude::*;
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand_xoshiro::Xoshiro256Plus;
use tunebox_surrogate::{ForestParams, GaussianProcess, Kernel, SurrogateConfig, SurrogateKind};

fn sample(n: usize, dim: usize) -> (Array2<f64>, Array1<f64>) {
    let mut rng = Xoshiro256Plus::seed_from_u64(42);
    let x = Array2::random_using((n, dim), Uniform::new(-2., 2.), &mut rng);
    let y = x.map_axis(Axis(1), |row| row.mapv(|v| v.sin() + 0.1 * v * v).sum());
    (x, y)
}

fn bench_gp_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("gp_fit");
    group.sample_size(10);
    for n in [20, 50] {
        let (x, y) = sample(n, 2);
        let dataset = Dataset::new(x, y);
        for kernel in [Kernel::SquaredExponential, Kernel::Matern52] {
            group.bench_with_input(BenchmarkId::new(kernel.to_string(), n), &dataset, |b, ds| {
                b.iter(|| {
                    GaussianProcess::params(kernel)
                        .n_start(3)
                        .fit(ds)
                        .expect("GP fit")
                })
            });
        }
    }
    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let (x, y) = sample(50, 2);
    let (xtest, _) = sample(200, 2);
    let config = SurrogateConfig::default().ensemble_tree(ForestParams::new().n_estimators(20));

    let mut group = c.benchmark_group("predict");
    for kind in [SurrogateKind::GaussianProcess, SurrogateKind::EnsembleTree] {
        let model = config
            .fit(kind, &x.view(), &y.view())
            .expect("model fit");
        group.bench_function(kind.to_string(), |b| {
            b.iter(|| model.predict(&xtest.view()).expect("prediction"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gp_fit, bench_predict);
criterion_main!(benches);
