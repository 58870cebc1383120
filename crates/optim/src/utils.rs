use env_logger::{Builder, Env};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix1, Ix2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use web_time::{SystemTime, UNIX_EPOCH};

/// Env variable to set the log filter (default `info`)
pub const TUNEBOX_LOG: &str = "TUNEBOX_LOG";

/// Initializes logging once, further calls are no-ops
pub(crate) fn init_logger() {
    let env = Env::new().filter_or(TUNEBOX_LOG, "info");
    let mut builder = Builder::from_env(env);
    let builder = builder.target(env_logger::Target::Stdout);
    builder.try_init().ok();
}

/// Seconds since UNIX epoch
pub(crate) fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Seeded generator, from entropy when no seed is given
pub(crate) fn rng_from(seed: Option<u64>) -> Xoshiro256Plus {
    match seed {
        Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
        None => Xoshiro256Plus::from_entropy(),
    }
}

/// Projects `x` onto the box given as (nx, 2) [lower, upper] limits
pub(crate) fn clamp(
    x: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Array1<f64> {
    Array1::from_shape_fn(x.len(), |i| x[i].clamp(xlimits[[i, 0]], xlimits[[i, 1]]))
}

/// Whether `x` is closer than `tol` (infinity norm relative to box width) to a row of `data`
pub(crate) fn is_near_any(x: &ArrayView1<f64>, data: &Array2<f64>, xlimits: &Array2<f64>, tol: f64) -> bool {
    data.rows().into_iter().any(|row| {
        row.iter().zip(x.iter()).enumerate().all(|(j, (a, b))| {
            let width = (xlimits[[j, 1]] - xlimits[[j, 0]]).max(f64::MIN_POSITIVE);
            (a - b).abs() / width < tol
        })
    })
}

/// Pearson correlation of two samples, NaN when one of them is constant
pub(crate) fn pearson(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    if a.len() < 2 || a.len() != b.len() {
        return f64::NAN;
    }
    let (ma, mb) = (a.sum() / n, b.sum() / n);
    let cov: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - ma) * (y - mb)).sum();
    let va: f64 = a.iter().map(|x| (x - ma).powi(2)).sum();
    let vb: f64 = b.iter().map(|y| (y - mb).powi(2)).sum();
    if va == 0. || vb == 0. {
        f64::NAN
    } else {
        cov / (va * vb).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_clamp() {
        let xlimits = array![[0., 1.], [-1., 1.]];
        assert_eq!(clamp(&array![2., -3.], &xlimits), array![1., -1.]);
        assert_eq!(clamp(&array![0.5, 0.], &xlimits), array![0.5, 0.]);
    }

    #[test]
    fn test_is_near_any() {
        let xlimits = array![[0., 10.]];
        let data = array![[1.], [5.]];
        assert!(is_near_any(&array![5. + 1e-9].view(), &data, &xlimits, 1e-6));
        assert!(!is_near_any(&array![3.].view(), &data, &xlimits, 1e-6));
    }

    #[test]
    fn test_pearson() {
        let a = array![1., 2., 3., 4.];
        assert_abs_diff_eq!(pearson(&a.view(), &(&a * 2.).view()), 1., epsilon = 1e-12);
        assert_abs_diff_eq!(pearson(&a.view(), &(-&a).view()), -1., epsilon = 1e-12);
        assert!(pearson(&a.view(), &array![1., 1., 1., 1.].view()).is_nan());
    }
}
