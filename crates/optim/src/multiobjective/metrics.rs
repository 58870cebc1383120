//! Pareto front quality metrics and objective trade-off analysis.
use crate::utils::pearson;

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};

/// Number of Monte-Carlo samples of the hypervolume above two objectives
const HYPERVOLUME_SAMPLES: usize = 20_000;
const HYPERVOLUME_SEED: u64 = 42;

/// Quality of a Pareto front approximation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub n_solutions: usize,
    /// Spacing: standard deviation of nearest neighbour distances, 0 for a uniform front
    pub diversity: f64,
    /// Deb's spread of consecutive distances along the first objective, 0 when uniform
    pub spread: f64,
    /// Volume dominated by the front up to its reference point
    pub hypervolume: f64,
}

impl QualityMetrics {
    /// Metrics of a front given as (n, m) minimized objective values
    pub fn compute(front: &Array2<f64>) -> Self {
        QualityMetrics {
            n_solutions: front.nrows(),
            diversity: spacing(front),
            spread: spread(front),
            hypervolume: hypervolume(front, &reference_point(front)),
        }
    }
}

/// Relationship between two objectives over a set of solutions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    /// Improving one worsens the other (r < -0.5)
    Conflicting,
    /// Both improve together (r > 0.5)
    Complementary,
    Independent,
}

/// Correlation analysis of a pair of objectives
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeOff {
    pub first: String,
    pub second: String,
    pub correlation: f64,
    pub relationship: Relationship,
    /// |correlation|
    pub strength: f64,
}

/// Pairwise Pearson correlation of objective columns in minimization convention
pub fn tradeoffs(names: &[String], objectives: &Array2<f64>) -> Vec<TradeOff> {
    let mut result = vec![];
    for i in 0..objectives.ncols() {
        for j in (i + 1)..objectives.ncols() {
            let r = pearson(&objectives.column(i), &objectives.column(j));
            let r = if r.is_finite() { r } else { 0. };
            let relationship = if r < -0.5 {
                Relationship::Conflicting
            } else if r > 0.5 {
                Relationship::Complementary
            } else {
                Relationship::Independent
            };
            result.push(TradeOff {
                first: names[i].clone(),
                second: names[j].clone(),
                correlation: r,
                relationship,
                strength: r.abs(),
            });
        }
    }
    result
}

/// Schott's spacing over L1 nearest neighbour distances
pub fn spacing(front: &Array2<f64>) -> f64 {
    let n = front.nrows();
    if n < 2 {
        return 0.;
    }
    let distances: Array1<f64> = (0..n)
        .map(|i| {
            (0..n)
                .filter(|&j| j != i)
                .map(|j| (&front.row(i) - &front.row(j)).mapv(f64::abs).sum())
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    let mean = distances.mean().unwrap_or(0.);
    let var = distances.mapv(|d| (d - mean).powi(2)).sum() / (n - 1) as f64;
    var.sqrt()
}

/// Deb's spread `Σ|dᵢ - d̄| / ((n-1) d̄ + d_f)` over consecutive euclidean distances
/// of the front sorted by its first objective, `d_f` being the diagonal of its bounding box
pub fn spread(front: &Array2<f64>) -> f64 {
    let n = front.nrows();
    if n < 3 {
        return 0.;
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| front[[a, 0]].total_cmp(&front[[b, 0]]));
    let gaps: Array1<f64> = order
        .windows(2)
        .map(|w| {
            (&front.row(w[1]) - &front.row(w[0]))
                .mapv(|v| v * v)
                .sum()
                .sqrt()
        })
        .collect();
    let worst = front.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let best = front.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
    let diagonal = (&worst - &best).mapv(|v| v * v).sum().sqrt();
    let mean = gaps.mean().unwrap_or(0.);
    let denominator = gaps.len() as f64 * mean + diagonal;
    if !(denominator > 0.) {
        return 0.;
    }
    gaps.mapv(|d| (d - mean).abs()).sum() / denominator
}

/// Reference point of the hypervolume: worst value plus 10% of the range per objective
pub fn reference_point(front: &Array2<f64>) -> Array1<f64> {
    let worst = front.fold_axis(Axis(0), f64::NEG_INFINITY, |acc, &v| acc.max(v));
    let best = front.fold_axis(Axis(0), f64::INFINITY, |acc, &v| acc.min(v));
    Array1::from_shape_fn(worst.len(), |k| {
        let range = worst[k] - best[k];
        let margin = if range > 0. {
            0.1 * range
        } else {
            0.1 * worst[k].abs().max(1.)
        };
        worst[k] + margin
    })
}

/// Volume dominated by `front` and bounded by `reference`: exact up to two objectives,
/// seeded Monte-Carlo estimate above
pub fn hypervolume(front: &Array2<f64>, reference: &Array1<f64>) -> f64 {
    let points: Vec<_> = front
        .rows()
        .into_iter()
        .filter(|p| p.iter().all(|v| v.is_finite()) && p.iter().zip(reference).all(|(v, r)| v < r))
        .collect();
    if points.is_empty() {
        return 0.;
    }
    match reference.len() {
        1 => points.iter().map(|p| reference[0] - p[0]).fold(0., f64::max),
        2 => {
            let mut sorted = points.clone();
            sorted.sort_by(|a, b| a[0].total_cmp(&b[0]));
            let mut volume = 0.;
            let mut ceiling = reference[1];
            for p in sorted {
                if p[1] < ceiling {
                    volume += (reference[0] - p[0]) * (ceiling - p[1]);
                    ceiling = p[1];
                }
            }
            volume
        }
        m => {
            let ideal = Array1::from_shape_fn(m, |k| {
                points.iter().map(|p| p[k]).fold(f64::INFINITY, f64::min)
            });
            let box_volume: f64 = (reference - &ideal).product();
            let mut rng = Xoshiro256Plus::seed_from_u64(HYPERVOLUME_SEED);
            let mut hits = 0usize;
            let mut sample = Array1::zeros(m);
            for _ in 0..HYPERVOLUME_SAMPLES {
                for k in 0..m {
                    sample[k] = rng.gen_range(ideal[k]..=reference[k]);
                }
                if points
                    .iter()
                    .any(|p| p.iter().zip(sample.iter()).all(|(v, s)| v <= s))
                {
                    hits += 1;
                }
            }
            box_volume * hits as f64 / HYPERVOLUME_SAMPLES as f64
        }
    }
}
