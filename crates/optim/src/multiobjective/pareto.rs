//! Dominance relations, non-dominated sorting and crowding distance.
//! Every objective is minimized.
use ndarray::{Array1, Array2, ArrayView1};

/// Violation under which a member counts as feasible in constrained domination
pub(crate) const VIOLATION_TOLERANCE: f64 = 1e-6;

/// Whether `a` is no worse than `b` on every objective and strictly better on one
pub fn dominates(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> bool {
    let mut strictly = false;
    for (x, y) in a.iter().zip(b.iter()) {
        if x > y {
            return false;
        }
        if x < y {
            strictly = true;
        }
    }
    strictly
}

/// Indices of the rows of `objectives` not dominated by any other row, pairwise O(n²)
pub fn non_dominated_indices(objectives: &Array2<f64>) -> Vec<usize> {
    let n = objectives.nrows();
    (0..n)
        .filter(|&i| {
            let row = objectives.row(i);
            row.iter().all(|v| !v.is_nan())
                && !(0..n).any(|j| j != i && dominates(&objectives.row(j), &row))
        })
        .collect()
}

/// Deb's constrained domination: a feasible member dominates an infeasible one,
/// two infeasible members compare by total violation.
fn constrained_dominates(
    objectives: &Array2<f64>,
    violations: &Array1<f64>,
    i: usize,
    j: usize,
) -> bool {
    let (vi, vj) = (violations[i], violations[j]);
    match (vi <= VIOLATION_TOLERANCE, vj <= VIOLATION_TOLERANCE) {
        (true, true) => dominates(&objectives.row(i), &objectives.row(j)),
        (true, false) => true,
        (false, true) => false,
        (false, false) => vi < vj,
    }
}

/// Successive non-dominated fronts (as row indices) under constrained domination
pub fn fast_non_dominated_sort(
    objectives: &Array2<f64>,
    violations: &Array1<f64>,
) -> Vec<Vec<usize>> {
    let n = objectives.nrows();
    let mut dominated: Vec<Vec<usize>> = vec![vec![]; n];
    let mut counts = vec![0usize; n];
    let mut fronts = vec![vec![]];
    for i in 0..n {
        for j in (i + 1)..n {
            if constrained_dominates(objectives, violations, i, j) {
                dominated[i].push(j);
                counts[j] += 1;
            } else if constrained_dominates(objectives, violations, j, i) {
                dominated[j].push(i);
                counts[i] += 1;
            }
        }
    }
    fronts[0] = (0..n).filter(|&i| counts[i] == 0).collect();
    let mut k = 0;
    while !fronts[k].is_empty() {
        let mut next = vec![];
        for &i in fronts[k].iter() {
            for &j in dominated[i].iter() {
                counts[j] -= 1;
                if counts[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(next);
        k += 1;
    }
    fronts.pop();
    fronts
}

/// Crowding distance of the members of `front`, in the order of `front`.
/// Boundary members of each objective get an infinite distance.
pub fn crowding_distance(objectives: &Array2<f64>, front: &[usize]) -> Array1<f64> {
    let n = front.len();
    let mut distance = Array1::zeros(n);
    if n <= 2 {
        distance.fill(f64::INFINITY);
        return distance;
    }
    for m in 0..objectives.ncols() {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            objectives[[front[a], m]].total_cmp(&objectives[[front[b], m]])
        });
        let lo = objectives[[front[order[0]], m]];
        let hi = objectives[[front[order[n - 1]], m]];
        distance[order[0]] = f64::INFINITY;
        distance[order[n - 1]] = f64::INFINITY;
        let range = hi - lo;
        if !(range.is_finite() && range > 0.) {
            continue;
        }
        for k in 1..(n - 1) {
            let gap = objectives[[front[order[k + 1]], m]] - objectives[[front[order[k - 1]], m]];
            distance[order[k]] += gap / range;
        }
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dominates() {
        assert!(dominates(&array![1., 2.].view(), &array![1., 3.].view()));
        assert!(!dominates(&array![1., 2.].view(), &array![1., 2.].view()));
        assert!(!dominates(&array![1., 4.].view(), &array![2., 3.].view()));
    }

    #[test]
    fn test_pareto_filter() {
        let objectives = array![[1., 4.], [2., 3.], [3., 2.], [4., 1.], [2., 2.]];
        assert_eq!(non_dominated_indices(&objectives), vec![0, 3, 4]);
    }

    #[test]
    fn test_fronts_with_constraints() {
        let objectives = array![[1., 4.], [2., 3.], [3., 2.], [4., 1.], [2., 2.], [0., 0.]];
        let violations = array![0., 0., 0., 0., 0., 1.];
        let fronts = fast_non_dominated_sort(&objectives, &violations);
        assert_eq!(fronts, vec![vec![0, 3, 4], vec![1, 2], vec![5]]);
    }

    #[test]
    fn test_crowding_distance() {
        let objectives = array![[0., 4.], [1., 3.], [2., 1.], [4., 0.]];
        let front = vec![0, 1, 2, 3];
        let distance = crowding_distance(&objectives, &front);
        assert_eq!(distance[0], f64::INFINITY);
        assert_eq!(distance[3], f64::INFINITY);
        // (2 - 0) / 4 + (4 - 1) / 4
        assert_eq!(distance[1], 1.25);
        // (4 - 1) / 4 + (3 - 0) / 4
        assert_eq!(distance[2], 1.5);
    }
}
