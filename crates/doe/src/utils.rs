use ndarray::{Array, Array1, Array2, ArrayBase, Data, Ix2, Zip};
use ndarray_stats::DeviationExt;
use rayon::prelude::*;

/// Computes the pairwise distances between rows of a 2D-array.
/// Distances are listed in the (i, j) order with i < j.
pub fn pdist(x: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>) -> Array1<f64> {
    let nrows = x.nrows();
    let pairs: Vec<_> = (0..nrows)
        .flat_map(|i| ((i + 1)..nrows).map(move |j| (i, j)))
        .collect();
    let distances: Vec<_> = pairs
        .par_iter()
        .map(|&(i, j)| x.row(i).l2_dist(&x.row(j)).unwrap_or(f64::INFINITY))
        .collect();
    Array::from_vec(distances)
}

/// Computes the distances between rows of two 2D arrays, result has shape (ma, mb)
///
/// **Panics** if operands do not have the same number of columns.
pub fn cdist(
    xa: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
    xb: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>,
) -> Array2<f64> {
    assert_eq!(
        xa.ncols(),
        xb.ncols(),
        "cdist: operands should have same nb of columns"
    );
    let mut res = Array2::zeros((xa.nrows(), xb.nrows()));
    Zip::from(res.rows_mut())
        .and(xa.rows())
        .par_for_each(|mut row_res, row_a| {
            for (j, row_b) in xb.rows().into_iter().enumerate() {
                row_res[j] = row_a.l2_dist(&row_b).unwrap_or(f64::INFINITY);
            }
        });
    res
}

/// Smallest distance between two rows, infinity when less than two rows
pub fn min_distance(x: &ArrayBase<impl Data<Elem = f64> + Sync, Ix2>) -> f64 {
    pdist(x).iter().copied().fold(f64::INFINITY, f64::min)
}
