use ndarray::{Array2, Axis};

/// Sampling method allowing to generate a DoE within a box design space
pub trait SamplingMethod {
    /// Returns the bounds of the sample space as a (nx, 2) matrix
    fn sampling_space(&self) -> &Array2<f64>;

    /// Generates a (ns, nx)-shaped array of samples belonging to `[0., 1.]^nx`
    fn normalized_sample(&self, ns: usize) -> Array2<f64>;

    /// Generates a (ns, nx)-shaped array of samples belonging to the design space
    fn sample(&self, ns: usize) -> Array2<f64> {
        let xlimits = self.sampling_space();
        let lower = xlimits.column(0);
        let scale = &xlimits.column(1) - &lower;
        let mut doe = self.normalized_sample(ns);
        for mut row in doe.axis_iter_mut(Axis(0)) {
            row.zip_mut_with(&scale, |v, s| *v *= *s);
            row += &lower;
        }
        doe
    }
}
