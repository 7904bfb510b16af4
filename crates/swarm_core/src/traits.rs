use nalgebra::{DMatrix, DVector};

/// A vector field evaluated over a whole batch of trajectories at once.
///
/// `state` is D×N: each column is one trajectory. `times` holds the
/// evaluation time of each column (length N). The returned matrix is the
/// instantaneous derivative dx/dt of every column and must also be D×N.
///
/// Parameters of the field live in the implementing value. Implementations
/// must be pure: no side effects and no references retained to `state`.
pub trait VectorField {
    /// Returns the dimension D of each trajectory's state.
    fn dimension(&self) -> usize;

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64>;
}

impl<F: VectorField + ?Sized> VectorField for Box<F> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        (**self).evaluate(times, state)
    }
}

impl<F: VectorField + ?Sized> VectorField for &F {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        (**self).evaluate(times, state)
    }
}

/// Adapts a closure into a [`VectorField`] of fixed dimension.
pub struct FieldFn<F> {
    dimension: usize,
    func: F,
}

impl<F> FieldFn<F>
where
    F: Fn(&DVector<f64>, &DMatrix<f64>) -> DMatrix<f64>,
{
    pub fn new(dimension: usize, func: F) -> Self {
        Self { dimension, func }
    }
}

impl<F> VectorField for FieldFn<F>
where
    F: Fn(&DVector<f64>, &DMatrix<f64>) -> DMatrix<f64>,
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn evaluate(&self, times: &DVector<f64>, state: &DMatrix<f64>) -> DMatrix<f64> {
        (self.func)(times, state)
    }
}

/// Builds a D×N derivative matrix by applying `f` to each column.
///
/// `f` receives the column's time, its state slice and an output buffer of
/// length D. Most point-wise fields are simplest to write this way.
pub fn map_columns<F>(times: &DVector<f64>, state: &DMatrix<f64>, f: F) -> DMatrix<f64>
where
    F: Fn(f64, &[f64], &mut [f64]),
{
    let dim = state.nrows();
    let mut out = DMatrix::zeros(dim, state.ncols());
    let mut column = vec![0.0; dim];
    let mut derivative = vec![0.0; dim];
    for n in 0..state.ncols() {
        for d in 0..dim {
            column[d] = state[(d, n)];
        }
        f(times[n], &column, &mut derivative);
        for d in 0..dim {
            out[(d, n)] = derivative[d];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_fn_forwards_dimension_and_evaluation() {
        let field = FieldFn::new(2, |_t: &DVector<f64>, y: &DMatrix<f64>| y * 2.0);
        let state = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let times = DVector::zeros(2);

        assert_eq!(field.dimension(), 2);
        let out = field.evaluate(&times, &state);
        assert_eq!(out, DMatrix::from_row_slice(2, 2, &[2.0, 4.0, 6.0, 8.0]));
    }

    #[test]
    fn map_columns_passes_per_column_time() {
        let state = DMatrix::from_row_slice(1, 3, &[1.0, 1.0, 1.0]);
        let times = DVector::from_vec(vec![0.0, 1.0, 2.0]);
        let out = map_columns(&times, &state, |t, x, out| out[0] = t * x[0]);
        assert_eq!(out, DMatrix::from_row_slice(1, 3, &[0.0, 1.0, 2.0]));
    }

    #[test]
    fn boxed_field_is_a_field() {
        let field: Box<dyn VectorField> =
            Box::new(FieldFn::new(1, |_t: &DVector<f64>, y: &DMatrix<f64>| -y));
        let out = field.evaluate(&DVector::zeros(1), &DMatrix::from_element(1, 1, 3.0));
        assert_eq!(field.dimension(), 1);
        assert_eq!(out[(0, 0)], -3.0);
    }
}
