use burn::prelude::{Backend, Tensor};
use std::fmt::Debug;

pub fn assert_close_to_vec<T>(
    actual: &[T],
    expected: &[T],
    tolerance: T,
) where
    T: num_traits::float::Float + Copy + Debug,
{
    let pass = actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected.iter())
            .all(|(&a, &e)| (a - e).abs() <= tolerance);

    if !pass {
        panic!(
            "Expected (+/- {:?}):\n{:?}\nActual:\n{:?}",
            tolerance, expected, actual
        );
    }
}

/// Assert that every slice along `dim` of a probability tensor sums to one.
pub fn assert_sums_to_one<B: Backend, const D: usize>(
    probs: Tensor<B, D>,
    dim: usize,
    tolerance: f32,
) {
    let sums = probs.sum_dim(dim).to_data().to_vec::<f32>().unwrap();
    let expected = vec![1.0; sums.len()];
    assert_close_to_vec(&sums, &expected, tolerance);
}

#[cfg(test)]
mod tests {
    use crate::testing::{assert_close_to_vec, assert_sums_to_one};
    use burn::backend::NdArray;
    use burn::prelude::Tensor;

    #[test]
    fn test_assert_close_to_vec() {
        let actual = vec![1.0, 2.0, 3.0];
        let expected = vec![1.0, 2.0, 3.0];
        assert_close_to_vec(&actual, &expected, 0.01);

        let actual = vec![1.0, 2.0, 3.1];
        let expected = vec![1.0, 2.0, 3.0];
        assert_close_to_vec(&actual, &expected, 0.2);
    }

    #[test]
    #[should_panic]
    fn test_assert_close_to_vec_bad_values() {
        let actual = vec![1.0, 2.0, 3.0];
        let expected = vec![1.0, 2.0, 3.5];
        assert_close_to_vec(&actual, &expected, 0.01);
    }

    #[test]
    #[should_panic]
    fn test_assert_close_to_vec_different_lengths() {
        let actual = vec![1.0, 2.0];
        let expected = vec![1.0, 2.0, 3.0];
        assert_close_to_vec(&actual, &expected, 0.01);
    }

    #[test]
    fn test_assert_sums_to_one() {
        let device = Default::default();
        let probs = Tensor::<NdArray, 2>::from_data([[0.25, 0.75], [0.5, 0.5]], &device);
        assert_sums_to_one(probs.clone(), 1, 1e-6);
    }

    #[test]
    #[should_panic]
    fn test_assert_sums_to_one_fails() {
        let device = Default::default();
        let probs = Tensor::<NdArray, 2>::from_data([[0.25, 0.25], [0.5, 0.5]], &device);
        assert_sums_to_one(probs, 1, 1e-6);
    }
}
