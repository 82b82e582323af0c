/// Create a vector with `num` evenly spaced floating point values.
///
/// # Parameters
///
/// - `start`: The starting value of the range.
/// - `end`: The end value of the range (inclusive).
/// - `num`: The number of points to generate in the range.
///
/// # Returns
///
/// A vector of `num` values, from `start` to `end`.
#[must_use]
pub fn float_vec_linspace(
    start: f64,
    end: f64,
    num: usize,
) -> Vec<f64> {
    assert!(num > 0, "Number of points must be positive");

    if num == 1 {
        return vec![start];
    }

    let step = (end - start) / (num as f64 - 1.0);

    let mut values: Vec<f64> = (0..num).map(|i| start + i as f64 * step).collect();
    // Pin the endpoint; accumulated rounding may miss it.
    values[num - 1] = end;
    values
}
