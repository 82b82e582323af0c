use crate::errors::SegFormerError;
use crate::utility::results::expect_unwrap;
use num_traits::Float;

/// Validate a probability in the range ``[0.0, 1.0]``.
///
/// ## Arguments
///
/// - `prob`: the prob to check.
///
/// ## Returns
///
/// `Ok(prob)`, or [`SegFormerError::InvalidProbability`].
pub fn try_probability<F: Float>(prob: F) -> Result<F, SegFormerError> {
    // NaN fails both comparisons; test for membership rather than exclusion.
    if prob >= F::zero() && prob <= F::one() {
        Ok(prob)
    } else {
        Err(SegFormerError::InvalidProbability(
            prob.to_f64().unwrap_or(f64::NAN),
        ))
    }
}

/// Expect a probability to be in range ``[0.0, 1.0]``, or panic.
///
/// ## Arguments
///
/// - `prob`: the prob to check.
///
/// ## Returns
///
/// `prob`.
///
/// ## Panics
///
/// On range error.
pub fn expect_probability<F: Float>(prob: F) -> F {
    expect_unwrap(try_probability(prob))
}
