//! # Result Utilities
//!
//! Methods for [`std::result::Result`] manipulation.

use std::fmt::Display;

/// Unwraps Result, or Panics.
///
/// Unlike the `.unwrap()` method, this does not add a prefix about
/// `.unwrap()`; the panic message is the error's `Display` form.
///
/// Useful for building ``init(...) -> T`` variants of
/// ``try_init(...) -> Result<T, E>`` methods.
pub fn expect_unwrap<T, E>(result: Result<T, E>) -> T
where
    E: Display,
{
    match result {
        Ok(t) => t,
        Err(e) => panic!("{e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SegFormerError;

    fn try_example(
        value: usize,
        throw: bool,
    ) -> Result<usize, SegFormerError> {
        if throw {
            Err(SegFormerError::InvalidNumClasses(value))
        } else {
            Ok(value)
        }
    }

    #[test]
    fn test_expect_unwrap() {
        assert_eq!(expect_unwrap(try_example(42, false)), 42);
    }

    #[should_panic(expected = "num_classes must be positive: 0")]
    #[test]
    fn test_expect_unwrap_panic() {
        expect_unwrap(try_example(0, true));
    }
}
