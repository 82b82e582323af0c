//! Shape contracts: patterns of dimension matchers.

use crate::bindings::{MutableStackEnvironment, StackEnvironment};
use crate::expressions::{DimExpr, TryMatchResult};
use crate::shape_argument::ShapeArgument;
use std::fmt::{Display, Formatter};

/// A single term of a [`ShapeContract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimMatcher<'a> {
    /// Matches any one dimension.
    Any,

    /// Matches zero or more dimensions.
    Ellipsis,

    /// Matches (and possibly binds) a dimension expression.
    Expr(DimExpr<'a>),
}

impl Display for DimMatcher<'_> {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            DimMatcher::Any => write!(f, "_"),
            DimMatcher::Ellipsis => write!(f, "..."),
            DimMatcher::Expr(expr) => write!(f, "{expr}"),
        }
    }
}

/// A shape pattern.
///
/// Contracts are `const`-constructible so that they can live in a `static`;
/// see [`shape_contract!`](crate::shape_contract).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeContract<'a> {
    /// The pattern terms.
    pub terms: &'a [DimMatcher<'a>],

    /// The index of the ellipsis term, if any.
    pub ellipsis_pos: Option<usize>,
}

impl Display for ShapeContract<'_> {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "[")?;
        for (idx, term) in self.terms.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{term}")?;
        }
        write!(f, "]")
    }
}

impl<'a> ShapeContract<'a> {
    /// Build a contract from its terms.
    ///
    /// ## Panics
    ///
    /// If more than one term is an ellipsis.
    #[must_use]
    pub const fn new(terms: &'a [DimMatcher<'a>]) -> Self {
        let mut ellipsis_pos: Option<usize> = None;
        let mut i = 0;
        while i < terms.len() {
            if matches!(terms[i], DimMatcher::Ellipsis) {
                if ellipsis_pos.is_some() {
                    panic!("Multiple ellipses in pattern");
                }
                ellipsis_pos = Some(i);
            }
            i += 1;
        }
        ShapeContract {
            terms,
            ellipsis_pos,
        }
    }

    /// Assert that `shape` matches the contract under `env`.
    ///
    /// ## Panics
    ///
    /// On mismatch, with a message describing the shape, the pattern and the bindings.
    #[inline(always)]
    pub fn assert_shape<S>(
        &'a self,
        shape: S,
        env: StackEnvironment<'a>,
    ) where
        S: ShapeArgument,
    {
        if let Err(msg) = self.maybe_assert_shape(shape, env) {
            panic!("{msg}");
        }
    }

    /// Check that `shape` matches the contract under `env`.
    #[inline(always)]
    pub fn maybe_assert_shape<S>(
        &'a self,
        shape: S,
        env: StackEnvironment<'a>,
    ) -> Result<(), String>
    where
        S: ShapeArgument,
    {
        let mut mut_env = MutableStackEnvironment::new(env);
        self.resolve_match(&shape.get_shape_vec(), &mut mut_env)
    }

    /// Match `shape` and return the values bound to `keys`.
    ///
    /// ## Panics
    ///
    /// On mismatch, or if a key is never bound.
    #[must_use]
    #[inline(always)]
    pub fn unpack_shape<S, const K: usize>(
        &'a self,
        shape: S,
        keys: &[&'a str; K],
        env: StackEnvironment<'a>,
    ) -> [usize; K]
    where
        S: ShapeArgument,
    {
        match self.maybe_unpack_shape(shape, keys, env) {
            Ok(values) => values,
            Err(msg) => panic!("{msg}"),
        }
    }

    /// Match `shape` and return the values bound to `keys`, or an error message.
    #[inline(always)]
    pub fn maybe_unpack_shape<S, const K: usize>(
        &'a self,
        shape: S,
        keys: &[&'a str; K],
        env: StackEnvironment<'a>,
    ) -> Result<[usize; K], String>
    where
        S: ShapeArgument,
    {
        let mut mut_env = MutableStackEnvironment::new(env);
        self.resolve_match(&shape.get_shape_vec(), &mut mut_env)?;
        Ok(mut_env.export_key_values(keys))
    }

    fn resolve_match(
        &'a self,
        shape: &[usize],
        env: &mut MutableStackEnvironment<'a>,
    ) -> Result<(), String> {
        let fail = |env: &MutableStackEnvironment<'a>, msg: String| -> String {
            format!(
                "Shape Error:: {msg}\n shape:\n  {shape:?}\n expected:\n  {self}\n  {}",
                env.describe()
            )
        };

        let (e_start, e_size) = match self.check_ellipsis_split(shape.len()) {
            Ok(split) => split,
            Err(msg) => return Err(fail(env, msg)),
        };

        for (shape_idx, &dim_size) in shape.iter().enumerate() {
            let term_idx = if shape_idx < e_start {
                shape_idx
            } else if shape_idx < e_start + e_size {
                continue;
            } else {
                shape_idx + 1 - e_size
            };
            let term = &self.terms[term_idx];

            let expr = match term {
                DimMatcher::Any => continue,
                DimMatcher::Ellipsis => unreachable!("ellipsis is consumed by the split"),
                DimMatcher::Expr(expr) => expr,
            };

            match expr.try_match(dim_size, env) {
                Ok(TryMatchResult::Match) => {}
                Ok(TryMatchResult::Conflict) => {
                    let msg = format!("{dim_size} !~ {term} :: Value MissMatch");
                    return Err(fail(env, msg));
                }
                Ok(TryMatchResult::ParamConstraint(name, value)) => env.bind(name, value),
                Err(msg) => {
                    let msg = format!("{dim_size} !~ {term} :: {msg}");
                    return Err(fail(env, msg));
                }
            }
        }

        Ok(())
    }

    /// Compute `(ellipsis_start, ellipsis_len)` for a shape of the given rank.
    fn check_ellipsis_split(
        &self,
        rank: usize,
    ) -> Result<(usize, usize), String> {
        let k = self.terms.len();
        match self.ellipsis_pos {
            None if rank != k => Err(format!("Shape rank {rank} != pattern dim count {k}")),
            None => Ok((k, 0)),
            Some(pos) => {
                let fixed = k - 1;
                if rank < fixed {
                    return Err(format!(
                        "Shape rank {rank} < non-ellipsis pattern term count {fixed}"
                    ));
                }
                Ok((pos, rank - fixed))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape_contract;
    use indoc::indoc;

    #[test]
    #[should_panic(expected = "Multiple ellipses in pattern")]
    fn test_multiple_ellipses() {
        let _ = ShapeContract::new(&[DimMatcher::Ellipsis, DimMatcher::Any, DimMatcher::Ellipsis]);
    }

    #[test]
    fn test_format() {
        static CONTRACT: ShapeContract = shape_contract![_, "b", ..., "h" * "w", "c"];
        assert_eq!(CONTRACT.to_string(), "[_, b, ..., (h*w), c]");
        assert_eq!(CONTRACT.ellipsis_pos, Some(2));
    }

    #[test]
    fn test_check_ellipsis_split() {
        static WITH: ShapeContract = shape_contract![_, ..., "b"];
        assert_eq!(WITH.check_ellipsis_split(2), Ok((1, 0)));
        assert_eq!(WITH.check_ellipsis_split(4), Ok((1, 2)));
        assert_eq!(
            WITH.check_ellipsis_split(1),
            Err("Shape rank 1 < non-ellipsis pattern term count 2".to_string())
        );

        static WITHOUT: ShapeContract = shape_contract![_, "b"];
        assert_eq!(WITHOUT.check_ellipsis_split(2), Ok((2, 0)));
        assert_eq!(
            WITHOUT.check_ellipsis_split(3),
            Err("Shape rank 3 != pattern dim count 2".to_string())
        );
    }

    #[test]
    fn test_unpack_shape() {
        static CONTRACT: ShapeContract =
            shape_contract!["batch", ..., "height" * "width", "channels"];

        let [batch, width, channels] = CONTRACT.unpack_shape(
            &[2, 7, 7, 12, 32],
            &["batch", "width", "channels"],
            &[("height", 3)],
        );
        assert_eq!(batch, 2);
        assert_eq!(width, 4);
        assert_eq!(channels, 32);

        CONTRACT.assert_shape(&[2, 12, 32], &[("height", 3), ("width", 4)]);
    }

    #[test]
    fn test_error_message() {
        static CONTRACT: ShapeContract = shape_contract!["batch", "height" * "width", "channels"];

        let err = CONTRACT
            .maybe_assert_shape(&[2, 13, 32], &[("height", 3), ("width", 4)])
            .unwrap_err();

        assert_eq!(
            err,
            indoc! {r#"
                Shape Error:: 13 !~ (height*width) :: Value MissMatch
                 shape:
                  [2, 13, 32]
                 expected:
                  [batch, (height*width), channels]
                  {"height": 3, "width": 4, "batch": 2}"#}
        );
    }

    #[test]
    #[should_panic(expected = "Shape rank 3 != pattern dim count 1")]
    fn test_rank_mismatch() {
        static CONTRACT: ShapeContract = shape_contract!["a"];
        CONTRACT.assert_shape(&[1, 2, 3], &[]);
    }

    #[test]
    #[should_panic(expected = "Value MissMatch")]
    fn test_value_mismatch() {
        static CONTRACT: ShapeContract = shape_contract!["a", "b"];
        CONTRACT.assert_shape(&[2, 3], &[("a", 2), ("b", 4)]);
    }
}
