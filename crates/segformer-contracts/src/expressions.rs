//! Dimension size expressions.

use crate::bindings::StackMap;
use std::fmt::{Display, Formatter};

/// A `const`-friendly expression algebra for dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimExpr<'a> {
    /// A named parameter.
    Param(&'a str),

    /// Product of expressions.
    Prod(&'a [DimExpr<'a>]),
}

impl Display for DimExpr<'_> {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            DimExpr::Param(name) => write!(f, "{name}"),
            DimExpr::Prod(factors) => {
                write!(f, "(")?;
                for (idx, expr) in factors.iter().enumerate() {
                    if idx > 0 {
                        write!(f, "*")?;
                    }
                    write!(f, "{expr}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Partial evaluation of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TryEvalResult {
    /// Every parameter was bound.
    Value(usize),

    /// The number of unbound parameter references.
    UnboundParams(usize),
}

/// Outcome of [`DimExpr::try_match`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryMatchResult<'a> {
    /// Fully bound, and equal to the target.
    Match,

    /// Fully bound, and not equal to the target.
    Conflict,

    /// Exactly one unbound parameter, which must take this value.
    ParamConstraint(&'a str, usize),
}

impl<'a> DimExpr<'a> {
    #[must_use]
    fn try_eval<E>(
        &self,
        env: &E,
    ) -> TryEvalResult
    where
        E: StackMap<'a>,
    {
        match self {
            DimExpr::Param(name) => match env.lookup(name) {
                Some(value) => TryEvalResult::Value(value),
                None => TryEvalResult::UnboundParams(1),
            },
            DimExpr::Prod(factors) => {
                let mut value = 1;
                let mut unbound = 0;
                for factor in factors.iter() {
                    match factor.try_eval(env) {
                        TryEvalResult::Value(v) => value *= v,
                        TryEvalResult::UnboundParams(c) => unbound += c,
                    }
                }
                if unbound == 0 {
                    TryEvalResult::Value(value)
                } else {
                    TryEvalResult::UnboundParams(unbound)
                }
            }
        }
    }

    /// Reconcile the expression against a concrete dimension size.
    ///
    /// ## Arguments
    ///
    /// - `target`: the observed dimension size.
    /// - `env`: the current bindings.
    ///
    /// ## Returns
    ///
    /// - `Ok(Match)` / `Ok(Conflict)` when the expression is fully bound.
    /// - `Ok(ParamConstraint(name, value))` when exactly one parameter is unbound.
    /// - `Err(msg)` when the expression is under-constrained or has no integer solution.
    pub fn try_match<E>(
        &'a self,
        target: usize,
        env: &E,
    ) -> Result<TryMatchResult<'a>, String>
    where
        E: StackMap<'a>,
    {
        match self {
            DimExpr::Param(name) => Ok(match env.lookup(name) {
                Some(value) if value == target => TryMatchResult::Match,
                Some(_) => TryMatchResult::Conflict,
                None => TryMatchResult::ParamConstraint(*name, target),
            }),
            DimExpr::Prod(factors) => {
                let mut partial = 1;
                let mut remainder: Option<&'a DimExpr<'a>> = None;
                for factor in factors.iter() {
                    match factor.try_eval(env) {
                        TryEvalResult::Value(v) => partial *= v,
                        TryEvalResult::UnboundParams(1) if remainder.is_none() => {
                            remainder = Some(factor);
                        }
                        TryEvalResult::UnboundParams(_) => {
                            return Err("Too many unbound params".to_string());
                        }
                    }
                }
                match remainder {
                    None if partial == target => Ok(TryMatchResult::Match),
                    None => Ok(TryMatchResult::Conflict),
                    Some(expr) => {
                        if partial == 0 || target % partial != 0 {
                            return Err("No integer solution.".to_string());
                        }
                        expr.try_match(target / partial, env)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::StackEnvironment;

    #[test]
    fn test_format() {
        let expr = DimExpr::Prod(&[DimExpr::Param("h"), DimExpr::Param("w")]);
        assert_eq!(expr.to_string(), "(h*w)");
        assert_eq!(DimExpr::Param("c").to_string(), "c");
    }

    #[test]
    fn test_param_match() {
        let env: StackEnvironment = &[("a", 4)];

        assert_eq!(
            DimExpr::Param("a").try_match(4, &env),
            Ok(TryMatchResult::Match)
        );
        assert_eq!(
            DimExpr::Param("a").try_match(5, &env),
            Ok(TryMatchResult::Conflict)
        );
        assert_eq!(
            DimExpr::Param("b").try_match(5, &env),
            Ok(TryMatchResult::ParamConstraint("b", 5))
        );
    }

    #[test]
    fn test_prod_match() {
        static EXPR: DimExpr = DimExpr::Prod(&[DimExpr::Param("h"), DimExpr::Param("w")]);

        let env: StackEnvironment = &[("h", 3), ("w", 4)];
        assert_eq!(EXPR.try_match(12, &env), Ok(TryMatchResult::Match));
        assert_eq!(EXPR.try_match(13, &env), Ok(TryMatchResult::Conflict));

        let env: StackEnvironment = &[("h", 3)];
        assert_eq!(
            EXPR.try_match(12, &env),
            Ok(TryMatchResult::ParamConstraint("w", 4))
        );
        assert_eq!(
            EXPR.try_match(13, &env),
            Err("No integer solution.".to_string())
        );

        let env: StackEnvironment = &[];
        assert_eq!(
            EXPR.try_match(12, &env),
            Err("Too many unbound params".to_string())
        );
    }
}
