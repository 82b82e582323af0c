/// Run a block of code or an expression every nth time it is called.
///
/// Runs at a doubling rate (1, 2, 4, ...) until it reaches the specified period;
/// then continues to run at that period.
///
/// Used to throttle shape checks on hot forward paths: the first calls are
/// always checked, later calls are sampled.
///
/// ## Arguments
///
/// - `$period`: [optional; default=1000] the period.
/// - `$code`: the expression (or block) to run.
///
/// ## Usage
///
/// ```rust
/// use segformer_contracts::run_every_nth;
///
/// let mut hits = 0;
/// for _ in 0..8 {
///     run_every_nth!(4, hits += 1);
/// }
/// assert_eq!(hits, 3);
/// ```
#[macro_export]
macro_rules! run_every_nth {
    (@internal $period:literal, $code:expr) => {{
        if {
            static PERIOD: std::sync::atomic::AtomicUsize =
                std::sync::atomic::AtomicUsize::new(1);
            static COUNTER: std::sync::atomic::AtomicUsize =
                std::sync::atomic::AtomicUsize::new(0);

            let effective_period = PERIOD.load(std::sync::atomic::Ordering::Relaxed);
            let count = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            if (count % effective_period) == 0 {
                if effective_period < $period {
                    PERIOD.store(
                        (2 * effective_period).clamp(1, $period),
                        std::sync::atomic::Ordering::Relaxed,
                    );
                }
                // Reset on period change, and periodically to avoid overflow.
                if effective_period < $period || count > $period * 100 {
                    COUNTER.store(1, std::sync::atomic::Ordering::Relaxed);
                }
                true
            } else {
                false
            }
        } {
            $code;
        }
    }};

    ($period:literal, $code:expr) => {
        $crate::run_every_nth!(@internal $period, $code)
    };

    ($code:expr) => {
        $crate::run_every_nth!(@internal 1000, $code)
    };
}

/// Build a `const` [`ShapeContract`](crate::ShapeContract).
///
/// Terms are separated by commas:
///
/// - `_` matches any single dimension.
/// - `...` matches zero or more dimensions (at most once).
/// - `"name"` matches, or binds, a named dimension.
/// - `"a" * "b" * ...` matches the product of named dimensions;
///   at most one factor may be unbound at match time.
///
/// ```rust
/// use segformer_contracts::{ShapeContract, shape_contract};
///
/// static CONTRACT: ShapeContract = shape_contract![_, "heads", "height" * "width", ...];
/// CONTRACT.assert_shape(&[1, 2, 12], &[("height", 3)]);
/// ```
#[macro_export]
macro_rules! shape_contract {
    ($($terms:tt)*) => {
        $crate::__contract_terms!(@acc [] $($terms)*)
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_terms {
    (@acc [$($acc:expr,)*]) => {
        $crate::ShapeContract::new(&[$($acc,)*])
    };

    (@acc [$($acc:expr,)*] _ $(, $($rest:tt)*)?) => {
        $crate::__contract_terms!(
            @acc [$($acc,)* $crate::DimMatcher::Any,] $($($rest)*)?
        )
    };

    (@acc [$($acc:expr,)*] ... $(, $($rest:tt)*)?) => {
        $crate::__contract_terms!(
            @acc [$($acc,)* $crate::DimMatcher::Ellipsis,] $($($rest)*)?
        )
    };

    (@acc [$($acc:expr,)*] $first:literal $(* $factor:literal)+ $(, $($rest:tt)*)?) => {
        $crate::__contract_terms!(
            @acc [
                $($acc,)*
                $crate::DimMatcher::Expr($crate::DimExpr::Prod(&[
                    $crate::DimExpr::Param($first),
                    $($crate::DimExpr::Param($factor),)+
                ])),
            ] $($($rest)*)?
        )
    };

    (@acc [$($acc:expr,)*] $name:literal $(, $($rest:tt)*)?) => {
        $crate::__contract_terms!(
            @acc [
                $($acc,)*
                $crate::DimMatcher::Expr($crate::DimExpr::Param($name)),
            ] $($($rest)*)?
        )
    };
}
