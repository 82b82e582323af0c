//! # segformer-contracts
//!
//! Static shape contracts for checking tensor shapes at layer boundaries.
//!
//! A [`ShapeContract`] is a `const`-constructible pattern of dimension
//! matchers; it is usually declared once, in a `static`, with the
//! [`shape_contract!`] macro and then checked against tensor shapes:
//!
//! ```rust
//! use segformer_contracts::{ShapeContract, shape_contract};
//!
//! static CONTRACT: ShapeContract = shape_contract!["batch", "height" * "width", "channels"];
//!
//! let [batch, channels] = CONTRACT.unpack_shape(
//!     &[2, 12, 32],
//!     &["batch", "channels"],
//!     &[("height", 3), ("width", 4)],
//! );
//! assert_eq!(batch, 2);
//! assert_eq!(channels, 32);
//! ```

pub mod bindings;
pub mod contracts;
pub mod expressions;
mod macros;
pub mod shape_argument;

pub use bindings::StackEnvironment;
pub use contracts::{DimMatcher, ShapeContract};
pub use expressions::DimExpr;
pub use shape_argument::ShapeArgument;
