//! # Neural network layers.

pub mod drop;
pub mod patching;
pub mod resize;
