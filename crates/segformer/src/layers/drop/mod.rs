//! # Stochastic depth layers.

pub mod path;
pub mod rate_table;
