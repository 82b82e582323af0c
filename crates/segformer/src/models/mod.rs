//! # Models.

pub mod segformer;
