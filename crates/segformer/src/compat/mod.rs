//! # Compatibility helpers for burn.

pub mod ops;
