//! # Utility Functions

pub mod probability;
pub mod results;
