//! # Patch embedding layers.

pub mod overlap_patch_embed;
