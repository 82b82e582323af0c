#![warn(missing_docs)]
//!# segformer - SegFormer semantic segmentation for burn
//!
//! The Mix Vision Transformer (MiT) encoder, the all-MLP decode head,
//! and the `B0`..`B5` model family.
//!
//! ```rust,no_run
//! use burn::backend::NdArray;
//! use burn::prelude::Tensor;
//! use segformer::models::segformer::segformer_b0;
//!
//! let device = Default::default();
//! let model = segformer_b0::<NdArray>(&[512, 512, 3], 19, &device).unwrap();
//!
//! let pixels = Tensor::<NdArray, 4>::zeros([1, 512, 512, 3], &device);
//! let probs = model.forward(pixels);
//! assert_eq!(probs.dims(), [1, 512, 512, 19]);
//! ```

#[allow(dead_code)]
pub(crate) mod compat;

#[cfg(test)]
#[allow(dead_code)]
pub(crate) mod testing;

pub mod errors;
pub mod layers;
pub mod models;
pub mod utility;

pub use errors::SegFormerError;
