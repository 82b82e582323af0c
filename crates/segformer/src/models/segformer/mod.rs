//! # SegFormer
//!
//! Semantic segmentation with a hierarchical Mix Vision Transformer
//! encoder and an all-MLP decode head.
//!
//! Construct a model with one of [`segformer_b0`] .. [`segformer_b5`], or
//! with [`SegFormerConfig::for_variant_name`].

pub mod attention;
pub mod block;
pub mod encoder;
pub mod head;
pub mod mix_ffn;
pub mod model;
pub mod variants;

pub use model::{
    SegFormer, SegFormerConfig, SegFormerMeta, SegFormerPlan, segformer_b0, segformer_b1,
    segformer_b2, segformer_b3, segformer_b4, segformer_b5,
};
pub use variants::{MODEL_CONFIGS, SegFormerVariant, VariantConfig};
