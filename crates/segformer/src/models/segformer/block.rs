//! # Mix Transformer encoder block.

use crate::errors::SegFormerError;
use crate::layers::drop::path::{DropPath, DropPathConfig, DropPathMeta};
use crate::models::segformer::attention::{
    SpatialReductionAttention, SpatialReductionAttentionConfig, SpatialReductionAttentionMeta,
};
use crate::models::segformer::mix_ffn::{MixFfn, MixFfnConfig, MixFfnMeta};
use crate::utility::probability::try_probability;
use crate::utility::results::expect_unwrap;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for `MixTransformerBlock`.
pub trait MixTransformerBlockMeta {
    /// The input/output channel dimension size.
    fn d_input(&self) -> usize;

    /// The number of attention heads.
    fn num_heads(&self) -> usize;

    /// The attention spatial reduction ratio.
    fn sr_ratio(&self) -> usize;

    /// The Mix-FFN hidden size.
    fn d_hidden(&self) -> usize;

    /// Whether the Q, K, V projections are biased.
    fn enable_qkv_bias(&self) -> bool;

    /// Dropout rate for the MLP and projections.
    fn drop_rate(&self) -> f64;

    /// Dropout rate for attention.
    fn attn_drop_rate(&self) -> f64;

    /// Drop path rate for stochastic depth.
    fn drop_path_rate(&self) -> f64;
}

/// Configuration for `MixTransformerBlock`.
#[derive(Config, Debug)]
pub struct MixTransformerBlockConfig {
    /// Input dimension size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Spatial reduction ratio.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Ratio of hidden dimension to input dimension in the Mix-FFN.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Whether to enable QKV bias.
    #[config(default = true)]
    pub enable_qkv_bias: bool,

    /// Override of the attention score scale.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,

    /// Dropout rate for the MLP and projections.
    #[config(default = 0.0)]
    pub drop_rate: f64,

    /// Dropout rate for attention.
    #[config(default = 0.0)]
    pub attn_drop_rate: f64,

    /// Drop path rate for stochastic depth.
    #[config(default = 0.0)]
    pub drop_path_rate: f64,

    /// Epsilon of the block layer norms.
    #[config(default = 1e-6)]
    pub layer_norm_eps: f64,
}

impl MixTransformerBlockMeta for MixTransformerBlockConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn d_hidden(&self) -> usize {
        (self.d_input as f64 * self.mlp_ratio) as usize
    }

    fn enable_qkv_bias(&self) -> bool {
        self.enable_qkv_bias
    }

    fn drop_rate(&self) -> f64 {
        self.drop_rate
    }

    fn attn_drop_rate(&self) -> f64 {
        self.attn_drop_rate
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path_rate
    }
}

impl MixTransformerBlockConfig {
    /// The attention configuration of the block.
    #[must_use]
    pub fn attention_config(&self) -> SpatialReductionAttentionConfig {
        SpatialReductionAttentionConfig::new(self.d_input, self.num_heads)
            .with_sr_ratio(self.sr_ratio)
            .with_enable_qkv_bias(self.enable_qkv_bias)
            .with_qk_scale(self.qk_scale)
            .with_attn_drop(self.attn_drop_rate)
            .with_proj_drop(self.drop_rate)
            .with_layer_norm_eps(self.layer_norm_eps)
    }

    /// The Mix-FFN configuration of the block.
    #[must_use]
    pub fn mlp_config(&self) -> MixFfnConfig {
        MixFfnConfig::new(self.d_input, self.d_hidden()).with_drop(self.drop_rate)
    }

    /// Initialize a `MixTransformerBlock`.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<MixTransformerBlock<B>, SegFormerError> {
        let drop_path_rate = try_probability(self.drop_path_rate)?;

        Ok(MixTransformerBlock {
            norm1: LayerNormConfig::new(self.d_input)
                .with_epsilon(self.layer_norm_eps)
                .init(device),
            attn: self.attention_config().try_init(device)?,
            norm2: LayerNormConfig::new(self.d_input)
                .with_epsilon(self.layer_norm_eps)
                .init(device),
            mlp: self.mlp_config().try_init(device)?,
            drop_path: DropPathConfig::new()
                .with_drop_prob(drop_path_rate)
                .init(),
        })
    }

    /// Initialize a `MixTransformerBlock`.
    ///
    /// ## Panics
    ///
    /// On an invalid configuration.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MixTransformerBlock<B> {
        expect_unwrap(self.try_init(device))
    }
}

/// A Mix Transformer encoder block.
///
/// Pre-norm attention and pre-norm Mix-FFN, each wrapped in a
/// stochastic depth residual connection.
#[derive(Module, Debug)]
pub struct MixTransformerBlock<B: Backend> {
    /// Attention input norm.
    pub norm1: LayerNorm<B>,

    /// Spatial reduction attention.
    pub attn: SpatialReductionAttention<B>,

    /// Mix-FFN input norm.
    pub norm2: LayerNorm<B>,

    /// Mix-FFN.
    pub mlp: MixFfn<B>,

    /// Stochastic depth.
    pub drop_path: DropPath,
}

impl<B: Backend> MixTransformerBlockMeta for MixTransformerBlock<B> {
    fn d_input(&self) -> usize {
        self.attn.d_input()
    }

    fn num_heads(&self) -> usize {
        self.attn.num_heads()
    }

    fn sr_ratio(&self) -> usize {
        self.attn.sr_ratio()
    }

    fn d_hidden(&self) -> usize {
        self.mlp.d_hidden()
    }

    fn enable_qkv_bias(&self) -> bool {
        self.attn.enable_qkv_bias()
    }

    fn drop_rate(&self) -> f64 {
        self.mlp.drop()
    }

    fn attn_drop_rate(&self) -> f64 {
        self.attn.attn_drop()
    }

    fn drop_path_rate(&self) -> f64 {
        self.drop_path.drop_prob()
    }
}

impl<B: Backend> MixTransformerBlock<B> {
    /// Forward pass.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input tensor of shape ``(B, H*W, C)``.
    /// - `resolution`: The token grid ``[H, W]``.
    ///
    /// ## Returns
    ///
    /// - Output tensor of shape ``(B, H*W, C)``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let x = self.drop_path.with_skip(x, |x| {
            self.attn.forward(self.norm1.forward(x), resolution)
        });
        self.drop_path.with_skip(x, |x| {
            self.mlp.forward(self.norm2.forward(x), resolution)
        })
    }
}
