//! # Efficient self-attention with spatial reduction (SR).
//!
//! Queries come from every token; keys and values come from a context
//! sequence whose spatial grid was shrunk by a strided convolution
//! (kernel = stride = `sr_ratio`), reducing the attention cost from
//! ``N^2`` to ``N * N / sr_ratio^2``.

use crate::errors::SegFormerError;
use crate::utility::probability::try_probability;
use crate::utility::results::expect_unwrap;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;
use segformer_contracts::{ShapeContract, run_every_nth, shape_contract};

/// Common introspection interface for `SpatialReductionAttention`.
pub trait SpatialReductionAttentionMeta {
    /// The input/output channel dimension size.
    fn d_input(&self) -> usize;

    /// The number of attention heads.
    fn num_heads(&self) -> usize;

    /// The channel size of each head.
    fn head_dim(&self) -> usize {
        self.d_input() / self.num_heads()
    }

    /// The spatial reduction ratio; `1` disables the reduction.
    fn sr_ratio(&self) -> usize;

    /// Is the spatial reduction enabled?
    fn sr_enabled(&self) -> bool {
        self.sr_ratio() > 1
    }

    /// The resolution of the key/value grid for a given query grid.
    ///
    /// ``ceil(x / sr_ratio)`` per axis.
    fn reduced_resolution(
        &self,
        resolution: [usize; 2],
    ) -> [usize; 2] {
        resolution.map(|x| x.div_ceil(self.sr_ratio()))
    }

    /// The key/value sequence length for a given query grid.
    fn reduced_len(
        &self,
        resolution: [usize; 2],
    ) -> usize {
        let [h, w] = self.reduced_resolution(resolution);
        h * w
    }

    /// The multiplier applied to the ``Q K^T`` scores.
    fn scale(&self) -> f64;

    /// Are the Q/K/V projections biased?
    fn enable_qkv_bias(&self) -> bool;

    /// Dropout rate on the attention weights.
    fn attn_drop(&self) -> f64;

    /// Dropout rate on the output projection.
    fn proj_drop(&self) -> f64;
}

/// Configuration for `SpatialReductionAttention`.
#[derive(Config, Debug)]
pub struct SpatialReductionAttentionConfig {
    /// Input dimension size.
    pub d_input: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Spatial reduction ratio.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Whether to enable bias for the Q, K, V linear layers.
    #[config(default = true)]
    pub enable_qkv_bias: bool,

    /// Override of the score scale; defaults to ``1 / sqrt(head_dim)``.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,

    /// Dropout rate for attention.
    #[config(default = 0.)]
    pub attn_drop: f64,

    /// Dropout rate for projection.
    #[config(default = 0.)]
    pub proj_drop: f64,

    /// Epsilon of the context layer norm.
    #[config(default = 1e-6)]
    pub layer_norm_eps: f64,
}

impl SpatialReductionAttentionMeta for SpatialReductionAttentionConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn scale(&self) -> f64 {
        self.qk_scale
            .unwrap_or_else(|| 1.0 / (self.head_dim() as f64).sqrt())
    }

    fn enable_qkv_bias(&self) -> bool {
        self.enable_qkv_bias
    }

    fn attn_drop(&self) -> f64 {
        self.attn_drop
    }

    fn proj_drop(&self) -> f64 {
        self.proj_drop
    }
}

impl SpatialReductionAttentionConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<(), SegFormerError> {
        if self.num_heads == 0 || self.d_input % self.num_heads != 0 {
            return Err(SegFormerError::HeadsDoNotDivideChannels {
                channels: self.d_input,
                num_heads: self.num_heads,
            });
        }
        if self.sr_ratio == 0 {
            return Err(SegFormerError::InvalidSrRatio(self.sr_ratio));
        }
        try_probability(self.attn_drop)?;
        try_probability(self.proj_drop)?;
        Ok(())
    }

    /// Initialize a `SpatialReductionAttention` module.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<SpatialReductionAttention<B>, SegFormerError> {
        self.validate()?;

        let d_input = self.d_input;
        let linear = |bias: bool| -> Linear<B> {
            LinearConfig::new(d_input, d_input)
                .with_bias(bias)
                .init(device)
        };

        let (sr, sr_norm) = if self.sr_enabled() {
            let kernel = [self.sr_ratio, self.sr_ratio];
            (
                Some(
                    Conv2dConfig::new([d_input, d_input], kernel)
                        .with_stride(kernel)
                        .init(device),
                ),
                Some(
                    LayerNormConfig::new(d_input)
                        .with_epsilon(self.layer_norm_eps)
                        .init(device),
                ),
            )
        } else {
            (None, None)
        };

        Ok(SpatialReductionAttention {
            num_heads: self.num_heads,
            sr_ratio: self.sr_ratio,
            scale: self.scale(),
            q: linear(self.enable_qkv_bias),
            k: linear(self.enable_qkv_bias),
            v: linear(self.enable_qkv_bias),
            sr,
            sr_norm,
            attn_drop: DropoutConfig::new(self.attn_drop).init(),
            proj: linear(true),
            proj_drop: DropoutConfig::new(self.proj_drop).init(),
        })
    }

    /// Initialize a `SpatialReductionAttention` module.
    ///
    /// ## Panics
    ///
    /// On an invalid configuration; see [`Self::try_init`].
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SpatialReductionAttention<B> {
        expect_unwrap(self.try_init(device))
    }
}

/// Multi-head self-attention over a spatially reduced key/value context.
#[derive(Module, Debug)]
pub struct SpatialReductionAttention<B: Backend> {
    /// Number of attention heads.
    pub num_heads: usize,

    /// Spatial reduction ratio.
    pub sr_ratio: usize,

    /// Score scale.
    pub scale: f64,

    /// Query projection.
    pub q: Linear<B>,

    /// Key projection.
    pub k: Linear<B>,

    /// Value projection.
    pub v: Linear<B>,

    /// Spatial reduction conv; present iff ``sr_ratio > 1``.
    pub sr: Option<Conv2d<B>>,

    /// Context normalization; present iff ``sr_ratio > 1``.
    pub sr_norm: Option<LayerNorm<B>>,

    /// Dropout for attention weights.
    pub attn_drop: Dropout,

    /// Output projection.
    pub proj: Linear<B>,

    /// Dropout for projection.
    pub proj_drop: Dropout,
}

impl<B: Backend> SpatialReductionAttentionMeta for SpatialReductionAttention<B> {
    fn d_input(&self) -> usize {
        self.q.weight.dims()[0]
    }

    fn num_heads(&self) -> usize {
        self.num_heads
    }

    fn sr_ratio(&self) -> usize {
        self.sr_ratio
    }

    fn scale(&self) -> f64 {
        self.scale
    }

    fn enable_qkv_bias(&self) -> bool {
        self.q.bias.is_some()
    }

    fn attn_drop(&self) -> f64 {
        self.attn_drop.prob
    }

    fn proj_drop(&self) -> f64 {
        self.proj_drop.prob
    }
}

impl<B: Backend> SpatialReductionAttention<B> {
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
        let [b, n, c] = self.check_input(&x, resolution);

        let context = self.context(x.clone(), resolution);
        let q = self.split_heads(self.q.forward(x));
        let k = self.split_heads(self.k.forward(context.clone()));
        let v = self.split_heads(self.v.forward(context));
        // q: (B, heads, N, head_dim)
        // k, v: (B, heads, N', head_dim)

        let attn = self.attention(q, k);
        let attn = self.attn_drop.forward(attn);
        run_every_nth!({
            static CONTRACT: ShapeContract = shape_contract!["b", "heads", "n", "h" * "w"];
            let [rh, rw] = self.reduced_resolution(resolution);
            CONTRACT.assert_shape(
                &attn,
                &[
                    ("b", b),
                    ("heads", self.num_heads),
                    ("n", n),
                    ("h", rh),
                    ("w", rw),
                ],
            );
        });

        let x = attn.matmul(v);
        let x = x.swap_dims(1, 2).reshape([b, n, c]);
        // (B, N, C)

        let x = self.proj.forward(x);
        self.proj_drop.forward(x)
    }

    /// The attention weights, without dropout.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input tensor of shape ``(B, H*W, C)``.
    /// - `resolution`: The token grid ``[H, W]``.
    ///
    /// ## Returns
    ///
    /// - Row-stochastic weights of shape ``(B, heads, H*W, N')``;
    ///   see [`SpatialReductionAttentionMeta::reduced_len`].
    #[must_use]
    pub fn attention_weights(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 4> {
        let _ = self.check_input(&x, resolution);

        let context = self.context(x.clone(), resolution);
        let q = self.split_heads(self.q.forward(x));
        let k = self.split_heads(self.k.forward(context));
        self.attention(q, k)
    }

    /// Build the key/value context sequence.
    ///
    /// With spatial reduction enabled, the grid is zero padded on the
    /// bottom/right to a multiple of `sr_ratio`, reduced by the strided
    /// conv, flattened and normalized.
    ///
    /// ## Returns
    ///
    /// - Context tensor of shape ``(B, N', C)``.
    #[must_use]
    pub fn context(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let (sr, norm) = match (&self.sr, &self.sr_norm) {
            (Some(sr), Some(norm)) => (sr, norm),
            _ => return x,
        };

        let [b, _, c] = x.dims();
        let [h, w] = resolution;

        let x = x.swap_dims(1, 2).reshape([b, c, h, w]);
        // (B, C, H, W)

        let [ph, pw] = self.reduced_resolution(resolution).map(|r| r * self.sr_ratio);
        let x = if [ph, pw] == [h, w] {
            x
        } else {
            x.pad((0, pw - w, 0, ph - h), 0.0)
        };

        let x = sr.forward(x);
        // (B, C, H', W')

        let x = x.flatten::<3>(2, 3).swap_dims(1, 2);
        // (B, N', C)

        norm.forward(x)
    }

    #[must_use]
    fn check_input(
        &self,
        x: &Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> [usize; 3] {
        static CONTRACT: ShapeContract = shape_contract!["b", "h" * "w", "c"];
        let [h, w] = resolution;
        let [b] = CONTRACT.unpack_shape(x, &["b"], &[("h", h), ("w", w), ("c", self.d_input())]);
        [b, h * w, self.d_input()]
    }

    /// ``(B, L, C) -> (B, heads, L, head_dim)``
    #[inline(always)]
    #[must_use]
    fn split_heads(
        &self,
        x: Tensor<B, 3>,
    ) -> Tensor<B, 4> {
        let [b, l, _] = x.dims();
        x.reshape([b, l, self.num_heads, self.head_dim()])
            .swap_dims(1, 2)
    }

    /// ``softmax(Q K^T * scale)`` over the key axis.
    #[inline(always)]
    #[must_use]
    fn attention(
        &self,
        q: Tensor<B, 4>,
        k: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let scores = q.matmul(k.swap_dims(2, 3)).mul_scalar(self.scale);
        // (B, heads, N, N')

        softmax(scores, 3)
    }
}
