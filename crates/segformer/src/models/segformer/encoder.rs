//! # Mix Vision Transformer (MiT) encoder.
//!
//! Four stages of ``overlap patch embed -> blocks -> layer norm``; each
//! stage halves (the first quarters) the spatial grid, and every stage
//! output is returned as a ``(B, C_i, H_i, W_i)`` feature map.

use crate::errors::SegFormerError;
use crate::layers::drop::rate_table::DropPathRateDepthTable;
use crate::layers::patching::overlap_patch_embed::{
    OverlapPatchEmbed, OverlapPatchEmbedConfig, OverlapPatchEmbedMeta,
};
use crate::models::segformer::attention::SpatialReductionAttentionMeta;
use crate::models::segformer::block::{
    MixTransformerBlock, MixTransformerBlockConfig, MixTransformerBlockMeta,
};
use crate::utility::probability::try_probability;
use crate::utility::results::expect_unwrap;
use burn::config::Config;
use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig};
use burn::prelude::{Backend, Tensor};
use segformer_contracts::{ShapeContract, run_every_nth, shape_contract};

/// Per-stage hyper-parameters of the MiT encoder.
#[derive(Config, Debug, PartialEq)]
pub struct MixStageConfig {
    /// Output channels of the stage.
    pub embed_dim: usize,

    /// Number of transformer blocks.
    pub depth: usize,

    /// Number of attention heads.
    pub num_heads: usize,

    /// Mix-FFN expansion ratio.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Attention spatial reduction ratio.
    #[config(default = 1)]
    pub sr_ratio: usize,

    /// Patch embedding kernel size.
    #[config(default = 3)]
    pub patch_size: usize,

    /// Patch embedding stride.
    #[config(default = 2)]
    pub stride: usize,
}

/// Meta trait for `MixVisionTransformer` configs and modules.
pub trait MixVisionTransformerMeta {
    /// The number of input channels.
    fn d_input(&self) -> usize;

    /// The per-stage output channels.
    fn embed_dims(&self) -> Vec<usize>;

    /// The per-stage block counts.
    fn depths(&self) -> Vec<usize>;

    /// The per-stage head counts.
    fn num_heads(&self) -> Vec<usize>;

    /// The per-stage spatial reduction ratios.
    fn sr_ratios(&self) -> Vec<usize>;

    /// The number of stages.
    fn num_stages(&self) -> usize {
        self.embed_dims().len()
    }
}

/// Configuration for the `MixVisionTransformer` encoder.
#[derive(Config, Debug)]
pub struct MixVisionTransformerConfig {
    /// The number of input channels.
    pub d_input: usize,

    /// The input image resolution as ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// The stage table.
    pub stages: Vec<MixStageConfig>,

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

    /// Final drop path rate for stochastic depth.
    #[config(default = 0.1)]
    pub drop_path_rate: f64,

    /// Epsilon of every layer norm in the encoder.
    #[config(default = 1e-6)]
    pub layer_norm_eps: f64,
}

impl MixVisionTransformerMeta for MixVisionTransformerConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn embed_dims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.embed_dim).collect()
    }

    fn depths(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.depth).collect()
    }

    fn num_heads(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.num_heads).collect()
    }

    fn sr_ratios(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.sr_ratio).collect()
    }
}

/// The validated plan of a single encoder stage.
#[derive(Debug, Clone)]
pub struct MixStagePlan {
    /// The patch embedding of the stage.
    pub patch_config: OverlapPatchEmbedConfig,

    /// The token grid of the stage.
    pub resolution: [usize; 2],

    /// The key/value sequence length of the stage's attention.
    pub reduced_len: usize,

    /// The stage's blocks; one per depth, with progressive drop path rates.
    pub block_configs: Vec<MixTransformerBlockConfig>,
}

/// Validated plan for the `MixVisionTransformer` encoder.
#[derive(Debug, Clone)]
pub struct MixVisionTransformerPlan {
    /// Per-stage plans.
    pub stages: Vec<MixStagePlan>,
}

impl MixVisionTransformerPlan {
    /// The per-stage token grids.
    #[must_use]
    pub fn stage_resolutions(&self) -> Vec<[usize; 2]> {
        self.stages.iter().map(|s| s.resolution).collect()
    }

    /// The per-stage output channels.
    #[must_use]
    pub fn stage_dims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.patch_config.d_output).collect()
    }

    /// The per-stage drop path rates.
    #[must_use]
    pub fn stage_drop_path_rates(&self) -> Vec<Vec<f64>> {
        self.stages
            .iter()
            .map(|s| s.block_configs.iter().map(|b| b.drop_path_rate).collect())
            .collect()
    }
}

impl MixVisionTransformerConfig {
    /// Check config validity and return a plan for the encoder.
    ///
    /// Performs model constraint validation tests without initializing a model.
    pub fn validate(&self) -> Result<MixVisionTransformerPlan, SegFormerError> {
        if self.stages.is_empty() {
            return Err(SegFormerError::InvalidStageTable(
                "At least one stage is required".to_string(),
            ));
        }
        if self.d_input == 0 || self.input_resolution.contains(&0) {
            return Err(SegFormerError::InvalidInputShape(vec![
                self.input_resolution[0],
                self.input_resolution[1],
                self.d_input,
            ]));
        }
        for (stage_i, stage) in self.stages.iter().enumerate() {
            if stage.embed_dim == 0
                || stage.depth == 0
                || stage.patch_size == 0
                || stage.stride == 0
                || stage.mlp_ratio <= 0.0
            {
                return Err(SegFormerError::InvalidStageTable(format!(
                    "Stage {stage_i} must have positive sizes: {stage:?}"
                )));
            }
        }
        try_probability(self.drop_rate)?;
        try_probability(self.attn_drop_rate)?;
        try_probability(self.drop_path_rate)?;

        let dpr_stage_rates =
            DropPathRateDepthTable::dpr_stage_rates(self.drop_path_rate, &self.depths());

        let mut stages = Vec::with_capacity(self.stages.len());
        let mut d_input = self.d_input;
        let mut resolution = self.input_resolution;

        for (stage, drop_path_rates) in self.stages.iter().zip(dpr_stage_rates) {
            let patch_config = OverlapPatchEmbedConfig::new(d_input, stage.embed_dim)
                .with_patch_size(stage.patch_size)
                .with_stride(stage.stride)
                .with_layer_norm_eps(self.layer_norm_eps);
            resolution = patch_config.output_resolution(resolution);

            let block_configs: Vec<MixTransformerBlockConfig> = drop_path_rates
                .into_iter()
                .map(|drop_path_rate| {
                    MixTransformerBlockConfig::new(stage.embed_dim, stage.num_heads)
                        .with_sr_ratio(stage.sr_ratio)
                        .with_mlp_ratio(stage.mlp_ratio)
                        .with_enable_qkv_bias(self.enable_qkv_bias)
                        .with_qk_scale(self.qk_scale)
                        .with_drop_rate(self.drop_rate)
                        .with_attn_drop_rate(self.attn_drop_rate)
                        .with_drop_path_rate(drop_path_rate)
                        .with_layer_norm_eps(self.layer_norm_eps)
                })
                .collect();

            let attention_config = block_configs[0].attention_config();
            attention_config.validate()?;

            stages.push(MixStagePlan {
                patch_config,
                resolution,
                reduced_len: attention_config.reduced_len(resolution),
                block_configs,
            });

            d_input = stage.embed_dim;
        }

        Ok(MixVisionTransformerPlan { stages })
    }

    /// Initialize a new [`MixVisionTransformer`] encoder.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<MixVisionTransformer<B>, SegFormerError> {
        let plan = self.validate()?;

        let stages = plan
            .stages
            .iter()
            .enumerate()
            .map(|(stage_i, stage_plan)| -> Result<MixStage<B>, SegFormerError> {
                tracing::trace!(
                    stage = stage_i,
                    resolution = ?stage_plan.resolution,
                    reduced_len = stage_plan.reduced_len,
                    depth = stage_plan.block_configs.len(),
                    "init MiT stage"
                );
                Ok(MixStage {
                    patch_embed: stage_plan.patch_config.init(device),
                    blocks: stage_plan
                        .block_configs
                        .iter()
                        .map(|config| config.try_init(device))
                        .collect::<Result<Vec<_>, _>>()?,
                    norm: LayerNormConfig::new(stage_plan.patch_config.d_output)
                        .with_epsilon(self.layer_norm_eps)
                        .init(device),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MixVisionTransformer {
            d_input: self.d_input,
            stages,
        })
    }

    /// Initialize a new [`MixVisionTransformer`] encoder.
    ///
    /// ## Panics
    ///
    /// On an invalid configuration.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MixVisionTransformer<B> {
        expect_unwrap(self.try_init(device))
    }
}

/// One encoder stage.
#[derive(Module, Debug)]
pub struct MixStage<B: Backend> {
    /// The stage's patch embedding.
    pub patch_embed: OverlapPatchEmbed<B>,

    /// The stage's transformer blocks.
    pub blocks: Vec<MixTransformerBlock<B>>,

    /// The stage output norm.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> MixStage<B> {
    /// Apply the stage.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input feature map ``(B, C_in, H, W)``.
    ///
    /// ## Returns
    ///
    /// - Output feature map ``(B, C_out, H', W')``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let (mut x, resolution) = self.patch_embed.forward(x);
        // (B, H'*W', C_out)

        for block in &self.blocks {
            x = block.forward(x, resolution);
        }

        let x = self.norm.forward(x);

        let [b, _, c] = x.dims();
        let [h, w] = resolution;
        x.swap_dims(1, 2).reshape([b, c, h, w])
    }
}

/// The Mix Vision Transformer encoder.
#[derive(Module, Debug)]
pub struct MixVisionTransformer<B: Backend> {
    /// The number of input channels.
    pub d_input: usize,

    /// The encoder stages.
    pub stages: Vec<MixStage<B>>,
}

impl<B: Backend> MixVisionTransformerMeta for MixVisionTransformer<B> {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn embed_dims(&self) -> Vec<usize> {
        self.stages
            .iter()
            .map(|s| s.patch_embed.d_output())
            .collect()
    }

    fn depths(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.blocks.len()).collect()
    }

    fn num_heads(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.blocks[0].num_heads()).collect()
    }

    fn sr_ratios(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.blocks[0].sr_ratio()).collect()
    }
}

impl<B: Backend> MixVisionTransformer<B> {
    /// Encode an image.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input image ``(B, C, H, W)``.
    ///
    /// ## Returns
    ///
    /// - One feature map ``(B, C_i, H_i, W_i)`` per stage, shallowest first.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        run_every_nth!({
            static CONTRACT: ShapeContract = shape_contract!["batch", "channels", _, _];
            CONTRACT.assert_shape(&x, &[("channels", self.d_input)]);
        });

        let mut features = Vec::with_capacity(self.stages.len());
        let mut x = x;
        for stage in &self.stages {
            x = stage.forward(x);
            features.push(x.clone());
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    fn tiny_stages() -> Vec<MixStageConfig> {
        vec![
            MixStageConfig::new(8, 1, 1)
                .with_sr_ratio(4)
                .with_patch_size(7)
                .with_stride(4),
            MixStageConfig::new(16, 2, 2).with_sr_ratio(2),
        ]
    }

    #[test]
    fn test_meta() {
        let config = MixVisionTransformerConfig::new(3, [32, 32], tiny_stages());
        assert_eq!(config.d_input(), 3);
        assert_eq!(config.embed_dims(), vec![8, 16]);
        assert_eq!(config.depths(), vec![1, 2]);
        assert_eq!(config.num_heads(), vec![1, 2]);
        assert_eq!(config.sr_ratios(), vec![4, 2]);
        assert_eq!(config.num_stages(), 2);

        let device = Default::default();
        let encoder = config.init::<NdArray>(&device);
        assert_eq!(encoder.d_input(), 3);
        assert_eq!(encoder.embed_dims(), vec![8, 16]);
        assert_eq!(encoder.depths(), vec![1, 2]);
        assert_eq!(encoder.num_heads(), vec![1, 2]);
        assert_eq!(encoder.sr_ratios(), vec![4, 2]);
    }

    #[test]
    fn test_plan() {
        let config = MixVisionTransformerConfig::new(3, [30, 33], tiny_stages())
            .with_drop_path_rate(0.2);
        let plan = config.validate().unwrap();

        assert_eq!(plan.stage_resolutions(), vec![[8, 9], [4, 5]]);
        assert_eq!(plan.stage_dims(), vec![8, 16]);
        assert_eq!(plan.stages[0].reduced_len, 2 * 3);
        assert_eq!(plan.stages[1].reduced_len, 2 * 3);

        let rates = plan.stage_drop_path_rates();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0], vec![0.0]);
        assert_eq!(rates[1].len(), 2);
        assert_eq!(rates[1][1], 0.2);

        assert_eq!(plan.stages[1].patch_config.d_input, 8);
    }

    #[test]
    fn test_validate_errors() {
        assert!(matches!(
            MixVisionTransformerConfig::new(3, [32, 32], vec![]).validate(),
            Err(SegFormerError::InvalidStageTable(_))
        ));
        assert!(matches!(
            MixVisionTransformerConfig::new(3, [0, 32], tiny_stages()).validate(),
            Err(SegFormerError::InvalidInputShape(_))
        ));
        assert!(matches!(
            MixVisionTransformerConfig::new(3, [32, 32], vec![MixStageConfig::new(8, 0, 1)])
                .validate(),
            Err(SegFormerError::InvalidStageTable(_))
        ));
        assert_eq!(
            MixVisionTransformerConfig::new(3, [32, 32], vec![MixStageConfig::new(8, 1, 3)])
                .validate()
                .err(),
            Some(SegFormerError::HeadsDoNotDivideChannels {
                channels: 8,
                num_heads: 3
            })
        );
        assert_eq!(
            MixVisionTransformerConfig::new(
                3,
                [32, 32],
                vec![MixStageConfig::new(8, 1, 1).with_sr_ratio(0)]
            )
            .validate()
            .err(),
            Some(SegFormerError::InvalidSrRatio(0))
        );
        assert_eq!(
            MixVisionTransformerConfig::new(3, [32, 32], tiny_stages())
                .with_drop_path_rate(-0.1)
                .validate()
                .err(),
            Some(SegFormerError::InvalidProbability(-0.1))
        );
    }

    #[test]
    fn test_forward() {
        let device = Default::default();
        let config = MixVisionTransformerConfig::new(3, [30, 33], tiny_stages());
        let plan = config.validate().unwrap();
        let encoder = config.init::<NdArray>(&device);

        let x = Tensor::<NdArray, 4>::random([2, 3, 30, 33], Distribution::Default, &device);
        let features = encoder.forward(x);

        assert_eq!(features.len(), 2);
        for ((feature, [h, w]), c) in features
            .iter()
            .zip(plan.stage_resolutions())
            .zip(plan.stage_dims())
        {
            assert_eq!(feature.dims(), [2, c, h, w]);
        }
    }
}
