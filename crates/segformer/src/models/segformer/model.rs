//! # SegFormer model assembly.

use crate::errors::SegFormerError;
use crate::layers::resize::{Resize, ResizeConfig, ResizeMeta};
use crate::models::segformer::encoder::{
    MixStageConfig, MixVisionTransformer, MixVisionTransformerConfig, MixVisionTransformerMeta,
    MixVisionTransformerPlan,
};
use crate::models::segformer::head::{SegFormerHead, SegFormerHeadConfig, SegFormerHeadMeta};
use crate::models::segformer::variants::SegFormerVariant;
use crate::utility::results::expect_unwrap;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::activation::softmax;
use segformer_contracts::{ShapeContract, run_every_nth, shape_contract};

/// Common introspection interface for `SegFormer`.
pub trait SegFormerMeta {
    /// The number of input channels.
    fn d_input(&self) -> usize;

    /// The input image resolution as ``[height, width]``.
    fn input_resolution(&self) -> [usize; 2];

    /// The number of output classes.
    fn num_classes(&self) -> usize;

    /// The per-stage encoder widths.
    fn embed_dims(&self) -> Vec<usize>;

    /// The per-stage encoder depths.
    fn depths(&self) -> Vec<usize>;

    /// The decode head width.
    fn decode_dim(&self) -> usize;
}

/// Configuration for the `SegFormer` model.
#[derive(Config, Debug)]
pub struct SegFormerConfig {
    /// The number of input channels.
    pub d_input: usize,

    /// The input image resolution as ``[height, width]``.
    pub input_resolution: [usize; 2],

    /// The number of output classes.
    pub num_classes: usize,

    /// The encoder stage table.
    pub stages: Vec<MixStageConfig>,

    /// The decode head width.
    pub decode_dim: usize,

    /// Whether to enable QKV bias.
    #[config(default = true)]
    pub enable_qkv_bias: bool,

    /// Override of the attention score scale.
    #[config(default = "None")]
    pub qk_scale: Option<f64>,

    /// Dropout rate for the encoder MLPs and projections.
    #[config(default = 0.0)]
    pub drop_rate: f64,

    /// Dropout rate for attention.
    #[config(default = 0.0)]
    pub attn_drop_rate: f64,

    /// Final drop path rate for stochastic depth.
    #[config(default = 0.1)]
    pub drop_path_rate: f64,

    /// Dropout rate before the classifier.
    #[config(default = 0.1)]
    pub head_dropout: f64,

    /// Epsilon of the encoder layer norms.
    #[config(default = 1e-6)]
    pub layer_norm_eps: f64,

    /// Epsilon of the decode head batch norm.
    #[config(default = 1e-5)]
    pub batch_norm_eps: f64,
}

impl SegFormerMeta for SegFormerConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.input_resolution
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn embed_dims(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.embed_dim).collect()
    }

    fn depths(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.depth).collect()
    }

    fn decode_dim(&self) -> usize {
        self.decode_dim
    }
}

/// Validated plan for a `SegFormer` model.
#[derive(Debug, Clone)]
pub struct SegFormerPlan {
    /// The encoder plan.
    pub encoder: MixVisionTransformerPlan,

    /// The decode head logit grid; the first stage's grid.
    pub head_resolution: [usize; 2],

    /// The output grid; the input resolution.
    pub output_resolution: [usize; 2],
}

impl SegFormerConfig {
    /// Build the config of a named variant.
    ///
    /// ## Arguments
    ///
    /// - `variant`: the model size.
    /// - `input_shape`: the input image shape ``[height, width, channels]``.
    /// - `num_classes`: the number of output classes.
    pub fn for_variant(
        variant: SegFormerVariant,
        input_shape: &[usize],
        num_classes: usize,
    ) -> Result<Self, SegFormerError> {
        let [height, width, channels] = match input_shape {
            &[h, w, c] if h > 0 && w > 0 && c > 0 => [h, w, c],
            _ => return Err(SegFormerError::InvalidInputShape(input_shape.to_vec())),
        };
        if num_classes == 0 {
            return Err(SegFormerError::InvalidNumClasses(num_classes));
        }

        Ok(SegFormerConfig::new(
            channels,
            [height, width],
            num_classes,
            variant.stage_configs(),
            variant.config().decode_dim,
        ))
    }

    /// Build the config of a variant given by name.
    ///
    /// See [`SegFormerVariant`]'s `FromStr` for the accepted names.
    pub fn for_variant_name(
        name: &str,
        input_shape: &[usize],
        num_classes: usize,
    ) -> Result<Self, SegFormerError> {
        Self::for_variant(name.parse()?, input_shape, num_classes)
    }

    /// The encoder configuration.
    #[must_use]
    pub fn encoder_config(&self) -> MixVisionTransformerConfig {
        MixVisionTransformerConfig::new(self.d_input, self.input_resolution, self.stages.clone())
            .with_enable_qkv_bias(self.enable_qkv_bias)
            .with_qk_scale(self.qk_scale)
            .with_drop_rate(self.drop_rate)
            .with_attn_drop_rate(self.attn_drop_rate)
            .with_drop_path_rate(self.drop_path_rate)
            .with_layer_norm_eps(self.layer_norm_eps)
    }

    /// The decode head configuration.
    #[must_use]
    pub fn head_config(&self) -> SegFormerHeadConfig {
        SegFormerHeadConfig::new(self.embed_dims(), self.decode_dim, self.num_classes)
            .with_dropout(self.head_dropout)
            .with_batch_norm_eps(self.batch_norm_eps)
    }

    /// Check config validity and return a plan for the model.
    pub fn validate(&self) -> Result<SegFormerPlan, SegFormerError> {
        if self.num_classes == 0 {
            return Err(SegFormerError::InvalidNumClasses(self.num_classes));
        }

        let encoder = self.encoder_config().validate()?;
        self.head_config().validate()?;

        Ok(SegFormerPlan {
            head_resolution: encoder.stage_resolutions()[0],
            encoder,
            output_resolution: self.input_resolution,
        })
    }

    /// Initialize a `SegFormer` model.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<SegFormer<B>, SegFormerError> {
        let plan = self.validate()?;
        tracing::debug!(
            input_resolution = ?self.input_resolution,
            d_input = self.d_input,
            num_classes = self.num_classes,
            embed_dims = ?self.embed_dims(),
            depths = ?self.depths(),
            decode_dim = self.decode_dim,
            stage_resolutions = ?plan.encoder.stage_resolutions(),
            "init SegFormer"
        );

        Ok(SegFormer {
            encoder: self.encoder_config().try_init(device)?,
            head: self.head_config().try_init(device)?,
            resize: ResizeConfig::new(plan.output_resolution).init(),
        })
    }

    /// Initialize a `SegFormer` model.
    ///
    /// ## Panics
    ///
    /// On an invalid configuration.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SegFormer<B> {
        expect_unwrap(self.try_init(device))
    }
}

/// The SegFormer semantic segmentation model.
///
/// Maps channels-last pixels ``(B, H, W, C)`` to per-pixel class
/// probabilities ``(B, H, W, num_classes)``.
#[derive(Module, Debug)]
pub struct SegFormer<B: Backend> {
    /// The MiT encoder.
    pub encoder: MixVisionTransformer<B>,

    /// The all-MLP decode head.
    pub head: SegFormerHead<B>,

    /// The upsample back to the input resolution.
    pub resize: Resize,
}

impl<B: Backend> SegFormerMeta for SegFormer<B> {
    fn d_input(&self) -> usize {
        self.encoder.d_input()
    }

    fn input_resolution(&self) -> [usize; 2] {
        self.resize.output_resolution()
    }

    fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    fn embed_dims(&self) -> Vec<usize> {
        self.encoder.embed_dims()
    }

    fn depths(&self) -> Vec<usize> {
        self.encoder.depths()
    }

    fn decode_dim(&self) -> usize {
        self.head.decode_dim()
    }
}

impl<B: Backend> SegFormer<B> {
    /// Predict per-pixel class probabilities.
    ///
    /// ## Arguments
    ///
    /// - `pixel_values`: ``(B, H, W, C)`` at the configured resolution.
    ///
    /// ## Returns
    ///
    /// - ``(B, H, W, num_classes)``; each pixel's probabilities sum to 1.
    #[must_use]
    pub fn forward(
        &self,
        pixel_values: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let logits = self.forward_logits(pixel_values);
        self.apply_softmax(logits)
    }

    /// Predict per-pixel class logits.
    ///
    /// ## Arguments
    ///
    /// - `pixel_values`: ``(B, H, W, C)`` at the configured resolution.
    ///
    /// ## Returns
    ///
    /// - Channels-first logits ``(B, num_classes, H, W)``.
    #[must_use]
    pub fn forward_logits(
        &self,
        pixel_values: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.apply_input(pixel_values);
        let features = self.encoder.forward(x);
        let logits = self.head.forward(features);
        self.apply_resize(logits)
    }

    /// Check the input and move channels first.
    ///
    /// ``(B, H, W, C) -> (B, C, H, W)``
    #[must_use]
    pub fn apply_input(
        &self,
        pixel_values: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [h, w] = self.input_resolution();
        static CONTRACT: ShapeContract = shape_contract!["batch", "height", "width", "channels"];
        CONTRACT.assert_shape(
            &pixel_values,
            &[("height", h), ("width", w), ("channels", self.d_input())],
        );

        pixel_values.permute([0, 3, 1, 2])
    }

    /// Upsample head logits to the input resolution.
    ///
    /// ``(B, K, H/4, W/4) -> (B, K, H, W)``
    #[must_use]
    pub fn apply_resize(
        &self,
        logits: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.resize.forward(logits)
    }

    /// Softmax over classes and move classes last.
    ///
    /// ``(B, K, H, W) -> (B, H, W, K)``
    #[must_use]
    pub fn apply_softmax(
        &self,
        logits: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let probs = softmax(logits, 1).permute([0, 2, 3, 1]);

        run_every_nth!({
            let [h, w] = self.input_resolution();
            static CONTRACT: ShapeContract =
                shape_contract!["batch", "height", "width", "classes"];
            CONTRACT.assert_shape(
                &probs,
                &[
                    ("height", h),
                    ("width", w),
                    ("classes", self.num_classes()),
                ],
            );
        });

        probs
    }
}

fn segformer_variant<B: Backend>(
    variant: SegFormerVariant,
    input_shape: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<SegFormer<B>, SegFormerError> {
    tracing::debug!(%variant, ?input_shape, num_classes, "build SegFormer variant");
    SegFormerConfig::for_variant(variant, input_shape, num_classes)?.try_init(device)
}

/// Build a ``mit_b0`` SegFormer for ``[height, width, channels]`` inputs.
pub fn segformer_b0<B: Backend>(
    input_shape: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<SegFormer<B>, SegFormerError> {
    segformer_variant(SegFormerVariant::B0, input_shape, num_classes, device)
}

/// Build a ``mit_b1`` SegFormer for ``[height, width, channels]`` inputs.
pub fn segformer_b1<B: Backend>(
    input_shape: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<SegFormer<B>, SegFormerError> {
    segformer_variant(SegFormerVariant::B1, input_shape, num_classes, device)
}

/// Build a ``mit_b2`` SegFormer for ``[height, width, channels]`` inputs.
pub fn segformer_b2<B: Backend>(
    input_shape: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<SegFormer<B>, SegFormerError> {
    segformer_variant(SegFormerVariant::B2, input_shape, num_classes, device)
}

/// Build a ``mit_b3`` SegFormer for ``[height, width, channels]`` inputs.
pub fn segformer_b3<B: Backend>(
    input_shape: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<SegFormer<B>, SegFormerError> {
    segformer_variant(SegFormerVariant::B3, input_shape, num_classes, device)
}

/// Build a ``mit_b4`` SegFormer for ``[height, width, channels]`` inputs.
pub fn segformer_b4<B: Backend>(
    input_shape: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<SegFormer<B>, SegFormerError> {
    segformer_variant(SegFormerVariant::B4, input_shape, num_classes, device)
}

/// Build a ``mit_b5`` SegFormer for ``[height, width, channels]`` inputs.
pub fn segformer_b5<B: Backend>(
    input_shape: &[usize],
    num_classes: usize,
    device: &B::Device,
) -> Result<SegFormer<B>, SegFormerError> {
    segformer_variant(SegFormerVariant::B5, input_shape, num_classes, device)
}
