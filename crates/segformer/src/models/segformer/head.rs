//! # All-MLP decode head.

use crate::errors::SegFormerError;
use crate::layers::resize::resize_bilinear;
use crate::utility::probability::try_probability;
use crate::utility::results::expect_unwrap;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu};
use burn::prelude::{Backend, Tensor};
use segformer_contracts::{ShapeContract, run_every_nth, shape_contract};

/// Common introspection interface for `SegFormerHead`.
pub trait SegFormerHeadMeta {
    /// The channel sizes of the encoder stages, shallowest first.
    fn in_dims(&self) -> Vec<usize>;

    /// The shared decoder width.
    fn decode_dim(&self) -> usize;

    /// The number of output classes.
    fn num_classes(&self) -> usize;

    /// The dropout rate before the classifier.
    fn dropout(&self) -> f64;
}

/// Configuration for `SegFormerHead`.
#[derive(Config, Debug)]
pub struct SegFormerHeadConfig {
    /// The channel sizes of the encoder stages, shallowest first.
    pub in_dims: Vec<usize>,

    /// The shared decoder width.
    pub decode_dim: usize,

    /// The number of output classes.
    pub num_classes: usize,

    /// The dropout rate before the classifier.
    #[config(default = 0.1)]
    pub dropout: f64,

    /// Epsilon of the fuse batch norm.
    #[config(default = 1e-5)]
    pub batch_norm_eps: f64,
}

impl SegFormerHeadMeta for SegFormerHeadConfig {
    fn in_dims(&self) -> Vec<usize> {
        self.in_dims.clone()
    }

    fn decode_dim(&self) -> usize {
        self.decode_dim
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn dropout(&self) -> f64 {
        self.dropout
    }
}

impl SegFormerHeadConfig {
    /// Check the configuration.
    pub fn validate(&self) -> Result<(), SegFormerError> {
        if self.num_classes == 0 {
            return Err(SegFormerError::InvalidNumClasses(self.num_classes));
        }
        if self.in_dims.is_empty() || self.in_dims.contains(&0) || self.decode_dim == 0 {
            return Err(SegFormerError::InvalidStageTable(format!(
                "decode head sizes must be non-empty and positive: in_dims={:?}, decode_dim={}",
                self.in_dims, self.decode_dim
            )));
        }
        try_probability(self.dropout)?;
        Ok(())
    }

    /// Initialize a `SegFormerHead`.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<SegFormerHead<B>, SegFormerError> {
        self.validate()?;

        let d = self.decode_dim;
        let fused = d * self.in_dims.len();
        tracing::trace!(
            in_dims = ?self.in_dims,
            decode_dim = d,
            num_classes = self.num_classes,
            "init decode head"
        );

        Ok(SegFormerHead {
            linear_c: self
                .in_dims
                .iter()
                .map(|&d_in| LinearConfig::new(d_in, d).init(device))
                .collect(),
            linear_fuse: Conv2dConfig::new([fused, d], [1, 1])
                .with_bias(false)
                .init(device),
            batch_norm: BatchNormConfig::new(d)
                .with_epsilon(self.batch_norm_eps)
                .init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: Conv2dConfig::new([d, self.num_classes], [1, 1]).init(device),
        })
    }

    /// Initialize a `SegFormerHead`.
    ///
    /// ## Panics
    ///
    /// On an invalid configuration.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> SegFormerHead<B> {
        expect_unwrap(self.try_init(device))
    }
}

/// The SegFormer decode head.
///
/// Each stage is projected to `decode_dim` channels and upsampled to the
/// first stage's grid; the maps are concatenated (deepest first), fused
/// by a ``1x1`` conv with batch norm and ReLU, and classified per pixel.
#[derive(Module, Debug)]
pub struct SegFormerHead<B: Backend> {
    /// Per-stage projections to `decode_dim`.
    pub linear_c: Vec<Linear<B>>,

    /// ``1x1`` fuse conv; unbiased, followed by batch norm.
    pub linear_fuse: Conv2d<B>,

    /// Fuse batch norm.
    pub batch_norm: BatchNorm<B, 2>,

    /// Fuse activation.
    pub activation: Relu,

    /// Dropout before the classifier.
    pub dropout: Dropout,

    /// ``1x1`` per-pixel classifier.
    pub classifier: Conv2d<B>,
}

impl<B: Backend> SegFormerHeadMeta for SegFormerHead<B> {
    fn in_dims(&self) -> Vec<usize> {
        self.linear_c.iter().map(|l| l.weight.dims()[0]).collect()
    }

    fn decode_dim(&self) -> usize {
        self.classifier.weight.dims()[1]
    }

    fn num_classes(&self) -> usize {
        self.classifier.weight.dims()[0]
    }

    fn dropout(&self) -> f64 {
        self.dropout.prob
    }
}

impl<B: Backend> SegFormerHead<B> {
    /// Decode the encoder features.
    ///
    /// ## Arguments
    ///
    /// - `features`: one ``(B, C_i, H_i, W_i)`` map per stage, shallowest first.
    ///
    /// ## Returns
    ///
    /// - Class logits ``(B, num_classes, H_0, W_0)``.
    ///
    /// ## Panics
    ///
    /// If the number of feature maps does not match the number of stages.
    #[must_use]
    pub fn forward(
        &self,
        features: Vec<Tensor<B, 4>>,
    ) -> Tensor<B, 4> {
        assert_eq!(
            features.len(),
            self.linear_c.len(),
            "Expected one feature map per stage"
        );

        let [b, _, h, w] = features[0].dims();
        let d = self.decode_dim();

        let mut projected: Vec<Tensor<B, 4>> = features
            .into_iter()
            .zip(self.linear_c.iter())
            .map(|(x, linear)| {
                static CONTRACT: ShapeContract = shape_contract!["batch", "c", "h", "w"];
                let [c, fh, fw] = CONTRACT.unpack_shape(&x, &["c", "h", "w"], &[("batch", b)]);
                assert_eq!(c, linear.weight.dims()[0], "Stage channel mismatch");

                let x = x.flatten::<3>(2, 3).swap_dims(1, 2);
                // (B, h*w, C_i)
                let x = linear.forward(x);
                // (B, h*w, d)
                let x = x.swap_dims(1, 2).reshape([b, d, fh, fw]);

                resize_bilinear(x, [h, w])
            })
            .collect();
        projected.reverse();

        let x = Tensor::cat(projected, 1);
        // (B, stages * d, H_0, W_0)

        let x = self.linear_fuse.forward(x);
        let x = self.batch_norm.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        let x = self.classifier.forward(x);

        run_every_nth!({
            static CONTRACT: ShapeContract = shape_contract!["batch", "classes", "h", "w"];
            CONTRACT.assert_shape(
                &x,
                &[
                    ("batch", b),
                    ("classes", self.num_classes()),
                    ("h", h),
                    ("w", w),
                ],
            );
        });

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    #[test]
    fn test_meta() {
        let config = SegFormerHeadConfig::new(vec![8, 16, 24], 32, 5);
        assert_eq!(config.in_dims(), vec![8, 16, 24]);
        assert_eq!(config.decode_dim(), 32);
        assert_eq!(config.num_classes(), 5);
        assert_eq!(config.dropout(), 0.1);

        let device = Default::default();
        let head = config.init::<NdArray>(&device);
        assert_eq!(head.in_dims(), vec![8, 16, 24]);
        assert_eq!(head.decode_dim(), 32);
        assert_eq!(head.num_classes(), 5);
        assert_eq!(head.dropout(), 0.1);

        assert_eq!(head.linear_fuse.weight.dims(), [32, 96, 1, 1]);
        assert!(head.linear_fuse.bias.is_none());
        assert!(head.classifier.bias.is_some());
    }

    #[test]
    fn test_validate() {
        assert_eq!(
            SegFormerHeadConfig::new(vec![8], 16, 0).validate(),
            Err(SegFormerError::InvalidNumClasses(0))
        );
        assert!(matches!(
            SegFormerHeadConfig::new(vec![], 16, 3).validate(),
            Err(SegFormerError::InvalidStageTable(_))
        ));
        assert!(matches!(
            SegFormerHeadConfig::new(vec![8], 0, 3).validate(),
            Err(SegFormerError::InvalidStageTable(_))
        ));
        assert_eq!(
            SegFormerHeadConfig::new(vec![8], 16, 3)
                .with_dropout(1.5)
                .validate(),
            Err(SegFormerError::InvalidProbability(1.5))
        );
    }

    #[test]
    fn test_forward() {
        let device = Default::default();
        let head = SegFormerHeadConfig::new(vec![4, 8], 16, 3).init::<NdArray>(&device);

        let features = vec![
            Tensor::<NdArray, 4>::random([2, 4, 8, 9], Distribution::Default, &device),
            Tensor::<NdArray, 4>::random([2, 8, 4, 5], Distribution::Default, &device),
        ];
        let logits = head.forward(features);
        assert_eq!(logits.dims(), [2, 3, 8, 9]);
    }

    #[test]
    fn test_forward_training() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let head = SegFormerHeadConfig::new(vec![4, 8], 16, 3).init::<B>(&device);

        let features = vec![
            Tensor::<B, 4>::random([2, 4, 8, 8], Distribution::Default, &device),
            Tensor::<B, 4>::random([2, 8, 4, 4], Distribution::Default, &device),
        ];
        let logits = head.forward(features);
        assert_eq!(logits.dims(), [2, 3, 8, 8]);
    }

    #[test]
    #[should_panic(expected = "Expected one feature map per stage")]
    fn test_forward_wrong_stage_count() {
        let device = Default::default();
        let head = SegFormerHeadConfig::new(vec![4, 8], 16, 3).init::<NdArray>(&device);

        let features = vec![Tensor::<NdArray, 4>::zeros([1, 4, 8, 8], &device)];
        let _ = head.forward(features);
    }
}
