//! # DropPath (Stochastic Depth)
//!
//! Deep Networks with Stochastic Depth (https://arxiv.org/abs/1603.09382)

use crate::utility::probability::expect_probability;
use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::Distribution;

/// DropPath (stochastic depth) regularization.
///
/// In training, each batch element is kept with probability `1 - drop_prob`;
/// the mask is `floor(keep_prob + U[0, 1))`.
///
/// ## Arguments
///
/// * `x`: Input tensor.
/// * `drop_prob`: Probability of dropping a path.
/// * `training`: Whether the model is in training mode.
/// * `scale_by_keep`: Whether to scale the output by `1 / (1 - drop_prob)`
///
/// ## Returns
///
/// * Output tensor with the same shape as the input tensor.
///
/// ## Panics
///
/// If `drop_prob` is not in `[0, 1]`.
#[must_use]
pub fn drop_path<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    drop_prob: f64,
    training: bool,
    scale_by_keep: bool,
) -> Tensor<B, D> {
    _drop_path_sample(
        x,
        drop_prob,
        training,
        scale_by_keep,
        |shape, keep_prob, device| {
            Tensor::<B, D>::random(shape, Distribution::Uniform(0.0, 1.0), device)
                .add_scalar(keep_prob)
                .floor()
        },
    )
}

/// Internal implementation of DropPath.
///
/// The sampler is a parameter so that tests can force the mask.
#[inline(always)]
#[must_use]
fn _drop_path_sample<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    drop_prob: f64,
    training: bool,
    scale_by_keep: bool,
    sample: fn([usize; D], f64, &B::Device) -> Tensor<B, D>,
) -> Tensor<B, D> {
    expect_probability(drop_prob);

    if !training || drop_prob == 0.0 {
        return x;
    }

    let keep_prob = 1.0 - drop_prob;

    let mut shape = [1; D];
    shape[0] = x.dims()[0];

    let mask = sample(shape, keep_prob, &x.device());

    let x = if keep_prob > 0.0 && scale_by_keep {
        x.div_scalar(keep_prob)
    } else {
        x
    };

    x * mask
}

/// Common introspection interface for DropPath modules.
pub trait DropPathMeta {
    /// The probability of dropping a path.
    fn drop_prob(&self) -> f64;

    /// The probability of keeping a path.
    fn keep_prob(&self) -> f64 {
        1.0 - self.drop_prob()
    }

    /// Are kept paths rescaled by `1 / keep_prob`?
    fn scale_by_keep(&self) -> bool;
}

/// Configuration for the DropPath module.
#[derive(Config, Debug)]
pub struct DropPathConfig {
    /// The probability of dropping a path.
    #[config(default = 0.0)]
    pub drop_prob: f64,

    /// Rescale kept paths by `1 / keep_prob`.
    #[config(default = true)]
    pub scale_by_keep: bool,
}

impl DropPathMeta for DropPathConfig {
    fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    fn scale_by_keep(&self) -> bool {
        self.scale_by_keep
    }
}

impl DropPathConfig {
    /// Initializes a new DropPath module.
    ///
    /// ## Panics
    ///
    /// If `drop_prob` is not in `[0, 1]`.
    #[inline(always)]
    #[must_use]
    pub fn init(&self) -> DropPath {
        DropPath {
            drop_prob: expect_probability(self.drop_prob),
            scale_by_keep: self.scale_by_keep,
        }
    }
}

/// The DropPath module.
///
/// Applies stochastic depth when the backend has autodiff enabled;
/// an identity otherwise.
#[derive(Module, Clone, Debug)]
pub struct DropPath {
    /// The probability of dropping a path.
    pub drop_prob: f64,

    /// Rescale kept paths by `1 / keep_prob`.
    pub scale_by_keep: bool,
}

impl DropPathMeta for DropPath {
    fn drop_prob(&self) -> f64 {
        self.drop_prob
    }

    fn scale_by_keep(&self) -> bool {
        self.scale_by_keep
    }
}

impl DropPath {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - input: `[batch, ...]`
    /// - output: `[batch, ...]`
    #[must_use]
    pub fn forward<B: Backend, const D: usize>(
        &self,
        input: Tensor<B, D>,
    ) -> Tensor<B, D> {
        let training = B::ad_enabled();
        drop_path(input, self.drop_prob, training, self.scale_by_keep)
    }

    /// Applies `f` inside a stochastic residual connection: `x + drop_path(f(x))`.
    #[inline]
    #[must_use]
    pub fn with_skip<B: Backend, const D: usize, F>(
        &self,
        x: Tensor<B, D>,
        f: F,
    ) -> Tensor<B, D>
    where
        F: FnOnce(Tensor<B, D>) -> Tensor<B, D>,
    {
        x.clone() + self.forward(f(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    fn forced_mask(
        shape: [usize; 3],
        keep_prob: f64,
        device: &<NdArray as Backend>::Device,
    ) -> Tensor<NdArray, 3> {
        assert_eq!(shape, [3, 1, 1]);
        assert_eq!(keep_prob, 0.75);
        Tensor::<NdArray, 3>::from_data([[[1.0]], [[0.0]], [[1.0]]], device)
    }

    #[test]
    fn test_drop_path_shape() {
        let device = Default::default();

        let module = DropPathConfig::new().with_drop_prob(0.5).init();

        let input =
            Tensor::<NdArray, 4>::random([2, 3, 4, 5], Distribution::Uniform(0.0, 1.0), &device);
        let output = module.forward(input.clone());

        assert_eq!(input.dims(), output.dims());
    }

    #[test]
    fn test_drop_path_inference_is_identity() {
        let device = Default::default();
        let x = Tensor::<NdArray, 3>::random([3, 2, 4], Distribution::Uniform(0.0, 1.0), &device);

        let res = drop_path(x.clone(), 0.9, false, true);
        res.to_data().assert_eq(&x.to_data(), true);

        // NdArray has no autodiff; the module runs in inference mode.
        let module = DropPathConfig::new().with_drop_prob(0.9).init();
        module
            .forward(x.clone())
            .to_data()
            .assert_eq(&x.to_data(), true);
    }

    #[test]
    fn test_drop_path_zero_prob_is_identity() {
        let device = Default::default();
        let x = Tensor::<NdArray, 3>::random([3, 2, 4], Distribution::Uniform(0.0, 1.0), &device);

        let res = _drop_path_sample(x.clone(), 0.0, true, true, |_, _, _| {
            panic!("no sample should be drawn")
        });
        res.to_data().assert_eq(&x.to_data(), true);
    }

    #[test]
    fn test_drop_path_forced_mask() {
        let device = Default::default();
        let x = Tensor::<NdArray, 3>::random([3, 2, 4], Distribution::Uniform(0.0, 1.0), &device);
        let mask = Tensor::<NdArray, 3>::from_data([[[1.0]], [[0.0]], [[1.0]]], &device);

        // Scaled: surviving samples are divided by keep_prob.
        let res = _drop_path_sample(x.clone(), 0.25, true, true, forced_mask);
        res.to_data().assert_approx_eq::<f32>(
            &(x.clone().div_scalar(0.75) * mask.clone()).to_data(),
            burn::tensor::Tolerance::default(),
        );

        // Unscaled.
        let res = _drop_path_sample(x.clone(), 0.25, true, false, forced_mask);
        res.to_data()
            .assert_eq(&(x.clone() * mask.clone()).to_data(), true);
    }

    #[test]
    fn test_drop_path_sampled_mask_is_binary() {
        let device = Default::default();
        let x = Tensor::<NdArray, 2>::ones([64, 3], &device);

        let res = drop_path(x, 0.5, true, true);
        for v in res.to_data().to_vec::<f32>().unwrap() {
            assert!(v == 0.0 || v == 2.0, "unexpected value {v}");
        }
    }

    #[test]
    fn test_drop_path_training_backend() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let x = Tensor::<B, 2>::ones([128, 2], &device);

        let module = DropPathConfig::new().with_drop_prob(1.0).init();
        let res = module.forward(x);
        res.to_data()
            .assert_eq(&Tensor::<B, 2>::zeros([128, 2], &device).to_data(), true);
    }

    #[test]
    fn test_droppath_meta() {
        let drop_prob = 0.2;
        let config = DropPathConfig::new().with_drop_prob(drop_prob);

        assert_eq!(config.drop_prob(), 0.2);
        assert_eq!(config.keep_prob(), 1.0 - drop_prob);
        assert!(config.scale_by_keep());

        let module = config.init();
        assert_eq!(module.drop_prob(), 0.2);
        assert_eq!(module.keep_prob(), 1.0 - drop_prob);
        assert!(module.scale_by_keep());
    }

    #[test]
    #[should_panic(expected = "probability must be in [0.0, 1.0]: 1.5")]
    fn test_droppath_bad_probability() {
        let _ = DropPathConfig::new().with_drop_prob(1.5).init();
    }

    #[test]
    fn test_with_skip() {
        let device = Default::default();
        let x = Tensor::<NdArray, 2>::ones([2, 3], &device);

        let module = DropPathConfig::new().with_drop_prob(0.5).init();
        let res = module.with_skip(x, |t| t.mul_scalar(2.0));
        res.to_data()
            .assert_eq(&Tensor::<NdArray, 2>::full([2, 3], 3.0, &device).to_data(), true);
    }
}
