//! # Mix-FFN.

use crate::errors::SegFormerError;
use crate::utility::probability::try_probability;
use crate::utility::results::expect_unwrap;
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Dropout, DropoutConfig, Gelu, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};
use segformer_contracts::{ShapeContract, run_every_nth, shape_contract};

/// Common introspection interface for `MixFfn`.
pub trait MixFfnMeta {
    /// Input (and output) feature size.
    fn d_input(&self) -> usize;

    /// Hidden feature size.
    fn d_hidden(&self) -> usize;

    /// Dropout rate.
    fn drop(&self) -> f64;
}

/// Configuration for `MixFfn`.
#[derive(Config, Debug)]
pub struct MixFfnConfig {
    /// Input (and output) feature size.
    pub d_input: usize,

    /// Hidden feature size.
    pub d_hidden: usize,

    /// Dropout rate.
    #[config(default = 0.)]
    pub drop: f64,
}

impl MixFfnMeta for MixFfnConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_hidden(&self) -> usize {
        self.d_hidden
    }

    fn drop(&self) -> f64 {
        self.drop
    }
}

impl MixFfnConfig {
    /// Initialize a `MixFfn` module.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<MixFfn<B>, SegFormerError> {
        if self.d_input == 0 || self.d_hidden == 0 {
            return Err(SegFormerError::InvalidStageTable(format!(
                "MixFfn sizes must be non-zero: {self:?}"
            )));
        }
        try_probability(self.drop)?;

        Ok(MixFfn {
            fc1: LinearConfig::new(self.d_input, self.d_hidden).init(device),
            dwconv: Conv2dConfig::new([self.d_hidden, self.d_hidden], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_groups(self.d_hidden)
                .init(device),
            act: Gelu::new(),
            fc2: LinearConfig::new(self.d_hidden, self.d_input).init(device),
            drop: DropoutConfig::new(self.drop).init(),
        })
    }

    /// Initialize a `MixFfn` module.
    ///
    /// ## Panics
    ///
    /// On an invalid configuration.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> MixFfn<B> {
        expect_unwrap(self.try_init(device))
    }
}

/// Mix-FFN.
///
/// ``fc1 -> 3x3 depthwise conv -> GELU -> fc2``; the depthwise conv mixes
/// neighboring tokens, which stands in for positional encodings.
#[derive(Module, Debug)]
pub struct MixFfn<B: Backend> {
    fc1: Linear<B>,
    dwconv: Conv2d<B>,
    act: Gelu,
    fc2: Linear<B>,
    drop: Dropout,
}

impl<B: Backend> MixFfnMeta for MixFfn<B> {
    fn d_input(&self) -> usize {
        self.fc1.weight.dims()[0]
    }

    fn d_hidden(&self) -> usize {
        self.fc1.weight.dims()[1]
    }

    fn drop(&self) -> f64 {
        self.drop.prob
    }
}

impl<B: Backend> MixFfn<B> {
    /// Apply the Mix-FFN.
    ///
    /// ## Arguments
    ///
    /// - `x`: Input tensor of shape ``(B, H*W, d_input)``.
    /// - `resolution`: The token grid ``[H, W]``.
    ///
    /// ## Returns
    ///
    /// - Output tensor of shape ``(B, H*W, d_input)``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        resolution: [usize; 2],
    ) -> Tensor<B, 3> {
        let [h, w] = resolution;
        static CONTRACT: ShapeContract = shape_contract!["batch", "h" * "w", "c"];
        let [b] = CONTRACT.unpack_shape(
            &x,
            &["batch"],
            &[("h", h), ("w", w), ("c", self.d_input())],
        );

        let x = self.fc1.forward(x);
        let d_hidden = self.d_hidden();
        // (B, H*W, hidden)

        let x = x.swap_dims(1, 2).reshape([b, d_hidden, h, w]);
        let x = self.dwconv.forward(x);
        let x = x.flatten::<3>(2, 3).swap_dims(1, 2);
        // (B, H*W, hidden)

        let x = self.act.forward(x);
        let x = self.drop.forward(x);
        let x = self.fc2.forward(x);

        run_every_nth!({
            CONTRACT.assert_shape(&x, &[("batch", b), ("h", h), ("w", w), ("c", self.d_input())]);
        });

        self.drop.forward(x)
    }
}
