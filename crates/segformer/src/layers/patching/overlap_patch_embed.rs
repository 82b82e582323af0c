use segformer_contracts::{ShapeContract, run_every_nth, shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{LayerNorm, LayerNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// Common introspection interface for `OverlapPatchEmbed` modules.
pub trait OverlapPatchEmbedMeta {
    /// Input feature dimension size.
    fn d_input(&self) -> usize;

    /// Output feature dimension size.
    fn d_output(&self) -> usize;

    /// The (square) patch kernel size.
    fn patch_size(&self) -> usize;

    /// The patch stride.
    fn stride(&self) -> usize;

    /// The zero padding on each side; ``patch_size / 2``.
    fn padding(&self) -> usize {
        self.patch_size() / 2
    }

    /// The output grid resolution for a given input resolution.
    ///
    /// ``floor((x + 2 * padding - patch_size) / stride) + 1`` per axis.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        input_resolution.map(|x| (x + 2 * self.padding() - self.patch_size()) / self.stride() + 1)
    }
}

/// Configuration for `OverlapPatchEmbed`.
#[derive(Config, Debug, Copy)]
pub struct OverlapPatchEmbedConfig {
    /// Input feature dimension size.
    pub d_input: usize,

    /// Output feature dimension size.
    pub d_output: usize,

    /// Patch kernel size.
    #[config(default = 7)]
    pub patch_size: usize,

    /// Patch stride.
    #[config(default = 4)]
    pub stride: usize,

    /// Epsilon of the output layer norm.
    #[config(default = 1e-6)]
    pub layer_norm_eps: f64,
}

impl OverlapPatchEmbedMeta for OverlapPatchEmbedConfig {
    fn d_input(&self) -> usize {
        self.d_input
    }

    fn d_output(&self) -> usize {
        self.d_output
    }

    fn patch_size(&self) -> usize {
        self.patch_size
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl OverlapPatchEmbedConfig {
    /// Initialize an `OverlapPatchEmbed` module.
    ///
    /// ## Panics
    ///
    /// If any size is zero.
    #[must_use]
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> OverlapPatchEmbed<B> {
        assert!(
            self.d_input > 0 && self.d_output > 0 && self.patch_size > 0 && self.stride > 0,
            "OverlapPatchEmbed sizes must be non-zero: {self:?}"
        );

        let kernel = [self.patch_size, self.patch_size];
        let padding = self.padding();

        OverlapPatchEmbed {
            stride: self.stride,
            projection: Conv2dConfig::new([self.d_input, self.d_output], kernel)
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .init(device),
            norm: LayerNormConfig::new(self.d_output)
                .with_epsilon(self.layer_norm_eps)
                .init(device),
        }
    }
}

/// Overlapping patch embedding.
///
/// A strided convolution whose kernel is larger than its stride, so that
/// neighboring patches overlap; followed by a layer norm over channels.
#[derive(Module, Debug)]
pub struct OverlapPatchEmbed<B: Backend> {
    /// Patch stride.
    pub stride: usize,

    /// Convolutional patch projection.
    pub projection: Conv2d<B>,

    /// Output normalization.
    pub norm: LayerNorm<B>,
}

impl<B: Backend> OverlapPatchEmbedMeta for OverlapPatchEmbed<B> {
    fn d_input(&self) -> usize {
        self.projection.weight.dims()[1]
    }

    fn d_output(&self) -> usize {
        self.projection.weight.dims()[0]
    }

    fn patch_size(&self) -> usize {
        self.projection.weight.dims()[2]
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl<B: Backend> OverlapPatchEmbed<B> {
    /// Embed an image (or feature map) as a token sequence.
    ///
    /// ## Arguments
    ///
    /// * `x` - Input tensor of shape ``(B, d_input, H, W)``.
    ///
    /// ## Returns
    ///
    /// * The tokens, ``(B, H' * W', d_output)``, and the grid resolution ``[H', W']``.
    #[must_use]
    pub fn forward(
        &self,
        x: Tensor<B, 4>,
    ) -> (Tensor<B, 3>, [usize; 2]) {
        static INPUT_CONTRACT: ShapeContract =
            shape_contract!["batch", "d_input", "height", "width"];
        let [height, width] = INPUT_CONTRACT.unpack_shape(
            &x,
            &["height", "width"],
            &[("d_input", self.d_input())],
        );

        let x = self.projection.forward(x);
        let [b, c, h, w] = x.dims();
        // (B, d_output, H', W')

        run_every_nth!({
            let [eh, ew] = self.output_resolution([height, width]);
            assert_eq!(
                [h, w],
                [eh, ew],
                "Patch grid for input {:?}",
                [height, width]
            );
        });

        let x = x.flatten::<3>(2, 3).swap_dims(1, 2);
        // (B, H' * W', d_output)

        let x = self.norm.forward(x);

        run_every_nth!({
            static OUTPUT_CONTRACT: ShapeContract = shape_contract!["batch", "h" * "w", "c"];
            OUTPUT_CONTRACT.assert_shape(&x, &[("batch", b), ("h", h), ("w", w), ("c", c)]);
        });

        (x, [h, w])
    }
}
