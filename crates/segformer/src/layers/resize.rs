//! # Bilinear Resize

use burn::config::Config;
use burn::module::Module;
use burn::prelude::{Backend, Tensor};
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

/// Bilinear resize of ``(B, C, H, W)`` to ``(B, C, height, width)``.
///
/// Returns the input unchanged when it already has the requested size.
#[must_use]
pub fn resize_bilinear<B: Backend>(
    x: Tensor<B, 4>,
    output_resolution: [usize; 2],
) -> Tensor<B, 4> {
    let [_, _, h, w] = x.dims();
    if [h, w] == output_resolution {
        return x;
    }
    interpolate(
        x,
        output_resolution,
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}

/// Common introspection interface for `Resize`.
pub trait ResizeMeta {
    /// The output resolution as ``[height, width]``.
    fn output_resolution(&self) -> [usize; 2];

    /// The output height.
    fn output_height(&self) -> usize {
        self.output_resolution()[0]
    }

    /// The output width.
    fn output_width(&self) -> usize {
        self.output_resolution()[1]
    }
}

/// Configuration for [`Resize`].
#[derive(Config, Debug, Copy)]
pub struct ResizeConfig {
    /// The output resolution as ``[height, width]``.
    pub output_resolution: [usize; 2],
}

impl ResizeMeta for ResizeConfig {
    fn output_resolution(&self) -> [usize; 2] {
        self.output_resolution
    }
}

impl ResizeConfig {
    /// Initialize a [`Resize`] module.
    #[must_use]
    pub fn init(&self) -> Resize {
        let [h, w] = self.output_resolution;
        assert!(
            h > 0 && w > 0,
            "output_resolution must be non-zero: {:?}",
            self.output_resolution
        );
        Resize {
            output_resolution: self.output_resolution,
        }
    }
}

/// Parameter-free bilinear resize to a fixed resolution.
#[derive(Module, Clone, Debug)]
pub struct Resize {
    /// The output resolution as ``[height, width]``.
    pub output_resolution: [usize; 2],
}

impl ResizeMeta for Resize {
    fn output_resolution(&self) -> [usize; 2] {
        self.output_resolution
    }
}

impl Resize {
    /// Resize the input.
    ///
    /// # Shapes
    ///
    /// - input: ``(B, C, H, W)``
    /// - output: ``(B, C, height, width)``
    #[must_use]
    pub fn forward<B: Backend>(
        &self,
        x: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        resize_bilinear(x, self.output_resolution)
    }
}
