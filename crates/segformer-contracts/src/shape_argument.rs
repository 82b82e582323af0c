//! [`ShapeArgument`]: the things a shape can be read from.

use burn::prelude::{Backend, Shape, Tensor};
use burn::tensor::BasicOps;

/// A source of a concrete shape.
pub trait ShapeArgument {
    /// Extract the dimension sizes.
    fn get_shape_vec(self) -> Vec<usize>;
}

impl<const D: usize> ShapeArgument for &[usize; D] {
    fn get_shape_vec(self) -> Vec<usize> {
        self.to_vec()
    }
}

impl ShapeArgument for &[usize] {
    fn get_shape_vec(self) -> Vec<usize> {
        self.to_vec()
    }
}

impl ShapeArgument for &Vec<usize> {
    fn get_shape_vec(self) -> Vec<usize> {
        self.clone()
    }
}

impl ShapeArgument for &Shape {
    fn get_shape_vec(self) -> Vec<usize> {
        self.dims.clone()
    }
}

impl ShapeArgument for Shape {
    fn get_shape_vec(self) -> Vec<usize> {
        self.dims
    }
}

impl<B, const D: usize, K> ShapeArgument for &Tensor<B, D, K>
where
    B: Backend,
    K: BasicOps<B>,
{
    fn get_shape_vec(self) -> Vec<usize> {
        self.dims().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_shape_argument() {
        let expected = vec![2, 3, 4];

        assert_eq!((&[2, 3, 4]).get_shape_vec(), expected);
        assert_eq!(expected.as_slice().get_shape_vec(), expected);
        assert_eq!((&expected).get_shape_vec(), expected);

        let shape = Shape::from([2, 3, 4]);
        assert_eq!((&shape).get_shape_vec(), expected);
        assert_eq!(shape.get_shape_vec(), expected);

        let tensor: Tensor<NdArray, 2> = Tensor::zeros([5, 6], &Default::default());
        assert_eq!((&tensor).get_shape_vec(), vec![5, 6]);
    }
}
