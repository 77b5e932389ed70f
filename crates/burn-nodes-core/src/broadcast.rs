//! Batch broadcasting between conditioning and latent batches
//!
//! A tensor whose leading (batch) dimension divides the target batch is tiled
//! along that dimension. Tiling repeats whole batches in order, so a batch of
//! `[a, b, c]` broadcast to 6 becomes `[a, b, c, a, b, c]`. Nothing is ever
//! interpolated or truncated.

use burn::prelude::*;

use crate::error::{NodeError, NodeResult};

/// Tile `tensor` along dim 0 until it has `target` rows
///
/// Fails with [`NodeError::ShapeMismatch`] when the source batch is zero or
/// does not divide `target` (which includes every source larger than the
/// target).
pub fn tile_batch<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    target: usize,
) -> NodeResult<Tensor<B, D>> {
    let batch = tensor.dims()[0];
    let repeats = tile_factor(batch, target)?;
    if repeats == 1 {
        return Ok(tensor);
    }
    Ok(tensor.repeat_dim(0, repeats))
}

/// Number of whole repetitions needed to grow `batch` to `target`
pub fn tile_factor(batch: usize, target: usize) -> NodeResult<usize> {
    if batch == 0 || target == 0 || target % batch != 0 {
        return Err(NodeError::shape_mismatch(format!(
            "batch of {batch} cannot be broadcast to a batch of {target}"
        )));
    }
    Ok(target / batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_tile_factor() {
        assert_eq!(tile_factor(1, 4).unwrap(), 4);
        assert_eq!(tile_factor(3, 6).unwrap(), 2);
        assert_eq!(tile_factor(4, 4).unwrap(), 1);
        assert!(matches!(tile_factor(3, 4), Err(NodeError::ShapeMismatch(_))));
        assert!(matches!(tile_factor(8, 4), Err(NodeError::ShapeMismatch(_))));
        assert!(matches!(tile_factor(0, 4), Err(NodeError::ShapeMismatch(_))));
    }

    #[test]
    fn test_tile_batch_repeats_in_order() {
        let device = <TestBackend as Backend>::Device::default();
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0], [3, 1, 1]);
        let tensor: Tensor<TestBackend, 3> = Tensor::from_data(data, &device);

        let tiled = tile_batch(tensor, 6).unwrap();
        assert_eq!(tiled.dims(), [6, 1, 1]);
        let values: Vec<f32> = tiled.into_data().to_vec().unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_tile_batch_rejects_non_divisor() {
        let device = <TestBackend as Backend>::Device::default();
        let tensor: Tensor<TestBackend, 3> = Tensor::zeros([3, 2, 2], &device);
        assert!(matches!(
            tile_batch(tensor, 4),
            Err(NodeError::ShapeMismatch(_))
        ));
    }
}
