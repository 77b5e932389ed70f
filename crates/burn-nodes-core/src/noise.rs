//! Seeded Gaussian noise
//!
//! Every sampling request owns one [`NoiseGenerator`]. Samples are drawn on
//! the host and uploaded afterwards, so the values depend only on the seed and
//! the draw order, never on which device the tensor ends up on.

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Per-request standard normal generator
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    rng: StdRng,
}

impl NoiseGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw `N(0, 1)` samples of `shape` and place them on `device`
    pub fn gaussian<B: Backend, const D: usize>(
        &mut self,
        shape: [usize; D],
        device: &B::Device,
    ) -> Tensor<B, D> {
        let numel = shape.iter().product::<usize>();
        let values: Vec<f32> = (0..numel)
            .map(|_| self.rng.sample::<f32, _>(StandardNormal))
            .collect();
        Tensor::from_data(TensorData::new(values, shape), device)
    }
}
