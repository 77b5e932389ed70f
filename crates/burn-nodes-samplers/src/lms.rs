//! LMS (Linear Multi-Step) sampler
//!
//! Uses past derivatives to predict future values with higher accuracy.
//! Higher order = more past samples used = better accuracy but more memory.

use std::collections::VecDeque;

use burn::prelude::*;
use burn_nodes_core::{NodeResult, NoiseGenerator};

use crate::algorithm::{Denoiser, SamplerStep};

/// Configuration for LMS sampler
#[derive(Debug, Clone, Copy)]
pub struct LmsConfig {
    /// Order of the LMS method (1-4)
    pub order: usize,
}

impl Default for LmsConfig {
    fn default() -> Self {
        Self { order: 4 }
    }
}

/// LMS sampler
///
/// Linear Multi-Step method uses a linear combination of previous
/// derivatives to estimate the next sample.
pub struct LmsSampler<B: Backend> {
    order: usize,
    /// Most recent derivative first
    derivatives: VecDeque<Tensor<B, 4>>,
}

impl<B: Backend> LmsSampler<B> {
    pub fn new(config: LmsConfig) -> Self {
        let order = config.order.clamp(1, 4);
        Self {
            order,
            derivatives: VecDeque::with_capacity(order),
        }
    }
}

impl<B: Backend> SamplerStep<B> for LmsSampler<B> {
    fn step(
        &mut self,
        latent: Tensor<B, 4>,
        sigmas: &[f32],
        index: usize,
        denoiser: &mut dyn Denoiser<B>,
        _noise: &mut NoiseGenerator,
    ) -> NodeResult<Tensor<B, 4>> {
        let derivative = denoiser.noise_estimate(latent.clone(), sigmas[index])?;
        self.derivatives.push_front(derivative);
        self.derivatives.truncate(self.order);

        let current_order = self.derivatives.len().min(index + 1);
        let mut x = latent;
        for (j, d) in self.derivatives.iter().take(current_order).enumerate() {
            let coeff = lms_coefficient(current_order, sigmas, index, j);
            x = x + d.clone() * coeff;
        }
        Ok(x)
    }
}

/// Integrated Lagrange basis coefficient for derivative `j` steps back
///
/// Integrates `prod_{k != j} (tau - t[i-k]) / (t[i-j] - t[i-k])` over
/// `[t[i], t[i+1]]` exactly by expanding the polynomial. The coefficients for
/// `j in 0..order` sum to `t[i+1] - t[i]`.
pub fn lms_coefficient(order: usize, sigmas: &[f32], index: usize, j: usize) -> f32 {
    let t_j = sigmas[index - j] as f64;

    // Ascending powers of tau
    let mut poly = vec![1.0f64];
    for k in (0..order).filter(|&k| k != j) {
        let t_k = sigmas[index - k] as f64;
        let denom = t_j - t_k;
        let mut next = vec![0.0f64; poly.len() + 1];
        for (power, c) in poly.iter().enumerate() {
            next[power + 1] += c / denom;
            next[power] -= c * t_k / denom;
        }
        poly = next;
    }

    let antiderivative = |tau: f64| -> f64 {
        poly.iter()
            .enumerate()
            .map(|(power, c)| c * tau.powi(power as i32 + 1) / (power + 1) as f64)
            .sum()
    };
    (antiderivative(sigmas[index + 1] as f64) - antiderivative(sigmas[index] as f64)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::test_support::ConstantEstimate;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_first_order_coefficient_is_dt() {
        let sigmas = [3.0f32, 2.0, 1.0];
        assert!((lms_coefficient(1, &sigmas, 0, 0) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_second_order_coefficients() {
        let sigmas = [3.0f32, 2.0, 1.0];
        assert!((lms_coefficient(2, &sigmas, 1, 0) + 1.5).abs() < 1e-6);
        assert!((lms_coefficient(2, &sigmas, 1, 1) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_coefficients_sum_to_step() {
        let sigmas = [14.6f32, 9.7, 6.1, 3.5, 1.7, 0.6, 0.0];
        for index in 3..sigmas.len() - 1 {
            let sum: f32 = (0..4).map(|j| lms_coefficient(4, &sigmas, index, j)).sum();
            let dt = sigmas[index + 1] - sigmas[index];
            assert!((sum - dt).abs() < 1e-4, "{sum} vs {dt}");
        }
    }

    #[test]
    fn test_history_is_bounded_by_order() {
        let device = <TestBackend as Backend>::Device::default();
        let sigmas = [5.0f32, 4.0, 3.0, 2.0, 1.0, 0.5, 0.0];
        let mut sampler = LmsSampler::<TestBackend>::new(LmsConfig::default());
        let mut denoiser = ConstantEstimate(1.0);
        let mut noise = NoiseGenerator::new(0);
        let mut x: Tensor<TestBackend, 4> = Tensor::zeros([1, 4, 1, 1], &device);
        for index in 0..sigmas.len() - 1 {
            x = sampler
                .step(x, &sigmas, index, &mut denoiser, &mut noise)
                .unwrap();
        }
        assert_eq!(sampler.derivatives.len(), 4);
        // A constant derivative integrates exactly
        let values: Vec<f32> = x.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (v + 5.0).abs() < 1e-4));
    }
}
