//! DPM2 samplers
//!
//! Second-order DPM-Solver steps that re-evaluate the model at the geometric
//! midpoint of the transition. Schedules for these are built one step longer
//! with the penultimate sigma removed, see
//! [`SamplerAlgorithm::discards_penultimate_sigma`](crate::SamplerAlgorithm::discards_penultimate_sigma).

use burn::prelude::*;
use burn_nodes_core::{NodeResult, NoiseGenerator};

use crate::algorithm::{Denoiser, SamplerStep};
use crate::euler::EulerConfig;
use crate::scheduler::get_ancestral_step;

/// Geometric mean of two sigmas, i.e. the midpoint in log-sigma
fn log_midpoint(sigma: f32, sigma_next: f32) -> f32 {
    let (a, b) = (sigma.ln(), sigma_next.ln());
    (a + (b - a) * 0.5).exp()
}

/// Midpoint step from `sigma` toward `target`, given the derivative at `sigma`
fn midpoint_step<B: Backend>(
    latent: Tensor<B, 4>,
    derivative: Tensor<B, 4>,
    sigma: f32,
    target: f32,
    denoiser: &mut dyn Denoiser<B>,
) -> NodeResult<Tensor<B, 4>> {
    let sigma_mid = log_midpoint(sigma, target);
    let half = latent.clone() + derivative * (sigma_mid - sigma);
    let derivative_mid = denoiser.noise_estimate(half, sigma_mid)?;
    Ok(latent + derivative_mid * (target - sigma))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Dpm2Sampler;

impl<B: Backend> SamplerStep<B> for Dpm2Sampler {
    fn step(
        &mut self,
        latent: Tensor<B, 4>,
        sigmas: &[f32],
        index: usize,
        denoiser: &mut dyn Denoiser<B>,
        _noise: &mut NoiseGenerator,
    ) -> NodeResult<Tensor<B, 4>> {
        let sigma = sigmas[index];
        let sigma_next = sigmas[index + 1];
        let derivative = denoiser.noise_estimate(latent.clone(), sigma)?;

        if sigma_next == 0.0 {
            return Ok(latent + derivative * (sigma_next - sigma));
        }
        midpoint_step(latent, derivative, sigma, sigma_next, denoiser)
    }
}

/// DPM2 with ancestral noise injection
#[derive(Debug, Clone, Copy)]
pub struct Dpm2AncestralSampler {
    config: EulerConfig,
}

impl Dpm2AncestralSampler {
    pub fn new(config: EulerConfig) -> Self {
        Self { config }
    }
}

impl<B: Backend> SamplerStep<B> for Dpm2AncestralSampler {
    fn step(
        &mut self,
        latent: Tensor<B, 4>,
        sigmas: &[f32],
        index: usize,
        denoiser: &mut dyn Denoiser<B>,
        noise: &mut NoiseGenerator,
    ) -> NodeResult<Tensor<B, 4>> {
        let sigma = sigmas[index];
        let sigma_next = sigmas[index + 1];
        let derivative = denoiser.noise_estimate(latent.clone(), sigma)?;
        let (sigma_down, sigma_up) = get_ancestral_step(sigma, sigma_next, self.config.eta);

        let stepped = if sigma_down == 0.0 {
            latent + derivative * (sigma_down - sigma)
        } else {
            midpoint_step(latent, derivative, sigma, sigma_down, denoiser)?
        };

        if sigma_next > 0.0 {
            let fresh = noise.gaussian::<B, 4>(stepped.dims(), &stepped.device());
            return Ok(stepped + fresh * (self.config.s_noise * sigma_up));
        }
        Ok(stepped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::test_support::TowardTarget;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_log_midpoint() {
        assert!((log_midpoint(4.0, 1.0) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_dpm2_queries_midpoint() {
        let device = <TestBackend as Backend>::Device::default();
        let sigmas = [9.0f32, 1.0, 0.0];
        let mut denoiser = TowardTarget::new(0.0);
        let mut noise = NoiseGenerator::new(0);
        let x: Tensor<TestBackend, 4> = Tensor::ones([1, 4, 1, 1], &device);

        Dpm2Sampler
            .step(x, &sigmas, 0, &mut denoiser, &mut noise)
            .unwrap();
        assert_eq!(denoiser.calls.len(), 2);
        assert!((denoiser.calls[1] - 3.0).abs() < 1e-5);
    }
}
