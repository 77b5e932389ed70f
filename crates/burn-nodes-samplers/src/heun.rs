//! Heun sampler
//!
//! Second-order: an Euler predictor followed by a trapezoidal corrector.
//! Costs two model evaluations per step except the last, which falls back to
//! Euler because the derivative at sigma zero is undefined.

use burn::prelude::*;
use burn_nodes_core::{NodeResult, NoiseGenerator};

use crate::algorithm::{Denoiser, SamplerStep};

#[derive(Debug, Clone, Copy, Default)]
pub struct HeunSampler;

impl<B: Backend> SamplerStep<B> for HeunSampler {
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
        let dt = sigma_next - sigma;

        let derivative = denoiser.noise_estimate(latent.clone(), sigma)?;
        let predicted = latent.clone() + derivative.clone() * dt;
        if sigma_next == 0.0 {
            return Ok(predicted);
        }

        let derivative_next = denoiser.noise_estimate(predicted, sigma_next)?;
        Ok(latent + (derivative + derivative_next) * (dt / 2.0))
    }
}
