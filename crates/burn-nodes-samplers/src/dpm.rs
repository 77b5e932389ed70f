//! DPM++ 2M sampler
//!
//! Second-order multistep DPM-Solver++ in log-sigma time `t = -ln(sigma)`.
//! The first step and the final step to sigma zero are first order; every
//! other step corrects the denoised prediction with the previous one.

use burn::prelude::*;
use burn_nodes_core::{NodeResult, NoiseGenerator};

use crate::algorithm::{Denoiser, SamplerStep, to_denoised};

pub struct DpmPp2mSampler<B: Backend> {
    /// Denoised prediction and sigma from the previous step
    previous: Option<(Tensor<B, 4>, f32)>,
}

impl<B: Backend> DpmPp2mSampler<B> {
    pub fn new() -> Self {
        Self { previous: None }
    }
}

impl<B: Backend> Default for DpmPp2mSampler<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> SamplerStep<B> for DpmPp2mSampler<B> {
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
        let noise_pred = denoiser.noise_estimate(latent.clone(), sigma)?;
        let denoised = to_denoised(latent.clone(), noise_pred, sigma);

        if sigma_next == 0.0 {
            self.previous = Some((denoised.clone(), sigma));
            return Ok(denoised);
        }

        let t = -sigma.ln();
        let t_next = -sigma_next.ln();
        let h = t_next - t;

        let corrected = match self.previous.take() {
            Some((old_denoised, old_sigma)) => {
                let h_last = t + old_sigma.ln();
                let r = h_last / h;
                let w = 1.0 / (2.0 * r);
                denoised.clone() * (1.0 + w) - old_denoised * w
            }
            None => denoised.clone(),
        };

        let x = latent * (sigma_next / sigma) + corrected * (1.0 - (-h).exp());
        self.previous = Some((denoised, sigma));
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::test_support::ConstantEstimate;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_first_step_is_exponential_integrator() {
        let device = <TestBackend as Backend>::Device::default();
        let sigmas = [2.0f32, 1.0, 0.0];
        let mut sampler = DpmPp2mSampler::<TestBackend>::new();
        let mut denoiser = ConstantEstimate(0.0);
        let mut noise = NoiseGenerator::new(0);
        let x: Tensor<TestBackend, 4> = Tensor::ones([1, 4, 1, 1], &device) * 3.0;

        // Zero noise estimate means denoised == x, and the step keeps x fixed
        let x = sampler
            .step(x, &sigmas, 0, &mut denoiser, &mut noise)
            .unwrap();
        let values: Vec<f32> = x.into_data().to_vec().unwrap();
        assert!(values.iter().all(|v| (v - 3.0).abs() < 1e-5));
        assert!(sampler.previous.is_some());
    }
}
