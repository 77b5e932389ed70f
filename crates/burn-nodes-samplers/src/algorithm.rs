//! Sampler algorithm selection
//!
//! Every algorithm advances the latent one schedule transition at a time
//! through [`SamplerStep`]. The guided noise estimate is behind [`Denoiser`],
//! so multi-evaluation methods (Heun, DPM2) just call it more than once.

use std::str::FromStr;

use burn::prelude::*;
use burn_nodes_core::{NodeError, NodeResult, NoiseGenerator};

use crate::dpm::DpmPp2mSampler;
use crate::dpm2::{Dpm2AncestralSampler, Dpm2Sampler};
use crate::euler::{EulerAncestralSampler, EulerConfig, EulerSampler};
use crate::heun::HeunSampler;
use crate::lms::{LmsConfig, LmsSampler};

/// Source of guided noise estimates at a given state and sigma
pub trait Denoiser<B: Backend> {
    fn noise_estimate(&mut self, latent: Tensor<B, 4>, sigma: f32) -> NodeResult<Tensor<B, 4>>;
}

/// One transition `sigmas[index] -> sigmas[index + 1]`
///
/// Implementations may keep history between calls; a fresh instance is built
/// for every request. `sigmas` is strictly decreasing. Stochastic steps draw from `noise`, the request's own
/// generator.
pub trait SamplerStep<B: Backend> {
    fn step(
        &mut self,
        latent: Tensor<B, 4>,
        sigmas: &[f32],
        index: usize,
        denoiser: &mut dyn Denoiser<B>,
        noise: &mut NoiseGenerator,
    ) -> NodeResult<Tensor<B, 4>>;
}

/// Denoised prediction from a noise estimate
pub(crate) fn to_denoised<B: Backend>(
    latent: Tensor<B, 4>,
    noise_pred: Tensor<B, 4>,
    sigma: f32,
) -> Tensor<B, 4> {
    latent - noise_pred * sigma
}

/// Available sampler algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerAlgorithm {
    #[default]
    Euler,
    EulerAncestral,
    Heun,
    Dpm2,
    Dpm2Ancestral,
    Lms,
    DpmPp2m,
}

impl SamplerAlgorithm {
    pub const NAMES: [&'static str; 7] = [
        "euler",
        "euler_ancestral",
        "heun",
        "dpm_2",
        "dpm_2_ancestral",
        "lms",
        "dpmpp_2m",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SamplerAlgorithm::Euler => "euler",
            SamplerAlgorithm::EulerAncestral => "euler_ancestral",
            SamplerAlgorithm::Heun => "heun",
            SamplerAlgorithm::Dpm2 => "dpm_2",
            SamplerAlgorithm::Dpm2Ancestral => "dpm_2_ancestral",
            SamplerAlgorithm::Lms => "lms",
            SamplerAlgorithm::DpmPp2m => "dpmpp_2m",
        }
    }

    /// Whether the schedule is built for one extra step and the penultimate
    /// sigma removed, so the final midpoint step lands on zero
    pub fn discards_penultimate_sigma(&self) -> bool {
        matches!(
            self,
            SamplerAlgorithm::Dpm2 | SamplerAlgorithm::Dpm2Ancestral
        )
    }

    /// Whether the algorithm injects fresh noise while stepping
    pub fn is_stochastic(&self) -> bool {
        matches!(
            self,
            SamplerAlgorithm::EulerAncestral | SamplerAlgorithm::Dpm2Ancestral
        )
    }

    /// Fresh step strategy for one request
    pub fn build<B: Backend>(&self) -> Box<dyn SamplerStep<B>> {
        match self {
            SamplerAlgorithm::Euler => Box::new(EulerSampler),
            SamplerAlgorithm::EulerAncestral => {
                Box::new(EulerAncestralSampler::new(EulerConfig::default()))
            }
            SamplerAlgorithm::Heun => Box::new(HeunSampler),
            SamplerAlgorithm::Dpm2 => Box::new(Dpm2Sampler),
            SamplerAlgorithm::Dpm2Ancestral => {
                Box::new(Dpm2AncestralSampler::new(EulerConfig::default()))
            }
            SamplerAlgorithm::Lms => Box::new(LmsSampler::new(LmsConfig::default())),
            SamplerAlgorithm::DpmPp2m => Box::new(DpmPp2mSampler::new()),
        }
    }
}

impl FromStr for SamplerAlgorithm {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .position(|name| *name == s)
            .map(|i| ALL[i])
            .ok_or_else(|| {
                NodeError::configuration(format!(
                    "unknown sampler '{s}', expected one of {:?}",
                    Self::NAMES
                ))
            })
    }
}

const ALL: [SamplerAlgorithm; 7] = [
    SamplerAlgorithm::Euler,
    SamplerAlgorithm::EulerAncestral,
    SamplerAlgorithm::Heun,
    SamplerAlgorithm::Dpm2,
    SamplerAlgorithm::Dpm2Ancestral,
    SamplerAlgorithm::Lms,
    SamplerAlgorithm::DpmPp2m,
];


#[cfg(test)]
mod tests {
    use super::test_support::TowardTarget;
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_names_round_trip() {
        for name in SamplerAlgorithm::NAMES {
            let algorithm: SamplerAlgorithm = name.parse().unwrap();
            assert_eq!(algorithm.name(), name);
        }
    }

    #[test]
    fn test_unknown_name_is_configuration_error() {
        assert!(matches!(
            "ddim".parse::<SamplerAlgorithm>(),
            Err(NodeError::Configuration(_))
        ));
    }

    #[test]
    fn test_only_midpoint_methods_discard_penultimate() {
        let discarding: Vec<_> = ALL
            .iter()
            .filter(|a| a.discards_penultimate_sigma())
            .map(|a| a.name())
            .collect();
        assert_eq!(discarding, vec!["dpm_2", "dpm_2_ancestral"]);
    }

    #[test]
    fn test_only_ancestral_methods_are_stochastic() {
        let stochastic: Vec<_> = ALL
            .iter()
            .filter(|a| a.is_stochastic())
            .map(|a| a.name())
            .collect();
        assert_eq!(stochastic, vec!["euler_ancestral", "dpm_2_ancestral"]);
    }

    #[test]
    fn test_every_algorithm_reaches_clean_prediction() {
        let device = <TestBackend as Backend>::Device::default();
        let sigmas = [10.0f32, 6.0, 3.0, 1.5, 0.5, 0.0];

        for algorithm in ALL {
            let mut strategy = algorithm.build::<TestBackend>();
            let mut denoiser = TowardTarget::new(0.25);
            let mut noise = NoiseGenerator::new(7);
            let mut x: Tensor<TestBackend, 4> = Tensor::ones([1, 4, 2, 2], &device) * 10.0;
            for index in 0..sigmas.len() - 1 {
                x = strategy
                    .step(x, &sigmas, index, &mut denoiser, &mut noise)
                    .unwrap();
            }
            let values: Vec<f32> = x.into_data().to_vec().unwrap();
            for v in values {
                assert!(
                    (v - 0.25).abs() < 1e-3,
                    "{} ended at {v}",
                    algorithm.name()
                );
            }
        }
    }
}
