//! K-sampler orchestrator
//!
//! Turns a [`SampleRequest`] into a denoised latent: validate, resolve the
//! sigma schedule, broadcast conditioning, seed noise, then run the selected
//! step strategy under a scoped compute placement.

use burn::prelude::*;
use burn_nodes_core::{Conditioning, Latent, NodeError, NodeResult, NoiseGenerator, Placement};

use crate::algorithm::SamplerAlgorithm;
use crate::guidance::CfgDenoiser;
use crate::model::DiffusionModel;
use crate::scheduler::{ModelSampling, SchedulerPolicy, select_denoise_subrange};

/// Everything one sampling run needs
#[derive(Debug, Clone)]
pub struct SampleRequest<B: Backend> {
    pub seed: u64,
    pub steps: usize,
    /// Classifier-free guidance scale
    pub cfg: f32,
    pub sampler_name: String,
    pub scheduler: String,
    pub positive: Conditioning<B>,
    pub negative: Conditioning<B>,
    pub latent: Latent<B>,
    /// Fraction of the schedule to run, ending at sigma zero
    pub denoise: f32,
}

impl<B: Backend> SampleRequest<B> {
    /// Request with the node defaults: seed 0, 20 steps, cfg 8, euler, normal
    pub fn new(positive: Conditioning<B>, negative: Conditioning<B>, latent: Latent<B>) -> Self {
        Self {
            seed: 0,
            steps: 20,
            cfg: 8.0,
            sampler_name: SamplerAlgorithm::Euler.name().to_string(),
            scheduler: SchedulerPolicy::Normal.name().to_string(),
            positive,
            negative,
            latent,
            denoise: 1.0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_cfg(mut self, cfg: f32) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_sampler(mut self, sampler_name: impl Into<String>) -> Self {
        self.sampler_name = sampler_name.into();
        self
    }

    pub fn with_scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = scheduler.into();
        self
    }

    pub fn with_denoise(mut self, denoise: f32) -> Self {
        self.denoise = denoise;
        self
    }
}

/// Sigma schedule for a request, with algorithm endpoints and denoise applied
///
/// Repeated sigmas collapse into one, so every transition strictly decreases
/// sigma. A zero-length transition would not move the latent, but multistep
/// methods divide by its length.
pub fn resolve_sigmas(
    sampling: &ModelSampling,
    policy: SchedulerPolicy,
    algorithm: SamplerAlgorithm,
    steps: usize,
    denoise: f32,
) -> NodeResult<Vec<f32>> {
    if steps == 0 {
        return Err(NodeError::invalid_parameter("step count must be at least 1"));
    }
    let sigmas = if algorithm.discards_penultimate_sigma() {
        let mut sigmas = sampling.schedule(policy, steps + 1)?;
        sigmas.remove(sigmas.len() - 2);
        sigmas
    } else {
        sampling.schedule(policy, steps)?
    };
    let mut sigmas = select_denoise_subrange(&sigmas, denoise)?;
    sigmas.dedup();
    Ok(sigmas)
}

/// Sampling orchestrator bound to a compute/storage placement
#[derive(Debug, Clone)]
pub struct KSampler<B: Backend> {
    placement: Placement<B>,
}

impl<B: Backend> KSampler<B> {
    pub fn new(placement: Placement<B>) -> Self {
        Self { placement }
    }

    pub fn placement(&self) -> &Placement<B> {
        &self.placement
    }

    /// Run one request to completion
    ///
    /// Nothing touches the model or the devices until every name and numeric
    /// input has been validated. The model is on the compute device only while
    /// the loop runs and is returned to storage on every exit path.
    #[tracing::instrument(
        skip_all,
        fields(
            seed = request.seed,
            steps = request.steps,
            sampler = %request.sampler_name,
            scheduler = %request.scheduler,
        )
    )]
    pub fn sample<M>(&self, model: &mut M, request: &SampleRequest<B>) -> NodeResult<Latent<B>>
    where
        M: DiffusionModel<B> + ?Sized,
    {
        let algorithm: SamplerAlgorithm = request.sampler_name.parse()?;
        let policy: SchedulerPolicy = request.scheduler.parse()?;
        validate_numbers(request)?;

        let sigmas = resolve_sigmas(
            &model.sampling(),
            policy,
            algorithm,
            request.steps,
            request.denoise,
        )?;

        let compute = &self.placement.compute;
        let batch = request.latent.batch_size();
        let positive = request.positive.prepare(batch, compute)?;
        let negative = request.negative.prepare(batch, compute)?;

        let mut noise = NoiseGenerator::new(request.seed);
        let initial_noise = noise.gaussian::<B, 4>(request.latent.dims(), &self.placement.storage);

        let guard = self.placement.acquire(model);
        let mut latent = request.latent.samples().clone().to_device(compute)
            + initial_noise.to_device(compute) * sigmas[0];

        tracing::info!(
            batch,
            transitions = sigmas.len() - 1,
            stochastic = algorithm.is_stochastic(),
            "sampling started"
        );
        let mut strategy = algorithm.build::<B>();
        let mut denoiser = CfgDenoiser::new(&*guard, &positive, &negative, request.cfg);
        let transitions = sigmas.len() - 1;
        for index in 0..transitions {
            latent = strategy.step(latent, &sigmas, index, &mut denoiser, &mut noise)?;
            tracing::debug!(
                step = index + 1,
                total = transitions,
                sigma = sigmas[index],
                sigma_next = sigmas[index + 1],
                "sampling step"
            );
        }
        drop(denoiser);
        drop(guard);

        tracing::info!(transitions, "sampling complete");
        Latent::new(latent.to_device(&self.placement.storage))
    }
}

impl<B: Backend> Default for KSampler<B> {
    fn default() -> Self {
        Self::new(Placement::default())
    }
}

fn validate_numbers<B: Backend>(request: &SampleRequest<B>) -> NodeResult<()> {
    if request.steps == 0 {
        return Err(NodeError::invalid_parameter("step count must be at least 1"));
    }
    if !(0.0..=1.0).contains(&request.denoise) {
        return Err(NodeError::invalid_parameter(format!(
            "denoise must be within [0, 1], got {}",
            request.denoise
        )));
    }
    if !request.cfg.is_finite() {
        return Err(NodeError::invalid_parameter(format!(
            "cfg must be finite, got {}",
            request.cfg
        )));
    }
    Ok(())
}
