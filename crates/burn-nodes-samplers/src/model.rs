//! Denoising model boundary

use burn::prelude::*;
use burn_nodes_core::{ConditioningEntry, NodeResult, Placeable};

use crate::scheduler::ModelSampling;

/// The denoising network, treated as a black box
///
/// `apply` receives the current noisy latent (or a spatial crop of it), the
/// conditioning entries active for that region at `sigma`, and the noise level
/// itself. It returns a noise estimate with the latent's shape. Any input
/// scaling or sigma-to-timestep mapping the network needs happens inside the
/// implementation.
pub trait DiffusionModel<B: Backend>: Placeable<B> {
    fn apply(
        &self,
        latent: Tensor<B, 4>,
        conditioning: &[ConditioningEntry<B>],
        sigma: f32,
    ) -> NodeResult<Tensor<B, 4>>;

    /// Discrete sigma table of the model family
    fn sampling(&self) -> ModelSampling {
        ModelSampling::sd1x()
    }
}
