//! burn-nodes-samplers: sigma schedules, guidance and the k-sampler
//!
//! - [`scheduler`]: the model sigma table and the schedule policies
//! - [`guidance`]: classifier-free guidance with area compositing
//! - [`algorithm`]: step strategies (euler, heun, dpm_2, lms, dpmpp_2m, ...)
//! - [`ksampler`]: the request orchestrator

pub mod algorithm;
pub mod dpm;
pub mod dpm2;
pub mod euler;
pub mod guidance;
pub mod heun;
pub mod ksampler;
pub mod lms;
pub mod model;
pub mod scheduler;

pub use algorithm::{Denoiser, SamplerAlgorithm, SamplerStep};
pub use dpm::DpmPp2mSampler;
pub use dpm2::{Dpm2AncestralSampler, Dpm2Sampler};
pub use euler::{EulerAncestralSampler, EulerConfig, EulerSampler};
pub use guidance::{CfgDenoiser, apply_guidance, conditioned_estimate};
pub use heun::HeunSampler;
pub use ksampler::{KSampler, SampleRequest, resolve_sigmas};
pub use lms::{LmsConfig, LmsSampler, lms_coefficient};
pub use model::DiffusionModel;
pub use scheduler::{
    KARRAS_RHO, ModelSampling, SchedulerPolicy, build_schedule, get_ancestral_step,
    select_denoise_subrange,
};
