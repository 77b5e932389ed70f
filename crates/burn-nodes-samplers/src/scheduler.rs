//! Sigma schedules
//!
//! A schedule is the ordered list of noise levels the sampling loop walks
//! through: `num_steps + 1` non-increasing values ending in `0.0`. Policies
//! that only need the model's sigma range go through [`build_schedule`]; the
//! timestep-based policies read the model's discrete sigma table through
//! [`ModelSampling::schedule`].

use std::str::FromStr;

use burn_nodes_core::{NodeError, NodeResult};

/// Karras et al. spacing exponent
pub const KARRAS_RHO: f32 = 7.0;

// ============================================================================
// Scheduler Policy
// ============================================================================

/// Named sigma spacing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerPolicy {
    /// Uniform in model timestep, sigmas interpolated from the model table
    #[default]
    Normal,
    /// Karras et al. rho=7 spacing between the sigma endpoints
    Karras,
    /// Uniform in log-sigma space
    Exponential,
    /// Uniform in sigma space
    Linear,
    /// Evenly strided picks straight from the model table
    Simple,
}

impl SchedulerPolicy {
    pub const NAMES: [&'static str; 5] = ["normal", "karras", "exponential", "linear", "simple"];

    pub fn name(&self) -> &'static str {
        match self {
            SchedulerPolicy::Normal => "normal",
            SchedulerPolicy::Karras => "karras",
            SchedulerPolicy::Exponential => "exponential",
            SchedulerPolicy::Linear => "linear",
            SchedulerPolicy::Simple => "simple",
        }
    }

    /// Whether the policy needs the model's per-timestep sigma table
    pub fn needs_sigma_table(&self) -> bool {
        matches!(self, SchedulerPolicy::Normal | SchedulerPolicy::Simple)
    }
}

impl FromStr for SchedulerPolicy {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(SchedulerPolicy::Normal),
            "karras" => Ok(SchedulerPolicy::Karras),
            "exponential" => Ok(SchedulerPolicy::Exponential),
            "linear" => Ok(SchedulerPolicy::Linear),
            "simple" => Ok(SchedulerPolicy::Simple),
            other => Err(NodeError::configuration(format!(
                "unknown scheduler '{other}', expected one of {:?}",
                Self::NAMES
            ))),
        }
    }
}

// ============================================================================
// Endpoint Schedules
// ============================================================================

/// `n` evenly spaced values from `start` to `end` inclusive
fn linspace(start: f32, end: f32, n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![start];
    }
    (0..n)
        .map(|i| start + (end - start) * (i as f32 / (n - 1) as f32))
        .collect()
}

fn check_steps(num_steps: usize) -> NodeResult<()> {
    if num_steps == 0 {
        return Err(NodeError::invalid_parameter("step count must be at least 1"));
    }
    Ok(())
}

/// Build a schedule from the model's sigma range
///
/// Returns `num_steps + 1` values, non-increasing, ending in `0.0`. Table-based
/// policies (`normal`, `simple`) need a [`ModelSampling`] and fail here with
/// [`NodeError::Configuration`].
pub fn build_schedule(
    policy: SchedulerPolicy,
    num_steps: usize,
    sigma_min: f32,
    sigma_max: f32,
) -> NodeResult<Vec<f32>> {
    check_steps(num_steps)?;
    if !(sigma_min > 0.0 && sigma_min <= sigma_max && sigma_max.is_finite()) {
        return Err(NodeError::invalid_parameter(format!(
            "sigma range must satisfy 0 < sigma_min <= sigma_max, got {sigma_min}..{sigma_max}"
        )));
    }

    let mut sigmas = match policy {
        SchedulerPolicy::Karras => {
            let min_inv_rho = sigma_min.powf(1.0 / KARRAS_RHO);
            let max_inv_rho = sigma_max.powf(1.0 / KARRAS_RHO);
            linspace(0.0, 1.0, num_steps)
                .into_iter()
                .map(|ramp| (max_inv_rho + ramp * (min_inv_rho - max_inv_rho)).powf(KARRAS_RHO))
                .collect()
        }
        SchedulerPolicy::Exponential => linspace(sigma_max.ln(), sigma_min.ln(), num_steps)
            .into_iter()
            .map(f32::exp)
            .collect(),
        SchedulerPolicy::Linear => linspace(sigma_max, sigma_min, num_steps),
        SchedulerPolicy::Normal | SchedulerPolicy::Simple => {
            return Err(NodeError::configuration(format!(
                "scheduler '{}' needs the model sigma table, use ModelSampling::schedule",
                policy.name()
            )));
        }
    };

    sigmas.push(0.0);
    Ok(sigmas)
}

/// Keep the trailing `round(denoise * num_steps)` transitions of a schedule
///
/// The count is clamped to at least one transition. `denoise == 1.0` returns
/// the schedule unchanged; values outside `[0, 1]` are rejected.
pub fn select_denoise_subrange(schedule: &[f32], denoise: f32) -> NodeResult<Vec<f32>> {
    if !(0.0..=1.0).contains(&denoise) {
        return Err(NodeError::invalid_parameter(format!(
            "denoise must be within [0, 1], got {denoise}"
        )));
    }
    if schedule.len() < 2 {
        return Err(NodeError::invalid_parameter(
            "schedule needs at least one transition",
        ));
    }

    let num_steps = schedule.len() - 1;
    let kept = ((denoise * num_steps as f32).round() as usize).clamp(1, num_steps);
    Ok(schedule[num_steps - kept..].to_vec())
}

/// Compute ancestral sampling step parameters
///
/// For stochastic samplers, splits the move to `sigma_next` into:
/// - sigma_down: the deterministic step target
/// - sigma_up: the noise injection level
///
/// The eta parameter controls stochasticity (0 = ODE, 1 = full SDE)
pub fn get_ancestral_step(sigma: f32, sigma_next: f32, eta: f32) -> (f32, f32) {
    if sigma_next == 0.0 || eta == 0.0 {
        return (sigma_next, 0.0);
    }

    let sigma_up = (eta
        * (sigma_next.powi(2) * (sigma.powi(2) - sigma_next.powi(2)) / sigma.powi(2)).sqrt())
    .min(sigma_next);
    let sigma_down = (sigma_next.powi(2) - sigma_up.powi(2)).sqrt();

    (sigma_down, sigma_up)
}

// ============================================================================
// Model Sampling Table
// ============================================================================

/// Discrete per-timestep sigma table of a model family
///
/// Index `t` holds the sigma of training timestep `t`, so the table ascends.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSampling {
    sigmas: Vec<f32>,
}

impl ModelSampling {
    /// Table from a scaled-linear beta schedule
    ///
    /// Betas are linear in `sqrt(beta)`; then
    /// `sigma_t = sqrt((1 - alpha_cumprod_t) / alpha_cumprod_t)`.
    pub fn scaled_linear(num_train_steps: usize, beta_start: f64, beta_end: f64) -> Self {
        let (start, end) = (beta_start.sqrt(), beta_end.sqrt());
        let mut cumprod = 1.0f64;
        let sigmas = (0..num_train_steps)
            .map(|i| {
                let t = i as f64 / (num_train_steps - 1).max(1) as f64;
                let beta = (start + t * (end - start)).powi(2);
                cumprod *= 1.0 - beta;
                ((1.0 - cumprod) / cumprod).sqrt() as f32
            })
            .collect();
        Self { sigmas }
    }

    /// Stable Diffusion 1.x: 1000 steps, betas 0.00085..0.012
    pub fn sd1x() -> Self {
        Self::scaled_linear(1000, 0.00085, 0.012)
    }

    /// Table from explicit ascending sigmas
    pub fn from_sigmas(sigmas: Vec<f32>) -> NodeResult<Self> {
        if sigmas.is_empty() || sigmas.windows(2).any(|w| w[1] < w[0]) || sigmas[0] <= 0.0 {
            return Err(NodeError::invalid_parameter(
                "model sigma table must be non-empty, positive and ascending",
            ));
        }
        Ok(Self { sigmas })
    }

    pub fn sigmas(&self) -> &[f32] {
        &self.sigmas
    }

    pub fn sigma_min(&self) -> f32 {
        self.sigmas[0]
    }

    pub fn sigma_max(&self) -> f32 {
        self.sigmas[self.sigmas.len() - 1]
    }

    /// Sigma at a fractional timestep, linear in log-sigma between entries
    pub fn sigma_at(&self, t: f32) -> f32 {
        let last = (self.sigmas.len() - 1) as f32;
        let t = t.clamp(0.0, last);
        let low = t.floor() as usize;
        let high = t.ceil() as usize;
        let w = t - low as f32;
        let log_sigma = (1.0 - w) * self.sigmas[low].ln() + w * self.sigmas[high].ln();
        log_sigma.exp()
    }

    /// Build a schedule for `policy` using this table
    pub fn schedule(&self, policy: SchedulerPolicy, num_steps: usize) -> NodeResult<Vec<f32>> {
        if !policy.needs_sigma_table() {
            return build_schedule(policy, num_steps, self.sigma_min(), self.sigma_max());
        }
        match policy {
            SchedulerPolicy::Normal => {
                check_steps(num_steps)?;
                let t_max = (self.sigmas.len() - 1) as f32;
                let mut sigmas: Vec<f32> = linspace(t_max, 0.0, num_steps)
                    .into_iter()
                    .map(|t| self.sigma_at(t))
                    .collect();
                sigmas.push(0.0);
                Ok(sigmas)
            }
            SchedulerPolicy::Simple => {
                check_steps(num_steps)?;
                let stride = self.sigmas.len() as f32 / num_steps as f32;
                let last = self.sigmas.len() - 1;
                let mut sigmas: Vec<f32> = (0..num_steps)
                    .map(|i| {
                        let offset = ((i as f32 * stride) as usize).min(last);
                        self.sigmas[last - offset]
                    })
                    .collect();
                sigmas.push(0.0);
                Ok(sigmas)
            }
            SchedulerPolicy::Karras | SchedulerPolicy::Exponential | SchedulerPolicy::Linear => {
                build_schedule(policy, num_steps, self.sigma_min(), self.sigma_max())
            }
        }
    }
}

impl Default for ModelSampling {
    fn default() -> Self {
        Self::sd1x()
    }
}
